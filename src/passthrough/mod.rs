// Command passthrough: SG_IO dispatch, NVMe admin commands and resets

pub mod dispatch;
pub mod nvme;
pub mod reset;
pub mod sense;
pub mod sg;
pub mod status;

pub use dispatch::{
    compute_timeout_ms, decode_sg_result, is_infinite_timeout_supported, DataDirection,
    Dispatcher, NoTranslator, RaidIo, ReturnStatus, ScsiIoCtx, ScsiToNvmeTranslator,
};
pub use nvme::{
    nvme_reset, nvme_subsystem_reset, send_nvme_io, NvmeAdapter, NvmeCmdCtx, NvmeCommand,
    NvmeCompletion, NvmeRawCommand, NvmeSubsystem, NvmeUserIo, UnavailableNvme,
};
pub use reset::ResetScope;
pub use sense::{parse_sense, SenseFields};
pub use sg::{LinuxSgTransport, ResetOp, ResetState, SgIoHdr, SgScsiId, SgTransport};
