/// NVMe admin passthrough through the host NVMe management subsystem
///
/// Adapters (`vmhba*`) are not device files: they are listed, opened and
/// driven through [`NvmeSubsystem`], which owns the actual driver calls.
use super::dispatch::DataDirection;
use crate::{DeviceError, DeviceIdentity, DeviceResult, NvmeHandle, OsHandle};
use nix::errno::Errno;
use std::time::Instant;

/// Used when the command context leaves the timeout at zero
pub const NVME_DEFAULT_TIMEOUT_US: u32 = 15_000;

/// One adapter reported by the subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmeAdapter {
    pub name: String,
    pub signature: String,
}

impl NvmeAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: String::new(),
        }
    }
}

/// Submission queue entry fields a caller can set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NvmeRawCommand {
    pub opcode: u8,
    pub flags: u8,
    pub nsid: u32,
    pub cdw2: u32,
    pub cdw3: u32,
    pub metadata: u64,
    pub metadata_len: u32,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmeCommand {
    Admin(NvmeRawCommand),
    Nvm(NvmeRawCommand),
}

/// Transfer direction understood by the subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmeXfer {
    ToDevice,
    FromDevice,
}

/// Completion queue entry as the subsystem returns it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NvmeRawCompletion {
    pub command_specific: u32,
    pub reserved: u32,
    pub sq_head_ptr: u16,
    pub sq_id: u16,
    pub cmd_id: u16,
    pub phase_tag: bool,
    pub status_code: u8,
    pub status_code_type: u8,
    pub more: bool,
    pub no_retry: bool,
}

/// Request handed to [`NvmeSubsystem::admin_passthru`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmeUserIo {
    pub cmd: NvmeRawCommand,
    pub direction: NvmeXfer,
    pub namespace_id: u32,
    pub timeout_us: u32,
    /// Data buffer; filled by the subsystem for FromDevice transfers
    pub data: Vec<u8>,
    pub completion: NvmeRawCompletion,
}

/// Completion dwords in the form callers decode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NvmeCompletion {
    pub command_specific: u32,
    pub dw0_valid: bool,
    pub reserved: u32,
    pub dw1_valid: bool,
    pub sq_id_and_head_ptr: u32,
    pub dw2_valid: bool,
    pub status_and_cid: u32,
    pub dw3_valid: bool,
}

impl From<&NvmeRawCompletion> for NvmeCompletion {
    fn from(c: &NvmeRawCompletion) -> Self {
        Self {
            command_specific: c.command_specific,
            dw0_valid: true,
            reserved: c.reserved,
            dw1_valid: true,
            sq_id_and_head_ptr: (u32::from(c.sq_id) << 16) | u32::from(c.sq_head_ptr),
            dw2_valid: true,
            status_and_cid: u32::from(c.cmd_id)
                | (u32::from(c.phase_tag) << 16)
                | (u32::from(c.status_code) << 17)
                | (u32::from(c.status_code_type & 0x7) << 25)
                | (u32::from(c.more) << 30)
                | (u32::from(c.no_retry) << 31),
            dw3_valid: true,
        }
    }
}

impl NvmeCompletion {
    pub fn status_code(&self) -> u8 {
        ((self.status_and_cid >> 17) & 0xff) as u8
    }

    pub fn status_code_type(&self) -> u8 {
        ((self.status_and_cid >> 25) & 0x7) as u8
    }

    pub fn is_success(&self) -> bool {
        self.status_code() == 0 && self.status_code_type() == 0
    }
}

/// Per-command NVMe context
#[derive(Debug)]
pub struct NvmeCmdCtx<'a> {
    pub command: NvmeCommand,
    pub direction: DataDirection,
    pub data: &'a mut [u8],
    /// Scaled by 1000 into the subsystem's microsecond timeout; 0 picks the default
    pub timeout: u32,
    pub completion: NvmeCompletion,
}

impl<'a> NvmeCmdCtx<'a> {
    pub fn admin(cmd: NvmeRawCommand, direction: DataDirection, data: &'a mut [u8]) -> Self {
        Self {
            command: NvmeCommand::Admin(cmd),
            direction,
            data,
            timeout: 0,
            completion: NvmeCompletion::default(),
        }
    }

    pub fn timeout_us(&self) -> u32 {
        if self.timeout == 0 {
            NVME_DEFAULT_TIMEOUT_US
        } else {
            self.timeout.saturating_mul(1000)
        }
    }
}

/// Host NVMe management interface
#[cfg_attr(test, mockall::automock)]
pub trait NvmeSubsystem: Send + Sync {
    fn adapter_list(&self) -> Result<Vec<NvmeAdapter>, Errno>;

    fn open(&self, adapters: &[NvmeAdapter], name: &str) -> Result<NvmeHandle, Errno>;

    fn close(&self, handle: &NvmeHandle) -> Result<(), Errno>;

    fn admin_passthru(&self, handle: &NvmeHandle, uio: &mut NvmeUserIo) -> Result<(), Errno>;
}

/// Stand-in for hosts without an NVMe management subsystem: every query
/// reports ENODEV, so enumeration contributes no adapters.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableNvme;

impl NvmeSubsystem for UnavailableNvme {
    fn adapter_list(&self) -> Result<Vec<NvmeAdapter>, Errno> {
        Err(Errno::ENODEV)
    }

    fn open(&self, _adapters: &[NvmeAdapter], _name: &str) -> Result<NvmeHandle, Errno> {
        Err(Errno::ENODEV)
    }

    fn close(&self, _handle: &NvmeHandle) -> Result<(), Errno> {
        Err(Errno::ENODEV)
    }

    fn admin_passthru(&self, _handle: &NvmeHandle, _uio: &mut NvmeUserIo) -> Result<(), Errno> {
        Err(Errno::ENODEV)
    }
}

/// Issue an admin command through the subsystem.
///
/// The completion is copied back even when the subsystem reports an error so
/// callers can inspect the status code.
#[cfg(feature = "nvme-passthrough")]
pub fn send_nvme_io(
    nvme: &dyn NvmeSubsystem,
    device: &mut DeviceIdentity,
    ctx: &mut NvmeCmdCtx<'_>,
) -> DeviceResult<()> {
    let cmd = match ctx.command {
        NvmeCommand::Admin(cmd) => cmd,
        NvmeCommand::Nvm(_) => {
            return Err(DeviceError::BadParameter(
                "only admin commands can be passed through".to_string(),
            ))
        }
    };

    let handle = match &device.os_handle {
        Some(OsHandle::Nvme(handle)) => handle.clone(),
        _ => {
            return Err(DeviceError::BadParameter(format!(
                "{} has no open NVMe handle",
                device.name
            )))
        }
    };

    let direction = match ctx.direction {
        DataDirection::None | DataDirection::In => NvmeXfer::FromDevice,
        _ => NvmeXfer::ToDevice,
    };

    let mut uio = NvmeUserIo {
        cmd,
        direction,
        namespace_id: cmd.nsid,
        timeout_us: ctx.timeout_us(),
        data: ctx.data.to_vec(),
        completion: NvmeRawCompletion::default(),
    };

    tracing::debug!(
        device = %device.name,
        opcode = format_args!("{:#04x}", cmd.opcode),
        nsid = cmd.nsid,
        cdw10 = format_args!("{:#x}", cmd.cdw10),
        len = uio.data.len(),
        "Sending NVMe admin command"
    );

    let start = Instant::now();
    let result = nvme.admin_passthru(&handle, &mut uio);
    device.last_command_time = Some(start.elapsed());
    device.last_error = Some(match result {
        Ok(()) => 0,
        Err(errno) => errno as i32,
    });

    if direction == NvmeXfer::FromDevice {
        let n = uio.data.len().min(ctx.data.len());
        ctx.data[..n].copy_from_slice(&uio.data[..n]);
    }
    ctx.completion = NvmeCompletion::from(&uio.completion);

    if let Some(delay) = device.delay_io {
        tracing::debug!(delay = ?delay, "Delaying between commands");
        std::thread::sleep(delay);
    }

    result.map_err(|errno| {
        tracing::warn!(device = %device.name, error = %errno, "NVMe admin passthrough failed");
        DeviceError::PassthroughFailure(format!("NVMe admin passthrough: {}", errno.desc()))
    })
}

#[cfg(not(feature = "nvme-passthrough"))]
pub fn send_nvme_io(
    _nvme: &dyn NvmeSubsystem,
    _device: &mut DeviceIdentity,
    _ctx: &mut NvmeCmdCtx<'_>,
) -> DeviceResult<()> {
    Err(DeviceError::NotSupported(
        "built without NVMe passthrough".to_string(),
    ))
}

/// Controller reset; the management subsystem offers no such call
pub fn nvme_reset(_device: &mut DeviceIdentity) -> DeviceResult<()> {
    Err(DeviceError::NotSupported("NVMe controller reset".to_string()))
}

pub fn nvme_subsystem_reset(_device: &mut DeviceIdentity) -> DeviceResult<()> {
    Err(DeviceError::NotSupported("NVMe subsystem reset".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InterfaceType;

    fn nvme_device() -> DeviceIdentity {
        let mut device = DeviceIdentity::new("vmhba1");
        device.interface_type = InterfaceType::NVMe;
        device.os_handle = Some(OsHandle::Nvme(NvmeHandle {
            id: 7,
            adapter: "vmhba1".to_string(),
        }));
        device
    }

    fn identify() -> NvmeRawCommand {
        NvmeRawCommand {
            opcode: 0x06,
            cdw10: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_completion_packing() {
        let raw = NvmeRawCompletion {
            command_specific: 0xdead_beef,
            reserved: 0,
            sq_head_ptr: 0x0012,
            sq_id: 0x0003,
            cmd_id: 0x00ab,
            phase_tag: true,
            status_code: 0x02,
            status_code_type: 0x1,
            more: false,
            no_retry: true,
        };
        let completion = NvmeCompletion::from(&raw);
        assert_eq!(completion.command_specific, 0xdead_beef);
        assert_eq!(completion.sq_id_and_head_ptr, 0x0003_0012);
        assert_eq!(
            completion.status_and_cid,
            0xabu32 | (1 << 16) | (0x02 << 17) | (0x1 << 25) | (1 << 31)
        );
        assert_eq!(completion.status_code(), 0x02);
        assert_eq!(completion.status_code_type(), 0x1);
        assert!(!completion.is_success());
        assert!(completion.dw0_valid && completion.dw1_valid);
        assert!(completion.dw2_valid && completion.dw3_valid);
    }

    #[test]
    fn test_timeout_scaling() {
        let mut buf = [0u8; 0];
        let mut ctx = NvmeCmdCtx::admin(identify(), DataDirection::None, &mut buf);
        assert_eq!(ctx.timeout_us(), NVME_DEFAULT_TIMEOUT_US);
        ctx.timeout = 30;
        assert_eq!(ctx.timeout_us(), 30_000);
        ctx.timeout = u32::MAX;
        assert_eq!(ctx.timeout_us(), u32::MAX);
    }

    #[cfg(feature = "nvme-passthrough")]
    #[test]
    fn test_admin_command_copies_data_back() {
        let mut nvme = MockNvmeSubsystem::new();
        nvme.expect_admin_passthru()
            .withf(|handle, uio| {
                handle.id == 7 && uio.direction == NvmeXfer::FromDevice && uio.timeout_us == 15_000
            })
            .times(1)
            .returning(|_, uio| {
                uio.data[0] = 0x44;
                uio.completion.cmd_id = 9;
                Ok(())
            });

        let mut device = nvme_device();
        let mut buf = [0u8; 16];
        let mut ctx = NvmeCmdCtx::admin(identify(), DataDirection::In, &mut buf);
        send_nvme_io(&nvme, &mut device, &mut ctx).unwrap();

        assert_eq!(ctx.completion.status_and_cid & 0xffff, 9);
        assert!(ctx.completion.is_success());
        assert_eq!(buf[0], 0x44);
        assert_eq!(device.last_error, Some(0));
        assert!(device.last_command_time.is_some());
    }

    #[cfg(feature = "nvme-passthrough")]
    #[test]
    fn test_out_direction_goes_to_device() {
        let mut nvme = MockNvmeSubsystem::new();
        nvme.expect_admin_passthru()
            .withf(|_, uio| uio.direction == NvmeXfer::ToDevice && uio.data == vec![1, 2, 3])
            .times(1)
            .returning(|_, _| Ok(()));

        let mut device = nvme_device();
        let mut buf = [1u8, 2, 3];
        let mut ctx = NvmeCmdCtx::admin(identify(), DataDirection::Out, &mut buf);
        send_nvme_io(&nvme, &mut device, &mut ctx).unwrap();
    }

    #[cfg(feature = "nvme-passthrough")]
    #[test]
    fn test_nvm_commands_are_rejected() {
        let nvme = MockNvmeSubsystem::new();
        let mut device = nvme_device();
        let mut buf = [0u8; 4];
        let mut ctx = NvmeCmdCtx {
            command: NvmeCommand::Nvm(NvmeRawCommand::default()),
            direction: DataDirection::None,
            data: &mut buf,
            timeout: 0,
            completion: NvmeCompletion::default(),
        };
        let err = send_nvme_io(&nvme, &mut device, &mut ctx).unwrap_err();
        assert!(matches!(err, DeviceError::BadParameter(_)));
    }

    #[cfg(feature = "nvme-passthrough")]
    #[test]
    fn test_subsystem_error_is_passthrough_failure() {
        let mut nvme = MockNvmeSubsystem::new();
        nvme.expect_admin_passthru()
            .returning(|_, uio| {
                uio.completion.status_code = 0x0b;
                Err(Errno::EIO)
            });

        let mut device = nvme_device();
        let mut buf = [0u8; 4];
        let mut ctx = NvmeCmdCtx::admin(identify(), DataDirection::None, &mut buf);
        let err = send_nvme_io(&nvme, &mut device, &mut ctx).unwrap_err();

        assert!(matches!(err, DeviceError::PassthroughFailure(_)));
        assert_eq!(ctx.completion.status_code(), 0x0b);
        assert_eq!(device.last_error, Some(Errno::EIO as i32));
    }

    #[test]
    fn test_reset_stubs() {
        let mut device = nvme_device();
        assert!(matches!(
            nvme_reset(&mut device),
            Err(DeviceError::NotSupported(_))
        ));
        assert!(matches!(
            nvme_subsystem_reset(&mut device),
            Err(DeviceError::NotSupported(_))
        ));
    }

    #[test]
    fn test_unavailable_subsystem() {
        let nvme = UnavailableNvme;
        assert_eq!(nvme.adapter_list(), Err(Errno::ENODEV));
        assert_eq!(nvme.open(&[], "vmhba0"), Err(Errno::ENODEV));
    }
}
