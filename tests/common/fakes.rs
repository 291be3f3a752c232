// Hand-written collaborators; the mockall mocks are only built for unit tests

use nix::errno::Errno;
use sayonara_passthrough::passthrough::{
    NvmeAdapter, NvmeUserIo, ResetOp, ResetState, SgIoHdr, SgScsiId,
};
use sayonara_passthrough::{NvmeHandle, NvmeSubsystem, SgTransport};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Completion fields written into the header by [`FakeSg::sg_io`]
#[derive(Debug, Clone, Default)]
pub struct SgReply {
    pub info: u32,
    pub masked_status: u8,
    pub host_status: u16,
    pub driver_status: u16,
    pub sense: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Default)]
pub struct FakeSg {
    pub sg_io_calls: AtomicUsize,
    pub scsi_id_calls: AtomicUsize,
    pub last_timeout_ms: Mutex<Option<u32>>,
    pub reply: Mutex<SgReply>,
    pub address: Option<SgScsiId>,
}

impl FakeSg {
    pub fn with_reply(reply: SgReply) -> Self {
        Self {
            reply: Mutex::new(reply),
            ..Self::default()
        }
    }

    pub fn ioctl_count(&self) -> usize {
        self.sg_io_calls.load(Ordering::SeqCst)
    }
}

impl SgTransport for FakeSg {
    fn sg_io(&self, _fd: RawFd, hdr: &mut SgIoHdr) -> Result<(), Errno> {
        self.sg_io_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_timeout_ms.lock().unwrap() = Some(hdr.timeout);

        let reply = self.reply.lock().unwrap().clone();
        hdr.info = reply.info;
        hdr.masked_status = reply.masked_status;
        hdr.host_status = reply.host_status;
        hdr.driver_status = reply.driver_status;

        let sense_len = reply.sense.len().min(hdr.mx_sb_len as usize);
        if sense_len > 0 {
            // SAFETY: sbp points at a buffer of at least mx_sb_len bytes
            unsafe { std::ptr::copy_nonoverlapping(reply.sense.as_ptr(), hdr.sbp, sense_len) };
        }
        hdr.sb_len_wr = sense_len as u8;

        let data_len = reply.data.len().min(hdr.dxfer_len as usize);
        if data_len > 0 {
            // SAFETY: dxferp points at a buffer of dxfer_len bytes
            unsafe {
                std::ptr::copy_nonoverlapping(reply.data.as_ptr(), hdr.dxferp.cast::<u8>(), data_len)
            };
        }
        Ok(())
    }

    fn scsi_id(&self, _fd: RawFd) -> Result<SgScsiId, Errno> {
        self.scsi_id_calls.fetch_add(1, Ordering::SeqCst);
        self.address.ok_or(Errno::ENOTTY)
    }

    fn scsi_reset(&self, _fd: RawFd, _op: ResetOp) -> Result<ResetState, Errno> {
        Ok(ResetState::Done)
    }
}

/// NVMe subsystem with a fixed adapter list; `None` fails every query
pub struct FakeNvme {
    pub adapters: Option<Vec<&'static str>>,
    pub open_calls: AtomicUsize,
}

impl FakeNvme {
    pub fn new(adapters: Option<Vec<&'static str>>) -> Self {
        Self {
            adapters,
            open_calls: AtomicUsize::new(0),
        }
    }
}

impl NvmeSubsystem for FakeNvme {
    fn adapter_list(&self) -> Result<Vec<NvmeAdapter>, Errno> {
        self.adapters
            .as_ref()
            .map(|names| names.iter().map(|n| NvmeAdapter::new(*n)).collect())
            .ok_or(Errno::ENODEV)
    }

    fn open(&self, adapters: &[NvmeAdapter], name: &str) -> Result<NvmeHandle, Errno> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        adapters
            .iter()
            .position(|a| a.name == name)
            .map(|i| NvmeHandle {
                id: i as u64 + 1,
                adapter: name.to_string(),
            })
            .ok_or(Errno::ENOENT)
    }

    fn close(&self, _handle: &NvmeHandle) -> Result<(), Errno> {
        Ok(())
    }

    fn admin_passthru(&self, _handle: &NvmeHandle, _uio: &mut NvmeUserIo) -> Result<(), Errno> {
        Ok(())
    }
}
