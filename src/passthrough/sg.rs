// Linux SCSI generic (sg) ioctl surface
//
// Layouts mirror <scsi/sg.h>; every raw syscall in the crate goes through
// `SgTransport` so dispatch and reset logic can run against a fake.

use nix::errno::Errno;
use std::os::unix::io::RawFd;

pub const SG_IO: u32 = 0x2285;
pub const SG_GET_SCSI_ID: u32 = 0x2276;
pub const SG_SCSI_RESET: u32 = 0x2284;

pub const SG_INTERFACE_ID: i32 = b'S' as i32;

pub const SG_DXFER_NONE: i32 = -1;
pub const SG_DXFER_TO_DEV: i32 = -2;
pub const SG_DXFER_FROM_DEV: i32 = -3;
pub const SG_DXFER_TO_FROM_DEV: i32 = -4;

pub const SG_INFO_OK_MASK: u32 = 0x1;
pub const SG_INFO_OK: u32 = 0x0;
pub const SG_INFO_DIRECT_IO_MASK: u32 = 0x6;
pub const SG_INFO_INDIRECT_IO: u32 = 0x0;
pub const SG_INFO_DIRECT_IO: u32 = 0x2;
pub const SG_INFO_MIXED_IO: u32 = 0x4;

/// Largest per-command timeout in seconds that still fits in milliseconds
pub const SG_MAX_CMD_TIMEOUT_SECONDS: u32 = 4_294_967;
/// `timeout` value the sg driver treats as "no timeout"
pub const SG_TIMEOUT_UNLIMITED: u32 = u32::MAX;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u32 = 15_000;

/// Sense buffer length allocated when the caller does not supply one
pub const SPC3_SENSE_LEN: usize = 252;

/// `struct sg_io_hdr`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SgIoHdr {
    pub interface_id: libc::c_int,
    pub dxfer_direction: libc::c_int,
    pub cmd_len: libc::c_uchar,
    pub mx_sb_len: libc::c_uchar,
    pub iovec_count: libc::c_ushort,
    pub dxfer_len: libc::c_uint,
    pub dxferp: *mut libc::c_void,
    pub cmdp: *mut libc::c_uchar,
    pub sbp: *mut libc::c_uchar,
    pub timeout: libc::c_uint,
    pub flags: libc::c_uint,
    pub pack_id: libc::c_int,
    pub usr_ptr: *mut libc::c_void,
    pub status: libc::c_uchar,
    pub masked_status: libc::c_uchar,
    pub msg_status: libc::c_uchar,
    pub sb_len_wr: libc::c_uchar,
    pub host_status: libc::c_ushort,
    pub driver_status: libc::c_ushort,
    pub resid: libc::c_int,
    pub duration: libc::c_uint,
    pub info: libc::c_uint,
}

impl Default for SgIoHdr {
    fn default() -> Self {
        Self {
            interface_id: SG_INTERFACE_ID,
            dxfer_direction: SG_DXFER_NONE,
            cmd_len: 0,
            mx_sb_len: 0,
            iovec_count: 0,
            dxfer_len: 0,
            dxferp: std::ptr::null_mut(),
            cmdp: std::ptr::null_mut(),
            sbp: std::ptr::null_mut(),
            timeout: 0,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        }
    }
}

impl SgIoHdr {
    pub fn completed_ok(&self) -> bool {
        self.info & SG_INFO_OK_MASK == SG_INFO_OK
    }

    pub fn io_mode(&self) -> &'static str {
        match self.info & SG_INFO_DIRECT_IO_MASK {
            SG_INFO_INDIRECT_IO => "indirect",
            SG_INFO_DIRECT_IO => "direct",
            SG_INFO_MIXED_IO => "mixed",
            _ => "unknown",
        }
    }
}

/// `struct sg_scsi_id`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SgScsiId {
    pub host_no: libc::c_int,
    pub channel: libc::c_int,
    pub scsi_id: libc::c_int,
    pub lun: libc::c_int,
    pub scsi_type: libc::c_int,
    pub h_cmd_per_lun: libc::c_short,
    pub d_queue_depth: libc::c_short,
    pub unused: [libc::c_int; 2],
}

/// Argument of `SG_SCSI_RESET`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResetOp {
    /// Status query used while polling for completion
    Nothing = 0,
    Device = 1,
    Bus = 2,
    Host = 3,
}

/// Busy indicator reported alongside an accepted reset ioctl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    Done,
    Busy,
}

/// Raw sg ioctls on an open descriptor
#[cfg_attr(test, mockall::automock)]
pub trait SgTransport: Send + Sync {
    /// `SG_IO`. The header carries the caller's buffers; on return the
    /// status fields are filled in.
    fn sg_io(&self, fd: RawFd, hdr: &mut SgIoHdr) -> Result<(), Errno>;

    /// `SG_GET_SCSI_ID`
    fn scsi_id(&self, fd: RawFd) -> Result<SgScsiId, Errno>;

    /// `SG_SCSI_RESET`. `Busy` means the call was accepted while the OS
    /// still reported the device busy.
    fn scsi_reset(&self, fd: RawFd, op: ResetOp) -> Result<ResetState, Errno>;
}

/// ioctl-backed transport used outside of tests
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxSgTransport;

impl SgTransport for LinuxSgTransport {
    fn sg_io(&self, fd: RawFd, hdr: &mut SgIoHdr) -> Result<(), Errno> {
        // SAFETY: hdr is a valid sg_io_hdr and its buffer pointers were set
        // from live slices that outlive this call.
        let rc = unsafe { libc::ioctl(fd, SG_IO as _, hdr as *mut SgIoHdr) };
        Errno::result(rc).map(drop)
    }

    fn scsi_id(&self, fd: RawFd) -> Result<SgScsiId, Errno> {
        let mut id = SgScsiId::default();
        // SAFETY: id is a properly sized sg_scsi_id owned by this frame
        let rc = unsafe { libc::ioctl(fd, SG_GET_SCSI_ID as _, &mut id as *mut SgScsiId) };
        Errno::result(rc).map(|_| id)
    }

    fn scsi_reset(&self, fd: RawFd, op: ResetOp) -> Result<ResetState, Errno> {
        let mut arg = op as libc::c_int;
        Errno::clear();
        // SAFETY: arg lives for the duration of the call
        let rc = unsafe { libc::ioctl(fd, SG_SCSI_RESET as _, &mut arg as *mut libc::c_int) };
        Errno::result(rc)?;
        Ok(if Errno::last() == Errno::EBUSY {
            ResetState::Busy
        } else {
            ResetState::Done
        })
    }
}
