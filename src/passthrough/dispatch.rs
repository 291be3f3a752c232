/// Command dispatch: route by interface, issue SG_IO, decode the result
use super::nvme::{self, NvmeCmdCtx, NvmeSubsystem};
use super::sense::{parse_sense, sense_key_name};
use super::sg::{
    SgIoHdr, SgTransport, DEFAULT_COMMAND_TIMEOUT_MS, SG_DXFER_FROM_DEV, SG_DXFER_NONE,
    SG_DXFER_TO_DEV, SG_DXFER_TO_FROM_DEV, SG_MAX_CMD_TIMEOUT_SECONDS, SG_TIMEOUT_UNLIMITED,
    SPC3_SENSE_LEN,
};
use super::status::{decode_driver_status, HostStatus, MaskedStatus};
use crate::{DeviceError, DeviceIdentity, DeviceResult, InterfaceType, OsHandle};
use nix::errno::Errno;
use serde::Serialize;
use std::fmt::Debug;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Instant;

/// Data transfer direction of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    None,
    In,
    Out,
    Bidirectional,
    /// Raw value from a caller that does not map to a known direction
    Other(i32),
}

impl DataDirection {
    /// sg `dxfer_direction`, or None when the value is not understood
    pub fn to_sg(self) -> Option<i32> {
        match self {
            DataDirection::None => Some(SG_DXFER_NONE),
            DataDirection::In => Some(SG_DXFER_FROM_DEV),
            DataDirection::Out => Some(SG_DXFER_TO_DEV),
            DataDirection::Bidirectional => Some(SG_DXFER_TO_FROM_DEV),
            // raw sg values are accepted as-is
            DataDirection::Other(raw)
                if [SG_DXFER_NONE, SG_DXFER_FROM_DEV, SG_DXFER_TO_DEV, SG_DXFER_TO_FROM_DEV]
                    .contains(&raw) =>
            {
                Some(raw)
            }
            DataDirection::Other(_) => None,
        }
    }
}

/// Sense triad (plus FRU) extracted from the last command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReturnStatus {
    /// Response code byte of the sense data, 0xFF when none was returned
    pub format: u8,
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
    pub fru: u8,
}

impl Default for ReturnStatus {
    fn default() -> Self {
        Self {
            format: 0xff,
            sense_key: 0,
            asc: 0,
            ascq: 0,
            fru: 0,
        }
    }
}

impl ReturnStatus {
    pub fn has_sense(&self) -> bool {
        self.format != 0xff
    }
}

/// One SCSI command and its buffers
#[derive(Debug)]
pub struct ScsiIoCtx<'a> {
    pub cdb: &'a [u8],
    pub data: &'a mut [u8],
    pub direction: DataDirection,
    /// Seconds; 0 leaves the choice to the device default or 15 s
    pub timeout: u32,
    /// Caller-owned sense buffer; a local one is allocated when absent
    pub sense: Option<&'a mut [u8]>,
    pub return_status: ReturnStatus,
}

impl<'a> ScsiIoCtx<'a> {
    pub fn new(cdb: &'a [u8], data: &'a mut [u8], direction: DataDirection) -> Self {
        Self {
            cdb,
            data,
            direction,
            timeout: 0,
            sense: None,
            return_status: ReturnStatus::default(),
        }
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_sense(mut self, sense: &'a mut [u8]) -> Self {
        self.sense = Some(sense);
        self
    }
}

/// Vendor I/O routine attached to RAID-interface devices
pub trait RaidIo: Debug + Send + Sync {
    fn issue_io(&self, device: &mut DeviceIdentity, ctx: &mut ScsiIoCtx<'_>) -> DeviceResult<()>;
}

/// SCSI-to-NVMe command translation for NVMe-interface devices
pub trait ScsiToNvmeTranslator: Send + Sync {
    fn translate(
        &self,
        dispatcher: &Dispatcher,
        device: &mut DeviceIdentity,
        ctx: &mut ScsiIoCtx<'_>,
    ) -> DeviceResult<()>;
}

/// Translator used when none is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTranslator;

impl ScsiToNvmeTranslator for NoTranslator {
    fn translate(
        &self,
        _dispatcher: &Dispatcher,
        device: &mut DeviceIdentity,
        _ctx: &mut ScsiIoCtx<'_>,
    ) -> DeviceResult<()> {
        Err(DeviceError::NotSupported(format!(
            "no SCSI to NVMe translator configured for {}",
            device.name
        )))
    }
}

/// An "unlimited" timeout can be requested directly through SG_IO
pub fn is_infinite_timeout_supported() -> bool {
    true
}

/// Choose the SG_IO timeout in milliseconds.
///
/// A device default wins when it is nonzero and larger than the command's own
/// timeout. Values at or past [`SG_MAX_CMD_TIMEOUT_SECONDS`] become the
/// unlimited sentinel instead of being scaled.
pub fn compute_timeout_ms(device_default_secs: u32, command_secs: u32) -> u32 {
    let chosen = if device_default_secs > 0 && device_default_secs > command_secs {
        device_default_secs
    } else if command_secs != 0 {
        command_secs
    } else {
        return DEFAULT_COMMAND_TIMEOUT_MS;
    };

    if chosen < SG_MAX_CMD_TIMEOUT_SECONDS {
        chosen * 1000
    } else {
        SG_TIMEOUT_UNLIMITED
    }
}

/// Decode a completed SG_IO call.
///
/// Sense data is parsed whenever the driver wrote some, even if the ioctl
/// failed. When the info bits report a problem, each nonzero status field
/// forces a passthrough failure only if no sense data came back.
pub fn decode_sg_result(
    ioctl_result: Result<(), Errno>,
    hdr: &SgIoHdr,
    sense: &[u8],
    status: &mut ReturnStatus,
) -> DeviceResult<()> {
    let mut outcome = match ioctl_result {
        Ok(()) => Ok(()),
        Err(errno) => Err(DeviceError::PassthroughFailure(format!(
            "SG_IO ioctl failed: {}",
            errno.desc()
        ))),
    };

    if hdr.sb_len_wr > 0 {
        let sense = &sense[..sense.len().min(hdr.mx_sb_len as usize)];
        let fields = parse_sense(sense);
        status.format = sense.first().copied().unwrap_or(0xff);
        status.sense_key = fields.sense_key;
        status.asc = fields.asc;
        status.ascq = fields.ascq;
        status.fru = fields.fru;
        tracing::trace!(
            key = sense_key_name(fields.sense_key),
            asc = fields.asc,
            ascq = fields.ascq,
            "Sense data returned"
        );
    }

    tracing::trace!(mode = hdr.io_mode(), "SG IO completed");

    if !hdr.completed_ok() {
        let no_sense = hdr.sb_len_wr == 0;

        if hdr.masked_status != 0 {
            let masked = MaskedStatus::from(hdr.masked_status);
            tracing::debug!(status = format_args!("{:02X}h", hdr.masked_status), "SG masked status: {}", masked);
            if no_sense {
                outcome = Err(DeviceError::PassthroughFailure(format!(
                    "masked status {} without sense data",
                    masked
                )));
            }
        }

        if hdr.host_status != 0 {
            let host = HostStatus::from(hdr.host_status);
            tracing::debug!(status = format_args!("{:02X}h", hdr.host_status), "SG host status: {}", host);
            if no_sense {
                outcome = Err(DeviceError::PassthroughFailure(format!(
                    "host status {} without sense data",
                    host
                )));
            }
        }

        if hdr.driver_status != 0 {
            let (driver, suggestion) = decode_driver_status(hdr.driver_status);
            tracing::debug!(
                status = format_args!("{:02X}h", hdr.driver_status),
                "SG driver status: {}, {}",
                driver.description(),
                suggestion.description()
            );
            if no_sense {
                outcome = Err(DeviceError::PassthroughFailure(format!(
                    "driver status {} without sense data",
                    driver.description()
                )));
            }
        }
    }

    outcome
}

/// Routes commands to the transport matching the device's interface
pub struct Dispatcher {
    sg: Arc<dyn SgTransport>,
    nvme: Arc<dyn NvmeSubsystem>,
    translator: Arc<dyn ScsiToNvmeTranslator>,
}

impl Dispatcher {
    pub fn new(
        sg: Arc<dyn SgTransport>,
        nvme: Arc<dyn NvmeSubsystem>,
        translator: Arc<dyn ScsiToNvmeTranslator>,
    ) -> Self {
        Self {
            sg,
            nvme,
            translator,
        }
    }

    /// Dispatch a SCSI command. The configured inter-command delay follows
    /// every dispatch, successful or not. Translated NVMe commands are paced
    /// by the admin passthrough that carries them, not here.
    pub fn send_io(&self, device: &mut DeviceIdentity, ctx: &mut ScsiIoCtx<'_>) -> DeviceResult<()> {
        let result = match device.interface_type {
            InterfaceType::NVMe => return self.send_translated(device, ctx),
            InterfaceType::SCSI
            | InterfaceType::IDE
            | InterfaceType::USB
            | InterfaceType::IEEE1394 => self.send_sg_io(device, ctx),
            InterfaceType::RAID => match device.raid_io.clone() {
                Some(raid) => raid.issue_io(device, ctx),
                None => {
                    tracing::warn!(device = %device.name, "No RAID passthrough I/O routine present");
                    Err(DeviceError::Failure(format!(
                        "no RAID I/O routine for {}",
                        device.name
                    )))
                }
            },
            InterfaceType::Unknown => {
                tracing::warn!(device = %device.name, "Target device does not have a valid interface");
                Err(DeviceError::Failure(format!(
                    "{} does not have a valid interface",
                    device.name
                )))
            }
        };

        pace(device);
        result
    }

    #[cfg(feature = "nvme-passthrough")]
    fn send_translated(&self, device: &mut DeviceIdentity, ctx: &mut ScsiIoCtx<'_>) -> DeviceResult<()> {
        self.translator.translate(self, device, ctx)
    }

    #[cfg(not(feature = "nvme-passthrough"))]
    fn send_translated(&self, device: &mut DeviceIdentity, _ctx: &mut ScsiIoCtx<'_>) -> DeviceResult<()> {
        Err(DeviceError::NotSupported(format!(
            "built without NVMe passthrough, cannot reach {}",
            device.name
        )))
    }

    /// Issue `ctx` through SG_IO on the device's open descriptor
    pub fn send_sg_io(&self, device: &mut DeviceIdentity, ctx: &mut ScsiIoCtx<'_>) -> DeviceResult<()> {
        let fd = match &device.os_handle {
            Some(OsHandle::Scsi(file)) => file.as_raw_fd(),
            _ => {
                return Err(DeviceError::BadParameter(format!(
                    "{} has no open SCSI handle",
                    device.name
                )))
            }
        };

        let mut local_sense = Vec::new();
        let sense: &mut [u8] = match ctx.sense.as_deref_mut() {
            Some(buf) if !buf.is_empty() => buf,
            _ => {
                local_sense.try_reserve_exact(SPC3_SENSE_LEN).map_err(|e| {
                    DeviceError::MemoryFailure(format!("sense buffer allocation: {}", e))
                })?;
                local_sense.resize(SPC3_SENSE_LEN, 0);
                &mut local_sense
            }
        };

        let Some(dxfer_direction) = ctx.direction.to_sg() else {
            tracing::warn!(direction = ?ctx.direction, "Didn't understand direction");
            return Err(DeviceError::BadParameter(format!(
                "unrecognized transfer direction {:?}",
                ctx.direction
            )));
        };

        let cmd_len = u8::try_from(ctx.cdb.len())
            .map_err(|_| DeviceError::BadParameter("CDB longer than 255 bytes".to_string()))?;
        let dxfer_len = u32::try_from(ctx.data.len())
            .map_err(|_| DeviceError::BadParameter("data buffer exceeds 4 GiB".to_string()))?;

        let mut hdr = SgIoHdr {
            dxfer_direction,
            cmd_len,
            mx_sb_len: sense.len().min(u8::MAX as usize) as u8,
            dxfer_len,
            dxferp: ctx.data.as_mut_ptr().cast(),
            cmdp: ctx.cdb.as_ptr() as *mut u8,
            sbp: sense.as_mut_ptr(),
            timeout: compute_timeout_ms(device.default_timeout_secs, ctx.timeout),
            ..SgIoHdr::default()
        };

        ctx.return_status = ReturnStatus::default();

        tracing::trace!(
            device = %device.name,
            opcode = format_args!("{:#04x}", ctx.cdb.first().copied().unwrap_or(0)),
            timeout_ms = hdr.timeout,
            len = dxfer_len,
            "Sending SG_IO"
        );

        let start = Instant::now();
        let result = self.sg.sg_io(fd, &mut hdr);
        device.last_command_time = Some(start.elapsed());
        device.last_error = Some(match result {
            Ok(()) => 0,
            Err(errno) => errno as i32,
        });

        if let Err(errno) = result {
            tracing::debug!(device = %device.name, error = %errno, "SG_IO ioctl failed");
        }

        decode_sg_result(result, &hdr, sense, &mut ctx.return_status)
    }

    /// NVMe admin passthrough for NVMe-interface devices
    pub fn send_nvme_io(&self, device: &mut DeviceIdentity, ctx: &mut NvmeCmdCtx<'_>) -> DeviceResult<()> {
        nvme::send_nvme_io(self.nvme.as_ref(), device, ctx)
    }
}

fn pace(device: &DeviceIdentity) {
    if let Some(delay) = device.delay_io {
        tracing::debug!(delay = ?delay, "Delaying between commands");
        std::thread::sleep(delay);
    }
}
