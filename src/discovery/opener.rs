/// Opening devices and building their identity records
use super::classify::{classify, DeviceHandle, HandleKind};
use super::sysfs::{SiblingPair, SysfsResolver};
use crate::config::Settings;
use crate::passthrough::{Dispatcher, NvmeSubsystem, SgTransport};
use crate::{
    DeviceError, DeviceIdentity, DeviceResult, DriveType, InterfaceType, MediaType, OsHandle,
    ScsiAddress,
};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Handle hint for ATA drives behind the SCSI layer
const ATA_HANDLE_HINT: &str = "t10.ATA";
const SAS_HANDLE_HINT: &str = "naa.";

/// How much work an open performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenMode {
    /// Open, default the type fields, then run the identity fill
    #[default]
    Full,
    /// Stop once the handle is open and the defaults, handle hints and
    /// siblings are set; the SCSI address is not queried
    HandleOnly,
}

/// Transport-specific identity probing run after a successful open
pub trait IdentityFiller: Send + Sync {
    fn fill_drive_info(&self, dispatcher: &Dispatcher, device: &mut DeviceIdentity)
        -> DeviceResult<()>;

    fn fill_nvme_info(&self, dispatcher: &Dispatcher, device: &mut DeviceIdentity)
        -> DeviceResult<()>;
}

/// Keeps the defaulted fields as they are
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFiller;

impl IdentityFiller for NoopFiller {
    fn fill_drive_info(&self, _: &Dispatcher, _: &mut DeviceIdentity) -> DeviceResult<()> {
        Ok(())
    }

    fn fill_nvme_info(&self, _: &Dispatcher, _: &mut DeviceIdentity) -> DeviceResult<()> {
        Ok(())
    }
}

pub struct DeviceOpener {
    sg: Arc<dyn SgTransport>,
    nvme: Arc<dyn NvmeSubsystem>,
    filler: Arc<dyn IdentityFiller>,
    dispatcher: Dispatcher,
    resolver: SysfsResolver,
    dev_dir: PathBuf,
    delay_io: Option<Duration>,
    default_timeout_secs: u32,
}

impl DeviceOpener {
    pub fn new(
        settings: &Settings,
        sg: Arc<dyn SgTransport>,
        nvme: Arc<dyn NvmeSubsystem>,
        filler: Arc<dyn IdentityFiller>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            sg,
            nvme,
            filler,
            dispatcher,
            resolver: SysfsResolver::new(&settings.sysfs_class_dir),
            dev_dir: settings.dev_dir.clone(),
            delay_io: settings.delay_io(),
            default_timeout_secs: settings.default_timeout_secs,
        }
    }

    /// Open `path` and build its identity. The returned record owns the open
    /// handle until [`close_device`](Self::close_device).
    pub fn open_device(&self, path: &str, mode: OpenMode) -> DeviceResult<DeviceIdentity> {
        if DeviceHandle::new(path).is_nvme_adapter() {
            self.open_nvme(path, mode)
        } else {
            self.open_scsi(path, mode)
        }
    }

    fn open_scsi(&self, path: &str, mode: OpenMode) -> DeviceResult<DeviceIdentity> {
        tracing::debug!(device = %path, "Opening SCSI device");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| {
                tracing::debug!(device = %path, error = %e, "Open failure");
                match e.kind() {
                    io::ErrorKind::PermissionDenied => {
                        DeviceError::PermissionDenied(format!("{}: {}", path, e))
                    }
                    _ => DeviceError::Failure(format!("cannot open {}: {}", path, e)),
                }
            })?;

        let fd = file.as_raw_fd();
        let mut device = DeviceIdentity::new(path);
        device.os_handle = Some(OsHandle::Scsi(file));
        device.last_error = Some(0);

        device.interface_type = InterfaceType::SCSI;
        device.drive_type = DriveType::SCSI;
        device.media_type = MediaType::HDD;
        apply_handle_hints(path, &mut device);
        self.populate_siblings(&mut device);
        self.apply_settings(&mut device);

        if mode == OpenMode::HandleOnly {
            return Ok(device);
        }

        match self.sg.scsi_id(fd) {
            Ok(id) => {
                let address = ScsiAddress {
                    host: id.host_no as u8,
                    channel: id.channel as u8,
                    target: id.scsi_id as u8,
                    lun: id.lun as u8,
                };
                // namespaces count from 1, luns from 0 (USB to NVMe bridges)
                device.namespace_id = Some(u32::from(address.lun) + 1);
                device.scsi_address = Some(address);
            }
            Err(errno) => {
                tracing::debug!(device = %path, error = %errno, "SCSI address unavailable");
            }
        }

        self.filler.fill_drive_info(&self.dispatcher, &mut device)?;

        tracing::debug!(
            device = %device.name,
            interface = ?device.interface_type,
            drive = ?device.drive_type,
            media = ?device.media_type,
            "Opened device"
        );
        Ok(device)
    }

    fn open_nvme(&self, path: &str, mode: OpenMode) -> DeviceResult<DeviceIdentity> {
        tracing::debug!(device = %path, "Opening NVMe adapter");

        let adapters = self.nvme.adapter_list().map_err(|errno| {
            DeviceError::Failure(format!("NVMe adapter list unavailable: {}", errno.desc()))
        })?;

        let handle = self.nvme.open(&adapters, path).map_err(|errno| match errno {
            Errno::EACCES | Errno::EPERM => {
                DeviceError::PermissionDenied(format!("{}: {}", path, errno.desc()))
            }
            _ => DeviceError::Failure(format!("cannot open {}: {}", path, errno.desc())),
        })?;

        let mut device = DeviceIdentity::new(path);
        device.os_handle = Some(OsHandle::Nvme(handle));
        device.last_error = Some(0);
        device.interface_type = InterfaceType::NVMe;
        device.drive_type = DriveType::NVMe;
        device.media_type = MediaType::NVM;
        self.apply_settings(&mut device);

        if mode == OpenMode::HandleOnly {
            return Ok(device);
        }

        #[cfg(feature = "nvme-passthrough")]
        self.filler.fill_nvme_info(&self.dispatcher, &mut device)?;

        Ok(device)
    }

    fn apply_settings(&self, device: &mut DeviceIdentity) {
        device.delay_io = self.delay_io;
        device.default_timeout_secs = self.default_timeout_secs;
    }

    /// Best effort: a failed lookup leaves both sibling handles empty.
    ///
    /// The lookup classifies the opened path by its kernel node name, so only
    /// paths like `sda`, `sg0` or `bsg/0:0:0:0` resolve. Drive-directory
    /// identifiers such as `naa.*` and `t10.*` classify as Unknown and keep
    /// no siblings.
    fn populate_siblings(&self, device: &mut DeviceIdentity) {
        match self.resolver.resolve_sibling(&device.name) {
            Ok(SiblingPair { generic, block }) => {
                let generic_path = match classify(&generic) {
                    HandleKind::ScsiGeneric => self.dev_dir.join(&generic),
                    _ => self.dev_dir.join("bsg").join(&generic),
                };
                device.secondary_handle = Some(self.dev_dir.join(&block).display().to_string());
                device.tertiary_handle = Some(generic_path.display().to_string());
            }
            Err(e) => {
                tracing::trace!(device = %device.name, error = %e, "No sysfs sibling");
            }
        }
    }

    /// Release the handle acquired by [`open_device`](Self::open_device)
    pub fn close_device(&self, device: &mut DeviceIdentity) -> DeviceResult<()> {
        match device.os_handle.take() {
            Some(OsHandle::Scsi(file)) => match nix::unistd::close(file.into_raw_fd()) {
                Ok(()) => {
                    device.last_error = Some(0);
                    Ok(())
                }
                Err(errno) => {
                    device.last_error = Some(errno as i32);
                    Err(DeviceError::Failure(format!(
                        "close {}: {}",
                        device.name,
                        errno.desc()
                    )))
                }
            },
            Some(OsHandle::Nvme(handle)) => {
                // the subsystem close has no failure path worth reporting
                device.last_error = Some(match self.nvme.close(&handle) {
                    Ok(()) => 0,
                    Err(errno) => errno as i32,
                });
                Ok(())
            }
            None => Err(DeviceError::BadParameter(format!(
                "{} is not open",
                device.name
            ))),
        }
    }
}

/// Type hints carried by drive-directory names
fn apply_handle_hints(path: &str, device: &mut DeviceIdentity) {
    if path.contains(ATA_HANDLE_HINT) {
        device.drive_type = DriveType::ATA;
        device.interface_type = InterfaceType::IDE;
    }
    if path.contains(SAS_HANDLE_HINT) {
        device.drive_type = DriveType::SCSI;
        device.interface_type = InterfaceType::SCSI;
    }
}

fn set_nonblocking(device: &DeviceIdentity, enabled: bool) -> DeviceResult<()> {
    if device.drive_type == DriveType::NVMe {
        return Ok(());
    }

    let fd = match &device.os_handle {
        Some(OsHandle::Scsi(file)) => file.as_raw_fd(),
        _ => {
            return Err(DeviceError::BadParameter(format!(
                "{} has no open SCSI handle",
                device.name
            )))
        }
    };

    let mut flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    flags.set(OFlag::O_NONBLOCK, enabled);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Switch the descriptor to blocking I/O for exclusive command sequences
pub fn lock_device(device: &DeviceIdentity) -> DeviceResult<()> {
    set_nonblocking(device, false)
}

pub fn unlock_device(device: &DeviceIdentity) -> DeviceResult<()> {
    set_nonblocking(device, true)
}
