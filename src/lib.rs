// Allow uppercase acronyms for industry-standard terms like HDD, NVM, IDE
#![allow(clippy::upper_case_acronyms)]

pub mod config;
pub mod discovery;
pub mod logging;
pub mod passthrough;
pub mod pci;

pub use config::Settings;
pub use discovery::{
    classify, matches_drive_filter, DeviceEnumerator, DeviceHandle, DeviceList, DeviceOpener,
    HandleKind, IdentityFiller, NoopFiller, OpenMode, SiblingPair, SysfsResolver,
};
pub use passthrough::{
    DataDirection, Dispatcher, NvmeCmdCtx, NvmeCommand, NvmeSubsystem, RaidIo, ResetScope,
    ReturnStatus, ScsiIoCtx, ScsiToNvmeTranslator, SgTransport,
};

use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Flat outcome code returned to callers that need a single status value
/// (CLI exit codes, JSON output, enumeration summaries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnCode {
    Success,
    BadParameter,
    PermissionDenied,
    Failure,
    NotSupported,
    MemoryFailure,
    PassthroughFailure,
    LibraryMismatch,
    WarnPartial,
    Blocked,
}

impl ReturnCode {
    /// Process exit code used by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            ReturnCode::Success => 0,
            ReturnCode::Failure => 1,
            ReturnCode::NotSupported => 2,
            ReturnCode::PassthroughFailure => 3,
            ReturnCode::PermissionDenied => 4,
            ReturnCode::BadParameter => 5,
            ReturnCode::MemoryFailure => 6,
            ReturnCode::LibraryMismatch => 7,
            ReturnCode::WarnPartial => 8,
            ReturnCode::Blocked => 9,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReturnCode::Success => "Success",
            ReturnCode::BadParameter => "Bad parameter",
            ReturnCode::PermissionDenied => "Permission denied",
            ReturnCode::Failure => "Failure",
            ReturnCode::NotSupported => "Not supported",
            ReturnCode::MemoryFailure => "Memory failure",
            ReturnCode::PassthroughFailure => "Passthrough failure",
            ReturnCode::LibraryMismatch => "Library mismatch",
            ReturnCode::WarnPartial => "Not all devices enumerated",
            ReturnCode::Blocked => "Command blocked by OS",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    #[error("Insufficient permissions: {0}")]
    PermissionDenied(String),

    #[error("Operation failed: {0}")]
    Failure(String),

    #[error("Unsupported operation: {0}")]
    NotSupported(String),

    #[error("Memory allocation failed: {0}")]
    MemoryFailure(String),

    #[error("Passthrough command failed: {0}")]
    PassthroughFailure(String),

    #[error("Library version mismatch: {0}")]
    LibraryMismatch(String),

    #[error("Command blocked by OS: {0}")]
    Blocked(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DeviceError {
    pub fn code(&self) -> ReturnCode {
        match self {
            DeviceError::BadParameter(_) | DeviceError::Config(_) => ReturnCode::BadParameter,
            DeviceError::PermissionDenied(_) => ReturnCode::PermissionDenied,
            DeviceError::Failure(_) => ReturnCode::Failure,
            DeviceError::NotSupported(_) => ReturnCode::NotSupported,
            DeviceError::MemoryFailure(_) => ReturnCode::MemoryFailure,
            DeviceError::PassthroughFailure(_) => ReturnCode::PassthroughFailure,
            DeviceError::LibraryMismatch(_) => ReturnCode::LibraryMismatch,
            DeviceError::Blocked(_) => ReturnCode::Blocked,
            DeviceError::IoError(e) => match Errno::from_i32(e.raw_os_error().unwrap_or(0)) {
                Errno::EACCES | Errno::EPERM => ReturnCode::PermissionDenied,
                Errno::ENOMEM => ReturnCode::MemoryFailure,
                _ => ReturnCode::Failure,
            },
        }
    }

    /// Classify an OS error number raised while talking to a device
    pub fn from_errno(errno: Errno, context: impl Into<String>) -> Self {
        let context = context.into();
        match errno {
            Errno::EACCES | Errno::EPERM => DeviceError::PermissionDenied(context),
            Errno::EAFNOSUPPORT | Errno::ENOTTY | Errno::EOPNOTSUPP => {
                DeviceError::NotSupported(context)
            }
            Errno::ENOMEM => DeviceError::MemoryFailure(context),
            _ => DeviceError::Failure(format!("{}: {}", context, errno.desc())),
        }
    }
}

impl From<Errno> for DeviceError {
    fn from(errno: Errno) -> Self {
        DeviceError::from_errno(errno, "OS call failed")
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Transport the device is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceType {
    SCSI,
    IDE,
    USB,
    IEEE1394,
    NVMe,
    RAID,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveType {
    ATA,
    SCSI,
    NVMe,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    HDD,
    NVM,
    Unknown,
}

/// host:channel:target:lun as reported by SG_GET_SCSI_ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScsiAddress {
    pub host: u8,
    pub channel: u8,
    pub target: u8,
    pub lun: u8,
}

impl fmt::Display for ScsiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.host, self.channel, self.target, self.lun)
    }
}

/// Structure version stamp the caller must present before a device list is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBlock {
    pub version: u32,
    pub size: u32,
}

/// Bumped whenever `DeviceIdentity` changes shape
pub const DEVICE_IDENTITY_VERSION: u32 = 3;

impl VersionBlock {
    pub fn current() -> Self {
        Self {
            version: DEVICE_IDENTITY_VERSION,
            size: std::mem::size_of::<DeviceIdentity>() as u32,
        }
    }

    pub fn is_compatible(&self) -> bool {
        *self == Self::current()
    }
}

/// Opaque token handed out by the NVMe subsystem for an opened adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmeHandle {
    pub id: u64,
    pub adapter: String,
}

/// Open OS-level handle backing a device record
#[derive(Debug)]
pub enum OsHandle {
    Scsi(File),
    Nvme(NvmeHandle),
}

/// Normalized identity of one opened device.
///
/// Populated by [`DeviceOpener::open_device`]; the open handle stays with this
/// record until [`DeviceOpener::close_device`] is called.
#[derive(Debug, Serialize)]
pub struct DeviceIdentity {
    /// Path the device was opened with
    pub name: String,
    pub friendly_name: String,
    /// Block-class sibling (e.g. `/dev/sda`)
    pub secondary_handle: Option<String>,
    /// Generic-class sibling (e.g. `/dev/sg0` or a bsg node)
    pub tertiary_handle: Option<String>,
    pub interface_type: InterfaceType,
    pub drive_type: DriveType,
    pub media_type: MediaType,
    pub scsi_address: Option<ScsiAddress>,
    pub namespace_id: Option<u32>,
    /// Overrides per-command timeouts when nonzero and larger
    pub default_timeout_secs: u32,
    /// Pause inserted after every dispatched command
    pub delay_io: Option<Duration>,
    pub last_command_time: Option<Duration>,
    /// errno captured right after the last OS call
    pub last_error: Option<i32>,
    pub minimum_alignment: usize,
    pub version: VersionBlock,

    #[serde(skip)]
    pub os_handle: Option<OsHandle>,

    /// Vendor routine used for RAID-interface devices
    #[serde(skip)]
    pub raid_io: Option<Arc<dyn RaidIo>>,
}

impl DeviceIdentity {
    /// Blank record for `path`; interface and drive type stay Unknown until opened
    pub fn new(path: &str) -> Self {
        Self {
            name: path.to_string(),
            friendly_name: DeviceHandle::new(path).basename().to_string(),
            secondary_handle: None,
            tertiary_handle: None,
            interface_type: InterfaceType::Unknown,
            drive_type: DriveType::Unknown,
            media_type: MediaType::Unknown,
            scsi_address: None,
            namespace_id: None,
            default_timeout_secs: 0,
            delay_io: None,
            last_command_time: None,
            last_error: None,
            minimum_alignment: std::mem::size_of::<usize>(),
            version: VersionBlock::current(),
            os_handle: None,
            raid_io: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.os_handle.is_some()
    }
}

/// Facade wiring settings and OS collaborators into the discovery and
/// dispatch components.
pub struct Passthrough {
    settings: Settings,
    sg: Arc<dyn SgTransport>,
    nvme: Arc<dyn NvmeSubsystem>,
    filler: Arc<dyn IdentityFiller>,
    translator: Arc<dyn ScsiToNvmeTranslator>,
}

impl Passthrough {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            sg: Arc::new(passthrough::LinuxSgTransport),
            nvme: Arc::new(passthrough::UnavailableNvme),
            filler: Arc::new(NoopFiller),
            translator: Arc::new(passthrough::NoTranslator),
        }
    }

    pub fn with_sg_transport(mut self, sg: Arc<dyn SgTransport>) -> Self {
        self.sg = sg;
        self
    }

    pub fn with_nvme_subsystem(mut self, nvme: Arc<dyn NvmeSubsystem>) -> Self {
        self.nvme = nvme;
        self
    }

    pub fn with_identity_filler(mut self, filler: Arc<dyn IdentityFiller>) -> Self {
        self.filler = filler;
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn ScsiToNvmeTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> SysfsResolver {
        SysfsResolver::new(&self.settings.sysfs_class_dir)
    }

    pub fn enumerator(&self) -> DeviceEnumerator {
        DeviceEnumerator::new(
            &self.settings.drive_dir,
            Arc::clone(&self.nvme),
            self.settings.max_devices,
        )
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.sg),
            Arc::clone(&self.nvme),
            Arc::clone(&self.translator),
        )
    }

    pub fn opener(&self) -> DeviceOpener {
        DeviceOpener::new(
            &self.settings,
            Arc::clone(&self.sg),
            Arc::clone(&self.nvme),
            Arc::clone(&self.filler),
            self.dispatcher(),
        )
    }

    pub fn count_devices(&self) -> usize {
        self.enumerator().count_devices()
    }

    pub fn list_devices(
        &self,
        capacity: usize,
        version: VersionBlock,
        mode: OpenMode,
    ) -> DeviceResult<DeviceList> {
        self.enumerator()
            .get_device_list(&self.opener(), capacity, version, mode)
    }

    pub fn open_device(&self, path: &str, mode: OpenMode) -> DeviceResult<DeviceIdentity> {
        self.opener().open_device(path, mode)
    }

    pub fn close_device(&self, device: &mut DeviceIdentity) -> DeviceResult<()> {
        self.opener().close_device(device)
    }

    pub fn send_io(&self, device: &mut DeviceIdentity, ctx: &mut ScsiIoCtx<'_>) -> DeviceResult<()> {
        self.dispatcher().send_io(device, ctx)
    }

    pub fn send_nvme_io(
        &self,
        device: &mut DeviceIdentity,
        ctx: &mut NvmeCmdCtx<'_>,
    ) -> DeviceResult<()> {
        self.dispatcher().send_nvme_io(device, ctx)
    }

    pub fn lock_device(&self, device: &DeviceIdentity) -> DeviceResult<()> {
        discovery::opener::lock_device(device)
    }

    pub fn unlock_device(&self, device: &DeviceIdentity) -> DeviceResult<()> {
        discovery::opener::unlock_device(device)
    }

    /// Copy the first `out.len()` bytes of the device's PCI BAR0
    pub fn read_pci_bar(&self, device: &DeviceIdentity, out: &mut [u8]) -> DeviceResult<()> {
        pci::pci_read_bar_reg(device, &self.settings.sysfs_block_dir, out)
    }

    pub fn reset(&self, device: &mut DeviceIdentity, scope: ResetScope) -> DeviceResult<()> {
        passthrough::reset::reset(
            self.sg.as_ref(),
            device,
            scope,
            self.settings.reset_poll_limit(),
        )
    }
}
