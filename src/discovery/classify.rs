// Device-node naming conventions
//
// Pure string logic, no I/O. Unmatched names classify as Unknown or fail the
// filters; nothing here returns an error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Substrings naming the block-class storage drivers (disk, tape, cdrom)
const BLOCK_DRIVER_MARKERS: [&str; 4] = ["sd", "st", "sr", "scd"];
const SCSI_GENERIC_MARKER: &str = "sg";
const BLOCK_GENERIC_MARKER: &str = "bsg";
const NVME_MARKER: &str = "nvme";
/// NVMe adapters exposed by the NVMe subsystem (e.g. `vmhba1`)
pub const NVME_ADAPTER_PREFIX: &str = "vmhba";

/// ATA-style drive identifiers in the drive directory
const ATA_DRIVE_PREFIX: &str = "t10.";
const ATA_NVME_DRIVE_PREFIX: &str = "t10.NVMe";
/// SAS-style drive identifiers
const SAS_DRIVE_PREFIX: &str = "naa.";
const PARTITION_SEPARATOR: char = ':';

/// Handle class a device node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    Block,
    ScsiGeneric,
    BlockGeneric,
    Nvme,
    Unknown,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Block => write!(f, "block"),
            HandleKind::ScsiGeneric => write!(f, "scsi-generic"),
            HandleKind::BlockGeneric => write!(f, "bsg"),
            HandleKind::Nvme => write!(f, "nvme"),
            HandleKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Path-like identifier for a device node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    path: String,
}

impl DeviceHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path component; the whole string when there is no separator
    pub fn basename(&self) -> &str {
        basename(&self.path)
    }

    pub fn kind(&self) -> HandleKind {
        classify(&self.path)
    }

    /// True when the name carries a partition suffix for its class
    pub fn is_partition(&self) -> bool {
        let name = self.basename();
        if is_drive_identifier(name) {
            return name.contains(PARTITION_SEPARATOR);
        }
        match self.kind() {
            HandleKind::Block => name.starts_with("sd") && !is_whole_block_device(name),
            HandleKind::Nvme if name.starts_with(NVME_MARKER) => {
                name.len() > 5 && name[NVME_MARKER.len()..].contains('p')
            }
            _ => false,
        }
    }

    /// NVMe adapter names are routed to the NVMe subsystem rather than opened as files
    pub fn is_nvme_adapter(&self) -> bool {
        self.path.contains(NVME_ADAPTER_PREFIX)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

pub(crate) fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Parent directory component, if the path has one
fn parent_dir(path: &str) -> Option<&str> {
    path.trim_end_matches('/').rsplit('/').nth(1)
}

/// Classify a device-node name or path.
///
/// Nodes under a `bsg` directory are block-generic whatever their name, since
/// the kernel names them by address (`/dev/bsg/0:0:0:0`). Otherwise `bsg` is
/// checked before `sg` so block-generic nodes never read as SCSI generic, and
/// the block markers are checked before `sg` so `sd*` names stay block devices.
pub fn classify(name: &str) -> HandleKind {
    if parent_dir(name) == Some(BLOCK_GENERIC_MARKER) {
        return HandleKind::BlockGeneric;
    }

    let name = basename(name);
    if name.is_empty() {
        return HandleKind::Unknown;
    }

    if name.contains(BLOCK_GENERIC_MARKER) {
        HandleKind::BlockGeneric
    } else if name.contains(NVME_MARKER) || name.starts_with(NVME_ADAPTER_PREFIX) {
        HandleKind::Nvme
    } else if BLOCK_DRIVER_MARKERS.iter().any(|m| name.contains(m)) {
        HandleKind::Block
    } else if name.contains(SCSI_GENERIC_MARKER) {
        HandleKind::ScsiGeneric
    } else {
        HandleKind::Unknown
    }
}

/// `sd*` whole-disk filter: any digit marks a partition
pub fn is_whole_block_device(name: &str) -> bool {
    name.starts_with("sd") && !name.chars().any(|c| c.is_ascii_digit())
}

/// `nvme*` whole-device filter: names of 5 characters or less are controller
/// stubs, a `p` past the prefix marks a partition
pub fn is_whole_nvme_device(name: &str) -> bool {
    name.starts_with(NVME_MARKER) && name.len() > 5 && !name[NVME_MARKER.len()..].contains('p')
}

fn is_drive_identifier(name: &str) -> bool {
    name.starts_with(ATA_DRIVE_PREFIX) || name.starts_with(SAS_DRIVE_PREFIX)
}

/// Drive-directory filter for `t10.*` and `naa.*` identifiers.
///
/// Plain identifiers are accepted, colon-suffixed ones are partitions. The
/// NVMe-qualified `t10.NVMe*` form is inverted: it is only accepted when it
/// carries the colon.
pub fn matches_drive_filter(name: &str) -> bool {
    if !is_drive_identifier(name) {
        return false;
    }

    let has_partition = name.contains(PARTITION_SEPARATOR);
    if name.starts_with(ATA_NVME_DRIVE_PREFIX) {
        has_partition
    } else {
        !has_partition
    }
}

/// Entry filter used when scanning the drive directory
pub fn accepts_drive_entry(name: &str) -> bool {
    matches_drive_filter(name) || is_whole_block_device(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("sda", HandleKind::Block ; "disk")]
    #[test_case("/dev/sdb", HandleKind::Block ; "disk path")]
    #[test_case("st0", HandleKind::Block ; "tape")]
    #[test_case("sr0", HandleKind::Block ; "cdrom")]
    #[test_case("scd1", HandleKind::Block ; "legacy cdrom")]
    #[test_case("sg3", HandleKind::ScsiGeneric ; "scsi generic")]
    #[test_case("bsg", HandleKind::BlockGeneric ; "bare bsg")]
    #[test_case("/dev/bsg/0:0:0:0", HandleKind::BlockGeneric ; "bsg node by address")]
    #[test_case("bsg/1:0:0:0", HandleKind::BlockGeneric ; "relative bsg node")]
    #[test_case("0:0:0:0", HandleKind::Unknown ; "bare address")]
    #[test_case("nvme0n1", HandleKind::Nvme ; "nvme namespace")]
    #[test_case("vmhba2", HandleKind::Nvme ; "nvme adapter")]
    #[test_case("", HandleKind::Unknown ; "empty")]
    #[test_case("loop0", HandleKind::Unknown ; "loop")]
    fn test_classify(name: &str, expected: HandleKind) {
        assert_eq!(classify(name), expected);
    }

    #[test_case("sda", true)]
    #[test_case("sdaa", true)]
    #[test_case("sda1", false)]
    #[test_case("sdb12", false)]
    #[test_case("sg0", false)]
    fn test_whole_block_device(name: &str, expected: bool) {
        assert_eq!(is_whole_block_device(name), expected);
    }

    #[test_case("nvme0n1", true)]
    #[test_case("nvme0", false ; "controller stub")]
    #[test_case("nvme0n1p1", false ; "partition")]
    #[test_case("sda", false)]
    fn test_whole_nvme_device(name: &str, expected: bool) {
        assert_eq!(is_whole_nvme_device(name), expected);
    }

    #[test_case("t10.ATA_____ST2000NM0055", true ; "ata drive")]
    #[test_case("t10.ATA_____ST2000NM0055:1", false ; "ata partition")]
    #[test_case("naa.5000c500a1b2c3d4", true ; "sas drive")]
    #[test_case("naa.5000c500a1b2c3d4:2", false ; "sas partition")]
    #[test_case("t10.NVMe____Samsung_SSD", false ; "nvme qualified")]
    #[test_case("t10.NVMe____Samsung_SSD:1", true ; "nvme qualified with colon")]
    #[test_case("vml.0100000000", false ; "vml link")]
    #[test_case("sda", false ; "linux disk")]
    fn test_drive_filter(name: &str, expected: bool) {
        assert_eq!(matches_drive_filter(name), expected);
    }

    #[test]
    fn test_drive_entry_accepts_both_conventions() {
        assert!(accepts_drive_entry("sda"));
        assert!(accepts_drive_entry("naa.5000c500a1b2c3d4"));
        assert!(!accepts_drive_entry("sda1"));
        assert!(!accepts_drive_entry("vml.0100000000"));
    }

    #[test]
    fn test_handle_partition_flags() {
        assert!(DeviceHandle::new("/dev/sda1").is_partition());
        assert!(!DeviceHandle::new("/dev/sda").is_partition());
        assert!(DeviceHandle::new("/dev/nvme0n1p2").is_partition());
        assert!(!DeviceHandle::new("/dev/nvme0n1").is_partition());
        assert!(DeviceHandle::new("/dev/disks/naa.5000c500a1b2c3d4:1").is_partition());
        assert!(!DeviceHandle::new("/dev/sg0").is_partition());
    }

    #[test]
    fn test_basename() {
        assert_eq!(DeviceHandle::new("/dev/disks/naa.1").basename(), "naa.1");
        assert_eq!(DeviceHandle::new("sg0").basename(), "sg0");
        assert_eq!(DeviceHandle::new("/sys/class/block/sda/").basename(), "sda");
    }

    #[test]
    fn test_nvme_adapter_detection() {
        assert!(DeviceHandle::new("vmhba0").is_nvme_adapter());
        assert!(!DeviceHandle::new("/dev/disks/naa.1").is_nvme_adapter());
    }

    proptest! {
        #[test]
        fn prop_sd_names_are_whole_block_devices(name in "sd[a-z]{1,4}") {
            prop_assume!(!name.contains("bsg") && !name.contains("nvme"));
            prop_assert_eq!(classify(&name), HandleKind::Block);
            prop_assert!(is_whole_block_device(&name));
            prop_assert!(accepts_drive_entry(&name));
        }

        #[test]
        fn prop_sd_partitions_are_excluded(name in "sd[a-z]{1,4}", part in 1u32..128) {
            prop_assume!(!name.contains("bsg") && !name.contains("nvme"));
            let partition = format!("{}{}", name, part);
            prop_assert_eq!(classify(&partition), HandleKind::Block);
            prop_assert!(!is_whole_block_device(&partition));
            prop_assert!(!accepts_drive_entry(&partition));
        }

        #[test]
        fn prop_bsg_wins_over_sg(prefix in "[a-z0-9]{0,4}", suffix in "[a-z0-9:]{0,6}") {
            let name = format!("{}bsg{}", prefix, suffix);
            prop_assert_eq!(classify(&name), HandleKind::BlockGeneric);
        }
    }
}
