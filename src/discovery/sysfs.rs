/// Sibling handle resolution through the sysfs class directories
///
/// The kernel exposes each drive under several class directories
/// (`block`, `scsi_generic`, `bsg`). Every class entry is a symlink into the
/// device tree, so two entries belong to the same drive when their link
/// targets agree up to the point where the class name appears:
///
/// ```text
/// block/sda        -> ../../devices/pci0000:00/.../0:0:0:0/block/sda
/// scsi_generic/sg0 -> ../../devices/pci0000:00/.../0:0:0:0/scsi_generic/sg0
/// ```
use super::classify::{basename, DeviceHandle, HandleKind};
use crate::{DeviceError, DeviceResult};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Class directories under the sysfs class root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysfsClass {
    Block,
    ScsiGeneric,
    Bsg,
}

impl SysfsClass {
    pub fn dir_name(&self) -> &'static str {
        match self {
            SysfsClass::Block => "block",
            SysfsClass::ScsiGeneric => "scsi_generic",
            SysfsClass::Bsg => "bsg",
        }
    }

    fn for_handle(kind: HandleKind) -> Option<Self> {
        match kind {
            HandleKind::Block => Some(SysfsClass::Block),
            HandleKind::ScsiGeneric => Some(SysfsClass::ScsiGeneric),
            HandleKind::BlockGeneric => Some(SysfsClass::Bsg),
            HandleKind::Nvme | HandleKind::Unknown => None,
        }
    }
}

/// Block and generic basenames of one physical drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiblingPair {
    pub generic: String,
    pub block: String,
}

pub struct SysfsResolver {
    class_dir: PathBuf,
}

impl SysfsResolver {
    pub fn new(class_dir: impl AsRef<Path>) -> Self {
        Self {
            class_dir: class_dir.as_ref().to_path_buf(),
        }
    }

    fn class_path(&self, class: SysfsClass) -> PathBuf {
        self.class_dir.join(class.dir_name())
    }

    fn class_available(&self, class: SysfsClass) -> bool {
        self.class_path(class).is_dir()
    }

    /// Map a block, sg or bsg handle to its counterpart in the other class.
    ///
    /// NotSupported covers every "mapping unavailable" case: NVMe handles,
    /// missing class directories (old kernels), unreadable links and a scan
    /// that finds no match.
    pub fn resolve_sibling(&self, handle: &str) -> DeviceResult<SiblingPair> {
        let handle = DeviceHandle::new(handle);
        let kind = handle.kind();
        let name = handle.basename();

        if kind == HandleKind::Nvme {
            return Err(DeviceError::NotSupported(format!(
                "{} is an NVMe handle, sysfs mapping not attempted",
                name
            )));
        }

        let source_class = SysfsClass::for_handle(kind).ok_or_else(|| {
            DeviceError::NotSupported(format!("{} is not a block or generic handle", name))
        })?;

        if !self.class_available(source_class) {
            return Err(DeviceError::NotSupported(format!(
                "sysfs class {} not present",
                source_class.dir_name()
            )));
        }

        let source_link = fs::read_link(self.class_path(source_class).join(name)).map_err(|e| {
            DeviceError::NotSupported(format!("cannot read sysfs link for {}: {}", name, e))
        })?;
        let source_link = source_link.to_string_lossy();

        let source_is_block = source_class == SysfsClass::Block;
        let target_class = if source_is_block {
            if self.class_available(SysfsClass::ScsiGeneric) {
                SysfsClass::ScsiGeneric
            } else if self.class_available(SysfsClass::Bsg) {
                SysfsClass::Bsg
            } else {
                return Err(DeviceError::NotSupported(
                    "no generic class available to map to".to_string(),
                ));
            }
        } else if self.class_available(SysfsClass::Block) {
            SysfsClass::Block
        } else {
            return Err(DeviceError::NotSupported(
                "block class not available to map to".to_string(),
            ));
        };

        tracing::debug!(
            handle = %name,
            source = source_class.dir_name(),
            target = target_class.dir_name(),
            link = %source_link,
            "Resolving sysfs sibling"
        );

        let matched = self
            .find_matching_entry(target_class, &source_link)?
            .ok_or_else(|| {
                DeviceError::NotSupported(format!(
                    "no {} entry shares a device node with {}",
                    target_class.dir_name(),
                    name
                ))
            })?;

        let pair = if source_is_block {
            SiblingPair {
                generic: matched,
                block: name.to_string(),
            }
        } else {
            SiblingPair {
                generic: name.to_string(),
                block: matched,
            }
        };

        tracing::debug!(generic = %pair.generic, block = %pair.block, "Resolved sysfs sibling");
        Ok(pair)
    }

    /// First entry (lexical order) whose link target matches `source_link` up
    /// to the target class name. Sorting puts `sda` ahead of `sda1`, so whole
    /// devices win over their partitions.
    fn find_matching_entry(
        &self,
        class: SysfsClass,
        source_link: &str,
    ) -> DeviceResult<Option<String>> {
        let class_path = self.class_path(class);
        let mut entries: Vec<String> = fs::read_dir(&class_path)
            .map_err(|e| {
                DeviceError::NotSupported(format!(
                    "cannot list {}: {}",
                    class_path.display(),
                    e
                ))
            })?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();

        for entry in entries {
            let entry_path = class_path.join(&entry);
            let is_link = fs::symlink_metadata(&entry_path)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            if !is_link {
                continue;
            }

            let Ok(target) = fs::read_link(&entry_path) else {
                continue;
            };
            let target = target.to_string_lossy();

            if let Some(class_pos) = target.find(class.dir_name()) {
                if source_link.starts_with(&target[..class_pos]) {
                    return Ok(Some(basename(&target[class_pos..]).to_string()));
                }
            }
        }

        Ok(None)
    }
}
