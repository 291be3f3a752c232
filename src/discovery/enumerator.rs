/// Candidate discovery across the drive directory and the NVMe subsystem
use super::classify::accepts_drive_entry;
use super::opener::{DeviceOpener, OpenMode};
use crate::passthrough::NvmeSubsystem;
use crate::{DeviceError, DeviceIdentity, DeviceResult, ReturnCode, VersionBlock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Devices opened by [`DeviceEnumerator::get_device_list`] and the aggregate
/// outcome of the scan
#[derive(Debug)]
pub struct DeviceList {
    pub devices: Vec<DeviceIdentity>,
    pub summary: ReturnCode,
}

pub struct DeviceEnumerator {
    drive_dir: PathBuf,
    nvme: Arc<dyn NvmeSubsystem>,
    max_devices: usize,
}

impl DeviceEnumerator {
    pub fn new(drive_dir: impl AsRef<Path>, nvme: Arc<dyn NvmeSubsystem>, max_devices: usize) -> Self {
        Self {
            drive_dir: drive_dir.as_ref().to_path_buf(),
            nvme,
            max_devices,
        }
    }

    /// Accepted drive-directory entries in lexical order
    fn scan_drive_dir(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.drive_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %self.drive_dir.display(), error = %e, "Drive directory not readable");
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| accepts_drive_entry(name))
            .collect();
        names.sort();
        names
    }

    /// Adapter names; a failed query contributes nothing
    fn nvme_adapters(&self) -> Vec<String> {
        match self.nvme.adapter_list() {
            Ok(adapters) => adapters.into_iter().map(|a| a.name).collect(),
            Err(errno) => {
                tracing::debug!(error = %errno, "NVMe adapter list unavailable");
                Vec::new()
            }
        }
    }

    /// Number of candidates; never fails
    pub fn count_devices(&self) -> usize {
        let drives = self.scan_drive_dir().len();
        let nvme = self.nvme_adapters().len();
        tracing::debug!(drives, nvme, "Counted devices");
        drives + nvme
    }

    /// Candidate paths: drive-directory entries joined to the directory, then
    /// NVMe adapter names verbatim. The list is cut at the smaller of
    /// `capacity` and the configured maximum.
    pub fn list_devices(&self, capacity: usize) -> DeviceResult<Vec<String>> {
        if capacity == 0 {
            return Err(DeviceError::BadParameter(
                "device list capacity is zero".to_string(),
            ));
        }

        let mut paths: Vec<String> = self
            .scan_drive_dir()
            .into_iter()
            .map(|name| self.drive_dir.join(name).display().to_string())
            .collect();
        paths.extend(self.nvme_adapters());

        let limit = capacity.min(self.max_devices);
        if paths.len() > limit {
            tracing::debug!(found = paths.len(), limit, "Truncating device list");
            paths.truncate(limit);
        }
        Ok(paths)
    }

    /// Open every candidate and summarize the failures.
    ///
    /// Both the capacity and the caller's version stamp are checked before any
    /// device is opened. Candidates that fail to open are counted, not
    /// returned.
    pub fn get_device_list(
        &self,
        opener: &DeviceOpener,
        capacity: usize,
        version: VersionBlock,
        mode: OpenMode,
    ) -> DeviceResult<DeviceList> {
        if capacity == 0 {
            return Err(DeviceError::BadParameter(
                "device list capacity is zero".to_string(),
            ));
        }
        if !version.is_compatible() {
            return Err(DeviceError::LibraryMismatch(format!(
                "caller expects version {} size {}, library has {:?}",
                version.version,
                version.size,
                VersionBlock::current()
            )));
        }

        let candidates = self.list_devices(capacity)?;
        let mut devices = Vec::with_capacity(candidates.len());
        let mut failed = 0usize;
        let mut permission_denied = 0usize;

        for path in &candidates {
            match opener.open_device(path, mode) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    tracing::debug!(device = %path, error = %e, "Candidate failed to open");
                    if matches!(e, DeviceError::PermissionDenied(_)) {
                        permission_denied += 1;
                    }
                    failed += 1;
                }
            }
        }

        let summary = summarize(candidates.len(), failed, permission_denied);
        tracing::info!(
            candidates = candidates.len(),
            opened = devices.len(),
            failed,
            summary = %summary,
            "Device scan complete"
        );

        Ok(DeviceList { devices, summary })
    }
}

/// Fold per-candidate failures into one outcome
pub fn summarize(candidates: usize, failed: usize, permission_denied: usize) -> ReturnCode {
    if candidates == 0 {
        ReturnCode::Failure
    } else if permission_denied == candidates {
        ReturnCode::PermissionDenied
    } else if failed == candidates {
        ReturnCode::Failure
    } else if failed > 0 {
        ReturnCode::WarnPartial
    } else {
        ReturnCode::Success
    }
}
