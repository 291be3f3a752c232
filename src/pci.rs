// Raw PCI BAR0 register reads through the sysfs resource file

use crate::{DeviceError, DeviceIdentity, DeviceResult};
use std::path::Path;

/// Copy `out.len()` bytes from the start of BAR0 of the device's PCI function.
///
/// `block_dir` is the sysfs block root (normally `/sys/block`); the resource
/// file lives at `<block_dir>/<name>/device/resource0`.
#[cfg(all(target_os = "linux", feature = "nvme-passthrough"))]
pub fn pci_read_bar_reg(device: &DeviceIdentity, block_dir: &Path, out: &mut [u8]) -> DeviceResult<()> {
    use memmap2::MmapOptions;
    use std::fs::File;

    let resource = block_dir
        .join(&device.friendly_name)
        .join("device")
        .join("resource0");

    let file = File::open(&resource).map_err(|e| {
        tracing::warn!(device = %device.name, path = %resource.display(), error = %e, "Couldn't open device BAR");
        DeviceError::BadParameter(format!("cannot open {}: {}", resource.display(), e))
    })?;

    if out.is_empty() {
        return Ok(());
    }

    // SAFETY: read-only shared mapping of a sysfs resource file; the map is
    // dropped before this function returns.
    let map = unsafe { MmapOptions::new().len(out.len()).map(&file) }
        .map_err(|e| DeviceError::Failure(format!("cannot map {}: {}", resource.display(), e)))?;

    let n = out.len().min(map.len());
    out[..n].copy_from_slice(&map[..n]);
    Ok(())
}

#[cfg(not(all(target_os = "linux", feature = "nvme-passthrough")))]
pub fn pci_read_bar_reg(_device: &DeviceIdentity, _block_dir: &Path, _out: &mut [u8]) -> DeviceResult<()> {
    Err(DeviceError::NotSupported(
        "PCI register access requires NVMe passthrough support".to_string(),
    ))
}
