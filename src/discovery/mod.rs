// Device discovery: naming rules, sysfs sibling mapping, enumeration and open

pub mod classify;
pub mod enumerator;
pub mod opener;
pub mod sysfs;

pub use classify::{
    accepts_drive_entry, classify, is_whole_block_device, is_whole_nvme_device,
    matches_drive_filter, DeviceHandle, HandleKind,
};
pub use enumerator::{DeviceEnumerator, DeviceList};
pub use opener::{DeviceOpener, IdentityFiller, NoopFiller, OpenMode};
pub use sysfs::{SiblingPair, SysfsClass, SysfsResolver};
