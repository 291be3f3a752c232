//! Shared fixtures for integration tests: a temporary drive directory with a
//! fake sysfs class tree, and hand-written SG / NVMe collaborators.
#![allow(dead_code)]

pub mod fakes;

use sayonara_passthrough::Settings;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const HOST0: &str = "../../devices/pci0000:00/0000:00:17.0/ata1/host0/target0:0:0/0:0:0:0";
pub const HOST1: &str = "../../devices/pci0000:00/0000:00:17.0/ata2/host1/target1:0:0/1:0:0:0";

/// Temporary host layout: `disks/` holds drive nodes, `class/` mimics
/// `/sys/class`, `dev/` is the prefix for sibling paths.
pub struct HostFixture {
    pub tmp: TempDir,
}

impl HostFixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(tmp.path().join("disks")).expect("Failed to create drive dir");
        fs::create_dir_all(tmp.path().join("class")).expect("Failed to create class dir");
        Self { tmp }
    }

    pub fn drive_dir(&self) -> PathBuf {
        self.tmp.path().join("disks")
    }

    pub fn class_dir(&self) -> PathBuf {
        self.tmp.path().join("class")
    }

    pub fn dev_dir(&self) -> PathBuf {
        self.tmp.path().join("dev")
    }

    /// Regular file standing in for a drive node
    pub fn add_drive(&self, name: &str) -> String {
        let path = self.drive_dir().join(name);
        fs::write(&path, b"").expect("Failed to create drive node");
        path.display().to_string()
    }

    /// `class/<class>/<name>` -> `<host>/<class>/<name>`
    pub fn link_class(&self, class: &str, name: &str, host: &str) {
        let dir = self.class_dir().join(class);
        fs::create_dir_all(&dir).expect("Failed to create class dir");
        symlink(format!("{}/{}/{}", host, class, name), dir.join(name))
            .expect("Failed to create class link");
    }

    pub fn settings(&self) -> Settings {
        Settings {
            drive_dir: self.drive_dir(),
            dev_dir: self.dev_dir(),
            sysfs_class_dir: self.class_dir(),
            sysfs_block_dir: self.tmp.path().join("block"),
            ..Settings::default()
        }
    }
}

pub fn path_in(dir: &Path, name: &str) -> String {
    dir.join(name).display().to_string()
}
