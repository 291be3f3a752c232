/// Runtime settings for discovery and dispatch
///
/// Layered with the `config` crate: built-in defaults, then the per-user
/// config file, then an explicit file, then `SAYONARA_PT_*` environment
/// variables.
use crate::DeviceResult;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Directory scanned for drive nodes
    pub drive_dir: PathBuf,
    /// Prefix used to turn resolved sibling names into device paths
    pub dev_dir: PathBuf,
    /// Root of the block / scsi_generic / bsg class directories
    pub sysfs_class_dir: PathBuf,
    /// Root used for PCI BAR resource files
    pub sysfs_block_dir: PathBuf,
    /// Hard cap on enumerated candidates
    pub max_devices: usize,
    /// Pause after every dispatched command, 0 disables
    pub delay_io_ms: u64,
    /// Device-wide timeout applied to every opened device, 0 for none
    pub default_timeout_secs: u32,
    /// Reset busy-poll attempts; 0 keeps the unbounded poll
    pub reset_poll_limit: u32,
    pub log_filter: String,
    pub json_logs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            drive_dir: PathBuf::from("/dev/disks"),
            dev_dir: PathBuf::from("/dev"),
            sysfs_class_dir: PathBuf::from("/sys/class"),
            sysfs_block_dir: PathBuf::from("/sys/block"),
            max_devices: 256,
            delay_io_ms: 0,
            default_timeout_secs: 0,
            reset_poll_limit: 0,
            log_filter: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Settings {
    /// Load layered settings, `explicit` takes precedence over the user file
    pub fn load(explicit: Option<&Path>) -> DeviceResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(user_file) = Self::user_config_path() {
            builder = builder.add_source(File::from(user_file).required(false));
        }

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("SAYONARA_PT").try_parsing(true));

        let settings: Settings = builder.build()?.try_deserialize()?;
        tracing::debug!(settings = ?settings, "Loaded settings");
        Ok(settings)
    }

    /// `$XDG_CONFIG_HOME/sayonara-passthrough/config.toml` or platform equivalent
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sayonara-passthrough")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn delay_io(&self) -> Option<Duration> {
        (self.delay_io_ms > 0).then(|| Duration::from_millis(self.delay_io_ms))
    }

    pub fn reset_poll_limit(&self) -> Option<u32> {
        (self.reset_poll_limit > 0).then_some(self.reset_poll_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.drive_dir, PathBuf::from("/dev/disks"));
        assert_eq!(settings.max_devices, 256);
        assert_eq!(settings.delay_io(), None);
        assert_eq!(settings.reset_poll_limit(), None);
    }

    #[test]
    #[serial]
    fn test_explicit_file_overrides_defaults() -> anyhow::Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "drive_dir = \"/tmp/disks\"")?;
        writeln!(file, "delay_io_ms = 25")?;
        writeln!(file, "reset_poll_limit = 8")?;

        let settings = Settings::load(Some(file.path()))?;
        assert_eq!(settings.drive_dir, PathBuf::from("/tmp/disks"));
        assert_eq!(settings.delay_io(), Some(Duration::from_millis(25)));
        assert_eq!(settings.reset_poll_limit(), Some(8));
        // untouched keys keep their defaults
        assert_eq!(settings.sysfs_class_dir, PathBuf::from("/sys/class"));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        let result = Settings::load(Some(Path::new("/nonexistent/sayonara-pt.toml")));
        assert!(result.is_err());
    }
}
