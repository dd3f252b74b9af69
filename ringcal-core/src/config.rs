//! ringcal configuration.

use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::{Deserialize, Serialize};

use crate::directory::AccountId;
use crate::error::{CalError, CalResult};

const DEFAULT_GC_THRESHOLD: u32 = 100;
const DEFAULT_SORT_THRESHOLD: usize = 32;

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("ringcal"))
        .unwrap_or_else(|| PathBuf::from("~/.ringcal"))
}

fn default_gc_threshold() -> u32 {
    DEFAULT_GC_THRESHOLD
}

fn default_sort_threshold() -> usize {
    DEFAULT_SORT_THRESHOLD
}

/// Configuration at ~/.config/ringcal/config.toml
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RingcalConfig {
    /// Root of the calendar files (`<data_dir>/iCal/<account>.ics`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Garbage score above which the next save rewrites the whole file
    #[serde(default = "default_gc_threshold")]
    pub gc_threshold: u32,

    /// Out-of-order appends a contact timeline tolerates before it is sorted
    #[serde(default = "default_sort_threshold")]
    pub sort_threshold: usize,

    /// Fail a load on the first parse error instead of skipping the broken
    /// object
    #[serde(default)]
    pub strict_parsing: bool,
}

impl Default for RingcalConfig {
    fn default() -> Self {
        RingcalConfig {
            data_dir: default_data_dir(),
            gc_threshold: DEFAULT_GC_THRESHOLD,
            sort_threshold: DEFAULT_SORT_THRESHOLD,
            strict_parsing: false,
        }
    }
}

impl RingcalConfig {
    pub fn config_path() -> CalResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CalError::Config("Could not determine config directory".into()))?
            .join("ringcal");

        Ok(config_dir.join("config.toml"))
    }

    /// Load the user configuration, creating a commented default file on
    /// first use.
    pub fn load() -> CalResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> CalResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .build()
            .map_err(|e| CalError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CalError::Config(e.to_string()))
    }

    /// Defaults, with calendars stored under `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        RingcalConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// `data_dir` with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.data_dir.to_string_lossy()).into_owned();

        PathBuf::from(full_path_str)
    }

    pub fn calendar_dir(&self) -> PathBuf {
        self.data_path().join("iCal")
    }

    /// Backing file of an account's calendar.
    pub fn calendar_path(&self, account: &AccountId) -> PathBuf {
        let file_name = account.as_str().replace(['/', '\\'], "_");
        self.calendar_dir().join(format!("{file_name}.ics"))
    }

    pub fn save(&self, path: &Path) -> CalResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CalError::Config(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| CalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CalResult<()> {
        let contents = format!(
            "\
# ringcal configuration

# Where the call history is stored (one .ics file per account under iCal/):
# data_dir = \"{}\"

# Garbage score (removed + 3 x unsorted + 2 x duplicates) above which the
# next save rewrites the whole file instead of appending:
# gc_threshold = {DEFAULT_GC_THRESHOLD}

# Out-of-order events a contact timeline accepts before it is re-sorted:
# sort_threshold = {DEFAULT_SORT_THRESHOLD}

# Refuse to load files with errors instead of skipping broken events:
# strict_parsing = false
",
            default_data_dir().display()
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CalError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_file_loads_as_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ringcal").join("config.toml");
        RingcalConfig::create_default_config(&path).unwrap();
        let config = RingcalConfig::load_from(&path).unwrap();
        assert_eq!(config, RingcalConfig::default());
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RingcalConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.gc_threshold, 100);
        assert_eq!(config.sort_threshold, 32);
        assert!(!config.strict_parsing);
    }

    #[test]
    fn test_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "data_dir = \"/srv/history\"\ngc_threshold = 7\nstrict_parsing = true\n",
        )
        .unwrap();
        let config = RingcalConfig::load_from(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/history"));
        assert_eq!(config.gc_threshold, 7);
        assert_eq!(config.sort_threshold, 32);
        assert!(config.strict_parsing);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = RingcalConfig::with_data_dir(dir.path());
        config.sort_threshold = 4;
        config.save(&path).unwrap();
        assert_eq!(RingcalConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_calendar_path() {
        let config = RingcalConfig::with_data_dir("/data");
        assert_eq!(
            config.calendar_path(&AccountId::from("abc123")),
            PathBuf::from("/data/iCal/abc123.ics")
        );
        assert_eq!(
            config.calendar_path(&AccountId::from("../evil")),
            PathBuf::from("/data/iCal/.._evil.ics")
        );
    }

    #[test]
    fn test_tilde_is_expanded() {
        let config = RingcalConfig::with_data_dir("~/history");
        assert!(!config.data_path().to_string_lossy().starts_with('~'));
    }
}
