use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// JSON array of spaces to load into the catalog.
    pub catalog_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    /// Compact once this many records were appended since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            catalog_path: None,
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to the default, like unset ones.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("AGENDA_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            catalog_path: lookup("AGENDA_CATALOG").map(PathBuf::from),
            metrics_port: lookup("AGENDA_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("AGENDA_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            compact_interval: lookup("AGENDA_COMPACT_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .map_or(defaults.compact_interval, Duration::from_secs),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
