//! Supervisor configuration: store root, reduction cadence, truncation
//! budget, and bus capacity.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::PersistentProcess`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Root directory of the durable file store.
    pub store_root: PathBuf,
    /// How often the reduction-maintenance timer attempts a snapshot.
    #[serde(with = "duration_secs")]
    pub snapshot_interval: Duration,
    /// Ring-buffer capacity of the process's [`crate::bus::InMemoryBus`].
    pub bus_capacity: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("./pine-store-data"),
            snapshot_interval: Duration::from_secs(600),
            bus_capacity: 1024,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_interval_is_ten_minutes() {
        assert_eq!(ProcessConfig::default().snapshot_interval, Duration::from_secs(600));
    }

    #[test]
    fn round_trips_through_json() {
        let config = ProcessConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ProcessConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
