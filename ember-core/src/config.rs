use crate::error::{EmberError, EmberResult};
use crate::storage::entry::ENTRY_HEADER_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How segment files are read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RwMethod {
    /// Positional reads and writes against the file descriptor.
    FileIo,
    /// The file is pre-truncated to the block size and memory mapped.
    Mmap,
}

/// Configuration parameters for an engine instance.
///
/// A JSON snapshot of this struct is written to `DB.CFG` inside the data
/// directory on clean close, so a database can be reopened without the caller
/// remembering how it was configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the segment files and the config snapshot.
    pub dir_path: PathBuf,
    /// Listener endpoint for the line-protocol front-end.
    pub addr: String,
    /// Maximum bytes a segment file may hold; drives rollover.
    pub block_size: u64,
    /// Maximum key length in bytes.
    pub max_key_size: u32,
    /// Maximum value length in bytes.
    pub max_value_size: u32,
    /// Segment file access method.
    pub rw_method: RwMethod,
    /// Fsync the active segment after every write.
    pub sync: bool,
    /// Minimum number of archived segments before reclaim is allowed.
    pub reclaim_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dir_path: std::env::temp_dir().join("ember"),
            addr: "127.0.0.1:5200".to_string(),
            block_size: 16 * 1024 * 1024,
            max_key_size: 128,
            max_value_size: 1024 * 1024,
            rw_method: RwMethod::FileIo,
            sync: false,
            reclaim_threshold: 4,
        }
    }
}

impl Config {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> EmberResult<()> {
        if self.addr.is_empty() {
            return Err(EmberError::Config("addr must not be empty".to_string()));
        }
        if self.block_size <= ENTRY_HEADER_SIZE as u64 {
            return Err(EmberError::Config(format!(
                "block_size must exceed the {} byte record header",
                ENTRY_HEADER_SIZE
            )));
        }
        if self.max_key_size == 0 {
            return Err(EmberError::Config(
                "max_key_size must be greater than 0".to_string(),
            ));
        }
        if self.max_value_size == 0 {
            return Err(EmberError::Config(
                "max_value_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rw_method_serde_names() {
        let json = serde_json::to_string(&RwMethod::FileIo).unwrap();
        assert_eq!(json, "\"file-io\"");
        let json = serde_json::to_string(&RwMethod::Mmap).unwrap();
        assert_eq!(json, "\"mmap\"");

        let parsed: RwMethod = serde_json::from_str("\"mmap\"").unwrap();
        assert_eq!(parsed, RwMethod::Mmap);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = Config {
            block_size: 4096,
            sync: true,
            ..Config::default()
        };
        let bytes = serde_json::to_vec(&config).unwrap();
        let parsed: Config = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_tiny_block_size() {
        let config = Config {
            block_size: 16,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(EmberError::Config(_))));
    }
}
