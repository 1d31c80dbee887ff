//! Engine configuration

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::logger::LogLevel;

/// Number of pages kept in the page cache before clean pages are evicted
/// (5000 pages x 4KB = 20MB)
pub const DEFAULT_CACHE_SIZE: usize = 5000;

/// Engine settings.
///
/// Can be deserialized from JSON or parsed from a connection string such as
/// `"filename=app.db; journal=false; cache size=500; log=5"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Datafile path, used by [`crate::Engine::open`]
    pub filename: Option<PathBuf>,
    /// Journal commits for crash recovery. Applied by [`crate::Engine::open`]
    /// when it creates the file disk; [`crate::Engine::with_config`] leaves
    /// journaling to the disk it is given.
    pub journal: bool,
    /// Page cache capacity in pages
    pub cache_size: usize,
    /// Bitmask of [`LogLevel`] categories
    pub log_level: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filename: None,
            journal: true,
            cache_size: DEFAULT_CACHE_SIZE,
            log_level: (LogLevel::ERROR | LogLevel::RECOVERY).bits(),
        }
    }
}

impl EngineConfig {
    pub fn with_filename(mut self, filename: impl Into<PathBuf>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_journal(mut self, journal: bool) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level.bits();
        self
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_bits(self.log_level)
    }

    /// Parse settings from JSON
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    /// Parse `key=value` pairs separated by `;`. Keys are case-insensitive.
    pub fn from_connection_string(input: &str) -> EngineResult<Self> {
        let mut config = Self::default();

        for pair in input.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((key, value)) => (key.trim().to_ascii_lowercase(), value.trim()),
                // A bare value is the filename
                None => ("filename".to_string(), pair),
            };

            match key.as_str() {
                "filename" => config.filename = Some(PathBuf::from(value)),
                "journal" => config.journal = parse_value(&key, value)?,
                "cache size" | "cache_size" => config.cache_size = parse_value(&key, value)?,
                "log" | "log_level" => config.log_level = parse_value(&key, value)?,
                _ => {
                    return Err(EngineError::InvalidArgument(format!(
                        "unknown connection string key '{}'",
                        key
                    )));
                }
            }
        }

        config.validate()
    }

    fn validate(self) -> EngineResult<Self> {
        if self.cache_size == 0 {
            return Err(EngineError::InvalidArgument(
                "cache size must be at least 1 page".to_string(),
            ));
        }
        Ok(self)
    }
}

impl FromStr for EngineConfig {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_connection_string(s)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> EngineResult<T> {
    value.parse().map_err(|_| {
        EngineError::InvalidArgument(format!("invalid value '{}' for '{}'", value, key))
    })
}
