//! Store configuration.
//!
//! # Responsibility
//! - Hold connection and transaction defaults applied to every unit of work.
//! - Parse settings from JSON documents with per-field defaults.
//!
//! # Invariants
//! - Every field has a default, so `{}` is a valid configuration.
//! - Isolation levels map onto SQLite `BEGIN` modes; SQLite itself is
//!   always serializable between connections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Requested isolation for an explicit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// `BEGIN DEFERRED`: locks are taken on first read/write.
    #[default]
    ReadCommitted,
    /// `BEGIN IMMEDIATE`: the write lock is taken up front.
    RepeatableRead,
    /// `BEGIN EXCLUSIVE`.
    Serializable,
}

impl IsolationLevel {
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "BEGIN DEFERRED;",
            Self::RepeatableRead => "BEGIN IMMEDIATE;",
            Self::Serializable => "BEGIN EXCLUSIVE;",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
        }
    }
}

/// Options for opening a store and its units of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
    pub default_isolation: IsolationLevel,
    /// When set, `DataStore::open` initializes file logging once.
    pub log: Option<LogOptions>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
            default_isolation: IsolationLevel::default(),
            log: None,
        }
    }
}

impl StoreOptions {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Parses options from a JSON document; missing keys take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// File logging options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    #[serde(default = "default_log_level_name")]
    pub level: String,
    /// Absolute directory receiving rotated log files.
    pub dir: PathBuf,
}

fn default_log_level_name() -> String {
    crate::logging::default_log_level().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let options = StoreOptions::from_json_str("{}").unwrap();
        assert_eq!(options, StoreOptions::default());
        assert_eq!(options.busy_timeout(), Duration::from_secs(5));
        assert!(options.foreign_keys);
        assert_eq!(options.default_isolation, IsolationLevel::ReadCommitted);
    }

    #[test]
    fn isolation_level_parses_snake_case() {
        let options =
            StoreOptions::from_json_str(r#"{"default_isolation":"serializable"}"#).unwrap();
        assert_eq!(options.default_isolation, IsolationLevel::Serializable);
        assert_eq!(options.default_isolation.begin_sql(), "BEGIN EXCLUSIVE;");
    }

    #[test]
    fn unknown_isolation_level_is_rejected() {
        assert!(StoreOptions::from_json_str(r#"{"default_isolation":"chaos"}"#).is_err());
    }

    #[test]
    fn log_level_defaults_when_omitted() {
        let options = StoreOptions::from_json_str(r#"{"log":{"dir":"/tmp/stowage"}}"#).unwrap();
        let log = options.log.unwrap();
        assert_eq!(log.level, crate::logging::default_log_level());
    }
}
