//! Reconciler configuration.

use crate::TableName;
use std::collections::BTreeSet;
use std::env;

/// Environment variable toggling [`SyncConfig::strict_creates`].
pub const ENV_STRICT_CREATES: &str = "CARRY_SYNC_STRICT_CREATES";

/// Environment variable listing [`SyncConfig::excluded_tables`], comma-separated.
pub const ENV_EXCLUDED_TABLES: &str = "CARRY_SYNC_EXCLUDED_TABLES";

/// Knobs for a sync round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    /// Reject an incoming create whose id already has a live local record,
    /// instead of applying it as a correction
    pub strict_creates: bool,
    /// Tables whose local changes are never collected or pushed
    pub excluded_tables: BTreeSet<TableName>,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let strict_creates = match env::var(ENV_STRICT_CREATES) {
            Ok(value) => parse_bool(ENV_STRICT_CREATES, &value)?,
            Err(_) => false,
        };

        let excluded_tables = env::var(ENV_EXCLUDED_TABLES)
            .map(|value| parse_table_list(&value))
            .unwrap_or_default();

        Ok(Self {
            strict_creates,
            excluded_tables,
        })
    }

    /// Builder-style method to set strict create handling.
    pub fn with_strict_creates(mut self, strict: bool) -> Self {
        self.strict_creates = strict;
        self
    }

    /// Builder-style method to exclude a table from outbound sync.
    pub fn exclude_table(mut self, table: impl Into<TableName>) -> Self {
        self.excluded_tables.insert(table.into());
        self
    }

    /// Check whether a table's local changes are collected.
    pub fn includes(&self, table: &str) -> bool {
        !self.excluded_tables.contains(table)
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_table_list(value: &str) -> BTreeSet<TableName> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a boolean, got '{value}'")]
    InvalidBool { var: &'static str, value: String },
}
