use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    domain::{Card, EventDescriptor},
    error::TablesError,
};

const DEFAULT_TABLES: &str = include_str!("../data/default_tables.toml");

/// The event catalog and the card binding table, as supplied at startup.
///
/// Both tables travel together so that a reload always swaps them as a pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticTables {
    #[serde(default)]
    pub events: Vec<EventDescriptor>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl StaticTables {
    pub fn from_toml_str(raw: &str) -> Result<Self, TablesError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, TablesError> {
        let raw = fs::read_to_string(path).map_err(|source| TablesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// The built-in catalog of guiding server events and the stock cards.
    pub fn defaults() -> Self {
        Self::parse_or_empty(DEFAULT_TABLES)
    }

    fn parse_or_empty(raw: &str) -> Self {
        match Self::from_toml_str(raw) {
            Ok(tables) => tables,
            Err(err) => {
                warn!(error = %err, "built-in binding tables are invalid; starting with none");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/tables_tests.rs"]
mod tests;
