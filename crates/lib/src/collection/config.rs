//! Merge configuration.

use serde::{Deserialize, Serialize};

use super::errors::CollectionError;

/// Which path wins when two paths supply the same merged key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Keys from earlier paths are never overwritten by later paths.
    #[default]
    EarliestDeclared,
    /// Later paths overwrite keys supplied by earlier paths.
    LatestDeclared,
}

/// Tunables of a merged collection.
///
/// ```
/// use mergeview::collection::{MergeConfig, TieBreak};
///
/// let config = MergeConfig::from_json(r#"{"tie_break": "latest_declared"}"#).unwrap();
/// assert_eq!(config.tie_break, TieBreak::LatestDeclared);
/// assert!(config.suppress_duplicate_values);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub tie_break: TieBreak,
    /// Skip a record `value` event whose merged value equals the previous one.
    pub suppress_duplicate_values: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            tie_break: TieBreak::default(),
            suppress_duplicate_values: true,
        }
    }
}

impl MergeConfig {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, CollectionError> {
        serde_json::from_str(json).map_err(|err| CollectionError::InvalidConfig {
            reason: err.to_string(),
        })
    }
}
