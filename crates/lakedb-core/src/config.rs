//! Applier configuration.

use serde::{Deserialize, Serialize};

/// Settings consulted by the transaction log applier.
///
/// Loaded from the server configuration file; both flags default to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplierSettings {
    /// Gates the primary-key recovery envelope around write and compaction
    /// publication
    #[serde(default)]
    pub enable_primary_key_recover: bool,

    /// When set, compaction resets the cumulative point to zero instead of
    /// recomputing it; the size-tiered planner does not use it
    #[serde(default)]
    pub enable_size_tiered_compaction_strategy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_off() {
        let settings = ApplierSettings::default();
        assert!(!settings.enable_primary_key_recover);
        assert!(!settings.enable_size_tiered_compaction_strategy);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let settings: ApplierSettings =
            serde_json::from_str(r#"{"enable_primary_key_recover": true}"#).unwrap();
        assert!(settings.enable_primary_key_recover);
        assert!(!settings.enable_size_tiered_compaction_strategy);
    }
}
