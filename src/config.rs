//! Unified configuration for the reconciliation engine.
//!
//! Configuration is loaded with precedence: overrides > Env vars > Config file > Defaults.
//! Policies, the quality checklist, and milestone schemas are all data, not
//! code — changing them never requires engine changes.
//!
//! # Example config file (goldenrec.toml)
//! ```toml
//! [matching]
//! normalize_keys = true
//!
//! [policies.supplier]
//! primary_source = "erp"
//! fallback_source = "crm"
//! rule = "merge_fields"
//! tie_break = "prefer_primary"
//! tracked_fields = ["name", "rating", "region"]
//!
//! [[quality.checks]]
//! field = "name"
//! kind = { type = "required" }
//! weight = 40
//!
//! [[quality.checks]]
//! field = "rating"
//! kind = { type = "numeric_range", min = 0.0, max = 100.0 }
//! weight = 30
//!
//! [process.onboarding]
//! milestones = [
//!   { name = "intake" },
//!   { name = "assigned" },
//!   { name = "completed", terminal = true },
//! ]
//!
//! [process.onboarding.repeat_policies]
//! assigned = "overwrite"
//! ```

use crate::error::EngineError;
use crate::merge::ReconciliationPolicy;
use crate::milestones::MilestoneSchema;
use crate::quality::Checklist;
use crate::resolver::MatchingOptions;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Resolver matching options
    pub matching: MatchingOptions,
    /// Reconciliation policy per entity type
    pub policies: BTreeMap<String, ReconciliationPolicy>,
    /// Quality checklist applied to canonical records
    pub quality: Checklist,
    /// Milestone schema per process type
    pub process: BTreeMap<String, MilestoneSchema>,
}

impl EngineConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - Programmatic overrides applied on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(EngineConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with GOLDENREC_ prefix
        figment = figment.merge(Env::prefixed("GOLDENREC_").split("__"));

        // Layer 3: Programmatic overrides
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no overrides).
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    /// Validate every policy and schema. Reports the first problem found;
    /// validation failures at load time are configuration errors rather
    /// than per-batch policy errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (entity_type, policy) in &self.policies {
            policy
                .validate(entity_type)
                .map_err(|err| ConfigError::new(err.to_string()))?;
        }
        for (process_type, schema) in &self.process {
            schema
                .validate(process_type)
                .map_err(|err| ConfigError::new(err.to_string()))?;
        }
        Ok(())
    }

    /// Policy for an entity type, as a per-batch policy error when missing.
    pub fn policy_for(&self, entity_type: &str) -> Result<&ReconciliationPolicy, EngineError> {
        self.policies.get(entity_type).ok_or_else(|| {
            EngineError::policy(entity_type, "no reconciliation policy configured")
        })
    }
}

/// Programmatic overrides layered on top of file and environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching: Option<MatchingOptions>,
}

impl ConfigOverrides {
    pub fn normalize_keys(normalize: bool) -> Self {
        Self {
            matching: Some(MatchingOptions {
                normalize_keys: normalize,
            }),
        }
    }
}

/// Error loading or validating configuration.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::new(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{ReconcileRule, TieBreak};
    use std::io::Write;

    const SAMPLE: &str = r#"
        [matching]
        normalize_keys = true

        [policies.supplier]
        primary_source = "erp"
        fallback_source = "crm"
        rule = "merge_fields"
        tracked_fields = ["name", "rating"]

        [policies.contact]
        primary_source = "crm"
        rule = "single_source"

        [[quality.checks]]
        field = "name"
        kind = { type = "required" }
        weight = 40

        [[quality.checks]]
        field = "rating"
        kind = { type = "numeric_range", min = 0.0, max = 100.0 }
        weight = 30

        [process.onboarding]
        milestones = [
            { name = "intake" },
            { name = "assigned" },
            { name = "completed", terminal = true },
        ]

        [process.onboarding.repeat_policies]
        assigned = "overwrite"
    "#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_empty_and_valid() {
        let config = EngineConfig::default();
        assert!(config.policies.is_empty());
        assert!(config.quality.checks.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let file = write_config(SAMPLE);
        let config =
            EngineConfig::from_env(Some(file.path().to_str().unwrap())).unwrap();

        assert!(config.matching.normalize_keys);

        let supplier = &config.policies["supplier"];
        assert_eq!(supplier.primary_source, "erp".into());
        assert_eq!(supplier.fallback_source, Some("crm".into()));
        assert_eq!(supplier.rule, ReconcileRule::MergeFields);
        assert_eq!(supplier.tie_break, TieBreak::PreferPrimary);
        assert_eq!(supplier.tracked_fields, vec!["name", "rating"]);

        let contact = &config.policies["contact"];
        assert_eq!(contact.rule, ReconcileRule::SingleSource);
        assert_eq!(contact.fallback_source, None);

        assert_eq!(config.quality.checks.len(), 2);

        let onboarding = &config.process["onboarding"];
        assert_eq!(onboarding.milestones.len(), 3);
        assert!(onboarding.milestones[2].terminal);

        config.validate().unwrap();
    }

    #[test]
    fn test_overrides_beat_file() {
        let file = write_config(SAMPLE);
        let config = EngineConfig::load(
            Some(file.path().to_str().unwrap()),
            ConfigOverrides::normalize_keys(false),
        )
        .unwrap();
        assert!(!config.matching.normalize_keys);
        // The rest of the file still applies.
        assert_eq!(config.policies.len(), 2);
    }

    #[test]
    fn test_invalid_policy_caught_at_validation() {
        let file = write_config(
            r#"
            [policies.supplier]
            primary_source = "erp"
            rule = "merge_fields"
        "#,
        );
        let config =
            EngineConfig::from_env(Some(file.path().to_str().unwrap())).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("merge_fields"));
    }

    #[test]
    fn test_unknown_rule_fails_extraction() {
        let file = write_config(
            r#"
            [policies.supplier]
            primary_source = "erp"
            rule = "coin_flip"
        "#,
        );
        assert!(EngineConfig::from_env(Some(file.path().to_str().unwrap())).is_err());
    }

    #[test]
    fn test_missing_policy_is_entity_scoped_error() {
        let config = EngineConfig::default();
        let err = config.policy_for("supplier").unwrap_err();
        assert!(matches!(err, EngineError::Policy { .. }));
    }
}
