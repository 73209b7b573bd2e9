use std::env;
use std::path::PathBuf;

use crate::error::AssistantError;

pub const DEFAULT_LOCATION: &str = "us-west1";
pub const DEFAULT_APP_ROOT: &str = "app/model_mgmt";
pub const PRO_MODEL_ID: &str = "gemini-1.5-pro-002";
pub const FLASH_MODEL_ID: &str = "gemini-1.5-flash-002";

pub const SCHEMA_SNAPSHOT_FILE: &str = "bq_schema_project.json";
pub const ERD_JSON_FILE: &str = "erd_output.json";
pub const ERD_SUMMARY_FILE: &str = "erd_summary.md";

/// Settings shared by every component. Built once at startup and passed in explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantConfig {
    pub project_id: String,
    pub location: String,
    pub app_root: PathBuf,
    pub schema_root: PathBuf,
    /// Higher-capability model used for ERD synthesis.
    pub erd_model_id: String,
    /// Faster model used for drafting and checking SQL.
    pub sql_model_id: String,
    pub dry_run_validate: bool,
}

impl AssistantConfig {
    pub fn new(project_id: impl Into<String>, app_root: impl Into<PathBuf>) -> Self {
        let app_root = app_root.into();
        Self {
            project_id: project_id.into(),
            location: DEFAULT_LOCATION.to_string(),
            schema_root: app_root.join("schemas"),
            app_root,
            erd_model_id: PRO_MODEL_ID.to_string(),
            sql_model_id: FLASH_MODEL_ID.to_string(),
            dry_run_validate: false,
        }
    }

    pub fn from_env() -> Result<Self, AssistantError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source. `BQ_PROJECT_ID` is required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AssistantError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_id = lookup("BQ_PROJECT_ID")
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AssistantError::ConfigError {
                message: "BQ_PROJECT_ID environment variable is required".to_string(),
            })?;

        let mut config = Self::new(project_id, app_root_from_lookup(&lookup));
        config.schema_root = schema_root_from_lookup(&lookup);

        if let Some(location) = lookup("BQ_LOCATION") {
            config.location = location;
        }
        if let Some(model) = lookup("ERD_MODEL_ID") {
            config.erd_model_id = model;
        }
        if let Some(model) = lookup("SQL_MODEL_ID") {
            config.sql_model_id = model;
        }
        if let Some(flag) = lookup("DRY_RUN_VALIDATE") {
            config.dry_run_validate =
                flag.trim()
                    .to_lowercase()
                    .parse::<bool>()
                    .map_err(|_| AssistantError::ConfigError {
                        message: format!("DRY_RUN_VALIDATE must be true or false, got '{}'", flag),
                    })?;
        }

        Ok(config)
    }

    pub fn erd_json_path(&self) -> PathBuf {
        self.app_root.join("src").join(ERD_JSON_FILE)
    }

    pub fn erd_summary_path(&self) -> PathBuf {
        self.app_root.join("src").join(ERD_SUMMARY_FILE)
    }
}

fn app_root_from_lookup<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    PathBuf::from(lookup("APP_ROOT").unwrap_or_else(|| DEFAULT_APP_ROOT.to_string()))
}

/// Resolves only the local schema cache, which needs no project.
pub fn schema_root_from_lookup<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("SCHEMA_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| app_root_from_lookup(lookup).join("schemas"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_project_only() {
        let config = AssistantConfig::from_lookup(lookup_from(&[("BQ_PROJECT_ID", "acme")])).unwrap();

        assert_eq!(config.project_id, "acme");
        assert_eq!(config.location, DEFAULT_LOCATION);
        assert_eq!(config.schema_root, PathBuf::from("app/model_mgmt/schemas"));
        assert_eq!(config.erd_model_id, PRO_MODEL_ID);
        assert_eq!(config.sql_model_id, FLASH_MODEL_ID);
        assert!(!config.dry_run_validate);
        assert_eq!(
            config.erd_json_path(),
            PathBuf::from("app/model_mgmt/src/erd_output.json")
        );
    }

    #[test]
    fn test_schema_root_resolves_without_project() {
        assert_eq!(
            schema_root_from_lookup(&lookup_from(&[])),
            PathBuf::from("app/model_mgmt/schemas")
        );
        assert_eq!(
            schema_root_from_lookup(&lookup_from(&[("APP_ROOT", "/srv/app")])),
            PathBuf::from("/srv/app/schemas")
        );
        assert_eq!(
            schema_root_from_lookup(&lookup_from(&[
                ("APP_ROOT", "/srv/app"),
                ("SCHEMA_ROOT", "/var/cache/schemas"),
            ])),
            PathBuf::from("/var/cache/schemas")
        );
    }

    #[test]
    fn test_missing_project_is_config_error() {
        let result = AssistantConfig::from_lookup(lookup_from(&[("BQ_LOCATION", "EU")]));
        assert!(matches!(result, Err(AssistantError::ConfigError { .. })));
    }

    #[test]
    fn test_overrides_and_flag_parsing() {
        let config = AssistantConfig::from_lookup(lookup_from(&[
            ("BQ_PROJECT_ID", "acme"),
            ("APP_ROOT", "/srv/app"),
            ("SCHEMA_ROOT", "/var/cache/schemas"),
            ("DRY_RUN_VALIDATE", "TRUE"),
            ("SQL_MODEL_ID", "gemini-2.0-flash"),
        ]))
        .unwrap();

        assert!(config.dry_run_validate);
        assert_eq!(config.schema_root, PathBuf::from("/var/cache/schemas"));
        assert_eq!(config.sql_model_id, "gemini-2.0-flash");
        assert_eq!(
            config.erd_summary_path(),
            PathBuf::from("/srv/app/src/erd_summary.md")
        );

        let invalid = AssistantConfig::from_lookup(lookup_from(&[
            ("BQ_PROJECT_ID", "acme"),
            ("DRY_RUN_VALIDATE", "sometimes"),
        ]));
        assert!(invalid.is_err());
    }
}
