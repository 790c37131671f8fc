//! Engine configuration, read from TOML.
//!
//! ```toml
//! authorization_enabled = true
//! admin_users = ["admin"]
//! admin_groups = ["admins"]
//! deployment_duplicate_filtering = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Initial state of the authorization toggle. Switchable at runtime with
    /// [`ProcessEngine::set_authorization_enabled`](crate::ProcessEngine::set_authorization_enabled).
    pub authorization_enabled: bool,
    /// Users that pass every authorization check.
    pub admin_users: Vec<String>,
    /// Members of these groups pass every authorization check.
    pub admin_groups: Vec<String>,
    /// Skip redeploying a named deployment whose resources are unchanged.
    pub deployment_duplicate_filtering: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            authorization_enabled: false,
            admin_users: Vec::new(),
            admin_groups: Vec::new(),
            deployment_duplicate_filtering: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse engine config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(!config.authorization_enabled);
        assert!(config.deployment_duplicate_filtering);
    }

    #[test]
    fn parses_all_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            authorization_enabled = true
            admin_users = ["admin"]
            admin_groups = ["ops"]
            deployment_duplicate_filtering = false
            "#,
        )
        .unwrap();
        assert!(config.authorization_enabled);
        assert_eq!(config.admin_users, vec!["admin"]);
        assert_eq!(config.admin_groups, vec!["ops"]);
        assert!(!config.deployment_duplicate_filtering);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = EngineConfig::from_toml_str("authorisation = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = EngineConfig::from_path(Path::new("/nonexistent/engine.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/engine.toml"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "admin_users = [\"root\"]\n").unwrap();
        let config = EngineConfig::from_path(&path).unwrap();
        assert_eq!(config.admin_users, vec!["root"]);
    }
}
