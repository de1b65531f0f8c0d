//! User settings persisted to `~/.marketplace-portal/config.toml`.
//!
//! Every field has a serde default so a partial file is valid. Resolved
//! configuration lives in `crate::config`; this is only the on-disk shape.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub workflow: WorkflowSettings,
}

/// Who the portal acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Marketplace operator party.
    #[serde(default)]
    pub operator_party: Option<String>,

    /// The party this session acts as.
    #[serde(default)]
    pub party: Option<String>,

    /// broker, exchange, custodian, or investor.
    #[serde(default = "default_role")]
    pub role: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            operator_party: None,
            party: None,
            role: default_role(),
        }
    }
}

fn default_role() -> String {
    "investor".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// `tracing_subscriber::EnvFilter` directive. `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_filter() -> String {
    "marketplace_portal=info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Upper bound on one ledger exercise, in milliseconds.
    #[serde(default = "default_mutation_timeout_ms")]
    pub mutation_timeout_ms: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            mutation_timeout_ms: default_mutation_timeout_ms(),
        }
    }
}

fn default_mutation_timeout_ms() -> u64 {
    10_000
}

impl Settings {
    /// Default TOML config file path (~/.marketplace-portal/config.toml).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::portal_home().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        toml::from_str(&data)
            .map(Some)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))
    }

    /// Write a commented TOML config file with current settings.
    pub fn save_toml(&self, path: &Path) -> Result<(), String> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {}", e))?;

        let content = format!(
            "# Marketplace portal configuration file.\n\
             #\n\
             # Priority: env var > this file > defaults.\n\
             # PORTAL_OPERATOR_PARTY and PORTAL_PARTY may be set here as\n\
             # session.operator_party and session.party.\n\
             # Run `marketplace-portal config init` to regenerate this file.\n\
             \n\
             {raw}"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }

        std::fs::write(path, content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }

    /// Overlay the fields of `other` that differ from their defaults.
    pub fn merge_from(&mut self, other: &Self) {
        let default_json = match serde_json::to_value(Self::default()) {
            Ok(v) => v,
            Err(_) => return,
        };
        let other_json = match serde_json::to_value(other) {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut self_json = match serde_json::to_value(&*self) {
            Ok(v) => v,
            Err(_) => return,
        };

        merge_non_default(&mut self_json, &other_json, &default_json);

        match serde_json::from_value(self_json) {
            Ok(merged) => *self = merged,
            Err(e) => tracing::warn!("Failed to merge settings overlay: {}", e),
        }
    }
}

fn merge_non_default(
    target: &mut serde_json::Value,
    other: &serde_json::Value,
    defaults: &serde_json::Value,
) {
    match (target, other, defaults) {
        (
            serde_json::Value::Object(t),
            serde_json::Value::Object(o),
            serde_json::Value::Object(d),
        ) => {
            for (key, other_val) in o {
                let default_val = d.get(key).cloned().unwrap_or(serde_json::Value::Null);
                if let Some(target_val) = t.get_mut(key) {
                    merge_non_default(target_val, other_val, &default_val);
                } else if other_val != &default_val {
                    t.insert(key.clone(), other_val.clone());
                }
            }
        }
        (target, other, defaults) => {
            if other != defaults {
                *target = other.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [session]
            party = "alice"
            "#,
        )
        .expect("parse");

        assert_eq!(settings.session.party.as_deref(), Some("alice"));
        assert_eq!(settings.session.role, "investor");
        assert_eq!(settings.logging, LoggingSettings::default());
        assert_eq!(settings.workflow.mutation_timeout_ms, 10_000);
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut settings = Settings::default();
        settings.session.operator_party = Some("operator".to_string());
        settings.session.role = "custodian".to_string();
        settings.workflow.mutation_timeout_ms = 2_500;

        settings.save_toml(&path).expect("save");
        let loaded = Settings::load_toml(&path).expect("load").expect("present");

        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = Settings::load_toml(&dir.path().join("absent.toml")).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[workflow]\nmutation_timeout_ms = \"soon\"\n").expect("write");

        let err = Settings::load_toml(&path).unwrap_err();
        assert!(err.contains("invalid TOML"));
    }

    #[test]
    fn merge_applies_only_non_default_fields() {
        let mut base = Settings::default();
        base.session.party = Some("from-base".to_string());
        base.logging.format = "json".to_string();

        let mut overlay = Settings::default();
        overlay.session.role = "broker".to_string();
        overlay.workflow.mutation_timeout_ms = 1_000;

        base.merge_from(&overlay);

        assert_eq!(base.session.party.as_deref(), Some("from-base"));
        assert_eq!(base.session.role, "broker");
        assert_eq!(base.logging.format, "json");
        assert_eq!(base.workflow.mutation_timeout_ms, 1_000);
    }

    #[test]
    fn default_toml_path_under_portal_home() {
        let path = Settings::default_toml_path();
        assert!(path.to_string_lossy().contains(".marketplace-portal"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }
}
