//! Configuration for the marketplace portal.
//!
//! Settings are loaded with priority: env var > TOML file > default.
//! `./.env` and `~/.marketplace-portal/.env` are loaded via dotenvy first,
//! so values there behave like env vars that were already set.

pub(crate) mod helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;
use crate::ledger::PartyId;
use crate::session::{MarketRole, SessionContext};
use crate::settings::Settings;

use self::helpers::{normalize_variant, optional_env, parse_positive_u64};

/// Main configuration for the portal.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    pub operator: PartyId,
    pub party: PartyId,
    pub role: MarketRole,
}

impl SessionConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let operator = optional_env("PORTAL_OPERATOR_PARTY")?
            .or_else(|| settings.session.operator_party.clone())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "PORTAL_OPERATOR_PARTY".to_string(),
                hint: "Set it in the environment or as session.operator_party in config.toml"
                    .to_string(),
            })?;

        let party = optional_env("PORTAL_PARTY")?
            .or_else(|| settings.session.party.clone())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "PORTAL_PARTY".to_string(),
                hint: "Set it in the environment or as session.party in config.toml".to_string(),
            })?;

        Ok(Self {
            operator: PartyId::new(operator.trim()),
            party: PartyId::new(party.trim()),
            role: Self::resolve_role(settings)?,
        })
    }

    /// `PORTAL_ROLE`, else `session.role`. A blank env value counts as unset.
    pub fn resolve_role(settings: &Settings) -> Result<MarketRole, ConfigError> {
        MarketRole::parse(
            &optional_env("PORTAL_ROLE")?.unwrap_or_else(|| settings.session.role.clone()),
            "PORTAL_ROLE",
        )
    }

    pub fn context(&self) -> SessionContext {
        SessionContext::new(&self.operator, &self.party, self.role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'pretty' or 'json', got '{value}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: crate::settings::LoggingSettings::default().filter,
        }
    }
}

impl LoggingConfig {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let format = LogFormat::parse(
            &optional_env("PORTAL_LOG_FORMAT")?.unwrap_or_else(|| settings.logging.format.clone()),
            "PORTAL_LOG_FORMAT",
        )?;
        let filter =
            optional_env("PORTAL_LOG_FILTER")?.unwrap_or_else(|| settings.logging.filter.clone());
        Ok(Self { format, filter })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowConfig {
    /// How long one ledger exercise may take before it is reported as a
    /// retryable timeout.
    pub mutation_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            mutation_timeout: Duration::from_millis(
                crate::settings::WorkflowSettings::default().mutation_timeout_ms,
            ),
        }
    }
}

impl WorkflowConfig {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let timeout_ms = match optional_env("PORTAL_MUTATION_TIMEOUT_MS")? {
            Some(value) => parse_positive_u64(&value, "PORTAL_MUTATION_TIMEOUT_MS")?,
            None if settings.workflow.mutation_timeout_ms == 0 => {
                return Err(ConfigError::InvalidValue {
                    key: "workflow.mutation_timeout_ms".to_string(),
                    message: "must be > 0".to_string(),
                });
            }
            None => settings.workflow.mutation_timeout_ms,
        };
        Ok(Self {
            mutation_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

impl Config {
    /// Load from env with an optional TOML config file overlay.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_portal_env();
        let settings = Self::load_settings(toml_path)?;
        Self::resolve(&settings)
    }

    /// Read settings from `explicit_path`, or from the default TOML path.
    ///
    /// A missing or unreadable explicit file is an error; problems with the
    /// default file are logged and defaults are used.
    pub fn load_settings(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
        let mut settings = Settings::default();
        let path = explicit_path
            .map(PathBuf::from)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(toml_settings)) => {
                settings.merge_from(&toml_settings);
                tracing::debug!("Loaded TOML config from {}", path.display());
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
            }
        }
        Ok(settings)
    }

    /// Resolve every section against env vars and `settings`.
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            session: SessionConfig::resolve(settings)?,
            logging: LoggingConfig::resolve(settings)?,
            workflow: WorkflowConfig::resolve(settings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const PORTAL_VARS: [&str; 6] = [
        "PORTAL_OPERATOR_PARTY",
        "PORTAL_PARTY",
        "PORTAL_ROLE",
        "PORTAL_LOG_FORMAT",
        "PORTAL_LOG_FILTER",
        "PORTAL_MUTATION_TIMEOUT_MS",
    ];

    fn clear_portal_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            for key in PORTAL_VARS {
                std::env::remove_var(key);
            }
        }
    }

    fn settings_with_parties() -> Settings {
        let mut settings = Settings::default();
        settings.session.operator_party = Some("operator".to_string());
        settings.session.party = Some("alice".to_string());
        settings
    }

    #[test]
    fn resolves_defaults_from_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_portal_env();

        let config = Config::resolve(&settings_with_parties()).expect("resolve");

        assert_eq!(config.session.operator, PartyId::from("operator"));
        assert_eq!(config.session.party, PartyId::from("alice"));
        assert_eq!(config.session.role, MarketRole::Investor);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.workflow.mutation_timeout, Duration::from_secs(10));
    }

    #[test]
    fn env_overrides_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_portal_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("PORTAL_PARTY", "bob");
            std::env::set_var("PORTAL_ROLE", "Custodian");
            std::env::set_var("PORTAL_LOG_FORMAT", "json");
            std::env::set_var("PORTAL_MUTATION_TIMEOUT_MS", "750");
        }

        let config = Config::resolve(&settings_with_parties()).expect("resolve");
        assert_eq!(config.session.party, PartyId::from("bob"));
        assert_eq!(config.session.role, MarketRole::Custodian);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.workflow.mutation_timeout, Duration::from_millis(750));
        assert_eq!(config.session.context().self_key().to_string(), "(operator, bob)");

        clear_portal_env();
    }

    #[test]
    fn blank_role_env_falls_back_to_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_portal_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("PORTAL_ROLE", "  ");
        }
        let mut settings = settings_with_parties();
        settings.session.role = "broker".to_string();

        assert_eq!(
            SessionConfig::resolve_role(&settings).expect("role"),
            MarketRole::Broker
        );
        assert_eq!(
            Config::resolve(&settings).expect("resolve").session.role,
            MarketRole::Broker
        );

        clear_portal_env();
    }

    #[test]
    fn missing_party_is_reported() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_portal_env();

        let mut settings = Settings::default();
        settings.session.operator_party = Some("operator".to_string());

        let err = Config::resolve(&settings).unwrap_err();
        match err {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "PORTAL_PARTY"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_invalid_values() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_portal_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("PORTAL_MUTATION_TIMEOUT_MS", "0");
        }
        let err = Config::resolve(&settings_with_parties()).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => {
                assert_eq!(key, "PORTAL_MUTATION_TIMEOUT_MS")
            }
            other => panic!("unexpected error: {other}"),
        }

        clear_portal_env();
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("PORTAL_LOG_FORMAT", "xml");
        }
        let err = Config::resolve(&settings_with_parties()).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "PORTAL_LOG_FORMAT"),
            other => panic!("unexpected error: {other}"),
        }

        clear_portal_env();
    }

    #[test]
    fn explicit_missing_toml_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Config::load_settings(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn explicit_toml_is_overlaid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[session]\nrole = \"exchange\"\n\n[workflow]\nmutation_timeout_ms = 1500\n",
        )
        .expect("write");

        let settings = Config::load_settings(Some(&path)).expect("load");
        assert_eq!(settings.session.role, "exchange");
        assert_eq!(settings.workflow.mutation_timeout_ms, 1_500);
    }
}
