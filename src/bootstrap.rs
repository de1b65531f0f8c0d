//! Process bootstrap: the portal home directory, `.env` loading, and the
//! tracing subscriber.
//!
//! File: `~/.marketplace-portal/.env` (standard dotenvy format)

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, LoggingConfig};

/// `~/.marketplace-portal`, or `./.marketplace-portal` without a home dir.
pub fn portal_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".marketplace-portal")
}

/// Path to the portal-specific `.env` file.
pub fn portal_env_path() -> PathBuf {
    portal_home().join(".env")
}

/// Load env vars from `~/.marketplace-portal/.env`.
///
/// Call this **after** `dotenvy::dotenv()`. dotenvy never overwrites
/// existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.marketplace-portal/.env`
pub fn load_portal_env() {
    let path = portal_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        eprintln!("Warning: failed to load {}: {}", path.display(), e);
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured filter. A second call is a no-op.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|e| {
            eprintln!(
                "Warning: invalid log filter '{}' ({}), using 'info'",
                config.filter, e
            );
            EnvFilter::new("info")
        });

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
