//! Env-var readers shared by the config resolvers.

use crate::error::ConfigError;

/// Read an env var, treating unset and blank values the same.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

/// Parse a strictly positive integer for `key`.
pub(crate) fn parse_positive_u64(value: &str, key: &str) -> Result<u64, ConfigError> {
    let parsed: u64 = value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a positive integer: {e}"),
        })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(parsed)
}

pub(crate) fn normalize_variant(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        let err = parse_positive_u64("0", "PORTAL_MUTATION_TIMEOUT_MS").unwrap_err();
        assert!(err.to_string().contains("must be > 0"));
    }

    #[test]
    fn non_numeric_is_rejected() {
        assert!(parse_positive_u64("ten", "PORTAL_MUTATION_TIMEOUT_MS").is_err());
        assert_eq!(parse_positive_u64(" 250 ", "K").expect("parse"), 250);
    }

    #[test]
    fn normalizes_separators_and_case() {
        assert_eq!(normalize_variant(" Pretty-Print "), "pretty_print");
    }
}
