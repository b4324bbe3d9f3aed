use std::str::FromStr;

use crate::error::ConfigError;

/// Read a variable from the process environment.
pub(crate) fn process_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            key: key.to_string(),
        }),
    }
}

/// Look up an optional variable, treating blank values as unset.
pub(crate) fn optional_env<L>(lookup: &L, key: &str) -> Result<Option<String>, ConfigError>
where
    L: Fn(&str) -> Result<Option<String>, ConfigError>,
{
    Ok(lookup(key)?.filter(|v| !v.trim().is_empty()))
}

/// Parse an optional variable, falling back to `default` when unset.
pub(crate) fn parse_optional_env<L, T>(lookup: &L, key: &str, default: T) -> Result<T, ConfigError>
where
    L: Fn(&str) -> Result<Option<String>, ConfigError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(lookup, key)?
        .map(|s| {
            s.trim().parse::<T>().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

/// Parse an optional boolean flag (`1`/`0`, `true`/`false`, `yes`/`no`).
pub(crate) fn parse_bool_env<L>(lookup: &L, key: &str, default: bool) -> Result<bool, ConfigError>
where
    L: Fn(&str) -> Result<Option<String>, ConfigError>,
{
    let Some(value) = optional_env(lookup, key)? else {
        return Ok(default);
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(key: &str) -> Result<Option<String>, ConfigError> {
        Ok(match key {
            "SET" => Some("42".to_string()),
            "BLANK" => Some("   ".to_string()),
            "BAD" => Some("forty-two".to_string()),
            "FLAG" => Some("1".to_string()),
            "FLAG_OFF" => Some("False".to_string()),
            _ => None,
        })
    }

    #[test]
    fn test_optional_env_filters_blank() {
        assert_eq!(optional_env(&lookup, "SET").unwrap().as_deref(), Some("42"));
        assert_eq!(optional_env(&lookup, "BLANK").unwrap(), None);
        assert_eq!(optional_env(&lookup, "MISSING").unwrap(), None);
    }

    #[test]
    fn test_parse_optional_env() {
        assert_eq!(parse_optional_env(&lookup, "SET", 7u64).unwrap(), 42);
        assert_eq!(parse_optional_env(&lookup, "MISSING", 7u64).unwrap(), 7);

        let err = parse_optional_env(&lookup, "BAD", 7u64).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BAD"));
    }

    #[test]
    fn test_parse_bool_env() {
        assert!(parse_bool_env(&lookup, "FLAG", false).unwrap());
        assert!(!parse_bool_env(&lookup, "FLAG_OFF", true).unwrap());
        assert!(parse_bool_env(&lookup, "MISSING", true).unwrap());
        assert!(parse_bool_env(&lookup, "BAD", false).is_err());
    }
}
