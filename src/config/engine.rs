use std::path::{Path, PathBuf};

use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env, process_env};
use crate::error::ConfigError;

/// Default engine endpoint for the current platform.
#[cfg(not(windows))]
pub const DEFAULT_ENGINE_ENDPOINT: &str = "unix:///var/run/docker.sock";
#[cfg(windows)]
pub const DEFAULT_ENGINE_ENDPOINT: &str = "npipe:////./pipe/docker_engine";

/// Connection settings for the container engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine endpoint, in `DOCKER_HOST` syntax.
    pub endpoint: String,
    /// Client request timeout in seconds.
    pub timeout_secs: u64,
    /// Credentials used when pulling images.
    pub registry_auth: Option<RegistryAuth>,
    /// Client certificates for a TLS-verified `tcp://` engine.
    pub tls: Option<EngineTls>,
}

/// Registry credentials for image pulls.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: SecretString,
    /// Registry host (e.g. `ghcr.io`). `None` means the engine's default.
    pub server: Option<String>,
}

/// Directory holding `ca.pem`, `cert.pem` and `key.pem`, as `DOCKER_CERT_PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTls {
    pub cert_path: PathBuf,
}

impl EngineTls {
    /// Certificates read from `cert_path`.
    pub fn new(cert_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
        }
    }

    /// `~/.docker`, where the Docker CLI keeps its client certificates.
    pub fn default_cert_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docker")
    }

    /// CA bundle used to verify the engine.
    pub fn ca(&self) -> PathBuf {
        self.cert_path.join("ca.pem")
    }

    /// Client certificate.
    pub fn cert(&self) -> PathBuf {
        self.cert_path.join("cert.pem")
    }

    /// Client private key.
    pub fn key(&self) -> PathBuf {
        self.cert_path.join("key.pem")
    }

    /// Certificate directory.
    pub fn dir(&self) -> &Path {
        &self.cert_path
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENGINE_ENDPOINT.to_string(),
            timeout_secs: 120,
            registry_auth: None,
            tls: None,
        }
    }
}

impl EngineConfig {
    /// Resolve from the process environment, loading `.env` first if present.
    pub fn resolve() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::resolve_from(&process_env)
    }

    /// Resolve using a custom variable lookup instead of the process environment.
    pub fn resolve_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let infallible = |key: &str| -> Result<Option<String>, ConfigError> { Ok(lookup(key)) };
        Self::resolve_from(&infallible)
    }

    fn resolve_from<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Result<Option<String>, ConfigError>,
    {
        let defaults = Self::default();

        let username = optional_env(lookup, "REGISTRY_USERNAME")?;
        let password = optional_env(lookup, "REGISTRY_PASSWORD")?;
        let server = optional_env(lookup, "REGISTRY_SERVER")?;

        let registry_auth = match (username, password) {
            (Some(username), Some(password)) => Some(RegistryAuth {
                username,
                password: SecretString::from(password),
                server,
            }),
            (Some(_), None) => {
                return Err(ConfigError::InvalidValue {
                    key: "REGISTRY_PASSWORD".to_string(),
                    message: "must be set when REGISTRY_USERNAME is set".to_string(),
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    key: "REGISTRY_USERNAME".to_string(),
                    message: "must be set when REGISTRY_PASSWORD is set".to_string(),
                });
            }
            (None, None) => None,
        };

        let timeout_secs = parse_optional_env(lookup, "DOCKER_TIMEOUT_SECS", defaults.timeout_secs)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DOCKER_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        // Same rule as the Docker CLI: the cert path only matters once
        // verification is switched on.
        let tls = if parse_bool_env(lookup, "DOCKER_TLS_VERIFY", false)? {
            let cert_path = optional_env(lookup, "DOCKER_CERT_PATH")?
                .map(PathBuf::from)
                .unwrap_or_else(EngineTls::default_cert_path);
            Some(EngineTls::new(cert_path))
        } else {
            None
        };

        Ok(Self {
            endpoint: optional_env(lookup, "DOCKER_HOST")?.unwrap_or(defaults.endpoint),
            timeout_secs,
            registry_auth,
            tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::resolve_with(env(&[])).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENGINE_ENDPOINT);
        assert_eq!(config.timeout_secs, 120);
        assert!(config.registry_auth.is_none());
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_tls_verify_with_cert_path() {
        let config = EngineConfig::resolve_with(env(&[
            ("DOCKER_HOST", "tcp://dind:2376"),
            ("DOCKER_TLS_VERIFY", "1"),
            ("DOCKER_CERT_PATH", "/certs/client"),
        ]))
        .unwrap();

        let tls = config.tls.unwrap();
        assert_eq!(tls.dir(), Path::new("/certs/client"));
        assert_eq!(tls.ca(), PathBuf::from("/certs/client/ca.pem"));
        assert_eq!(tls.cert(), PathBuf::from("/certs/client/cert.pem"));
        assert_eq!(tls.key(), PathBuf::from("/certs/client/key.pem"));
    }

    #[test]
    fn test_tls_verify_defaults_cert_path() {
        let config = EngineConfig::resolve_with(env(&[("DOCKER_TLS_VERIFY", "true")])).unwrap();
        assert_eq!(config.tls, Some(EngineTls::new(EngineTls::default_cert_path())));
    }

    #[test]
    fn test_cert_path_ignored_without_tls_verify() {
        let config = EngineConfig::resolve_with(env(&[
            ("DOCKER_TLS_VERIFY", "0"),
            ("DOCKER_CERT_PATH", "/certs/client"),
        ]))
        .unwrap();
        assert!(config.tls.is_none());

        let err = EngineConfig::resolve_with(env(&[("DOCKER_TLS_VERIFY", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DOCKER_TLS_VERIFY"));
    }

    #[test]
    fn test_docker_host_and_timeout() {
        let config = EngineConfig::resolve_with(env(&[
            ("DOCKER_HOST", "tcp://10.0.0.5:2375"),
            ("DOCKER_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, "tcp://10.0.0.5:2375");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = EngineConfig::resolve_with(env(&[("DOCKER_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(err.to_string().contains("DOCKER_TIMEOUT_SECS"));
    }

    #[test]
    fn test_registry_auth() {
        let config = EngineConfig::resolve_with(env(&[
            ("REGISTRY_USERNAME", "ci"),
            ("REGISTRY_PASSWORD", "hunter2"),
            ("REGISTRY_SERVER", "ghcr.io"),
        ]))
        .unwrap();
        let auth = config.registry_auth.unwrap();
        assert_eq!(auth.username, "ci");
        assert_eq!(auth.password.expose_secret(), "hunter2");
        assert_eq!(auth.server.as_deref(), Some("ghcr.io"));
        assert!(!format!("{:?}", auth.password).contains("hunter2"));
    }

    #[test]
    fn test_registry_username_without_password() {
        let err = EngineConfig::resolve_with(env(&[("REGISTRY_USERNAME", "ci")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "REGISTRY_PASSWORD"));
    }
}
