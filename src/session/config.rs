//! Configuration types for database sessions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::ContainerSpec;
use crate::error::{Result, SessionError};
use crate::session::naming::{NameGenerator, UuidNameGenerator};
use crate::session::resolver::{EndpointHostResolver, HostResolver};

/// Container port bound to a host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortMapping {
    /// TCP port the database listens on inside the container.
    pub container_port: u16,
    /// Port on the engine host.
    pub host_port: u16,
}

impl PortMapping {
    /// Bind `container_port` to `host_port`.
    pub fn new(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port,
        }
    }
}

impl From<(u16, u16)> for PortMapping {
    fn from((container_port, host_port): (u16, u16)) -> Self {
        Self::new(container_port, host_port)
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}/tcp", self.host_port, self.container_port)
    }
}

/// How the readiness command's result is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessPolicy {
    /// The command finishing is the readiness signal. The exit code is ignored,
    /// so a probe that fails fast still counts as ready.
    #[default]
    Completion,
    /// The command must exit with status 0.
    ExitCodeZero,
}

/// When to pull the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    /// Pull on every run.
    #[default]
    Always,
    /// Skip the pull when the engine already has the image.
    IfNotPresent,
}

/// Configuration for one ephemeral database container.
#[derive(Clone)]
pub struct SessionConfig {
    /// Image to run.
    pub image: String,
    /// Environment variables, rendered as `KEY=VALUE`.
    pub env: BTreeMap<String, String>,
    /// The single bound port.
    pub port: PortMapping,
    /// Command run inside the container to wait for readiness.
    pub readiness_command: Vec<String>,
    /// Fixed container name. When `None`, `name_generator` picks one.
    pub container_name: Option<String>,
    /// Maps the engine endpoint to the host handed to the action.
    pub resolver: Arc<dyn HostResolver>,
    /// Source of container names when none is fixed.
    pub name_generator: Arc<dyn NameGenerator>,
    /// Interpretation of the readiness command result.
    pub readiness: ReadinessPolicy,
    /// Upper bound on the readiness command. `None` waits indefinitely.
    pub readiness_timeout: Option<Duration>,
    /// Whether to pull on every run.
    pub pull_policy: PullPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            env: BTreeMap::new(),
            port: PortMapping::default(),
            readiness_command: Vec::new(),
            container_name: None,
            resolver: Arc::new(EndpointHostResolver),
            name_generator: Arc::new(UuidNameGenerator),
            readiness: ReadinessPolicy::default(),
            readiness_timeout: None,
            pull_policy: PullPolicy::default(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("image", &self.image)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("port", &self.port)
            .field("readiness_command", &self.readiness_command)
            .field("container_name", &self.container_name)
            .field("readiness", &self.readiness)
            .field("readiness_timeout", &self.readiness_timeout)
            .field("pull_policy", &self.pull_policy)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Config for `image` with one port binding and a readiness command.
    pub fn new<I, S>(image: impl Into<String>, port: impl Into<PortMapping>, readiness_command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            image: image.into(),
            port: port.into(),
            readiness_command: readiness_command.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Postgres with a `postgres` superuser and database.
    pub fn postgres(host_port: u16, password: impl Into<String>) -> Self {
        Self::new(
            "postgres:16-alpine",
            (5432, host_port),
            [
                "sh",
                "-c",
                "until pg_isready -h 127.0.0.1 -U postgres; do sleep 1; done",
            ],
        )
        .with_env("POSTGRES_USER", "postgres")
        .with_env("POSTGRES_PASSWORD", password.into())
        .with_env("POSTGRES_DB", "postgres")
    }

    /// MySQL with the given root password.
    pub fn mysql(host_port: u16, password: impl Into<String>) -> Self {
        Self::new(
            "mysql:8.4",
            (3306, host_port),
            [
                "sh",
                "-c",
                "until mysqladmin ping -h 127.0.0.1 -uroot -p\"$MYSQL_ROOT_PASSWORD\" --silent; do sleep 1; done",
            ],
        )
        .with_env("MYSQL_ROOT_PASSWORD", password.into())
    }

    /// Set an environment variable, replacing any earlier value.
    pub fn with_env(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.env.insert(key.into(), value.to_string());
        self
    }

    /// Use a fixed container name instead of a generated one.
    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    /// Set the host resolver.
    pub fn with_resolver(mut self, resolver: impl HostResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Set the generator used when no name is fixed.
    pub fn with_name_generator(mut self, generator: impl NameGenerator + 'static) -> Self {
        self.name_generator = Arc::new(generator);
        self
    }

    /// Set how the readiness result is judged.
    pub fn with_readiness(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = policy;
        self
    }

    /// Bound the readiness command.
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = Some(timeout);
        self
    }

    /// Set when the image is pulled.
    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Environment as `KEY=VALUE` entries, ordered by key.
    pub fn env_entries(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    /// Check the config before any engine call is made.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(SessionError::Config {
                reason: reason.to_string(),
            })
        };

        if self.image.trim().is_empty() {
            return invalid("image must not be empty");
        }
        if self.readiness_command.is_empty() {
            return invalid("readiness command must not be empty");
        }
        if self.port.container_port == 0 || self.port.host_port == 0 {
            return invalid("container and host ports must be non-zero");
        }
        if self
            .env
            .keys()
            .any(|k| k.is_empty() || k.contains('='))
        {
            return invalid("environment variable names must be non-empty and contain no '='");
        }
        if let Some(name) = &self.container_name
            && name.trim().is_empty()
        {
            return invalid("container name must not be blank");
        }
        if self.readiness_timeout.is_some_and(|t| t.is_zero()) {
            return invalid("readiness timeout must be greater than zero");
        }
        Ok(())
    }

    pub(crate) fn container_spec(&self, name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: self.image.clone(),
            env: self.env_entries(),
            container_port: self.port.container_port,
            host_port: self.port.host_port,
        }
    }
}
