//! Error types for ephemeral database sessions.

use std::time::Duration;

use thiserror::Error;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors raised while provisioning or probing the session container.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Could not connect to the container engine.
    #[error("Container engine not available at '{endpoint}': {reason}")]
    EngineUnavailable {
        /// Endpoint that was tried.
        endpoint: String,
        /// Reason for failure.
        reason: String,
    },

    /// The host resolver could not map the engine endpoint.
    #[error("Failed to resolve database host from '{endpoint}': {reason}")]
    HostResolution {
        /// Engine endpoint handed to the resolver.
        endpoint: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePull {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the container.
    #[error("Failed to create container '{name}': {reason}")]
    ContainerCreate {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start the container.
    #[error("Failed to start container '{name}': {reason}")]
    ContainerStart {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to remove the container. Never fatal to a session run.
    #[error("Failed to remove container '{name}': {reason}")]
    ContainerRemove {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// The readiness exec could not be created or run.
    #[error("Failed to run readiness command in '{name}': {reason}")]
    Exec {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Readiness command finished with a failing exit code.
    ///
    /// Only raised under [`ReadinessPolicy::ExitCodeZero`](crate::ReadinessPolicy::ExitCodeZero).
    #[error("Container '{name}' not ready: readiness command exited with {exit_code:?}")]
    NotReady {
        /// Container name.
        name: String,
        /// Exit code reported by the engine, if any.
        exit_code: Option<i64>,
    },

    /// Readiness command did not finish within the configured timeout.
    #[error("Container '{name}' readiness command did not finish within {timeout:?}")]
    ReadinessTimeout {
        /// Container name.
        name: String,
        /// Timeout duration.
        timeout: Duration,
    },

    /// Invalid session configuration.
    #[error("Session configuration error: {reason}")]
    Config {
        /// Reason for error.
        reason: String,
    },
}

/// Error returned by [`ContainerSession::run_in_container`](crate::ContainerSession::run_in_container).
///
/// Keeps the caller's own error type intact so action failures surface
/// unmodified.
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// Provisioning or readiness failed before the action ran.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The caller's action failed.
    #[error("Action failed: {0}")]
    Action(#[source] E),
}

impl<E> RunError<E> {
    /// Returns the action's error, if that is what failed.
    pub fn into_action(self) -> Option<E> {
        match self {
            Self::Action(e) => Some(e),
            Self::Session(_) => None,
        }
    }

    /// Returns the session error, if provisioning failed.
    pub fn as_session(&self) -> Option<&SessionError> {
        match self {
            Self::Session(e) => Some(e),
            Self::Action(_) => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Environment variable {key} is not valid unicode")]
    NotUnicode { key: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_messages() {
        let err = SessionError::ImagePull {
            image: "postgres:16".to_string(),
            reason: "manifest unknown".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to pull image 'postgres:16': manifest unknown"
        );

        let err = SessionError::NotReady {
            name: "db".to_string(),
            exit_code: Some(2),
        };
        assert!(err.to_string().contains("exited with Some(2)"));
    }

    #[test]
    fn test_run_error_accessors() {
        let err: RunError<std::io::Error> = RunError::Action(std::io::Error::other("boom"));
        assert!(err.as_session().is_none());
        assert_eq!(err.into_action().unwrap().to_string(), "boom");

        let err: RunError<std::io::Error> = SessionError::Config {
            reason: "empty image".to_string(),
        }
        .into();
        assert!(err.as_session().is_some());
        assert!(err.into_action().is_none());
    }
}
