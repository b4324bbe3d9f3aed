//! Container engine capability consumed by sessions.
//!
//! [`ContainerEngine`] is the seam between session sequencing and the actual
//! engine. [`DockerEngine`] talks to Docker (or Podman's Docker-compatible
//! API) through bollard; [`FakeEngine`](crate::testing::FakeEngine) is the
//! in-memory stand-in used by tests.

mod docker;

pub use docker::DockerEngine;

use async_trait::async_trait;

use crate::error::Result;

/// Everything needed to create the session container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment entries, already rendered as `KEY=VALUE`.
    pub env: Vec<String>,
    /// TCP port exposed by the container.
    pub container_port: u16,
    /// Host port the exposed port is bound to.
    pub host_port: u16,
}

impl ContainerSpec {
    /// Exposed port key in engine syntax, e.g. `5432/tcp`.
    pub fn exposed_port(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

/// Result of a finished one-shot exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Exit code, when the engine reported one.
    pub exit_code: Option<i64>,
}

impl ExecOutcome {
    /// Whether the command exited with status 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Outcome of a best-effort container removal.
///
/// Callers are free to ignore it; it exists so removal attempts are visible
/// rather than buried in an empty error branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Container removed, or there was nothing to remove.
    Removed,
    /// Removal failed; the reason is informational only.
    Failed { reason: String },
}

impl ReleaseOutcome {
    /// Whether the container is gone.
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

/// Operations a session needs from a container engine.
///
/// Every call blocks (asynchronously) until the engine has finished the
/// operation.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Endpoint the client is connected to, in `DOCKER_HOST` syntax.
    fn endpoint(&self) -> &str;

    /// Whether the image is already present locally.
    async fn image_exists(&self, image: &str) -> bool;

    /// Pull an image, returning once the pull has completed.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Force-remove a container by name. Succeeds if it does not exist.
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Create a container and return its engine-assigned id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container.
    async fn start_container(&self, name: &str) -> Result<()>;

    /// Run a one-shot command in a running container and wait for it to exit.
    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecOutcome>;

    /// Release the client. Called once, when the owning session is closed.
    async fn close(&self);
}
