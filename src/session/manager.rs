//! Session lifecycle: provision, probe, run, remove.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::engine::{ContainerEngine, DockerEngine, ReleaseOutcome};
use crate::error::{Result, RunError, SessionError};
use crate::session::config::{PullPolicy, ReadinessPolicy, SessionConfig};

/// Runs caller code against a freshly provisioned database container.
///
/// The container name is fixed when the session is built, so every run of the
/// same session reuses it. Two sessions sharing a name must not run
/// concurrently; each would remove the other's container.
pub struct ContainerSession {
    config: SessionConfig,
    engine: Arc<dyn ContainerEngine>,
    container_name: String,
    /// Removal spawned by an abandoned run; the next run waits for it.
    pending_removal: Mutex<Option<JoinHandle<()>>>,
}

impl ContainerSession {
    /// Create a session over an existing engine.
    pub fn new(config: SessionConfig, engine: Arc<dyn ContainerEngine>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, engine))
    }

    /// Connect to a Docker engine and create a session over it.
    pub async fn connect(config: SessionConfig, engine_config: &EngineConfig) -> Result<Self> {
        // Reject a bad config before opening a client.
        config.validate()?;
        let engine = DockerEngine::connect(engine_config).await?;
        Ok(Self::build(config, Arc::new(engine)))
    }

    fn build(config: SessionConfig, engine: Arc<dyn ContainerEngine>) -> Self {
        let container_name = config
            .container_name
            .clone()
            .unwrap_or_else(|| config.name_generator.generate());

        Self {
            config,
            engine,
            container_name,
            pending_removal: Mutex::new(None),
        }
    }

    /// Connect, run `action` once, and release the engine client on every path.
    pub async fn run_once<F, Fut, T, E>(
        config: SessionConfig,
        engine_config: &EngineConfig,
        action: F,
    ) -> std::result::Result<T, RunError<E>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let session = Self::connect(config, engine_config).await?;
        let result = session.run_in_container(action).await;
        session.close().await;
        result
    }

    /// Name of the container every run of this session uses.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Get the session config.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Provision the container, wait for readiness, then run `action` with the
    /// database host.
    ///
    /// The container is force-removed afterwards whatever the outcome. If this
    /// future is dropped before finishing, removal is scheduled on the current
    /// Tokio runtime instead, and the next run on this session waits for that
    /// removal before provisioning.
    pub async fn run_in_container<F, Fut, T, E>(
        &self,
        action: F,
    ) -> std::result::Result<T, RunError<E>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut guard = RemovalGuard::arm(self);
        guard.settle_prior().await;

        let result = self.provision_and_run(action).await;

        let _ = self.release().await;
        guard.disarm();

        result
    }

    /// Force-remove the session container, ignoring failures.
    ///
    /// The returned outcome is informational; nothing about a session run
    /// depends on it.
    pub async fn release(&self) -> ReleaseOutcome {
        match self.engine.remove_container(&self.container_name).await {
            Ok(()) => {
                tracing::debug!(container = %self.container_name, "Container removed");
                ReleaseOutcome::Removed
            }
            Err(e) => {
                tracing::debug!(container = %self.container_name, "Container removal failed: {}", e);
                ReleaseOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Release the engine client. Consumes the session so it happens once.
    pub async fn close(self) {
        self.engine.close().await;
    }

    async fn provision_and_run<F, Fut, T, E>(&self, action: F) -> std::result::Result<T, RunError<E>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let host = self.resolve_host()?;

        // Clear out a container left behind by an earlier, interrupted run.
        let _ = self.release().await;

        self.pull_image().await?;
        self.start_container().await?;
        self.await_readiness().await?;

        tracing::info!(
            container = %self.container_name,
            host = %host,
            port = self.config.port.host_port,
            "Database container ready"
        );

        action(host).await.map_err(RunError::Action)
    }

    fn resolve_host(&self) -> Result<String> {
        let endpoint = self.engine.endpoint();
        let host = self.config.resolver.resolve_host(endpoint)?;
        tracing::debug!(endpoint = %endpoint, host = %host, "Resolved database host");
        Ok(host)
    }

    async fn pull_image(&self) -> Result<()> {
        let image = &self.config.image;

        if self.config.pull_policy == PullPolicy::IfNotPresent && self.engine.image_exists(image).await {
            tracing::debug!("Image '{}' exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", image);
        self.engine.pull_image(image).await?;
        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    async fn start_container(&self) -> Result<()> {
        let spec = self.config.container_spec(&self.container_name);

        let id = self.engine.create_container(&spec).await?;
        self.engine.start_container(&self.container_name).await?;

        tracing::info!(
            container = %self.container_name,
            id = %id,
            ports = %self.config.port,
            "Started database container"
        );
        Ok(())
    }

    async fn await_readiness(&self) -> Result<()> {
        let name = &self.container_name;
        let exec = self.engine.exec(name, &self.config.readiness_command);

        let outcome = match self.config.readiness_timeout {
            Some(timeout) => tokio::time::timeout(timeout, exec).await.map_err(|_| {
                SessionError::ReadinessTimeout {
                    name: name.clone(),
                    timeout,
                }
            })??,
            None => exec.await?,
        };

        match self.config.readiness {
            ReadinessPolicy::Completion => {
                if !outcome.succeeded() {
                    tracing::warn!(
                        container = %name,
                        exit_code = ?outcome.exit_code,
                        "Readiness command did not exit cleanly; treating container as ready"
                    );
                }
                Ok(())
            }
            ReadinessPolicy::ExitCodeZero if outcome.succeeded() => Ok(()),
            ReadinessPolicy::ExitCodeZero => Err(SessionError::NotReady {
                name: name.clone(),
                exit_code: outcome.exit_code,
            }),
        }
    }
}

fn lock_pending(slot: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes the container if a run is abandoned mid-flight.
///
/// The spawned removal is parked in the session so the next run can wait for
/// it instead of racing it for the shared container name.
struct RemovalGuard<'a> {
    engine: Option<Arc<dyn ContainerEngine>>,
    container_name: String,
    pending: &'a Mutex<Option<JoinHandle<()>>>,
    /// Removal left by the previous abandoned run, until it has finished.
    prior: Option<JoinHandle<()>>,
}

impl<'a> RemovalGuard<'a> {
    fn arm(session: &'a ContainerSession) -> Self {
        let prior = lock_pending(&session.pending_removal).take();
        Self {
            engine: Some(session.engine.clone()),
            container_name: session.container_name.clone(),
            pending: &session.pending_removal,
            prior,
        }
    }

    /// Wait for the removal scheduled by an abandoned earlier run.
    async fn settle_prior(&mut self) {
        if let Some(prior) = self.prior.as_mut() {
            tracing::debug!(container = %self.container_name, "Waiting for abandoned run cleanup");
            if let Err(e) = prior.await {
                tracing::debug!(container = %self.container_name, "Abandoned run cleanup failed: {}", e);
            }
            self.prior = None;
        }
    }

    fn disarm(mut self) {
        self.engine = None;
    }
}

impl Drop for RemovalGuard<'_> {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        let name = std::mem::take(&mut self.container_name);
        let prior = self.prior.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(container = %name, "Session run abandoned, removing container");
                let task = handle.spawn(async move {
                    if let Some(prior) = prior {
                        let _ = prior.await;
                    }
                    if let Err(e) = engine.remove_container(&name).await {
                        tracing::debug!(container = %name, "Container removal failed: {}", e);
                    }
                });
                *lock_pending(self.pending) = Some(task);
            }
            Err(_) => {
                tracing::warn!(
                    container = %name,
                    "Session run abandoned outside a Tokio runtime, container may remain"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    fn config() -> SessionConfig {
        SessionConfig::new("postgres:16", (5432, 15432), ["pg_isready"])
            .with_container_name("unit-db")
    }

    #[test]
    fn test_new_validates_config() {
        let engine = Arc::new(FakeEngine::new());
        let result = ContainerSession::new(SessionConfig::default(), engine);
        assert!(matches!(result, Err(SessionError::Config { .. })));
    }

    #[test]
    fn test_generated_name_is_fixed_per_session() {
        let engine = Arc::new(FakeEngine::new());
        let counter = std::sync::atomic::AtomicU32::new(0);
        let config = SessionConfig::new("img", (1, 2), ["true"]).with_name_generator(move || {
            format!(
                "gen-{}",
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            )
        });

        let session = ContainerSession::new(config, engine).unwrap();
        assert_eq!(session.container_name(), "gen-0");
        assert_eq!(session.container_name(), "gen-0");
    }

    #[tokio::test]
    async fn test_release_reports_failure() {
        let engine = Arc::new(FakeEngine::new());
        engine.fail_on(crate::testing::FailPoint::Remove);
        let session = ContainerSession::new(config(), engine).unwrap();

        assert!(!session.release().await.is_removed());
    }

    #[tokio::test]
    async fn test_release_of_missing_container_succeeds() {
        let engine = Arc::new(FakeEngine::new());
        let session = ContainerSession::new(config(), engine.clone()).unwrap();

        assert_eq!(session.release().await, ReleaseOutcome::Removed);
        assert_eq!(engine.remove_attempts("unit-db"), 1);
    }

    #[tokio::test]
    async fn test_dropped_guard_parks_removal_for_next_run() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container("unit-db", "postgres:16");
        let session = ContainerSession::new(config(), engine.clone()).unwrap();

        drop(RemovalGuard::arm(&session));
        assert!(lock_pending(&session.pending_removal).is_some());

        let mut next = RemovalGuard::arm(&session);
        next.settle_prior().await;
        assert!(!engine.has_container("unit-db"));
        assert!(lock_pending(&session.pending_removal).is_none());
        next.disarm();
        assert!(lock_pending(&session.pending_removal).is_none());
    }

    #[test]
    fn test_close_releases_engine_once() {
        let engine = Arc::new(FakeEngine::new());
        let session = ContainerSession::new(config(), engine.clone()).unwrap();

        tokio_test::block_on(session.close());
        assert_eq!(engine.close_count(), 1);
    }
}
