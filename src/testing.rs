//! In-memory container engine for tests.
//!
//! [`FakeEngine`] keeps a map of containers and images, records every call,
//! and can be told to fail any operation. It follows the engine contract
//! closely enough to check session sequencing without a Docker daemon:
//! names are unique, exec needs a running container, and forced removal of a
//! missing container succeeds.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use ephemeral_db::testing::{FailPoint, FakeEngine};
//!
//! let engine = Arc::new(FakeEngine::new());
//! engine.fail_on(FailPoint::Pull);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::{ContainerEngine, ContainerSpec, ExecOutcome};
use crate::error::{Result, SessionError};

/// Engine operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Pull,
    Create,
    Start,
    Exec,
    Remove,
}

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    ImageExists(String),
    PullImage(String),
    RemoveContainer(String),
    CreateContainer(ContainerSpec),
    StartContainer(String),
    Exec { container: String, cmd: Vec<String> },
    Close,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    running: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    images: BTreeSet<String>,
    calls: Vec<EngineCall>,
    failing: HashSet<FailPoint>,
    exec_exit_code: Option<i64>,
    exec_delay: Option<Duration>,
    next_id: u64,
}

/// In-memory [`ContainerEngine`].
pub struct FakeEngine {
    endpoint: String,
    state: Mutex<FakeState>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    /// An engine reporting a local Unix socket endpoint, with probes exiting 0.
    pub fn new() -> Self {
        Self::with_endpoint("unix:///var/run/docker.sock")
    }

    /// An engine reporting `endpoint`, e.g. a remote `tcp://` address.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: Mutex::new(FakeState {
                exec_exit_code: Some(0),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make an operation fail until [`recover`](Self::recover) is called.
    pub fn fail_on(&self, point: FailPoint) {
        self.state().failing.insert(point);
    }

    /// Stop failing `point`.
    pub fn recover(&self, point: FailPoint) {
        self.state().failing.remove(&point);
    }

    /// Exit code reported by subsequent execs (`None` = unknown).
    pub fn set_exec_exit_code(&self, code: Option<i64>) {
        self.state().exec_exit_code = code;
    }

    /// Delay each exec by `delay` before it completes.
    pub fn set_exec_delay(&self, delay: Duration) {
        self.state().exec_delay = Some(delay);
    }

    /// Seed a running container, e.g. one left behind by a crashed run.
    pub fn add_container(&self, name: &str, image: &str) {
        let spec = ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            env: Vec::new(),
            container_port: 0,
            host_port: 0,
        };
        self.state().containers.insert(
            name.to_string(),
            FakeContainer {
                spec,
                running: true,
            },
        );
    }

    /// Seed a locally present image.
    pub fn add_image(&self, image: &str) {
        self.state().images.insert(image.to_string());
    }

    /// Whether a container with `name` exists.
    pub fn has_container(&self, name: &str) -> bool {
        self.state().containers.contains_key(name)
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state().images.contains(image)
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// Specs passed to `create_container`, in order.
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::CreateContainer(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Number of removal calls for `name`, successful or not.
    pub fn remove_attempts(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::RemoveContainer(n) if n == name))
            .count()
    }

    /// Number of pull calls.
    pub fn pull_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::PullImage(_)))
            .count()
    }

    /// Number of client releases.
    pub fn close_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::Close))
            .count()
    }

    /// Record `call` and report whether `point` is set to fail.
    fn record(&self, call: EngineCall, point: Option<FailPoint>) -> bool {
        let mut state = self.state();
        state.calls.push(call);
        point.is_some_and(|p| state.failing.contains(&p))
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.record(EngineCall::ImageExists(image.to_string()), None);
        self.has_image(image)
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.record(EngineCall::PullImage(image.to_string()), Some(FailPoint::Pull)) {
            return Err(SessionError::ImagePull {
                image: image.to_string(),
                reason: "injected pull failure".to_string(),
            });
        }
        self.add_image(image);
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        if self.record(EngineCall::RemoveContainer(name.to_string()), Some(FailPoint::Remove)) {
            return Err(SessionError::ContainerRemove {
                name: name.to_string(),
                reason: "injected remove failure".to_string(),
            });
        }
        self.state().containers.remove(name);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let fail = self.record(EngineCall::CreateContainer(spec.clone()), Some(FailPoint::Create));
        let create_failed = |reason: &str| SessionError::ContainerCreate {
            name: spec.name.clone(),
            reason: reason.to_string(),
        };
        if fail {
            return Err(create_failed("injected create failure"));
        }

        let mut state = self.state();
        if !state.images.contains(&spec.image) {
            return Err(create_failed("no such image"));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(create_failed("name already in use"));
        }

        state.next_id += 1;
        let id = format!("fake-{:012x}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let fail = self.record(EngineCall::StartContainer(name.to_string()), Some(FailPoint::Start));
        let start_failed = |reason: &str| SessionError::ContainerStart {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if fail {
            return Err(start_failed("injected start failure"));
        }

        match self.state().containers.get_mut(name) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(start_failed("no such container")),
        }
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecOutcome> {
        let call = EngineCall::Exec {
            container: container.to_string(),
            cmd: cmd.to_vec(),
        };
        let exec_failed = |reason: &str| SessionError::Exec {
            name: container.to_string(),
            reason: reason.to_string(),
        };
        if self.record(call, Some(FailPoint::Exec)) {
            return Err(exec_failed("injected exec failure"));
        }

        let (exit_code, delay) = {
            let state = self.state();
            match state.containers.get(container) {
                Some(c) if c.running => {}
                Some(c) => {
                    return Err(exec_failed(&format!(
                        "container {} is not running",
                        c.spec.name
                    )));
                }
                None => return Err(exec_failed("no such container")),
            }
            (state.exec_exit_code, state.exec_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(ExecOutcome { exit_code })
    }

    async fn close(&self) {
        self.record(EngineCall::Close, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "img".to_string(),
            env: Vec::new(),
            container_port: 1,
            host_port: 2,
        }
    }

    #[tokio::test]
    async fn test_create_requires_pulled_image_and_unique_name() {
        let engine = FakeEngine::new();
        assert!(engine.create_container(&spec("a")).await.is_err());

        engine.pull_image("img").await.unwrap();
        assert!(engine.create_container(&spec("a")).await.is_ok());
        assert!(engine.create_container(&spec("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_exec_requires_running_container() {
        let engine = FakeEngine::new();
        engine.add_image("img");
        engine.create_container(&spec("a")).await.unwrap();

        let cmd = vec!["true".to_string()];
        assert!(engine.exec("a", &cmd).await.is_err());

        engine.start_container("a").await.unwrap();
        assert_eq!(
            engine.exec("a", &cmd).await.unwrap(),
            ExecOutcome { exit_code: Some(0) }
        );
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok_and_fail_points_recover() {
        let engine = FakeEngine::new();
        assert!(engine.remove_container("ghost").await.is_ok());

        engine.fail_on(FailPoint::Remove);
        assert!(engine.remove_container("ghost").await.is_err());
        engine.recover(FailPoint::Remove);
        assert!(engine.remove_container("ghost").await.is_ok());
        assert_eq!(engine.remove_attempts("ghost"), 3);
    }
}
