//! Throwaway database containers for integration test runs.
//!
//! Pulls an image, starts a container with one bound port, waits for a
//! readiness command, runs caller code against it, and removes the container
//! on every exit path. See [`session`] for the lifecycle.

pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod testing;

pub use config::{EngineConfig, EngineTls, RegistryAuth};
pub use engine::{ContainerEngine, ContainerSpec, DockerEngine, ExecOutcome, ReleaseOutcome};
pub use error::{ConfigError, Result, RunError, SessionError};
pub use session::{
    ContainerSession, EndpointHostResolver, FixedHostResolver, HostResolver, LocalhostResolver,
    NameGenerator, PortMapping, PrefixedNameGenerator, PullPolicy, ReadinessPolicy, SessionConfig,
    UuidNameGenerator,
};
