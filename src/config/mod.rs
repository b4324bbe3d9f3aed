//! Configuration resolved from environment variables.
//!
//! The engine connection is the only thing read from the environment; session
//! settings (image, ports, probe) are code-level values in
//! [`SessionConfig`](crate::SessionConfig).

mod engine;
pub(crate) mod helpers;

pub use engine::{DEFAULT_ENGINE_ENDPOINT, EngineConfig, EngineTls, RegistryAuth};
