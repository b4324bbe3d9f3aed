//! Ephemeral database sessions.
//!
//! A [`ContainerSession`] owns one throwaway database container per run:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                        run_in_container(action)                        │
//! │                                                                        │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐                │
//! │  │ Resolve Host │──▶│ Remove Stale │──▶│ Pull Image   │                │
//! │  └──────────────┘   └──────────────┘   └──────────────┘                │
//! │                                               │                        │
//! │                                               ▼                        │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────────┐    │
//! │  │ action(host) │◀──│ Readiness    │◀──│ Create & Start Container │    │
//! │  └──────────────┘   │ Exec         │   └──────────────────────────┘    │
//! │         │           └──────────────┘                                   │
//! │         ▼                                                              │
//! │  ┌──────────────────────────────┐                                      │
//! │  │ Remove Container (always)    │                                      │
//! │  └──────────────────────────────┘                                      │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any failure before the action skips straight to removal and is returned
//! as [`RunError::Session`](crate::RunError::Session). Removal failures are
//! never returned.
//!
//! By default the readiness command only has to *finish*; its exit code is
//! ignored. Use [`ReadinessPolicy::ExitCodeZero`] to require success.
//!
//! # Example
//!
//! ```rust,no_run
//! use ephemeral_db::{ContainerSession, EngineConfig, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine_config = EngineConfig::resolve()?;
//! let config = SessionConfig::postgres(15432, "secret");
//!
//! let session = ContainerSession::connect(config, &engine_config).await?;
//! let url = session
//!     .run_in_container(|host| async move {
//!         // Run migrations, generate code, ...
//!         Ok::<_, std::io::Error>(format!("postgres://postgres:secret@{host}:15432/postgres"))
//!     })
//!     .await?;
//! session.close().await;
//! # let _ = url;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod naming;
pub mod resolver;

pub use config::{PortMapping, PullPolicy, ReadinessPolicy, SessionConfig};
pub use manager::ContainerSession;
pub use naming::{NameGenerator, PrefixedNameGenerator, UuidNameGenerator};
pub use resolver::{EndpointHostResolver, FixedHostResolver, HostResolver, LocalhostResolver};
