//! Docker engine backed by bollard.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ExecInspectResponse, HostConfig, PortBinding};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::StreamExt;
use secrecy::ExposeSecret;

use crate::config::{EngineConfig, RegistryAuth};
use crate::engine::{ContainerEngine, ContainerSpec, ExecOutcome};
use crate::error::{Result, SessionError};

/// Delay between exec inspections once the output stream has closed.
const EXEC_INSPECT_INTERVAL: Duration = Duration::from_millis(50);
/// Inspections before giving up on the engine marking the exec finished.
const EXEC_INSPECT_ATTEMPTS: u32 = 100;

/// [`ContainerEngine`] over the Docker Engine API.
pub struct DockerEngine {
    docker: Docker,
    endpoint: String,
    registry_auth: Option<RegistryAuth>,
}

impl DockerEngine {
    /// Connect to the engine described by `config` and check it responds.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let unavailable = |reason: String| SessionError::EngineUnavailable {
            endpoint: config.endpoint.clone(),
            reason,
        };

        let docker = open_client(config).map_err(unavailable)?;
        docker
            .ping()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        tracing::debug!(endpoint = %config.endpoint, "Connected to container engine");

        Ok(Self::with_client(docker, config))
    }

    /// Wrap an already-connected bollard client.
    pub fn with_client(docker: Docker, config: &EngineConfig) -> Self {
        Self {
            docker,
            endpoint: config.endpoint.clone(),
            registry_auth: config.registry_auth.clone(),
        }
    }

    fn credentials(&self) -> Option<DockerCredentials> {
        self.registry_auth.as_ref().map(|auth| DockerCredentials {
            username: Some(auth.username.clone()),
            password: Some(auth.password.expose_secret().to_string()),
            serveraddress: auth.server.clone(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (from_image, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut stream = self
            .docker
            .create_image(Some(options), None, self.credentials());

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(SessionError::ImagePull {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(SessionError::ContainerRemove {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| SessionError::ContainerCreate {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "Engine warning: {}", warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SessionError::ContainerStart {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecOutcome> {
        let exec_failed = |e: bollard::errors::Error| SessionError::Exec {
            name: container.to_string(),
            reason: e.to_string(),
        };

        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(exec_failed)?;

        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(exec_failed)?
        {
            while let Some(chunk) = output.next().await {
                match chunk.map_err(exec_failed)? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        tracing::debug!(
                            container,
                            "probe: {}",
                            String::from_utf8_lossy(&message).trim_end()
                        );
                    }
                    LogOutput::StdErr { message } => {
                        tracing::debug!(
                            container,
                            "probe stderr: {}",
                            String::from_utf8_lossy(&message).trim_end()
                        );
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
        }

        // The engine can still report the exec as running right after the
        // output closes. Wait for it to settle; the command is not re-run.
        let mut attempts = 0;
        loop {
            let inspect = self
                .docker
                .inspect_exec(&exec.id)
                .await
                .map_err(exec_failed)?;

            if let Some(outcome) = finished_exec(&inspect) {
                return Ok(outcome);
            }

            attempts += 1;
            if attempts >= EXEC_INSPECT_ATTEMPTS {
                tracing::warn!(container, "Exec still reported running after its output closed");
                return Ok(ExecOutcome {
                    exit_code: inspect.exit_code,
                });
            }
            tokio::time::sleep(EXEC_INSPECT_INTERVAL).await;
        }
    }

    async fn close(&self) {
        // bollard releases its connection pool when the last client clone drops.
        tracing::debug!(endpoint = %self.endpoint, "Released container engine client");
    }
}

/// Exit status of an exec the engine has marked as stopped.
fn finished_exec(inspect: &ExecInspectResponse) -> Option<ExecOutcome> {
    (inspect.running == Some(false)).then_some(ExecOutcome {
        exit_code: inspect.exit_code,
    })
}

/// Open a client for a `DOCKER_HOST`-style endpoint.
///
/// `tcp://` and `https://` endpoints go over TLS when client certificates are
/// configured, plain HTTP otherwise.
fn open_client(config: &EngineConfig) -> std::result::Result<Docker, String> {
    let endpoint = config.endpoint.as_str();
    let timeout_secs = config.timeout_secs;

    #[cfg(unix)]
    if let Some(path) = endpoint.strip_prefix("unix://") {
        return Docker::connect_with_socket(path, timeout_secs, API_DEFAULT_VERSION)
            .map_err(|e| e.to_string());
    }

    #[cfg(windows)]
    if endpoint.starts_with("npipe://") {
        return Docker::connect_with_named_pipe(endpoint, timeout_secs, API_DEFAULT_VERSION)
            .map_err(|e| e.to_string());
    }

    let remote = endpoint.starts_with("tcp://") || endpoint.starts_with("https://");
    if remote && let Some(tls) = &config.tls {
        return Docker::connect_with_ssl(
            endpoint,
            &tls.key(),
            &tls.cert(),
            &tls.ca(),
            timeout_secs,
            API_DEFAULT_VERSION,
        )
        .map_err(|e| format!("TLS setup from {} failed: {e}", tls.dir().display()));
    }

    if endpoint.starts_with("https://") {
        return Err(format!(
            "'{endpoint}' needs DOCKER_TLS_VERIFY and client certificates"
        ));
    }

    if let Some(addr) = endpoint.strip_prefix("tcp://") {
        return Docker::connect_with_http(
            &format!("http://{addr}"),
            timeout_secs,
            API_DEFAULT_VERSION,
        )
        .map_err(|e| e.to_string());
    }

    if endpoint.starts_with("http://") {
        return Docker::connect_with_http(endpoint, timeout_secs, API_DEFAULT_VERSION)
            .map_err(|e| e.to_string());
    }

    if endpoint.contains("://") {
        return Err(format!("unsupported engine endpoint scheme in '{endpoint}'"));
    }

    // Bare socket path.
    #[cfg(unix)]
    {
        Docker::connect_with_socket(endpoint, timeout_secs, API_DEFAULT_VERSION)
            .map_err(|e| e.to_string())
    }
    #[cfg(not(unix))]
    {
        Docker::connect_with_local_defaults().map_err(|e| e.to_string())
    }
}

/// Build the create-container body for a session container.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_port = spec.exposed_port();

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        exposed_port.clone(),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(spec.host_port.to_string()),
        }]),
    );

    // bollard expects HashMap<String, HashMap<(), ()>>
    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(exposed_port, HashMap::new());

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        auto_remove: Some(false),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: if spec.env.is_empty() {
            None
        } else {
            Some(spec.env.clone())
        },
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Split an image reference into the `fromImage` and `tag` pull parameters.
///
/// An untagged reference pulls `latest`; the engine would otherwise pull every
/// tag of the repository. Digest references are passed through whole.
fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }

    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::EngineTls;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "db-session".to_string(),
            image: "postgres:16-alpine".to_string(),
            env: vec!["A=1".to_string(), "B=2".to_string()],
            container_port: 5432,
            host_port: 15432,
        }
    }

    #[test]
    fn test_container_config_ports() {
        let config = container_config(&spec());

        let exposed = config.exposed_ports.unwrap();
        assert_eq!(exposed.len(), 1);
        assert!(exposed.contains_key("5432/tcp"));

        let bindings = config.host_config.unwrap().port_bindings.unwrap();
        let binding = bindings["5432/tcp"].as_ref().unwrap();
        assert_eq!(binding.len(), 1);
        assert_eq!(binding[0].host_port.as_deref(), Some("15432"));
        assert_eq!(binding[0].host_ip, None);
    }

    #[test]
    fn test_container_config_env_and_image() {
        let config = container_config(&spec());
        assert_eq!(config.image.as_deref(), Some("postgres:16-alpine"));
        assert_eq!(
            config.env.unwrap(),
            vec!["A=1".to_string(), "B=2".to_string()]
        );

        let empty = ContainerSpec {
            env: Vec::new(),
            ..spec()
        };
        assert!(container_config(&empty).env.is_none());
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("postgres:16"), ("postgres", "16"));
        assert_eq!(split_image_reference("postgres"), ("postgres", "latest"));
        assert_eq!(
            split_image_reference("localhost:5000/team/pg"),
            ("localhost:5000/team/pg", "latest")
        );
        assert_eq!(
            split_image_reference("localhost:5000/team/pg:15"),
            ("localhost:5000/team/pg", "15")
        );
        assert_eq!(
            split_image_reference("postgres@sha256:abcd"),
            ("postgres@sha256:abcd", "")
        );
    }

    fn engine_config(endpoint: &str) -> EngineConfig {
        EngineConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_open_client_rejects_unknown_scheme() {
        let err = open_client(&engine_config("ftp://example.com")).err().unwrap();
        assert!(err.contains("unsupported"));
    }

    #[test]
    fn test_open_client_uses_tls_certificates() {
        let config = EngineConfig {
            tls: Some(EngineTls::new("/nonexistent/certs")),
            ..engine_config("tcp://dind:2376")
        };
        let err = open_client(&config).err().unwrap();
        assert!(err.contains("TLS setup from /nonexistent/certs"), "{err}");
    }

    #[test]
    fn test_open_client_https_requires_tls() {
        let err = open_client(&engine_config("https://dind:2376")).err().unwrap();
        assert!(err.contains("DOCKER_TLS_VERIFY"), "{err}");
    }

    #[test]
    fn test_exec_not_finished_while_running() {
        let running = ExecInspectResponse {
            running: Some(true),
            exit_code: None,
            ..Default::default()
        };
        assert_eq!(finished_exec(&running), None);

        let stopped = ExecInspectResponse {
            running: Some(false),
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(finished_exec(&stopped), Some(ExecOutcome { exit_code: Some(0) }));

        let failed = ExecInspectResponse {
            running: Some(false),
            exit_code: Some(1),
            ..Default::default()
        };
        assert_eq!(finished_exec(&failed), Some(ExecOutcome { exit_code: Some(1) }));
    }
}
