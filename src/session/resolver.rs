//! Mapping the engine endpoint to the host callers connect to.

use url::Url;

use crate::error::{Result, SessionError};

/// Produces the address callers should use to reach the session's bound port.
///
/// Receives the engine endpoint in `DOCKER_HOST` syntax. Implementations must
/// not depend on container state: the host is resolved before the container
/// exists.
pub trait HostResolver: Send + Sync {
    fn resolve_host(&self, engine_endpoint: &str) -> Result<String>;
}

impl<F> HostResolver for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn resolve_host(&self, engine_endpoint: &str) -> Result<String> {
        Ok(self(engine_endpoint))
    }
}

/// Always `localhost`. Right for a local engine with host port bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalhostResolver;

impl HostResolver for LocalhostResolver {
    fn resolve_host(&self, _engine_endpoint: &str) -> Result<String> {
        Ok("localhost".to_string())
    }
}

/// Uses the engine's own host for remote engines, `localhost` for local sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointHostResolver;

impl HostResolver for EndpointHostResolver {
    fn resolve_host(&self, engine_endpoint: &str) -> Result<String> {
        let endpoint = engine_endpoint.trim();
        let failed = |reason: String| SessionError::HostResolution {
            endpoint: endpoint.to_string(),
            reason,
        };

        if endpoint.is_empty() {
            return Err(failed("endpoint is empty".to_string()));
        }

        // Local sockets, pipes and bare paths.
        if !endpoint.contains("://")
            || endpoint.starts_with("unix://")
            || endpoint.starts_with("npipe://")
        {
            return Ok("localhost".to_string());
        }

        let url = Url::parse(endpoint).map_err(|e| failed(e.to_string()))?;
        match url.scheme() {
            "tcp" | "http" | "https" | "ssh" => url
                .host_str()
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .ok_or_else(|| failed("endpoint has no host".to_string())),
            other => Err(failed(format!("unsupported scheme '{other}'"))),
        }
    }
}

/// A host fixed up front, e.g. a CI service alias.
#[derive(Debug, Clone)]
pub struct FixedHostResolver(pub String);

impl HostResolver for FixedHostResolver {
    fn resolve_host(&self, _engine_endpoint: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}
