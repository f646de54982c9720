//! HTTP client for the managed sandbox platform API.
//!
//! The platform owns isolation, snapshot storage and tunnelling. This
//! service only drives it:
//!
//! API: POST /sandboxes, GET /sandboxes/{id}, POST /sandboxes/{id}/exec,
//! GET /sandboxes/{id}/tunnels, POST /sandboxes/{id}/snapshot,
//! DELETE /sandboxes/{id}

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::sandbox::error::SandboxError;
use crate::sandbox::types::{ExecResult, ImageSource, SandboxSpec};

// ── Request / Response types ────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateSandboxRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub cpu: f64,
    pub memory_mb: u32,
    pub timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub encrypted_ports: Vec<u16>,
}

impl From<&SandboxSpec> for CreateSandboxRequest {
    fn from(spec: &SandboxSpec) -> Self {
        let (image, snapshot_id) = match &spec.image {
            ImageSource::Base(name) => (Some(name.clone()), None),
            ImageSource::Snapshot(id) => (None, Some(id.clone())),
        };
        Self {
            image,
            snapshot_id,
            cpu: spec.resources.cpu,
            memory_mb: spec.resources.memory_mb,
            timeout_secs: spec.lifecycle.ttl.as_secs(),
            idle_timeout_secs: spec.lifecycle.idle_timeout.as_secs(),
            encrypted_ports: spec.encrypted_ports.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxResponse {
    pub sandbox_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecBody<'a> {
    pub command: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tunnel {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelsResponse {
    /// Keyed by the sandbox-side port, as a string.
    pub tunnels: HashMap<String, Tunnel>,
}

impl TunnelsResponse {
    pub fn url_for(&self, port: u16) -> Option<&str> {
        self.tunnels.get(&port.to_string()).map(|t| t.url.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotResponse {
    pub snapshot_id: String,
}

// ── Client ──────────────────────────────────────────────────────────

/// Bound on lookup and teardown calls. Exec, create and snapshot run for as
/// long as the platform takes.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the sandbox platform REST API.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl PlatformClient {
    pub fn new(client: reqwest::Client, base_url: String, token: Option<String>) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            token,
            client,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn control(&self, method: Method, path: &str) -> RequestBuilder {
        self.request(method, path).timeout(CONTROL_TIMEOUT)
    }

    fn exec_request(&self, sandbox_id: &str, command: &[String]) -> RequestBuilder {
        self.request(Method::POST, &format!("/sandboxes/{sandbox_id}/exec"))
            .json(&ExecBody { command })
    }

    fn snapshot_request(&self, sandbox_id: &str) -> RequestBuilder {
        self.request(Method::POST, &format!("/sandboxes/{sandbox_id}/snapshot"))
    }

    /// Map 404 to `NotFound` and any other non-success status to `Backend`.
    async fn check(resp: Response, op: &str, sandbox_id: &str) -> Result<Response, SandboxError> {
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SandboxError::NotFound(sandbox_id.to_string()));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Backend(format!(
                "platform {op} returned {status}: {body}"
            )));
        }
        Ok(resp)
    }

    /// Create a new sandbox.
    pub async fn create_sandbox(
        &self,
        req: &CreateSandboxRequest,
    ) -> Result<SandboxResponse, SandboxError> {
        tracing::info!(
            image = req.image.as_deref().unwrap_or("-"),
            snapshot_id = req.snapshot_id.as_deref().unwrap_or("-"),
            "creating sandbox via platform"
        );

        let resp = self
            .request(Method::POST, "/sandboxes")
            .json(req)
            .send()
            .await
            .map_err(|e| SandboxError::Provision(format!("platform create failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Provision(format!(
                "platform create returned {status}: {body}"
            )));
        }

        resp.json::<SandboxResponse>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse sandbox response: {e}")))
    }

    /// Look up a sandbox. Terminated sandboxes are reported as 404 by the platform.
    pub async fn get_sandbox(&self, sandbox_id: &str) -> Result<SandboxResponse, SandboxError> {
        let resp = self
            .control(Method::GET, &format!("/sandboxes/{sandbox_id}"))
            .send()
            .await
            .map_err(|e| SandboxError::Backend(format!("platform get failed: {e}")))?;
        let resp = Self::check(resp, "get", sandbox_id).await?;

        resp.json::<SandboxResponse>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse sandbox response: {e}")))
    }

    pub async fn exec(&self, sandbox_id: &str, command: &[String]) -> Result<ExecResult, SandboxError> {
        let resp = self
            .exec_request(sandbox_id, command)
            .send()
            .await
            .map_err(|e| SandboxError::Exec(format!("platform exec failed: {e}")))?;
        let resp = Self::check(resp, "exec", sandbox_id).await?;

        resp.json::<ExecResult>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse exec response: {e}")))
    }

    pub async fn tunnels(&self, sandbox_id: &str) -> Result<TunnelsResponse, SandboxError> {
        let resp = self
            .control(Method::GET, &format!("/sandboxes/{sandbox_id}/tunnels"))
            .send()
            .await
            .map_err(|e| SandboxError::Backend(format!("platform tunnels failed: {e}")))?;
        let resp = Self::check(resp, "tunnels", sandbox_id).await?;

        resp.json::<TunnelsResponse>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse tunnels response: {e}")))
    }

    pub async fn snapshot(&self, sandbox_id: &str) -> Result<SnapshotResponse, SandboxError> {
        let resp = self
            .snapshot_request(sandbox_id)
            .send()
            .await
            .map_err(|e| SandboxError::Backend(format!("platform snapshot failed: {e}")))?;
        let resp = Self::check(resp, "snapshot", sandbox_id).await?;

        resp.json::<SnapshotResponse>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse snapshot response: {e}")))
    }

    /// Terminate a sandbox. An already-gone sandbox is reported as `NotFound`.
    pub async fn terminate(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        tracing::info!(sandbox_id = %sandbox_id, "terminating sandbox via platform");

        let resp = self
            .control(Method::DELETE, &format!("/sandboxes/{sandbox_id}"))
            .send()
            .await
            .map_err(|e| SandboxError::Backend(format!("platform terminate failed: {e}")))?;
        Self::check(resp, "terminate", sandbox_id).await?;

        tracing::info!(sandbox_id = %sandbox_id, "sandbox terminated");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
