//! Managed-platform sandbox backend.
//!
//! Every operation is a thin call through `PlatformClient`. The provider
//! keeps no sandbox map: a handle is just the id plus a client clone, so
//! any replica of this service can address any sandbox.

use async_trait::async_trait;

use crate::sandbox::error::SandboxError;
use crate::sandbox::handle::SandboxHandle;
use crate::sandbox::platform::{CreateSandboxRequest, PlatformClient};
use crate::sandbox::provider::SandboxProvider;
use crate::sandbox::types::*;

// ── Provider ────────────────────────────────────────────────────────

pub struct PlatformProvider {
    client: PlatformClient,
}

impl PlatformProvider {
    pub fn new(client: PlatformClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SandboxProvider for PlatformProvider {
    async fn provision(&self, spec: SandboxSpec) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let created = self
            .client
            .create_sandbox(&CreateSandboxRequest::from(&spec))
            .await?;

        tracing::info!(sandbox_id = %created.sandbox_id, "sandbox created");

        Ok(Box::new(PlatformSandbox {
            id: created.sandbox_id,
            client: self.client.clone(),
        }))
    }

    async fn attach(&self, id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        // Ids end up in request paths.
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_')) {
            return Err(SandboxError::InvalidInput(format!("malformed sandbox id {id:?}")));
        }
        let found = self.client.get_sandbox(id).await?;
        Ok(Box::new(PlatformSandbox {
            id: found.sandbox_id,
            client: self.client.clone(),
        }))
    }
}

// ── Handle ──────────────────────────────────────────────────────────

pub struct PlatformSandbox {
    id: SandboxId,
    client: PlatformClient,
}

#[async_trait]
impl SandboxHandle for PlatformSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(&self, req: ExecRequest) -> Result<ExecResult, SandboxError> {
        self.client.exec(&self.id, &req.command).await
    }

    async fn expose_port(&self, port: u16) -> Result<ExposedEndpoint, SandboxError> {
        let tunnels = self.client.tunnels(&self.id).await?;
        let url = tunnels.url_for(port).ok_or_else(|| {
            SandboxError::Backend(format!("no tunnel declared for port {port}"))
        })?;
        Ok(ExposedEndpoint {
            port,
            url: url.to_string(),
        })
    }

    async fn snapshot_filesystem(&self) -> Result<SnapshotRef, SandboxError> {
        let snap = self.client.snapshot(&self.id).await?;
        Ok(SnapshotRef {
            id: snap.snapshot_id,
        })
    }

    async fn terminate(&self) -> Result<(), SandboxError> {
        self.client.terminate(&self.id).await
    }
}
