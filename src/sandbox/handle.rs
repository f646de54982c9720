use async_trait::async_trait;

use super::error::SandboxError;
use super::types::*;

/// Handle to a live sandbox on the managed platform.
///
/// A handle is only meaningful while its sandbox is alive. Backends return
/// `SandboxError::NotFound` for calls against a terminated sandbox.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Run a command to completion, capturing exit code, stdout and stderr.
    async fn exec(&self, req: ExecRequest) -> Result<ExecResult, SandboxError>;

    /// Resolve the public tunnel URL for a port declared at provision time.
    async fn expose_port(&self, port: u16) -> Result<ExposedEndpoint, SandboxError>;

    async fn snapshot_filesystem(&self) -> Result<SnapshotRef, SandboxError>;

    async fn terminate(&self) -> Result<(), SandboxError>;
}
