use async_trait::async_trait;

use super::error::SandboxError;
use super::handle::SandboxHandle;
use super::types::SandboxSpec;

/// Factory for creating and looking up sandboxes.
///
/// One provider instance lives on `AppState`, shared by the orchestrator
/// and the inspector. It holds no per-sandbox state: every call goes to
/// the platform.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a new sandbox from the given spec.
    async fn provision(&self, spec: SandboxSpec) -> Result<Box<dyn SandboxHandle>, SandboxError>;

    /// Attach to an existing sandbox by id. Unknown or terminated ids
    /// yield `SandboxError::NotFound`.
    async fn attach(&self, id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError>;
}
