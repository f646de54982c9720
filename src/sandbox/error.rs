/// Errors from sandbox operations.
///
/// Backends map their transport errors into `NotFound`, `Provision`,
/// `Exec`, `Serde` and `Backend`. The orchestrator and inspector raise the
/// remaining variants; their `Display` text is what API callers see in the
/// `{"error": ...}` body.
#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("provision failed: {0}")]
    Provision(String),

    #[error("provisioning failed: clone error: {stderr}")]
    CloneFailed { stderr: String },

    #[error("server did not become ready: {log_tail}")]
    NotReady { log_tail: String },

    #[error("server did not become ready after resume: {log_tail}")]
    NotReadyAfterResume { log_tail: String },

    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("File not found")]
    FileNotFound,

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("exec failed: {0}")]
    Exec(String),

    #[error("command failed: code={code:?}, stderr={stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("serialization: {0}")]
    Serde(String),

    #[error("backend error: {0}")]
    Backend(String),
}
