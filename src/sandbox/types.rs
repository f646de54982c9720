use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Identity ────────────────────────────────────────────────────────

pub type SandboxId = String;
pub type SnapshotId = String;

/// Port the code server listens on inside every sandbox.
pub const SERVER_PORT: u16 = 4096;

// ── Sandbox spec (input to provision) ───────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    pub image: ImageSource,
    pub resources: ResourceHints,
    pub lifecycle: LifecyclePolicy,
    /// Ports declared up front so the platform can tunnel them.
    pub encrypted_ports: Vec<u16>,
}

impl SandboxSpec {
    /// The fixed agent profile: 1 vCPU, 2 GiB, 1h ceiling, 10 min idle eviction.
    pub fn agent(image: ImageSource) -> Self {
        Self {
            image,
            resources: ResourceHints::default(),
            lifecycle: LifecyclePolicy::default(),
            encrypted_ports: vec![SERVER_PORT],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A platform image by name.
    Base(String),
    /// A filesystem snapshot captured by a previous pause.
    Snapshot(SnapshotId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceHints {
    pub cpu: f64,
    pub memory_mb: u32,
}

impl Default for ResourceHints {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory_mb: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub ttl: Duration,
    pub idle_timeout: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

// ── Exec model ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: Vec<String>,
}

impl ExecRequest {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    /// `sh -c <script>`. Callers must never interpolate user input into `script`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            command: vec!["sh".into(), "-c".into(), script.into()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ── Ports / snapshots ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposedEndpoint {
    pub port: u16,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub id: SnapshotId,
}
