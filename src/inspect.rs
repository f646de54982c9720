//! Read-only probes against a running sandbox: directory listing, file
//! reads and a diagnostic log bundle.

use std::sync::Arc;

use serde::Serialize;

use crate::lifecycle::scripts::{HEALTH_PATH, SERVER_LOG_FILE};
use crate::sandbox::{ExecRequest, SERVER_PORT, SandboxError, SandboxHandle, SandboxProvider};

pub const DEFAULT_LIST_PATH: &str = "/workspace";
pub const DEFAULT_LOG_TAIL: u32 = 100;
pub const MAX_LOG_TAIL: u32 = 10_000;

const SECRET_MARKERS: [&str; 3] = ["API_KEY", "TOKEN", "SECRET"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    /// `None` for directories.
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxLogs {
    pub opencode: String,
    pub processes: String,
    pub health_check: String,
    pub environment: String,
}

pub struct Inspector {
    provider: Arc<dyn SandboxProvider>,
    max_read_bytes: u64,
}

impl Inspector {
    pub fn new(provider: Arc<dyn SandboxProvider>, max_read_bytes: u64) -> Self {
        Self {
            provider,
            max_read_bytes,
        }
    }

    /// Immediate children of `path`. A missing directory lists as empty.
    #[tracing::instrument(skip(self))]
    pub async fn list_files(
        &self,
        sandbox_id: &str,
        path: &str,
    ) -> Result<Vec<FileEntry>, SandboxError> {
        require_absolute(path)?;
        let sandbox = self.provider.attach(sandbox_id).await?;

        let res = sandbox
            .exec(ExecRequest::new([
                "find",
                path,
                "-mindepth",
                "1",
                "-maxdepth",
                "1",
                "-printf",
                "%y|%s|%p\\n",
            ]))
            .await?;

        Ok(parse_listing(&res.stdout))
    }

    /// Whole text content of a regular file, up to the configured size cap.
    #[tracing::instrument(skip(self))]
    pub async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<String, SandboxError> {
        require_absolute(path)?;
        let sandbox = self.provider.attach(sandbox_id).await?;

        let check = sandbox.exec(ExecRequest::new(["test", "-f", path])).await?;
        if !check.success() {
            return Err(SandboxError::FileNotFound);
        }

        let stat = sandbox
            .exec(ExecRequest::new(["stat", "-c", "%s", path]))
            .await?;
        let size: u64 = stat.stdout.trim().parse().map_err(|_| {
            SandboxError::Backend(format!("unexpected stat output: {:?}", stat.stdout.trim()))
        })?;
        if size > self.max_read_bytes {
            return Err(SandboxError::FileTooLarge {
                size,
                limit: self.max_read_bytes,
            });
        }

        let res = sandbox.exec(ExecRequest::new(["cat", path])).await?;
        if !res.success() {
            return Err(SandboxError::CommandFailed {
                code: res.exit_code,
                stderr: res.stderr,
            });
        }
        Ok(res.stdout)
    }

    /// Four independent diagnostic probes. Each falls back to a placeholder
    /// when it yields nothing, whatever the others do.
    #[tracing::instrument(skip(self))]
    pub async fn get_logs(&self, sandbox_id: &str, tail: u32) -> Result<SandboxLogs, SandboxError> {
        let sandbox = self.provider.attach(sandbox_id).await?;
        let tail = tail.clamp(1, MAX_LOG_TAIL);

        let opencode = probe(
            sandbox.as_ref(),
            ExecRequest::new([
                "tail".to_string(),
                "-n".to_string(),
                tail.to_string(),
                SERVER_LOG_FILE.to_string(),
            ]),
            "[no logs]",
        )
        .await;

        let processes = probe(
            sandbox.as_ref(),
            ExecRequest::shell("ps aux | grep -E 'opencode|node' | grep -v grep"),
            "[no process]",
        )
        .await;

        let health_check = probe(
            sandbox.as_ref(),
            ExecRequest::new([
                "curl".to_string(),
                "-s".to_string(),
                format!("http://localhost:{SERVER_PORT}{HEALTH_PATH}"),
            ]),
            "NOT_RESPONDING",
        )
        .await;

        let raw_env = probe(sandbox.as_ref(), ExecRequest::new(["env", "-0"]), "").await;
        let environment = match scrub_environment(&raw_env) {
            env if env.is_empty() => "[no environment]".to_string(),
            env => env,
        };

        Ok(SandboxLogs {
            opencode,
            processes,
            health_check,
            environment,
        })
    }
}

fn require_absolute(path: &str) -> Result<(), SandboxError> {
    if !path.starts_with('/') {
        return Err(SandboxError::InvalidInput(format!(
            "path must be absolute, got {path:?}"
        )));
    }
    Ok(())
}

async fn probe(sandbox: &dyn SandboxHandle, req: ExecRequest, placeholder: &str) -> String {
    match sandbox.exec(req).await {
        Ok(res) if !res.stdout.trim().is_empty() => res.stdout,
        Ok(_) => placeholder.to_string(),
        Err(e) => {
            tracing::warn!(sandbox_id = %sandbox.id(), error = %e, "log probe failed");
            placeholder.to_string()
        }
    }
}

/// Parse `find -printf '%y|%s|%p\n'` output. Lines that do not fit are skipped.
pub fn parse_listing(output: &str) -> Vec<FileEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|');
            let (kind, size, path) = (parts.next()?, parts.next()?, parts.next()?);

            let name = path.trim_end_matches('/').rsplit('/').next()?;
            if name.is_empty() || name == "." || name == ".." {
                return None;
            }

            let is_directory = kind == "d";
            let size = if is_directory {
                None
            } else {
                Some(size.trim().parse::<u64>().ok()?)
            };

            Some(FileEntry {
                name: name.to_string(),
                path: path.to_string(),
                is_directory,
                size,
            })
        })
        .collect()
}

fn is_secret_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|m| upper.contains(m))
}

/// Drop every variable whose name looks secret, then sort.
///
/// `raw` is `env -0` output: one NUL-terminated `NAME=value` record per
/// variable, so multi-line values stay inside their record. Records without
/// a `=` are dropped.
pub fn scrub_environment(raw: &str) -> String {
    let mut entries: Vec<&str> = raw
        .split('\0')
        .filter(|record| match record.split_once('=') {
            Some((name, _)) => !name.is_empty() && !is_secret_name(name),
            None => false,
        })
        .collect();

    entries.sort();
    entries.join("\n")
}
