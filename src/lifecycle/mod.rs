//! Sandbox lifecycle: create → configure → verify healthy → expose →
//! pause/snapshot → resume → terminate.
//!
//! Steps inside one operation run strictly in order. Whether a failing
//! step aborts the operation or is only logged is decided in one place,
//! `Step::policy`. An aborted Provision or Resume tears its sandbox down.

pub mod health;
pub mod identity;
pub mod scripts;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::sandbox::{
    ExecRequest, ExecResult, ImageSource, SERVER_PORT, SandboxError, SandboxHandle,
    SandboxProvider, SandboxSpec, SnapshotId,
};

use health::{PollPolicy, Readiness, wait_until_ready};
use identity::GitIdentity;
use scripts::Secret;

// ── Inputs / outputs ────────────────────────────────────────────────

/// `owner/name` on the source-control host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl FromStr for RepoRef {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, name)) if valid_segment(owner) && valid_segment(name) => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(SandboxError::InvalidInput(format!(
                "repo must be in the form owner/name, got {s:?}"
            ))),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Per-request creation input. Never persisted.
#[derive(Clone, Default)]
pub struct SandboxConfig {
    pub repo: Option<RepoRef>,
    pub access_token: Option<String>,
    pub model_api_key: Option<String>,
}

impl fmt::Debug for SandboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxConfig")
            .field("repo", &self.repo)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("model_api_key", &self.model_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provisioned {
    pub sandbox_id: String,
    pub tunnel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminateOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Step policy ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Credentials,
    Clone,
    Identity,
    Workspace,
    ServerConfig,
    Secrets,
    Launch,
    Readiness,
    Tunnel,
    Snapshot,
    /// Terminating the source sandbox after a successful snapshot.
    ReleaseAfterSnapshot,
    /// Terminating a sandbox whose provisioning was aborted.
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Fail the operation.
    Abort,
    /// Log and carry on.
    Warn,
}

impl Step {
    pub fn policy(self) -> FailurePolicy {
        match self {
            Step::Identity | Step::ReleaseAfterSnapshot | Step::Teardown => FailurePolicy::Warn,
            Step::Credentials
            | Step::Clone
            | Step::Workspace
            | Step::ServerConfig
            | Step::Secrets
            | Step::Launch
            | Step::Readiness
            | Step::Tunnel
            | Step::Snapshot => FailurePolicy::Abort,
        }
    }
}

/// Apply the step's failure policy: `Ok(None)` means the failure was advisory.
fn settle<T>(
    step: Step,
    sandbox_id: &str,
    result: Result<T, SandboxError>,
) -> Result<Option<T>, SandboxError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) => match step.policy() {
            FailurePolicy::Abort => {
                tracing::error!(sandbox_id = %sandbox_id, step = ?step, error = %e, "step failed");
                Err(e)
            }
            FailurePolicy::Warn => {
                tracing::warn!(sandbox_id = %sandbox_id, step = ?step, error = %e, "step failed, continuing");
                Ok(None)
            }
        },
    }
}

/// Run a command and treat a non-zero exit as `CommandFailed`.
async fn run(sandbox: &dyn SandboxHandle, req: ExecRequest) -> Result<ExecResult, SandboxError> {
    let res = sandbox.exec(req).await?;
    if !res.success() {
        return Err(SandboxError::CommandFailed {
            code: res.exit_code,
            stderr: res.stderr,
        });
    }
    Ok(res)
}

// ── Orchestrator ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub base_image: String,
    pub create_poll: PollPolicy,
    pub resume_poll: PollPolicy,
}

impl LifecycleSettings {
    pub fn new(base_image: String) -> Self {
        Self {
            base_image,
            create_poll: PollPolicy::after_create(),
            resume_poll: PollPolicy::after_resume(),
        }
    }
}

pub struct Orchestrator {
    provider: Arc<dyn SandboxProvider>,
    settings: LifecycleSettings,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn SandboxProvider>, settings: LifecycleSettings) -> Self {
        Self { provider, settings }
    }

    /// Create a sandbox, prepare its workspace and start the code server.
    #[tracing::instrument(skip_all, fields(repo, sandbox_id))]
    pub async fn provision(&self, config: SandboxConfig) -> Result<Provisioned, SandboxError> {
        if let Some(repo) = &config.repo {
            tracing::Span::current().record("repo", tracing::field::display(repo));
        }
        tracing::info!("starting sandbox creation");

        let spec = SandboxSpec::agent(ImageSource::Base(self.settings.base_image.clone()));
        let sandbox = self.provider.provision(spec).await?;
        tracing::Span::current().record("sandbox_id", sandbox.id());

        match self.bring_up(sandbox.as_ref(), &config).await {
            Ok(tunnel_url) => {
                tracing::info!(tunnel_url = %tunnel_url, "sandbox ready");
                Ok(Provisioned {
                    sandbox_id: sandbox.id().to_string(),
                    tunnel_url,
                })
            }
            Err(e) => {
                self.teardown(sandbox.as_ref()).await;
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        sandbox: &dyn SandboxHandle,
        config: &SandboxConfig,
    ) -> Result<String, SandboxError> {
        let id = sandbox.id();

        if let Some(token) = &config.access_token {
            tracing::info!("configuring git credentials");
            let res = async {
                run(sandbox, scripts::store_git_credentials(token)).await?;
                run(sandbox, scripts::use_credential_store()).await
            }
            .await;
            settle(Step::Credentials, id, res)?;
        }

        match &config.repo {
            Some(repo) => {
                tracing::info!(repo = %repo, "cloning repository");
                settle(Step::Clone, id, clone(sandbox, repo).await)?;

                if let Some(token) = &config.access_token {
                    if let Some(identity) =
                        settle(Step::Identity, id, configure_identity(sandbox, token).await)?
                    {
                        tracing::info!(name = %identity.name, email = %identity.email, "git identity configured");
                    }
                }
            }
            None => {
                settle(Step::Workspace, id, run(sandbox, scripts::create_workspace()).await)?;
            }
        }

        settle(
            Step::ServerConfig,
            id,
            run(sandbox, scripts::write_server_config()).await,
        )?;

        let res = async {
            run(sandbox, scripts::init_secrets()).await?;
            if let Some(token) = &config.access_token {
                run(sandbox, scripts::upsert_secret(Secret::GithubToken, token)).await?;
            }
            if let Some(key) = &config.model_api_key {
                run(sandbox, scripts::upsert_secret(Secret::AnthropicApiKey, key)).await?;
            }
            Ok::<(), SandboxError>(())
        }
        .await;
        settle(Step::Secrets, id, res)?;

        self.start_server(sandbox, self.settings.create_poll, |log_tail| {
            SandboxError::NotReady { log_tail }
        })
        .await
    }

    /// Launch the server, wait for readiness and resolve the tunnel URL.
    async fn start_server(
        &self,
        sandbox: &dyn SandboxHandle,
        policy: PollPolicy,
        not_ready: fn(String) -> SandboxError,
    ) -> Result<String, SandboxError> {
        let id = sandbox.id();

        tracing::info!("starting code server");
        settle(Step::Launch, id, run(sandbox, scripts::launch_server()).await)?;

        let readiness = wait_until_ready(sandbox, &scripts::health_probe(), policy).await;
        match settle(Step::Readiness, id, readiness)? {
            Some(Readiness::Ready { .. }) | None => {}
            Some(Readiness::Exhausted { attempts, last_status }) => {
                let log_tail = server_log_tail(sandbox).await;
                tracing::error!(
                    sandbox_id = %id,
                    attempts,
                    last_status = last_status.as_deref().unwrap_or("-"),
                    log_tail = %log_tail,
                    "server never became healthy"
                );
                return Err(not_ready(log_tail));
            }
        }

        let endpoint = settle(Step::Tunnel, id, sandbox.expose_port(SERVER_PORT).await)?;
        endpoint
            .map(|e| e.url)
            .ok_or_else(|| SandboxError::Backend(format!("no tunnel for port {SERVER_PORT}")))
    }

    /// Capture a filesystem snapshot, then release the sandbox.
    ///
    /// A failed snapshot leaves the sandbox running. Once the snapshot exists
    /// a failed terminate is only logged.
    #[tracing::instrument(skip(self))]
    pub async fn pause(&self, sandbox_id: &str) -> Result<SnapshotId, SandboxError> {
        let sandbox = self.provider.attach(sandbox_id).await?;

        let snapshot = sandbox
            .snapshot_filesystem()
            .await
            .map_err(|e| match e {
                SandboxError::NotFound(_) => e,
                other => SandboxError::SnapshotFailed(other.to_string()),
            });
        let snapshot = settle(Step::Snapshot, sandbox_id, snapshot)?
            .ok_or_else(|| SandboxError::SnapshotFailed("no snapshot produced".into()))?;
        tracing::info!(snapshot_id = %snapshot.id, "snapshot created");

        if settle(
            Step::ReleaseAfterSnapshot,
            sandbox_id,
            sandbox.terminate().await,
        )?
        .is_some()
        {
            tracing::info!("sandbox terminated");
        }

        Ok(snapshot.id)
    }

    /// Start a new sandbox from a snapshot and restart the code server in it.
    #[tracing::instrument(skip(self, model_api_key), fields(sandbox_id))]
    pub async fn resume(
        &self,
        snapshot_id: &str,
        model_api_key: Option<&str>,
    ) -> Result<Provisioned, SandboxError> {
        let spec = SandboxSpec::agent(ImageSource::Snapshot(snapshot_id.to_string()));
        let sandbox = self.provider.provision(spec).await?;
        tracing::Span::current().record("sandbox_id", sandbox.id());

        let res = async {
            if let Some(key) = model_api_key {
                let res = run(
                    sandbox.as_ref(),
                    scripts::upsert_secret(Secret::AnthropicApiKey, key),
                )
                .await;
                settle(Step::Secrets, sandbox.id(), res)?;
            }
            self.start_server(sandbox.as_ref(), self.settings.resume_poll, |log_tail| {
                SandboxError::NotReadyAfterResume { log_tail }
            })
            .await
        }
        .await;

        match res {
            Ok(tunnel_url) => {
                tracing::info!(tunnel_url = %tunnel_url, "sandbox resumed");
                Ok(Provisioned {
                    sandbox_id: sandbox.id().to_string(),
                    tunnel_url,
                })
            }
            Err(e) => {
                self.teardown(sandbox.as_ref()).await;
                Err(e)
            }
        }
    }

    /// Best-effort immediate teardown. Never fails; the outcome says what happened.
    #[tracing::instrument(skip(self))]
    pub async fn terminate(&self, sandbox_id: &str) -> TerminateOutcome {
        let res = async {
            let sandbox = self.provider.attach(sandbox_id).await?;
            sandbox.terminate().await
        }
        .await;

        match res {
            Ok(()) => TerminateOutcome {
                success: true,
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "terminate failed");
                TerminateOutcome {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn teardown(&self, sandbox: &dyn SandboxHandle) {
        tracing::warn!(sandbox_id = %sandbox.id(), "tearing down partially provisioned sandbox");
        // Advisory policy: the result is already logged by settle.
        let _ = settle(Step::Teardown, sandbox.id(), sandbox.terminate().await);
    }
}

async fn clone(sandbox: &dyn SandboxHandle, repo: &RepoRef) -> Result<(), SandboxError> {
    let res = sandbox
        .exec(scripts::clone_repo(&repo.owner, &repo.name))
        .await?;
    if !res.success() {
        return Err(SandboxError::CloneFailed { stderr: res.stderr });
    }
    Ok(())
}

async fn configure_identity(
    sandbox: &dyn SandboxHandle,
    token: &str,
) -> Result<GitIdentity, SandboxError> {
    let fetched = async {
        run(sandbox, scripts::store_auth_header(token)).await?;
        run(sandbox, scripts::fetch_git_user()).await
    }
    .await;
    let res = match fetched {
        Ok(res) => res,
        Err(e) => {
            // The fetch script removes the header file itself, unless it never ran.
            if let Err(rm) = sandbox.exec(scripts::remove_auth_header()).await {
                tracing::warn!(sandbox_id = %sandbox.id(), error = %rm, "could not remove auth header file");
            }
            return Err(e);
        }
    };
    let identity = GitIdentity::from_user_json(&res.stdout)?;

    run(sandbox, scripts::set_git_config("user.email", &identity.email)).await?;
    run(sandbox, scripts::set_git_config("user.name", &identity.name)).await?;
    Ok(identity)
}

async fn server_log_tail(sandbox: &dyn SandboxHandle) -> String {
    match sandbox
        .exec(scripts::server_log_tail_bytes(scripts::LOG_TAIL_BYTES))
        .await
    {
        Ok(res) if !res.stdout.trim().is_empty() => res.stdout,
        Ok(_) => "empty".to_string(),
        Err(e) => {
            tracing::warn!(sandbox_id = %sandbox.id(), error = %e, "could not read server log");
            "empty".to_string()
        }
    }
}
