//! In-memory sandbox provider for tests.
//!
//! Commands are answered from scripted rules: the most recently added rule
//! whose needle occurs in the space-joined command wins. Unmatched commands
//! succeed with empty output, except the readiness probe which answers
//! `200` until a test overrides it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use super::error::SandboxError;
use super::handle::SandboxHandle;
use super::provider::SandboxProvider;
use super::types::*;

pub fn ok(stdout: &str) -> ExecResult {
    ExecResult {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(code: i32, stderr: &str) -> ExecResult {
    ExecResult {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

struct Rule {
    needle: String,
    /// The last response is sticky once the earlier ones are used up.
    responses: VecDeque<ExecResult>,
}

struct FakeSandbox {
    alive: bool,
    image: ImageSource,
    commands: Vec<Vec<String>>,
}

#[derive(Default)]
struct FakeState {
    next_id: u32,
    sandboxes: BTreeMap<SandboxId, FakeSandbox>,
    rules: Vec<Rule>,
    fail_snapshot: bool,
    fail_terminate: bool,
    fail_exec: bool,
    /// Needles whose commands are recorded, then fail at the transport level.
    drop_exec: Vec<String>,
    vanish_on_snapshot: bool,
}

#[derive(Clone)]
pub struct FakeProvider {
    state: Arc<StdMutex<FakeState>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        let fake = Self {
            state: Arc::new(StdMutex::new(FakeState::default())),
        };
        fake.respond("%{http_code}", ok("200"));
        fake
    }

    pub fn respond(&self, needle: &str, result: ExecResult) {
        self.respond_seq(needle, vec![result]);
    }

    pub fn respond_seq(&self, needle: &str, results: Vec<ExecResult>) {
        self.state.lock().unwrap().rules.push(Rule {
            needle: needle.to_string(),
            responses: results.into(),
        });
    }

    pub fn fail_snapshot(&self) {
        self.state.lock().unwrap().fail_snapshot = true;
    }

    pub fn fail_terminate(&self) {
        self.state.lock().unwrap().fail_terminate = true;
    }

    /// Make every exec call fail at the transport level.
    pub fn fail_exec(&self) {
        self.state.lock().unwrap().fail_exec = true;
    }

    /// Make commands containing `needle` fail at the transport level.
    pub fn drop_exec(&self, needle: &str) {
        self.state.lock().unwrap().drop_exec.push(needle.to_string());
    }

    /// The sandbox disappears on the platform side when a snapshot starts.
    pub fn vanish_on_snapshot(&self) {
        self.state.lock().unwrap().vanish_on_snapshot = true;
    }

    /// Register a live sandbox without going through `provision`.
    pub fn seed(&self, id: &str) {
        self.state.lock().unwrap().sandboxes.insert(
            id.to_string(),
            FakeSandbox {
                alive: true,
                image: ImageSource::Base("seed".into()),
                commands: Vec::new(),
            },
        );
    }

    pub fn sandbox_ids(&self) -> Vec<SandboxId> {
        self.state.lock().unwrap().sandboxes.keys().cloned().collect()
    }

    pub fn is_alive(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .get(id)
            .is_some_and(|s| s.alive)
    }

    pub fn image(&self, id: &str) -> Option<ImageSource> {
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .get(id)
            .map(|s| s.image.clone())
    }

    /// Every command run in the sandbox, space-joined, in order.
    pub fn commands(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .get(id)
            .map(|s| s.commands.iter().map(|c| c.join(" ")).collect())
            .unwrap_or_default()
    }

    /// Raw argv of every command run in the sandbox.
    pub fn argv(&self, id: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .get(id)
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    fn handle(&self, id: SandboxId) -> Box<dyn SandboxHandle> {
        Box::new(FakeHandle {
            id,
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    async fn provision(&self, spec: SandboxSpec) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let id = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("sb-{}", state.next_id);
            state.sandboxes.insert(
                id.clone(),
                FakeSandbox {
                    alive: true,
                    image: spec.image,
                    commands: Vec::new(),
                },
            );
            id
        };
        Ok(self.handle(id))
    }

    async fn attach(&self, id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        if !self.is_alive(id) {
            return Err(SandboxError::NotFound(id.to_string()));
        }
        Ok(self.handle(id.to_string()))
    }
}

struct FakeHandle {
    id: SandboxId,
    state: Arc<StdMutex<FakeState>>,
}

impl FakeHandle {
    fn require_alive(&self, state: &FakeState) -> Result<(), SandboxError> {
        match state.sandboxes.get(&self.id) {
            Some(s) if s.alive => Ok(()),
            _ => Err(SandboxError::NotFound(self.id.clone())),
        }
    }
}

#[async_trait]
impl SandboxHandle for FakeHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(&self, req: ExecRequest) -> Result<ExecResult, SandboxError> {
        let mut state = self.state.lock().unwrap();
        self.require_alive(&state)?;
        if state.fail_exec {
            return Err(SandboxError::Exec("connection reset".into()));
        }

        let joined = req.command.join(" ");
        if let Some(sb) = state.sandboxes.get_mut(&self.id) {
            sb.commands.push(req.command);
        }
        if state.drop_exec.iter().any(|n| joined.contains(n)) {
            return Err(SandboxError::Exec("connection reset".into()));
        }

        let rule = state
            .rules
            .iter_mut()
            .rev()
            .find(|r| joined.contains(&r.needle));
        let result = match rule {
            Some(rule) if rule.responses.len() > 1 => rule.responses.pop_front(),
            Some(rule) => rule.responses.front().cloned(),
            None => None,
        };
        Ok(result.unwrap_or_else(|| ok("")))
    }

    async fn expose_port(&self, port: u16) -> Result<ExposedEndpoint, SandboxError> {
        let state = self.state.lock().unwrap();
        self.require_alive(&state)?;
        Ok(ExposedEndpoint {
            port,
            url: format!("https://{}-{port}.tunnel.test", self.id),
        })
    }

    async fn snapshot_filesystem(&self) -> Result<SnapshotRef, SandboxError> {
        let mut state = self.state.lock().unwrap();
        if state.vanish_on_snapshot {
            if let Some(sb) = state.sandboxes.get_mut(&self.id) {
                sb.alive = false;
            }
        }
        self.require_alive(&state)?;
        if state.fail_snapshot {
            return Err(SandboxError::Backend("snapshot storage unavailable".into()));
        }
        state.next_id += 1;
        Ok(SnapshotRef {
            id: format!("im-{}", state.next_id),
        })
    }

    async fn terminate(&self) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        self.require_alive(&state)?;
        if state.fail_terminate {
            return Err(SandboxError::Backend("terminate rejected".into()));
        }
        if let Some(sb) = state.sandboxes.get_mut(&self.id) {
            sb.alive = false;
        }
        Ok(())
    }
}
