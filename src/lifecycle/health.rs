use std::time::Duration;

use crate::sandbox::{ExecRequest, SandboxError, SandboxHandle};

/// Bounds for a readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Settle time after launching the server, before the first probe.
    pub initial_delay: Duration,
}

impl PollPolicy {
    pub const fn after_create() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(2),
            initial_delay: Duration::from_secs(5),
        }
    }

    pub const fn after_resume() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(2),
            initial_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempt: u32 },
    /// Every probe came back without a 200. Not an error: the caller decides.
    Exhausted {
        attempts: u32,
        last_status: Option<String>,
    },
}

/// Run `probe` until it prints exactly `200`, up to `policy.max_attempts` times.
///
/// A probe that fails to execute counts as one unsuccessful attempt. Only a
/// vanished sandbox (`NotFound`) ends the poll early with an error.
pub async fn wait_until_ready(
    sandbox: &dyn SandboxHandle,
    probe: &ExecRequest,
    policy: PollPolicy,
) -> Result<Readiness, SandboxError> {
    tokio::time::sleep(policy.initial_delay).await;

    let mut last_status = None;
    for attempt in 1..=policy.max_attempts {
        match sandbox.exec(probe.clone()).await {
            Ok(res) => {
                let code = res.stdout.trim();
                if code == "200" {
                    tracing::info!(sandbox_id = %sandbox.id(), attempt, "server is ready");
                    return Ok(Readiness::Ready { attempt });
                }
                tracing::debug!(
                    sandbox_id = %sandbox.id(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    status = %code,
                    "health check not ready, retrying"
                );
                last_status = Some(code.to_string());
            }
            Err(e @ SandboxError::NotFound(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(sandbox_id = %sandbox.id(), attempt, error = %e, "health check failed to run");
                last_status = None;
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Ok(Readiness::Exhausted {
        attempts: policy.max_attempts,
        last_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::{fail, ok, FakeProvider};
    use crate::sandbox::SandboxProvider;
    use crate::lifecycle::scripts;

    fn instant(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            max_attempts,
            interval: Duration::ZERO,
            initial_delay: Duration::ZERO,
        }
    }

    fn probe_count(fake: &FakeProvider, id: &str) -> usize {
        fake.commands(id)
            .iter()
            .filter(|c| c.contains("%{http_code}"))
            .count()
    }

    #[test]
    fn policies_differ_only_in_settle_delay() {
        let create = PollPolicy::after_create();
        let resume = PollPolicy::after_resume();
        assert_eq!(create.max_attempts, resume.max_attempts);
        assert_eq!(create.interval, resume.interval);
        assert!(create.initial_delay > resume.initial_delay);
    }

    #[tokio::test]
    async fn ready_on_first_attempt() {
        let fake = FakeProvider::new();
        fake.seed("sb-a");
        let sb = fake.attach("sb-a").await.unwrap();

        let outcome = wait_until_ready(sb.as_ref(), &scripts::health_probe(), instant(5))
            .await
            .unwrap();

        assert_eq!(outcome, Readiness::Ready { attempt: 1 });
        assert_eq!(probe_count(&fake, "sb-a"), 1);
    }

    #[tokio::test]
    async fn exhausts_after_exactly_max_attempts() {
        let fake = FakeProvider::new();
        fake.seed("sb-a");
        fake.respond("%{http_code}", ok("503"));
        let sb = fake.attach("sb-a").await.unwrap();

        let outcome = wait_until_ready(sb.as_ref(), &scripts::health_probe(), instant(7))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Readiness::Exhausted {
                attempts: 7,
                last_status: Some("503".into())
            }
        );
        assert_eq!(probe_count(&fake, "sb-a"), 7);
    }

    #[tokio::test]
    async fn becomes_ready_after_retries() {
        let fake = FakeProvider::new();
        fake.seed("sb-a");
        fake.respond_seq(
            "%{http_code}",
            vec![ok("000"), fail(7, "connection refused"), ok("200\n")],
        );
        let sb = fake.attach("sb-a").await.unwrap();

        let outcome = wait_until_ready(sb.as_ref(), &scripts::health_probe(), instant(30))
            .await
            .unwrap();

        assert_eq!(outcome, Readiness::Ready { attempt: 3 });
    }

    #[tokio::test]
    async fn status_must_match_exactly() {
        let fake = FakeProvider::new();
        fake.seed("sb-a");
        fake.respond("%{http_code}", ok("2000"));
        let sb = fake.attach("sb-a").await.unwrap();

        let outcome = wait_until_ready(sb.as_ref(), &scripts::health_probe(), instant(2))
            .await
            .unwrap();

        assert!(matches!(outcome, Readiness::Exhausted { .. }));
    }

    #[tokio::test]
    async fn transport_errors_count_as_attempts() {
        let fake = FakeProvider::new();
        fake.seed("sb-a");
        fake.fail_exec();
        let sb = fake.attach("sb-a").await.unwrap();

        let outcome = wait_until_ready(sb.as_ref(), &scripts::health_probe(), instant(3))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Readiness::Exhausted {
                attempts: 3,
                last_status: None
            }
        );
    }

    #[tokio::test]
    async fn vanished_sandbox_aborts_poll() {
        let fake = FakeProvider::new();
        fake.seed("sb-a");
        let sb = fake.attach("sb-a").await.unwrap();
        sb.terminate().await.unwrap();

        let err = wait_until_ready(sb.as_ref(), &scripts::health_probe(), instant(3))
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::NotFound(_)));
    }
}
