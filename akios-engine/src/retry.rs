//! Per-agent retry policy and the retry loop wrapping agent execution.

use std::time::Duration;

use rand::Rng;

use crate::agent::AgentError;
use crate::model::AgentKind;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retryable: bool,
    pub base_delay: Duration,
}

pub fn policy_for(agent: AgentKind) -> RetryPolicy {
    match agent {
        AgentKind::Llm | AgentKind::Http | AgentKind::Webhook => {
            RetryPolicy { max_attempts: 3, retryable: true, base_delay: Duration::from_millis(200) }
        }
        AgentKind::Filesystem | AgentKind::ToolExecutor | AgentKind::Database => {
            RetryPolicy { max_attempts: 1, retryable: false, base_delay: Duration::from_millis(0) }
        }
    }
}

pub struct AttemptOutcome<T> {
    pub result: Result<T, AgentError>,
    pub attempt: u32,
}

/// Runs `op` under `policy`, retrying with exponential backoff plus jitter
/// on a retryable error. Returns the final attempt's outcome either way so
/// the caller can record how many attempts a step took.
pub async fn execute_with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> AttemptOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 1;
    loop {
        let result = op().await;
        match &result {
            Ok(_) => return AttemptOutcome { result, attempt },
            Err(_) if policy.retryable && attempt < policy.max_attempts => {
                let backoff = policy.base_delay * 2u32.pow(attempt - 1);
                let jitter_ms = rand::thread_rng().gen_range(0..50);
                tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                attempt += 1;
            }
            Err(_) => return AttemptOutcome { result, attempt },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn non_retryable_agents_get_one_attempt() {
        let policy = policy_for(AgentKind::Filesystem);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.retryable);
    }

    #[test]
    fn retryable_agents_get_three_attempts() {
        let policy = policy_for(AgentKind::Llm);
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.retryable);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy { max_attempts: 3, retryable: true, base_delay: Duration::from_millis(1) };
        let calls = AtomicU32::new(0);
        let outcome = execute_with_retry(policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AgentError::Transient("not yet".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempt, 3);
    }
}
