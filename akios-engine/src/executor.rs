//! Step executor: resolves a step's condition, config, and parameters,
//! redacts PII at both the request and response boundary, runs the agent
//! under its retry policy, and classifies the outcome.

use std::collections::BTreeMap;

use akios_config::RedactionStrategy as ConfigRedactionStrategy;
use akios_pii::{redact, RedactionStrategy as PiiStrategy};

use crate::agent::{Agent, AgentError};
use crate::condition::evaluate as evaluate_condition;
use crate::killswitch::extract_token_usage;
use crate::model::{ExecutionContext, OnError, Step, Value};
use crate::retry::{execute_with_retry, policy_for};
use crate::template::{extract_output_value, render};

/// Patterns that, if present in an error message, reclassify it as fatal
/// regardless of the step's `on_error` policy.
const SECURITY_VIOLATION_PATTERNS: &[&str] = &[
    "quota", "limit", "security", "not in allowed list", "command blocked", "access denied",
    "permission denied", "unauthorized",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Error,
    Warning,
    Skipped,
}

pub struct StepOutcome {
    pub status: StepStatus,
    pub output: Option<Value>,
    pub cost_usd: f64,
    pub error: Option<String>,
    pub attempts: u32,
}

fn to_config_strategy(strategy: ConfigRedactionStrategy) -> PiiStrategy {
    match strategy {
        ConfigRedactionStrategy::Mask => PiiStrategy::Mask,
        ConfigRedactionStrategy::Hash => PiiStrategy::Hash,
        ConfigRedactionStrategy::Remove => PiiStrategy::Remove,
    }
}

fn redact_params(params: &BTreeMap<String, Value>, strategy: PiiStrategy) -> BTreeMap<String, Value> {
    params
        .iter()
        .map(|(k, v)| {
            let redacted = match v {
                Value::String(s) => Value::String(redact(s, strategy)),
                other => other.clone(),
            };
            (k.clone(), redacted)
        })
        .collect()
}

fn redact_result(result: &BTreeMap<String, Value>, strategy: PiiStrategy) -> BTreeMap<String, Value> {
    redact_params(result, strategy)
}

fn classify_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    SECURITY_VIOLATION_PATTERNS.iter().any(|p| lower.contains(p))
}

pub struct ExecuteStepArgs<'a> {
    pub step: &'a Step,
    pub ctx: &'a ExecutionContext,
    pub workflow_id: &'a str,
    pub agent: &'a dyn Agent,
    pub pii_enabled: bool,
    pub redaction_strategy: ConfigRedactionStrategy,
}

/// Evaluates a step's `condition` against the current context. `true` when
/// there is no condition, or the condition evaluates truthy. Checked by the
/// runtime engine *before* config validation and sandbox policy, so a
/// to-be-skipped step's invalid config doesn't fail the whole workflow.
pub fn should_run(step: &Step, ctx: &ExecutionContext) -> bool {
    match &step.condition {
        Some(condition) => evaluate_condition(condition, &build_condition_namespace(ctx, step.step_id)),
        None => true,
    }
}

pub fn skipped_outcome() -> StepOutcome {
    StepOutcome { status: StepStatus::Skipped, output: None, cost_usd: 0.0, error: None, attempts: 0 }
}

pub async fn execute_step(args: ExecuteStepArgs<'_>) -> StepOutcome {
    let ExecuteStepArgs { step, ctx, workflow_id: _workflow_id, agent, pii_enabled, redaction_strategy } = args;

    if !should_run(step, ctx) {
        return skipped_outcome();
    }

    let previous = ctx.previous(step.step_id).map(|v| extract_output_value(v));
    let mut step_outputs = BTreeMap::new();
    for i in 0..step.step_id {
        if let Some(v) = ctx.get(i) {
            step_outputs.insert(i, extract_output_value(v));
        }
    }

    let mut resolved_params = step.parameters.clone();
    for (_, v) in resolved_params.iter_mut() {
        if let Value::String(s) = v {
            match render(s, previous.as_deref(), &step_outputs) {
                Ok(rendered) => *s = rendered,
                Err(e) => {
                    return StepOutcome {
                        status: StepStatus::Error,
                        output: None,
                        cost_usd: 0.0,
                        error: Some(e.to_string()),
                        attempts: 0,
                    }
                }
            }
        }
    }

    let pii_strategy = to_config_strategy(redaction_strategy);
    let request_params = if pii_enabled { redact_params(&resolved_params, pii_strategy) } else { resolved_params };

    let policy = policy_for(step.agent);

    // `on_error: retry` is a step-level policy distinct from the agent-kind
    // retry policy above (which covers transient errors within one agent
    // call): it re-executes the whole step once more before falling back to
    // fail semantics. A security violation never benefits from a retry.
    let step_runs = if step.on_error == OnError::Retry { 2 } else { 1 };
    let mut total_attempts = 0u32;

    for step_run in 1..=step_runs {
        let outcome = execute_with_retry(policy, || {
            let agent = agent;
            let action = step.action.clone();
            let params = request_params.clone();
            async move { agent.execute(&action, &params).await }
        })
        .await;
        total_attempts += outcome.attempt;

        match outcome.result {
            Ok(mut result) => {
                if pii_enabled {
                    result = redact_result(&result, pii_strategy);
                }
                let cost_usd = extract_cost(&result);
                return StepOutcome {
                    status: StepStatus::Success,
                    output: Some(Value::Map(result)),
                    cost_usd,
                    error: None,
                    attempts: total_attempts,
                };
            }
            Err(err) => {
                let (message, is_violation) = match &err {
                    AgentError::SecurityViolation(m) => (m.clone(), true),
                    AgentError::Fatal(m) => (m.clone(), classify_error(m)),
                    AgentError::Transient(m) => (m.clone(), classify_error(m)),
                };
                if step.on_error == OnError::Retry && !is_violation && step_run < step_runs {
                    continue;
                }
                let status = if is_violation || step.on_error == OnError::Fail {
                    StepStatus::Error
                } else if step.on_error == OnError::Skip {
                    StepStatus::Warning
                } else {
                    // Retry exhausted its one re-run; falls back to fail semantics.
                    StepStatus::Error
                };
                return StepOutcome { status, output: None, cost_usd: 0.0, error: Some(message), attempts: total_attempts };
            }
        }
    }
    unreachable!("loop always returns on its final iteration")
}

fn extract_cost(result: &BTreeMap<String, Value>) -> f64 {
    if let Some(cost) = result.get("cost_incurred").and_then(|v| v.as_f64()) {
        return cost;
    }
    // Fall back to a rough per-token cost estimate when the agent didn't
    // report one directly but did report usage.
    extract_token_usage(result)
        .map(|usage| (usage.prompt_tokens + usage.completion_tokens) as f64 * 0.000002)
        .unwrap_or(0.0)
}

fn build_condition_namespace(ctx: &ExecutionContext, current_step_id: u32) -> BTreeMap<String, Value> {
    let mut namespace = BTreeMap::new();
    for (key, value) in ctx.iter() {
        if let Some(n) = key.strip_prefix("step_").and_then(|s| s.strip_suffix("_result")) {
            namespace.insert(format!("step_{n}_output"), value.clone());
        }
    }
    if let Some(prev) = ctx.previous(current_step_id) {
        namespace.insert("previous_output".to_string(), prev.clone());
    }
    namespace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::HttpAgentStub;
    use crate::model::AgentKind;

    fn step(condition: Option<&str>) -> Step {
        Step {
            step_id: 1,
            agent: AgentKind::Http,
            action: "get".to_string(),
            parameters: BTreeMap::new(),
            config: BTreeMap::new(),
            condition: condition.map(String::from),
            on_error: OnError::Fail,
        }
    }

    #[tokio::test]
    async fn skips_step_when_condition_is_false() {
        let ctx = ExecutionContext::new();
        let agent = HttpAgentStub;
        let step = step(Some("1 == 2"));
        let outcome = execute_step(ExecuteStepArgs {
            step: &step,
            ctx: &ctx,
            workflow_id: "wf",
            agent: &agent,
            pii_enabled: false,
            redaction_strategy: ConfigRedactionStrategy::Mask,
        })
        .await;
        assert_eq!(outcome.status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn runs_step_when_no_condition() {
        let ctx = ExecutionContext::new();
        let agent = HttpAgentStub;
        let step = step(None);
        let outcome = execute_step(ExecuteStepArgs {
            step: &step,
            ctx: &ctx,
            workflow_id: "wf",
            agent: &agent,
            pii_enabled: false,
            redaction_strategy: ConfigRedactionStrategy::Mask,
        })
        .await;
        assert_eq!(outcome.status, StepStatus::Success);
    }
}
