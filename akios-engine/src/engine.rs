//! Runtime engine: the sequential workflow lifecycle.
//!
//! Ported from `RuntimeEngine._execute_workflow`/`_execute_workflow_steps`,
//! generalizing the original's method-per-phase structure into explicit
//! functions over an `EngineState` rather than a process-global engine
//! singleton — the ledger is the one legitimate process-level handle,
//! constructed once by the caller and passed in by reference.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use akios_audit::{AuditLedger, NewEvent, StepResult as AuditStepResult};
use akios_config::{CageState, Config};
use akios_sandbox::{AgentProfile, ResourceSandbox, SandboxMode, SyscallInterceptor};
use chrono::Utc;
use thiserror::Error;

use crate::agent::{
    validate_config, Agent, DatabaseAgentStub, FilesystemAgent, HttpAgentStub, LlmAgentStub,
    ToolExecutorAgentStub, WebhookAgentStub,
};
use crate::executor::{execute_step, should_run, skipped_outcome, ExecuteStepArgs, StepStatus};
use crate::killswitch::{CostTracker, KillSwitchError, LoopTracker};
use crate::model::{AgentKind, ExecutionContext, Value, Workflow};
use crate::parser::{self, ParseError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    KillSwitch(#[from] KillSwitchError),
    #[error("ledger error: {0}")]
    Ledger(#[from] akios_audit::LedgerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sandbox(#[from] akios_sandbox::SandboxError),
    #[error("step {step} config invalid: {reason}")]
    InvalidStepConfig { step: u32, reason: String },
    #[error("step {step} failed: {reason}")]
    StepFailed { step: u32, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    /// A cost or loop kill-switch fired. Mapped by the CLI to exit 137
    /// (spec's kill-switch exit code) rather than the generic failure exit.
    Killed,
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step_id: u32,
    pub status: StepStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub workflow_id: String,
    pub status: RunStatus,
    pub step_records: Vec<StepRecord>,
    pub total_cost_usd: f64,
}

pub struct RuntimeEngine<'a> {
    pub ledger: &'a AuditLedger,
    pub config: &'a Config,
    pub cage: &'a CageState,
    pub data_root: PathBuf,
    pub max_steps: u32,
    pub max_duration: Duration,
}

impl<'a> RuntimeEngine<'a> {
    pub async fn run_yaml(&self, yaml: &str) -> Result<RunSummary, EngineError> {
        let workflow = parser::parse(yaml)?;
        self.run(&workflow).await
    }

    /// Validates structure, runs steps in order, and writes the terminal
    /// audit event either way. Kill-switch and step errors both end the
    /// run as `Failed` rather than propagating, so the caller always gets
    /// a `RunSummary` describing what happened up to that point.
    pub async fn run(&self, workflow: &Workflow) -> Result<RunSummary, EngineError> {
        let workflow_id = format!("{}_{}", workflow.name, Utc::now().timestamp());
        self.prepare_directories(&workflow_id)?;

        let mut start_metadata = BTreeMap::new();
        if self.cage.sandbox_enabled {
            let sandbox = ResourceSandbox::enforce_limits(
                self.config.cpu_limit,
                self.config.memory_limit_mb * 1024 * 1024,
                self.config.max_open_files,
            );
            start_metadata.insert("resource_sandbox_mode".to_string(), serde_json::Value::String(format!("{:?}", sandbox.mode)));
        }
        self.ledger.append(NewEvent {
            workflow_id: workflow_id.clone(),
            step: 0,
            agent: "engine".into(),
            action: "workflow_start".into(),
            result: AuditStepResult::Success,
            metadata: start_metadata,
        })?;

        let mut ctx = ExecutionContext::new();
        let mut cost_tracker = CostTracker::new();
        let mut loop_tracker = LoopTracker::new(self.max_steps, self.max_duration);
        let mut records = Vec::new();

        let run_result = self.run_steps(workflow, &workflow_id, &mut ctx, &mut cost_tracker, &mut loop_tracker, &mut records).await;

        match run_result {
            Ok(()) => {
                self.ledger.append(NewEvent {
                    workflow_id: workflow_id.clone(),
                    step: workflow.steps.len() as u32,
                    agent: "engine".into(),
                    action: "workflow_complete".into(),
                    result: AuditStepResult::Success,
                    metadata: BTreeMap::new(),
                })?;
                self.write_output(&workflow_id, &records)?;
                self.ledger.flush()?;
                Ok(RunSummary { workflow_id, status: RunStatus::Completed, step_records: records, total_cost_usd: cost_tracker.total_cost_usd() })
            }
            Err(e) => {
                let status = if matches!(e, EngineError::KillSwitch(_)) { RunStatus::Killed } else { RunStatus::Failed };
                let mut metadata = BTreeMap::new();
                metadata.insert("error".to_string(), serde_json::Value::String(e.to_string()));
                self.ledger.append(NewEvent {
                    workflow_id: workflow_id.clone(),
                    step: records.len() as u32,
                    agent: "engine".into(),
                    action: "workflow_failed".into(),
                    result: AuditStepResult::Error,
                    metadata,
                })?;
                self.write_output(&workflow_id, &records)?;
                self.ledger.flush()?;
                Ok(RunSummary { workflow_id, status, step_records: records, total_cost_usd: cost_tracker.total_cost_usd() })
            }
        }
    }

    async fn run_steps(
        &self,
        workflow: &Workflow,
        workflow_id: &str,
        ctx: &mut ExecutionContext,
        cost_tracker: &mut CostTracker,
        loop_tracker: &mut LoopTracker,
        records: &mut Vec<StepRecord>,
    ) -> Result<(), EngineError> {
        for step in &workflow.steps {
            loop_tracker.record_step();
            loop_tracker.check()?;
            cost_tracker.check(self.config.budget_limit_per_run)?;

            // A step's condition gates whether it runs at all, so it must be
            // checked before config validation and sandbox policy: a step
            // that will be skipped shouldn't hard-fail the workflow over an
            // invalid config it never needed.
            let outcome = if !should_run(step, ctx) {
                skipped_outcome()
            } else {
                validate_config(
                    step.agent,
                    &step.config,
                    &[],
                    &[],
                    &self.config.allowed_domains,
                    &self.config.allowed_commands,
                    self.cage.network_locked,
                )
                .map_err(|e| EngineError::InvalidStepConfig { step: step.step_id, reason: e.to_string() })?;

                if self.cage.sandbox_enabled {
                    let interceptor = SyscallInterceptor::new();
                    let mode = interceptor.apply_policy(agent_profile(step.agent), self.cage.posture() == akios_config::CagePosture::Active)?;
                    if mode == SandboxMode::PolicyBased {
                        tracing::warn!(step = step.step_id, "syscall sandbox running in policy-based mode");
                    }
                }

                let agent = self.build_agent(step.agent, &step.config);
                execute_step(ExecuteStepArgs {
                    step,
                    ctx,
                    workflow_id,
                    agent: agent.as_ref(),
                    pii_enabled: self.cage.pii_redaction,
                    redaction_strategy: self.config.redaction_strategy,
                })
                .await
            };

            let audit_result = match outcome.status {
                StepStatus::Success => AuditStepResult::Success,
                StepStatus::Warning | StepStatus::Skipped => AuditStepResult::Warning,
                StepStatus::Error => AuditStepResult::Error,
            };
            let mut metadata = BTreeMap::new();
            metadata.insert("attempts".to_string(), serde_json::Value::from(outcome.attempts));
            if let Some(err) = &outcome.error {
                metadata.insert("error".to_string(), serde_json::Value::String(err.clone()));
            }
            self.ledger.append(NewEvent {
                workflow_id: workflow_id.to_string(),
                step: step.step_id,
                agent: format!("{:?}", step.agent),
                action: step.action.clone(),
                result: audit_result,
                metadata,
            })?;

            let output_display = outcome.output.as_ref().map(crate::template::extract_output_value);
            records.push(StepRecord {
                step_id: step.step_id,
                status: outcome.status,
                output: output_display,
                error: outcome.error.clone(),
                attempts: outcome.attempts,
            });

            if outcome.status == StepStatus::Error {
                return Err(EngineError::StepFailed {
                    step: step.step_id,
                    reason: outcome.error.unwrap_or_else(|| "step failed".to_string()),
                });
            }

            cost_tracker.record(outcome.cost_usd, None);
            cost_tracker.check(self.config.budget_limit_per_run)?;
            ctx.commit(step.step_id, outcome.output.unwrap_or(Value::Null));
        }
        Ok(())
    }

    fn build_agent(&self, kind: AgentKind, config: &BTreeMap<String, Value>) -> Box<dyn Agent> {
        match kind {
            AgentKind::Llm => {
                let model = config.get("model").and_then(|v| v.as_str()).unwrap_or("mock-model").to_string();
                Box::new(LlmAgentStub { model })
            }
            AgentKind::Filesystem => {
                let allowed_paths = match config.get("allowed_paths") {
                    Some(Value::List(items)) => items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
                    _ => Vec::new(),
                };
                let read_only = matches!(config.get("read_only"), Some(Value::Bool(true)));
                Box::new(FilesystemAgent::new(allowed_paths, read_only))
            }
            AgentKind::Http => Box::new(HttpAgentStub),
            AgentKind::ToolExecutor => Box::new(ToolExecutorAgentStub),
            AgentKind::Webhook => Box::new(WebhookAgentStub),
            AgentKind::Database => Box::new(DatabaseAgentStub),
        }
    }

    fn prepare_directories(&self, workflow_id: &str) -> Result<(), EngineError> {
        std::fs::create_dir_all(self.data_root.join("audit"))?;
        std::fs::create_dir_all(self.data_root.join(format!("data/output/run_{workflow_id}")))?;
        std::fs::create_dir_all(self.data_root.join("data/input"))?;
        Ok(())
    }

    fn write_output(&self, workflow_id: &str, records: &[StepRecord]) -> Result<(), EngineError> {
        let path = self.data_root.join(format!("data/output/run_{workflow_id}/output.json"));
        let summary: Vec<_> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "step_id": r.step_id,
                    "status": format!("{:?}", r.status),
                    "output": r.output,
                    "error": r.error,
                    "attempts": r.attempts,
                })
            })
            .collect();
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        Ok(())
    }
}

fn agent_profile(kind: AgentKind) -> AgentProfile {
    match kind {
        AgentKind::Llm => AgentProfile::Llm,
        AgentKind::Filesystem => AgentProfile::Filesystem,
        AgentKind::Http => AgentProfile::Http,
        AgentKind::ToolExecutor => AgentProfile::ToolExecutor,
        AgentKind::Webhook => AgentProfile::Webhook,
        AgentKind::Database => AgentProfile::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use akios_audit::LedgerConfig;
    use akios_config::RedactionStrategy;

    #[tokio::test]
    async fn runs_minimal_workflow_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AuditLedger::open(dir.path().join("audit"), LedgerConfig::default()).unwrap();
        let config = Config { redaction_strategy: RedactionStrategy::Mask, ..Config::default() };
        let cage = CageState::relaxed();

        let engine = RuntimeEngine {
            ledger: &ledger,
            config: &config,
            cage: &cage,
            data_root: dir.path().to_path_buf(),
            max_steps: 50,
            max_duration: Duration::from_secs(30),
        };

        let yaml = r#"
name: demo
steps:
  - step_id: 0
    agent: llm
    action: generate
    parameters:
      prompt: "hello"
"#;
        let summary = engine.run_yaml(yaml).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.step_records.len(), 1);
    }

    #[tokio::test]
    async fn failing_step_marks_run_failed_without_losing_prior_records() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AuditLedger::open(dir.path().join("audit"), LedgerConfig::default()).unwrap();
        let config = Config::default();
        let cage = CageState::relaxed();

        let engine = RuntimeEngine {
            ledger: &ledger,
            config: &config,
            cage: &cage,
            data_root: dir.path().to_path_buf(),
            max_steps: 50,
            max_duration: Duration::from_secs(30),
        };

        let yaml = r#"
name: demo
steps:
  - step_id: 0
    agent: llm
    action: generate
    parameters: {}
  - step_id: 1
    agent: filesystem
    action: read
    parameters:
      path: "/etc/shadow"
    config:
      allowed_paths: ["/tmp"]
"#;
        let summary = engine.run_yaml(yaml).await.unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.step_records.len(), 2);
        assert_eq!(summary.step_records[1].status, StepStatus::Error);
    }
}
