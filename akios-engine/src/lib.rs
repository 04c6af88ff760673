//! Sequential workflow execution: parsing, condition/template resolution,
//! kill-switches, retry policy, agent dispatch, and the runtime engine that
//! ties them into a single-pass, no-parallelism workflow run.

mod agent;
mod condition;
mod engine;
mod executor;
mod killswitch;
mod model;
mod parser;
mod retry;
mod template;

pub use agent::{Agent, AgentError, ConfigError as AgentConfigError, FilesystemAgent, LlmAgentStub, validate_config};
pub use condition::{evaluate as evaluate_condition, ConditionError};
pub use engine::{EngineError, RunStatus, RunSummary, RuntimeEngine, StepRecord};
pub use executor::{execute_step, ExecuteStepArgs, StepOutcome, StepStatus};
pub use killswitch::{extract_token_usage, CostTracker, KillSwitchError, LoopTracker, TokenAccounting, TokenUsage};
pub use model::{AgentKind, ExecutionContext, OnError, Step, Value, Workflow};
pub use parser::{parse, ParseError};
pub use retry::{execute_with_retry, policy_for, AttemptOutcome, RetryPolicy};
pub use template::{extract_output_value, remap_output_path, render, TemplateError};
