//! Cost and loop kill-switches, checked before and after every step.
//!
//! Ported from `RuntimeEngine._check_execution_limits`: cost kill, then
//! loop kill, then global timeout, each raising a fatal error rather than
//! degrading.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::model::Value;

#[derive(Debug, Error)]
pub enum KillSwitchError {
    #[error("COST KILL-SWITCH ENFORCED: spent ${spent:.4} of ${budget:.4} budget")]
    CostExceeded { spent: f64, budget: f64 },
    #[error("LOOP KILL-SWITCH ENFORCED: {steps} steps exceeds max {max_steps}")]
    StepLimitExceeded { steps: u32, max_steps: u32 },
    #[error("GLOBAL TIMEOUT ENFORCED: execution exceeded {limit:?}")]
    TimeoutExceeded { limit: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAccounting {
    Measured,
    Estimated,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub accounting: TokenAccounting,
}

/// Probes a step result for token counts in preference order: explicit
/// `prompt_tokens`/`completion_tokens`, then nested `usage.*`, then a
/// 30/70 estimated split of `tokens_used`.
pub fn extract_token_usage(result: &BTreeMap<String, Value>) -> Option<TokenUsage> {
    if let (Some(p), Some(c)) = (result.get("prompt_tokens"), result.get("completion_tokens")) {
        if let (Some(p), Some(c)) = (p.as_f64(), c.as_f64()) {
            return Some(TokenUsage { prompt_tokens: p as u64, completion_tokens: c as u64, accounting: TokenAccounting::Measured });
        }
    }
    if let Some(usage) = result.get("usage").and_then(|v| v.as_map()) {
        if let (Some(p), Some(c)) = (usage.get("prompt_tokens"), usage.get("completion_tokens")) {
            if let (Some(p), Some(c)) = (p.as_f64(), c.as_f64()) {
                return Some(TokenUsage { prompt_tokens: p as u64, completion_tokens: c as u64, accounting: TokenAccounting::Measured });
            }
        }
    }
    if let Some(total) = result.get("tokens_used").and_then(|v| v.as_f64()) {
        let prompt = (total * 0.3).round() as u64;
        let completion = (total * 0.7).round() as u64;
        return Some(TokenUsage { prompt_tokens: prompt, completion_tokens: completion, accounting: TokenAccounting::Estimated });
    }
    None
}

pub struct CostTracker {
    total_cost_usd: f64,
    total_prompt_tokens: u64,
    total_completion_tokens: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self { total_cost_usd: 0.0, total_prompt_tokens: 0, total_completion_tokens: 0 }
    }

    pub fn record(&mut self, cost_usd: f64, usage: Option<TokenUsage>) {
        self.total_cost_usd += cost_usd;
        if let Some(usage) = usage {
            self.total_prompt_tokens += usage.prompt_tokens;
            self.total_completion_tokens += usage.completion_tokens;
        }
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_usd
    }

    pub fn check(&self, budget_usd: f64) -> Result<(), KillSwitchError> {
        if self.total_cost_usd >= budget_usd {
            Err(KillSwitchError::CostExceeded { spent: self.total_cost_usd, budget: budget_usd })
        } else {
            Ok(())
        }
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoopTracker {
    step_count: u32,
    started_at: Instant,
    max_steps: u32,
    max_duration: Duration,
}

impl LoopTracker {
    pub fn new(max_steps: u32, max_duration: Duration) -> Self {
        Self { step_count: 0, started_at: Instant::now(), max_steps, max_duration }
    }

    pub fn record_step(&mut self) {
        self.step_count += 1;
    }

    pub fn check(&self) -> Result<(), KillSwitchError> {
        if self.step_count > self.max_steps {
            return Err(KillSwitchError::StepLimitExceeded { steps: self.step_count, max_steps: self.max_steps });
        }
        if self.started_at.elapsed() > self.max_duration {
            return Err(KillSwitchError::TimeoutExceeded { limit: self.max_duration });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_tracker_kills_at_budget() {
        let mut tracker = CostTracker::new();
        tracker.record(4.0, None);
        assert!(tracker.check(5.0).is_ok());
        tracker.record(1.5, None);
        assert!(tracker.check(5.0).is_err());
    }

    #[test]
    fn loop_tracker_kills_past_max_steps() {
        let mut tracker = LoopTracker::new(2, Duration::from_secs(60));
        tracker.record_step();
        tracker.record_step();
        assert!(tracker.check().is_ok());
        tracker.record_step();
        assert!(tracker.check().is_err());
    }

    #[test]
    fn token_usage_falls_back_to_estimated_split() {
        let mut result = BTreeMap::new();
        result.insert("tokens_used".to_string(), Value::Int(100));
        let usage = extract_token_usage(&result).unwrap();
        assert_eq!(usage.accounting, TokenAccounting::Estimated);
        assert_eq!(usage.prompt_tokens, 30);
        assert_eq!(usage.completion_tokens, 70);
    }
}
