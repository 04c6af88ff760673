//! Workflow data model: the `Value` sum type, `Workflow`/`Step`, and the
//! write-once `ExecutionContext` keyed by `step_{N}_result`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders a value the way template substitution / condition display
    /// wants: strings unquoted, everything else via its JSON form.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            other => serde_json::to_string(&other.to_json()).unwrap_or_default(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(v: serde_json::Value) -> Self {
        serde_json::from_value(v).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Llm,
    Filesystem,
    Http,
    ToolExecutor,
    Webhook,
    Database,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Fail,
    Skip,
    Retry,
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Fail
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Step {
    pub step_id: u32,
    pub agent: AgentKind,
    pub action: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub on_error: OnError,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<Step>,
}

/// Write-once map keyed by `step_{N}_result`. Inserting an already-present
/// key is a logic error: the engine is the sole writer and steps commit in
/// order, so a duplicate key means a bug in the engine loop, not a
/// recoverable runtime condition.
#[derive(Debug, Default, Clone)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&mut self, step_id: u32, result: Value) {
        let key = format!("step_{step_id}_result");
        debug_assert!(!self.entries.contains_key(&key), "step {step_id} committed twice");
        self.entries.insert(key, result);
    }

    pub fn get(&self, step_id: u32) -> Option<&Value> {
        self.entries.get(&format!("step_{step_id}_result"))
    }

    pub fn previous(&self, current_step_id: u32) -> Option<&Value> {
        if current_step_id == 0 {
            return None;
        }
        self.get(current_step_id - 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_resolves_prior_step() {
        let mut ctx = ExecutionContext::new();
        ctx.commit(0, Value::String("hello".into()));
        assert_eq!(ctx.previous(1), Some(&Value::String("hello".into())));
    }

    #[test]
    fn previous_is_none_for_first_step() {
        let ctx = ExecutionContext::new();
        assert!(ctx.previous(0).is_none());
    }
}
