//! Agent dispatch: a tagged `AgentKind` + `Agent` trait (generalizing the
//! original's `BaseAgent` inheritance hierarchy into a Rust trait object),
//! per-kind config validation, and the one real I/O implementation
//! (`filesystem`) plus typed stubs for the rest.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{AgentKind, Value};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transient agent error: {0}")]
    Transient(String),
    #[error("fatal agent error: {0}")]
    Fatal(String),
    #[error("security violation: {0}")]
    SecurityViolation(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {agent} config: {reason}")]
    Invalid { agent: &'static str, reason: String },
}

#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(&self, action: &str, params: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, AgentError>;
}

fn get_str<'a>(m: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a str> {
    m.get(key).and_then(|v| v.as_str())
}

fn get_f64(m: &BTreeMap<String, Value>, key: &str) -> Option<f64> {
    m.get(key).and_then(|v| v.as_f64())
}

const ROOT_DIRS: &[&str] = &["/", "/etc", "/usr", "/var", "/home", "/root"];
const SHELL_METACHARACTERS: &[&str] = &[";", "&&", "|", "`", "$(", "../"];

/// Validates a step's `config` for `agent`, per the table in spec §4.9.
pub fn validate_config(
    agent: AgentKind,
    config: &BTreeMap<String, Value>,
    allowed_providers: &[String],
    allowed_models: &[String],
    allowed_domains: &[String],
    allowed_commands: &[String],
    network_locked: bool,
) -> Result<(), ConfigError> {
    match agent {
        AgentKind::Llm => {
            let provider = get_str(config, "provider")
                .ok_or_else(|| ConfigError::Invalid { agent: "llm", reason: "missing provider".into() })?;
            if !allowed_providers.is_empty() && !allowed_providers.iter().any(|p| p == provider) {
                return Err(ConfigError::Invalid { agent: "llm", reason: format!("provider '{provider}' not allowed") });
            }
            let model = get_str(config, "model")
                .ok_or_else(|| ConfigError::Invalid { agent: "llm", reason: "missing model".into() })?;
            if !allowed_models.is_empty() && !allowed_models.iter().any(|m| m == model) {
                return Err(ConfigError::Invalid { agent: "llm", reason: format!("model '{model}' not allowed") });
            }
            Ok(())
        }
        AgentKind::Filesystem => {
            let Some(Value::List(paths)) = config.get("allowed_paths") else {
                return Err(ConfigError::Invalid { agent: "filesystem", reason: "missing allowed_paths".into() });
            };
            for path in paths {
                if let Some(p) = path.as_str() {
                    if ROOT_DIRS.contains(&p) {
                        return Err(ConfigError::Invalid { agent: "filesystem", reason: format!("'{p}' is not an allowed path") });
                    }
                }
            }
            Ok(())
        }
        AgentKind::Http => {
            let timeout = get_f64(config, "timeout").unwrap_or(30.0);
            if timeout > 300.0 {
                return Err(ConfigError::Invalid { agent: "http", reason: "timeout exceeds 300s".into() });
            }
            let max_redirects = get_f64(config, "max_redirects").unwrap_or(0.0);
            if max_redirects > 10.0 {
                return Err(ConfigError::Invalid { agent: "http", reason: "max_redirects exceeds 10".into() });
            }
            if let Some(url) = get_str(config, "url") {
                if network_locked && !url.starts_with("https://") {
                    return Err(ConfigError::Invalid { agent: "http", reason: "non-https url while cage is active".into() });
                }
                if !allowed_domains.is_empty() {
                    let host = url.split("://").nth(1).and_then(|rest| rest.split('/').next()).unwrap_or("");
                    if !allowed_domains.iter().any(|d| host.ends_with(d.as_str())) {
                        return Err(ConfigError::Invalid { agent: "http", reason: format!("host '{host}' not in allowed_domains") });
                    }
                }
            }
            Ok(())
        }
        AgentKind::ToolExecutor => {
            let Some(Value::List(step_commands)) = config.get("allowed_commands") else {
                return Err(ConfigError::Invalid { agent: "tool_executor", reason: "missing allowed_commands".into() });
            };
            let step_commands: std::collections::HashSet<&str> =
                step_commands.iter().filter_map(|v| v.as_str()).collect();
            if !allowed_commands.is_empty() {
                let global: std::collections::HashSet<&str> = allowed_commands.iter().map(String::as_str).collect();
                if !step_commands.is_subset(&global) {
                    return Err(ConfigError::Invalid { agent: "tool_executor", reason: "allowed_commands is not a subset of the cage's allowed commands".into() });
                }
            }
            let timeout = get_f64(config, "timeout").unwrap_or(30.0);
            if timeout > 300.0 {
                return Err(ConfigError::Invalid { agent: "tool_executor", reason: "timeout exceeds 300s".into() });
            }
            for (_, v) in config.iter() {
                if let Some(s) = v.as_str() {
                    if SHELL_METACHARACTERS.iter().any(|m| s.contains(m)) {
                        return Err(ConfigError::Invalid { agent: "tool_executor", reason: "command blocked: shell metacharacter or path traversal detected".into() });
                    }
                }
            }
            Ok(())
        }
        AgentKind::Webhook => {
            let timeout = get_f64(config, "timeout").unwrap_or(10.0);
            if timeout > 30.0 {
                return Err(ConfigError::Invalid { agent: "webhook", reason: "timeout exceeds 30s".into() });
            }
            let platform = get_str(config, "platform").unwrap_or("generic");
            if !["slack", "discord", "teams", "generic"].contains(&platform) {
                return Err(ConfigError::Invalid { agent: "webhook", reason: format!("unknown platform '{platform}'") });
            }
            if let Some(url) = get_str(config, "url") {
                if network_locked && !url.starts_with("https://") {
                    return Err(ConfigError::Invalid { agent: "webhook", reason: "non-https url while cage is active".into() });
                }
            }
            Ok(())
        }
        AgentKind::Database => {
            let timeout = get_f64(config, "timeout").unwrap_or(10.0);
            if timeout > 60.0 {
                return Err(ConfigError::Invalid { agent: "database", reason: "timeout exceeds 60s".into() });
            }
            let max_rows = get_f64(config, "max_rows").unwrap_or(100.0);
            if max_rows > 10_000.0 {
                return Err(ConfigError::Invalid { agent: "database", reason: "max_rows exceeds 10000".into() });
            }
            if let Some(query) = get_str(config, "query") {
                let upper = query.to_uppercase();
                const DDL: &[&str] = &["CREATE ", "DROP ", "ALTER ", "TRUNCATE "];
                if DDL.iter().any(|kw| upper.contains(kw)) {
                    return Err(ConfigError::Invalid { agent: "database", reason: "DDL statements are always rejected".into() });
                }
                const DML: &[&str] = &["INSERT ", "UPDATE ", "DELETE "];
                let allow_write = matches!(config.get("allow_write"), Some(Value::Bool(true)));
                if DML.iter().any(|kw| upper.contains(kw)) && !allow_write {
                    return Err(ConfigError::Invalid { agent: "database", reason: "write query requires allow_write".into() });
                }
            }
            Ok(())
        }
    }
}

/// Reads/writes files under a validated `allowed_paths` set. This is the
/// one agent with genuine I/O; the rest are represented by typed stubs
/// since their real collaborators (LLM SDKs, HTTP clients, DB drivers,
/// subprocess execution) are out of scope.
pub struct FilesystemAgent {
    allowed_paths: Vec<String>,
    read_only: bool,
}

impl FilesystemAgent {
    pub fn new(allowed_paths: Vec<String>, read_only: bool) -> Self {
        Self { allowed_paths, read_only }
    }

    fn check_allowed(&self, path: &Path) -> Result<(), AgentError> {
        let path_str = path.to_string_lossy();
        if self.allowed_paths.iter().any(|p| path_str.starts_with(p.as_str())) {
            Ok(())
        } else {
            Err(AgentError::SecurityViolation(format!("path '{path_str}' not in allowed_paths")))
        }
    }
}

#[async_trait]
impl Agent for FilesystemAgent {
    async fn execute(&self, action: &str, params: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, AgentError> {
        let path_str = get_str(params, "path").ok_or_else(|| AgentError::Fatal("missing path parameter".into()))?;
        let path = Path::new(path_str);
        self.check_allowed(path)?;

        let mut out = BTreeMap::new();
        match action {
            "read" => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| AgentError::Transient(e.to_string()))?;
                out.insert("content".to_string(), Value::String(content));
            }
            "write" => {
                if self.read_only {
                    return Err(AgentError::SecurityViolation("filesystem agent is read_only".into()));
                }
                let content = get_str(params, "content").unwrap_or("");
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| AgentError::Transient(e.to_string()))?;
                }
                tokio::fs::write(path, content).await.map_err(|e| AgentError::Transient(e.to_string()))?;
                out.insert("written".to_string(), Value::Bool(true));
                out.insert("path".to_string(), Value::String(path_str.to_string()));
                out.insert("size".to_string(), Value::Int(content.len() as i64));
            }
            other => return Err(AgentError::Fatal(format!("unknown filesystem action '{other}'"))),
        }
        Ok(out)
    }
}

/// Typed stub: returns a deterministic echo under mock mode rather than
/// calling a real provider. Mock mode itself is a never-silent
/// degradation and is logged accordingly.
pub struct LlmAgentStub {
    pub model: String,
}

#[async_trait]
impl Agent for LlmAgentStub {
    async fn execute(&self, _action: &str, params: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, AgentError> {
        tracing::warn!(model = %self.model, "LLM agent running in mock mode; no provider call was made");
        let prompt = get_str(params, "prompt").unwrap_or("");
        let mut out = BTreeMap::new();
        out.insert("text".to_string(), Value::String(format!("[mock:{}] {prompt}", self.model)));
        out.insert("tokens_used".to_string(), Value::Int(prompt.len() as i64));
        Ok(out)
    }
}

macro_rules! stub_agent {
    ($name:ident, $label:literal) => {
        pub struct $name;

        #[async_trait]
        impl Agent for $name {
            async fn execute(&self, action: &str, _params: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, AgentError> {
                tracing::warn!(agent = $label, action, "agent collaborator is stubbed; no real I/O was performed");
                let mut out = BTreeMap::new();
                out.insert("result".to_string(), Value::String(format!("[stub:{}:{action}]", $label)));
                Ok(out)
            }
        }
    };
}

stub_agent!(HttpAgentStub, "http");
stub_agent!(ToolExecutorAgentStub, "tool_executor");
stub_agent!(WebhookAgentStub, "webhook");
stub_agent!(DatabaseAgentStub, "database");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_config_rejects_root_path() {
        let mut config = BTreeMap::new();
        config.insert("allowed_paths".to_string(), Value::List(vec![Value::String("/etc".into())]));
        let result = validate_config(AgentKind::Filesystem, &config, &[], &[], &[], &[], false);
        assert!(result.is_err());
    }

    #[test]
    fn tool_executor_config_rejects_shell_metacharacters() {
        let mut config = BTreeMap::new();
        config.insert("allowed_commands".to_string(), Value::List(vec![Value::String("ls".into())]));
        config.insert("args".to_string(), Value::String("; rm -rf /".into()));
        let result = validate_config(AgentKind::ToolExecutor, &config, &[], &[], &[], &["ls".into()], false);
        assert!(result.is_err());
    }

    #[test]
    fn tool_executor_config_rejects_commands_outside_cage_allow_list() {
        let mut config = BTreeMap::new();
        config.insert(
            "allowed_commands".to_string(),
            Value::List(vec![Value::String("ls".into()), Value::String("curl".into())]),
        );
        let result = validate_config(AgentKind::ToolExecutor, &config, &[], &[], &[], &["ls".into()], false);
        assert!(result.is_err());
    }

    #[test]
    fn tool_executor_config_accepts_subset_of_cage_allow_list() {
        let mut config = BTreeMap::new();
        config.insert("allowed_commands".to_string(), Value::List(vec![Value::String("ls".into())]));
        let result = validate_config(AgentKind::ToolExecutor, &config, &[], &[], &[], &["ls".into(), "curl".into()], false);
        assert!(result.is_ok());
    }

    #[test]
    fn database_config_rejects_ddl() {
        let mut config = BTreeMap::new();
        config.insert("query".to_string(), Value::String("DROP TABLE users".into()));
        let result = validate_config(AgentKind::Database, &config, &[], &[], &[], &[], false);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn filesystem_agent_reads_allowed_path() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        tokio::fs::write(&file_path, "hello").await.unwrap();

        let agent = FilesystemAgent::new(vec![dir.path().to_string_lossy().to_string()], true);
        let mut params = BTreeMap::new();
        params.insert("path".to_string(), Value::String(file_path.to_string_lossy().to_string()));
        let result = agent.execute("read", &params).await.unwrap();
        assert_eq!(result.get("content"), Some(&Value::String("hello".into())));
    }
}
