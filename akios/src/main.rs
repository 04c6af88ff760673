//! AKIOS CLI entry point.
//!
//! Noun-verb-shaped (`akios cage up`, `akios run <file>`, `akios audit
//! verify`) but built with a plain `clap` derive rather than a
//! registration framework — three commands don't warrant one.

use std::path::PathBuf;
use std::process::ExitCode;

use akios_audit::{AuditLedger, LedgerConfig};
use akios_config::{CageController, Config};
use akios_engine::{RunStatus, RuntimeEngine};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "akios", version, about = "A security-first runtime for sequential AI-agent workflows")]
struct Cli {
    /// Root directory holding config.yaml, .env, audit/, and data/.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the security cage posture.
    Cage {
        #[command(subcommand)]
        action: CageAction,
    },
    /// Run a workflow file to completion.
    Run {
        workflow: PathBuf,
    },
    /// Verify the audit ledger's Merkle root against its contents.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum CageAction {
    Up {
        #[arg(long)]
        no_pii: bool,
        #[arg(long)]
        no_audit: bool,
        #[arg(long)]
        no_budget: bool,
    },
    Down {
        #[arg(long)]
        keep_data: bool,
        #[arg(long, default_value_t = 3)]
        passes: u32,
        #[arg(long)]
        fast: bool,
    },
    Status,
}

#[derive(Subcommand)]
enum AuditAction {
    Verify,
}

const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_INTERRUPT: u8 = 130;
const EXIT_KILLED: u8 = 137;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "akios command failed");
            eprintln!("error: {e}");
            EXIT_FAILURE
        }
    };
    ExitCode::from(code)
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    match cli.command {
        Command::Cage { action } => run_cage(&cli.root, action),
        Command::Run { workflow } => run_workflow(&cli.root, &workflow).await,
        Command::Audit { action } => run_audit(&cli.root, action),
    }
}

fn run_cage(root: &PathBuf, action: CageAction) -> anyhow::Result<u8> {
    let controller = CageController::new(root.join(".env"), root.clone());
    match action {
        CageAction::Up { no_pii, no_audit, no_budget } => {
            let state = controller.up(no_pii, no_audit, no_budget)?;
            println!("cage up: posture={:?}", state.posture());
            Ok(EXIT_OK)
        }
        CageAction::Down { keep_data, passes, fast } => {
            let (state, report) = controller.down(keep_data, passes, fast)?;
            println!("cage down: posture={:?}", state.posture());
            if let Some(report) = report {
                println!(
                    "wiped: audit={} output={} input={} ({} bytes)",
                    report.audit_files, report.output_files, report.input_files, report.total_bytes
                );
            }
            Ok(EXIT_OK)
        }
        CageAction::Status => {
            let state = controller.status()?;
            println!("{:?}", state.posture());
            Ok(EXIT_OK)
        }
    }
}

async fn run_workflow(root: &PathBuf, workflow_path: &PathBuf) -> anyhow::Result<u8> {
    let yaml = match tokio::fs::read_to_string(workflow_path).await {
        Ok(y) => y,
        Err(e) => {
            eprintln!("error: cannot read workflow file: {e}");
            return Ok(EXIT_USAGE);
        }
    };

    let config = Config::load(root.join("config.yaml"))?;
    let cage = CageController::new(root.join(".env"), root.clone()).status()?;
    let ledger = AuditLedger::open(
        root.join("audit"),
        LedgerConfig { rotation_threshold: config.rotation_threshold, memory_cap: config.memory_cap, ..LedgerConfig::default() },
    )?;

    let engine = RuntimeEngine {
        ledger: &ledger,
        config: &config,
        cage: &cage,
        data_root: root.clone(),
        max_steps: 100,
        max_duration: std::time::Duration::from_secs(3600),
    };

    let run_future = engine.run_yaml(&yaml);
    tokio::select! {
        result = run_future => {
            let summary = result?;
            for record in &summary.step_records {
                println!("step {}: {:?}", record.step_id, record.status);
            }
            match summary.status {
                RunStatus::Completed => Ok(EXIT_OK),
                RunStatus::Killed => Ok(EXIT_KILLED),
                RunStatus::Failed => Ok(EXIT_FAILURE),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            ledger.flush()?;
            tracing::warn!("interrupted; audit ledger flushed");
            Ok(EXIT_INTERRUPT)
        }
    }
}

fn run_audit(root: &PathBuf, action: AuditAction) -> anyhow::Result<u8> {
    match action {
        AuditAction::Verify => {
            let config = Config::load(root.join("config.yaml")).unwrap_or_default();
            let ledger = AuditLedger::open(
                root.join("audit"),
                LedgerConfig { rotation_threshold: config.rotation_threshold, memory_cap: config.memory_cap, ..LedgerConfig::default() },
            )?;
            if ledger.verify_integrity()? {
                println!("audit ledger integrity: OK");
                Ok(EXIT_OK)
            } else {
                eprintln!("audit ledger integrity: FAILED");
                Ok(EXIT_FAILURE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
