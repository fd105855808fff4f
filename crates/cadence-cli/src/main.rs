mod config;

use cadence_orchestrator::{
    default_roster, CompletionAssessmentManager, ContinuationRules, KeywordDecomposer,
    PoApprovalAnalyzer, SimulatedWorker, SprintRunner, Task,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence", about = "Cadence: virtual sprints for agent teams")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cadence.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one simulated sprint for an instruction
    Simulate {
        /// What the team should build
        instruction: String,
        /// Sprint length in virtual days (overrides config)
        #[arg(long)]
        days: Option<u32>,
        /// Sprint identifier
        #[arg(long, default_value = "sprint-1")]
        sprint_id: String,
        /// Also write the sprint report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Tasks whose title contains this keyword fail
        #[arg(long)]
        fail_on: Option<String>,
        /// Tasks whose title contains this keyword stay blocked
        #[arg(long)]
        block_on: Option<String>,
    },
    /// Assess a task list and print the continuation decision
    Assess {
        /// JSON file with a task array or a sprint report
        tasks: PathBuf,
        /// Acceptance criteria (defaults to the configured criteria)
        #[arg(long)]
        criteria: Vec<String>,
    },
}

/// `assess` accepts either a bare task list or a report from `simulate`.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    List(Vec<Task>),
    Report { tasks: Vec<Task> },
}

impl TaskFile {
    fn into_tasks(self) -> Vec<Task> {
        match self {
            TaskFile::List(tasks) | TaskFile::Report { tasks } => tasks,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Simulate {
            instruction,
            days,
            sprint_id,
            output,
            fail_on,
            block_on,
        } => {
            if let Some(days) = days {
                config.coordinator.sprint.length_days = days;
            }

            let mut worker = SimulatedWorker::new();
            if let Some(keyword) = fail_on {
                worker = worker.failing_on(keyword);
            }
            if let Some(keyword) = block_on {
                worker = worker.blocking_on(keyword);
            }

            let runner = SprintRunner::new(
                config.coordinator.clone(),
                Arc::new(KeywordDecomposer::new()),
                Arc::new(worker),
            )?
            .with_roster(default_roster(&config.data_dir.join("agents")))
            .with_audit_dir(config.data_dir.join("audit"));

            let result = runner.run(&sprint_id, &instruction).await;
            runner.shutdown().await?;
            let report = result?;

            info!(
                sprint_id = %sprint_id,
                decision = %report.outcome.decision,
                "Sprint finished"
            );

            let json = serde_json::to_string_pretty(&report)?;
            if let Some(path) = output {
                write_report(&path, &json).await?;
                info!(path = %path.display(), "Sprint report written");
            }
            println!("{json}");
        }
        Commands::Assess { tasks, criteria } => {
            let content = tokio::fs::read_to_string(&tasks).await.map_err(|e| {
                anyhow::anyhow!("Failed to read tasks file '{}': {}", tasks.display(), e)
            })?;
            let tasks = serde_json::from_str::<TaskFile>(&content)?.into_tasks();

            let criteria = if criteria.is_empty() {
                config.coordinator.quality.default_criteria.clone()
            } else {
                criteria
            };

            let manager = CompletionAssessmentManager::new(config.coordinator.quality.clone());
            let assessment = manager.evaluate_completion(&tasks, &criteria[..]);
            let rules = ContinuationRules::from_config(&config.coordinator);
            let decision = rules.decide(&assessment);
            let recommendation = PoApprovalAnalyzer::new(rules).analyze(&assessment);

            let json = serde_json::json!({
                "assessment": assessment,
                "decision": decision,
                "recommendation": recommendation,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

async fn write_report(path: &Path, json: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, json).await?;
    Ok(())
}
