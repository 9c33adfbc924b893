//! conclave: run a governance engine through a scripted set of cycles.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use accounting::{CapacityEntry, CapacitySource, LegitimacyEntry};
use charter::{Actor, Role};
use conclave::agenda::MotionDraft;
use conclave::enforcement::{AxisAssessment, Finding, OpinionDraft, OpinionOutcome, WitnessStatement};
use conclave::{EngineBuilder, EngineConfig, GovernanceEngine, JsonlSink};
use lifecycle::{ActivationRecord, Deliverable, LifecycleEvent, ResultRecord, ResultStatus};

#[derive(Parser)]
#[command(name = "conclave")]
#[command(about = "Governance coordination engine")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "CONCLAVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scripted scenario and print each cycle report as JSON
    Simulate {
        /// Cycles to advance
        #[arg(short = 'n', long, default_value_t = 3)]
        cycles: u32,

        /// Directory for JSON-lines ledger journals
        #[arg(long, env = "CONCLAVE_JOURNAL_DIR")]
        journal: Option<PathBuf>,

        /// Seed for panel draws
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let level = config.general.log_level.to_ascii_lowercase();
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for target in ["conclave", "lifecycle", "accounting", "charter"] {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &cli.config {
        info!("Config file: {}", path.display());
    }

    match cli.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
        Command::Simulate {
            cycles,
            journal,
            seed,
        } => {
            let mut builder = EngineBuilder::new().config(config);
            if let Some(seed) = seed {
                builder = builder.panel_seed(seed);
            }
            if let Some(dir) = journal {
                info!("Journal dir: {}", dir.display());
                builder = builder
                    .with_history_sink(Arc::new(
                        JsonlSink::<LifecycleEvent>::open(dir.join("task_history.jsonl")).await?,
                    ))
                    .with_witness_sink(Arc::new(
                        JsonlSink::<WitnessStatement>::open(dir.join("witness.jsonl")).await?,
                    ))
                    .with_legitimacy_sink(Arc::new(
                        JsonlSink::<LegitimacyEntry>::open(dir.join("legitimacy.jsonl")).await?,
                    ))
                    .with_capacity_sink(Arc::new(
                        JsonlSink::<CapacityEntry>::open(dir.join("capacity.jsonl")).await?,
                    ));
            }
            let engine = builder.build()?;
            simulate(&engine, cycles).await?;
        }
    }

    Ok(())
}

/// Seed actors, run one clean task and one violation, then advance cycles.
async fn simulate(engine: &GovernanceEngine, cycles: u32) -> anyhow::Result<()> {
    engine.register_actor(Actor::new("delegator", "Works office").with_role(Role::Delegator))?;
    engine.register_actor(Actor::new("router", "Dispatch").with_role(Role::Router))?;
    engine.register_actor(Actor::new("exec-a", "Field team A").with_role(Role::Executor))?;
    engine.register_actor(Actor::new("exec-b", "Field team B").with_role(Role::Executor))?;
    engine.register_actor(Actor::new("steward", "Steward").with_role(Role::Steward))?;
    engine.register_actor(Actor::new("programs", "Program office").with_role(Role::CapacitySource))?;
    for i in 1..=7 {
        engine.register_actor(Actor::new(format!("reviewer-{}", i), format!("Reviewer {}", i)).with_role(Role::Reviewer))?;
    }

    let now = Utc::now();
    engine
        .declare_capacity("programs", CapacitySource::ProgramSlots, 6, now, now + Duration::days(90))
        .await?;

    for (title, realm) in [
        ("Repair the weir", "water"),
        ("Dredge the canal", "water"),
        ("Resurface the east road", "roads"),
    ] {
        engine
            .submit_motion("steward", MotionDraft::new(title, realm, "Proposed for this cycle"))
            .await?;
    }

    // A task carried through cleanly.
    let task = engine.authorize_task("delegator", "Survey the weir").await?;
    let activation = engine.draft_activation(&task).with_deliverable("survey.pdf");
    let task = engine.activate("delegator", &task.id, task.version, activation).await?;
    let task = engine
        .route("router", &task.id, task.version, vec!["exec-a".into()])
        .await?;
    let task = engine.accept("exec-a", &task.id, task.version).await?;
    let task = engine.start("exec-a", &task.id, task.version).await?;
    let result = ResultRecord::new(&task.id, "exec-a", ResultStatus::Completed)
        .with_deliverable(Deliverable::from_bytes("survey.pdf", b"survey"))
        .attested();
    let task = engine.report("exec-a", &task.id, task.version, result).await?;
    let task = engine.aggregate("delegator", &task.id, task.version).await?;
    engine.complete("delegator", &task.id, task.version).await?;

    // A result injected by an executor who never accepted.
    let task = engine.authorize_task("delegator", "Inspect the sluice").await?;
    let activation = ActivationRecord::new(&task.id, "Inspect the sluice", Duration::hours(48))
        .with_deliverable("inspection.pdf");
    let task = engine.activate("delegator", &task.id, task.version, activation).await?;
    let task = engine
        .route("router", &task.id, task.version, vec!["exec-a".into()])
        .await?;
    let task = engine.accept("exec-a", &task.id, task.version).await?;
    let task = engine.start("exec-a", &task.id, task.version).await?;
    let injected = ResultRecord::new(&task.id, "exec-b", ResultStatus::Completed).attested();
    if let Err(e) = engine.report("exec-b", &task.id, task.version, injected).await {
        info!(code = e.code(), "Injected result refused");
    }

    // The panel finds the task legitimate with concerns, releasing the hold.
    for statement in engine.statements() {
        let Some(case_id) = engine.case_for_statement(&statement.id) else {
            continue;
        };
        let case = engine.case(&case_id).await?;
        for reviewer in &case.panel {
            let draft = OpinionDraft {
                axes: AxisAssessment {
                    intent_respected: true,
                    plan_followed: true,
                    procedure_followed: false,
                },
                finding: Finding::LegitimateWithConcerns,
                statement: "The accepting executor was not the one reporting".to_string(),
            };
            if let OpinionOutcome::Issued(case) = engine.submit_opinion(reviewer, &case_id, draft).await? {
                info!(case_id = %case.id, "Finding issued");
            }
        }
    }

    for _ in 0..cycles {
        let report = engine.advance_cycle(Utc::now()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    println!("{}", serde_json::to_string_pretty(&engine.legitimacy_summary().await)?);
    Ok(())
}
