// crates/chaoscli/src/main.rs

use anyhow::{bail, Context, Result};
use chaoscore::{
    BranchCondition, ConditionalBranch, EngineError, FaultSpec, Template, WorkflowNotification,
    WorkflowPhase, WorkflowSpec, WorkflowStatus,
};
use chaosplayground::ActuatorRegistry;
use chaosruntime::{ChaosRuntime, RuntimeConfig};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chaosflow")]
#[command(about = "Chaos workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file to completion
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Path to runtime config JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(short, long, default_value_t = 600)]
        timeout: u64,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available fault kinds
    Actuators,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            config,
            timeout,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(file, config, Duration::from_secs(timeout)).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Actuators => {
            list_actuators();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn load_workflow(file: &PathBuf) -> Result<WorkflowSpec> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let spec: WorkflowSpec = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    Ok(spec)
}

async fn run_workflow(file: PathBuf, config: Option<PathBuf>, timeout: Duration) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let spec = load_workflow(&file)?;
    let config = match config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };

    println!("📋 Workflow: {}", spec.name);
    println!("   Templates: {}", spec.templates.len());
    println!("   Entry: {}", spec.entry);
    println!();

    let playground = Arc::new(ActuatorRegistry::with_builtins());
    let runtime = ChaosRuntime::builder(playground).config(config).build()?;

    // Subscribe before submitting so no change is missed
    let mut notifications = runtime.subscribe();
    let workflow = spec.name.clone();
    let printer = tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            if notification.workflow() != workflow {
                continue;
            }
            match notification {
                WorkflowNotification::WorkflowRegistered { .. } => {
                    println!("📝 Workflow registered");
                }
                WorkflowNotification::WorkflowPhaseChanged { to, reason, .. } => match to {
                    WorkflowPhase::Running => println!("▶️  Workflow started"),
                    WorkflowPhase::Succeed => println!("✨ Workflow succeeded"),
                    WorkflowPhase::Failed => {
                        println!("💥 Workflow failed: {}", reason.unwrap_or_default())
                    }
                    WorkflowPhase::Init => {}
                },
                WorkflowNotification::NodeCreated { node, kind, .. } => {
                    println!("  ⚡ Created node: {} ({:?})", node, kind);
                }
                WorkflowNotification::NodePhaseChanged {
                    node, from, to, reason, ..
                } => match reason {
                    Some(reason) => println!("  ❌ {}: {} → {} ({})", node, from, to, reason),
                    None => println!("  ✅ {}: {} → {}", node, from, to),
                },
            }
        }
    });

    runtime.start().await;
    runtime.submit(spec.clone()).await?;
    let result = tokio::select! {
        finished = runtime.wait_for(&spec.name, timeout) => match finished {
            Err(EngineError::Timeout(_)) => {
                println!("⏱️  Timed out, aborting workflow");
                abort_workflow(&runtime, &spec.name).await
            }
            other => other,
        },
        _ = tokio::signal::ctrl_c() => {
            println!("🛑 Interrupted, aborting workflow");
            abort_workflow(&runtime, &spec.name).await
        }
    };

    // Let the printer catch up
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();
    runtime.shutdown().await;

    let status = result?;
    println!();
    println!("📊 Execution Summary:");
    println!("   Phase: {}", status.phase);
    println!("   Nodes: {}", status.nodes.len());
    if let (Some(started), Some(finished)) = (status.started_at, status.finished_at) {
        println!("   Duration: {}ms", (finished - started).num_milliseconds());
    }

    let leaked = status.leaked_injections();
    if !leaked.is_empty() {
        println!();
        println!("⚠️  Faults left behind:");
        for node in leaked {
            println!("   {} ({})", node.name, node.injection().unwrap_or_default());
        }
    }

    if status.phase == WorkflowPhase::Failed {
        bail!(
            "workflow {} failed: {}",
            spec.name,
            status.reason.unwrap_or_default()
        );
    }
    Ok(())
}

/// Abort and give the engine a moment to revert the faults still in place
async fn abort_workflow(runtime: &ChaosRuntime, workflow: &str) -> Result<WorkflowStatus, EngineError> {
    runtime.abort(workflow)?;
    runtime.wait_for(workflow, Duration::from_secs(10)).await
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let spec = load_workflow(&file)?;
    spec.validate()?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", spec.name);
    println!("   Templates: {}", spec.templates.len());
    println!("   Entry: {}", spec.entry);

    let registry = ActuatorRegistry::with_builtins();
    let known = registry.list_kinds();
    for template in spec.templates.values() {
        if let Some(fault) = template.fault() {
            if !known.contains(&fault.kind) {
                println!("⚠️  Template {} uses unknown fault kind '{}'", template.name, fault.kind);
            }
        }
    }

    Ok(())
}

fn list_actuators() {
    println!("📦 Available Fault Kinds:");
    println!();

    let registry = ActuatorRegistry::with_builtins();
    for kind in registry.list_kinds() {
        if let Some(metadata) = registry.get_metadata(&kind) {
            println!("  • {} ({})", kind, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", kind);
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let mut spec = WorkflowSpec::new("example-drill", "drill")
        .with_param("environment", "staging")
        .with_deadline(Duration::from_secs(60))
        .with_template(Template::serial("drill", ["announce", "faults", "cooldown"]))
        .with_template(Template::chaos(
            "announce",
            FaultSpec::new("log").with_spec(json!({ "message": "drill starting" })),
            Duration::from_millis(100),
        ))
        .with_template(Template::parallel("faults", ["latency", "checks"]))
        .with_template(Template::chaos(
            "latency",
            FaultSpec::new("sleep").with_spec(json!({ "inject_ms": 50, "revert_ms": 50 })),
            Duration::from_secs(2),
        ))
        .with_template(
            Template::task("checks", ["staging-check", "prod-check"])
                .with_branch(ConditionalBranch::new(
                    "staging-check",
                    BranchCondition::Equals {
                        param: "environment".to_string(),
                        value: json!("staging"),
                    },
                ))
                .with_branch(ConditionalBranch::new(
                    "prod-check",
                    BranchCondition::Equals {
                        param: "environment".to_string(),
                        value: json!("production"),
                    },
                )),
        )
        .with_template(Template::chaos(
            "staging-check",
            FaultSpec::new("command").with_spec(json!({
                "inject": "echo injecting into $CHAOS_NODE",
                "revert": "echo reverting $CHAOS_NODE"
            })),
            Duration::from_secs(1),
        ))
        .with_template(Template::chaos(
            "prod-check",
            FaultSpec::new("log").with_spec(json!({ "message": "production only" })),
            Duration::from_secs(1),
        ))
        .with_template(Template::suspend("cooldown", Duration::from_millis(500)));
    spec.description = Some("Injects latency and runs environment specific checks".to_string());

    let json = serde_json::to_string_pretty(&spec)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  chaosflow run --file {}", output.display());

    Ok(())
}
