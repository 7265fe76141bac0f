use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use flowcore::{follow_events, ExecutionEvent, NodeEvent, Value, Workflow, WorkflowNode};
use flowruntime::{
    ExecutionResult, FlowRuntime, NodeStatus, RuntimeConfig, ValidationResult,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run(RunArgs),

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to workflow JSON file
    #[arg(short, long)]
    file: PathBuf,

    /// Input data as a JSON object, handed to the start nodes
    #[arg(short, long)]
    input: Option<String>,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print the execution result as JSON instead of live progress
    #[arg(long)]
    json: bool,

    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Skip validation before running
    #[arg(long)]
    no_validate: bool,

    #[arg(long)]
    node_timeout_ms: Option<u64>,

    #[arg(long)]
    run_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_logging(args.verbose);
            run_workflow(args).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes()?;
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_runtime() -> Result<FlowRuntime> {
    let registry = flownodes::standard_registry()?;
    Ok(FlowRuntime::with_registry(
        Arc::new(registry),
        RuntimeConfig::from_env(),
    ))
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let workflow = serde_json::from_str(&workflow_json)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(workflow)
}

async fn run_workflow(args: RunArgs) -> Result<()> {
    let workflow = load_workflow(&args.file)?;

    let inputs: HashMap<String, Value> = match &args.input {
        Some(input_str) => serde_json::from_str(input_str).context("Input must be a JSON object")?,
        None => HashMap::new(),
    };

    let runtime = build_runtime()?;
    let mut options = runtime.config().options.clone();
    if let Some(max) = args.max_concurrency {
        options = options.with_max_concurrency(max);
    }
    if args.no_validate {
        options = options.with_validation(false);
    }
    if let Some(ms) = args.node_timeout_ms {
        options = options.with_node_timeout_ms(ms);
    }
    if let Some(ms) = args.run_timeout_ms {
        options = options.with_run_timeout_ms(ms);
    }

    let core = runtime.execution_with(&workflow, options)?;

    let token = core.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            token.cancel();
        }
    });

    if args.json {
        let result = core.execute(inputs).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return finish(&result);
    }

    println!("🚀 Loading workflow from: {}", args.file.display());
    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    // Subscribe to events for real-time output
    let events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        let lost = follow_events(events, print_event).await;
        if lost > 0 {
            println!("     ⚠️  {} events dropped while printing", lost);
        }
    });

    let result = core.execute(inputs).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), event_task).await;

    print_summary(&result);
    finish(&result)
}

/// Returns true once the run is over.
fn print_event(event: ExecutionEvent) -> bool {
    match event {
        ExecutionEvent::RunStarted { total_nodes, .. } => {
            println!("▶️  Workflow started ({} nodes)", total_nodes);
        }
        ExecutionEvent::NodeStarted {
            node_id,
            node_type,
            attempt,
            ..
        } => {
            if attempt > 1 {
                println!("  ⚡ Starting node: {} ({}), attempt {}", node_id, node_type, attempt);
            } else {
                println!("  ⚡ Starting node: {} ({})", node_id, node_type);
            }
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeRetrying {
            node_id,
            delay_ms,
            error,
            ..
        } => {
            println!("  🔁 Node {} will retry in {}ms: {}", node_id, delay_ms, error);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeSkipped { node_id, reason, .. } => {
            println!("  ⏭️  Node {} skipped: {}", node_id, reason);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {:.0}% - {}", node_id, percent, msg);
                } else {
                    println!("     📊 [{}] {:.0}%", node_id, percent);
                }
            }
            NodeEvent::Data { port, value } => {
                println!("     📦 [{}] {}: {}", node_id, port, value);
            }
        },
        ExecutionEvent::RunCompleted {
            success,
            duration_ms,
            ..
        } => {
            if success {
                println!("✨ Workflow completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Workflow failed after {}ms", duration_ms);
            }
            return true;
        }
    }
    false
}

fn print_summary(result: &ExecutionResult) {
    let diagnostics = &result.diagnostics;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Phase: {:?}", result.phase);
    println!(
        "   Nodes: {} executed, {} succeeded, {} failed, {} skipped",
        diagnostics.nodes_executed,
        diagnostics.nodes_succeeded,
        diagnostics.nodes_failed,
        diagnostics.nodes_skipped
    );
    if diagnostics.retries > 0 {
        println!("   Retries: {}", diagnostics.retries);
    }
    if let Some(mb) = diagnostics.memory_usage_mb {
        println!("   Memory: {:.2} MB", mb);
    }
    if let Some(failure) = &diagnostics.failure {
        println!("   Failure: {}", failure);
    }

    if let Some(validation) = &result.validation_result {
        if !validation.valid {
            println!();
            print_issues(validation);
        }
    }

    if !diagnostics.warnings.is_empty() {
        println!();
        println!("⚠️  Warnings:");
        for warning in &diagnostics.warnings {
            println!("   - {}", warning);
        }
    }

    let mut node_ids: Vec<&String> = result.results.keys().collect();
    node_ids.sort();

    let mut printed_header = false;
    for node_id in node_ids {
        let state = &result.results[node_id];
        let Some(outputs) = state.output.as_ref().filter(|o| !o.is_empty()) else {
            if state.status == NodeStatus::Failed {
                println!("   ❌ {}: {}", node_id, state.error.as_deref().unwrap_or("failed"));
            }
            continue;
        };
        if !printed_header {
            println!();
            println!("📤 Outputs:");
            printed_header = true;
        }
        println!("   Node {}:", node_id);
        let mut keys: Vec<&String> = outputs.keys().collect();
        keys.sort();
        for key in keys {
            println!("     {}: {}", key, outputs[key]);
        }
    }
}

fn finish(result: &ExecutionResult) -> Result<()> {
    if result.success {
        Ok(())
    } else {
        bail!(
            "workflow run did not succeed ({})",
            result
                .diagnostics
                .failure
                .as_deref()
                .unwrap_or("one or more nodes failed")
        )
    }
}

fn print_issues(validation: &ValidationResult) {
    for issue in &validation.issues {
        let marker = match issue.severity {
            flowruntime::Severity::Error => "❌",
            flowruntime::Severity::Warning => "⚠️ ",
        };
        println!("   {} {}", marker, issue.message);
    }
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let runtime = build_runtime()?;
    let validation = runtime.validate(&workflow)?;

    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!("   Start nodes: {}", validation.start_nodes.join(", "));
    print_issues(&validation);

    if !validation.valid {
        bail!(
            "workflow is invalid: {} error(s)",
            validation.errors().count()
        );
    }
    println!("✅ Workflow is valid");
    Ok(())
}

fn list_nodes() -> Result<()> {
    println!("📦 Available Node Types:");
    println!();

    let registry = flownodes::standard_registry()?;

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
    Ok(())
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Example HTTP Workflow");
    workflow.description = Some("Fetches data from an API and logs the result".to_string());

    let start = workflow.add_node(WorkflowNode::new("start", "manual").with_name("Start"));
    let fetch = workflow.add_node(
        WorkflowNode::new("fetch", "http.request")
            .with_name("Fetch Data")
            .with_config("url", "https://api.github.com/zen")
            .with_config("method", "GET")
            .with_retry(2, 500),
    );
    let log = workflow.add_node(WorkflowNode::new("log", "debug.log").with_name("Log Response"));

    workflow.connect(start, fetch.clone());
    workflow.connect(fetch, log);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --file {}", output.display());

    Ok(())
}
