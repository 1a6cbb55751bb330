use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wfcore::{
    Branch, ExecutionEvent, ExecutionStatus, LogLevel, NodeEvent, NodeSpec, TriggerEvent, Value,
    WorkflowDefinition,
};
use wfruntime::{FlowRuntime, RuntimeConfig};

#[derive(Parser)]
#[command(name = "wf")]
#[command(about = "Workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger payload as a JSON string, readable as {{trigger.payload}}
        #[arg(short, long)]
        payload: Option<String>,

        /// Identity recorded as the execution's trigger source
        #[arg(long, default_value = "cli")]
        triggered_by: String,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

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

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            payload,
            triggered_by,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(&file, payload, triggered_by, verbose).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&workflow_json)
        .with_context(|| format!("{} is not a workflow definition", file.display()))
}

fn runtime() -> FlowRuntime {
    FlowRuntime::with_registry(Arc::new(wfnodes::standard_registry()), RuntimeConfig::from_env())
}

async fn run_workflow(
    file: &Path,
    payload: Option<String>,
    triggered_by: String,
    verbose: bool,
) -> Result<()> {
    println!("Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;

    println!("Workflow: {} (v{})", workflow.name, workflow.version);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let mut trigger = TriggerEvent::manual(triggered_by);
    if let Some(raw) = payload {
        let payload: Value = serde_json::from_str(&raw).context("payload must be valid JSON")?;
        trigger = trigger.with_payload(payload);
    }

    let runtime = runtime();
    let mut events = runtime.subscribe_events();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::StatusChanged { status, .. } => {
                    println!("[{}]", status);
                    if status.is_terminal() {
                        break;
                    }
                }
                ExecutionEvent::Log { entry } => {
                    let marker = match entry.level {
                        LogLevel::Info => " ",
                        LogLevel::Warning => "!",
                        LogLevel::Error => "x",
                    };
                    println!("  {} {}", marker, entry.message);
                    if let Some(metadata) = entry.metadata.as_ref().filter(|_| verbose) {
                        println!("      {}", metadata);
                    }
                }
                ExecutionEvent::NodeMessage { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => println!("      [{}] {}", node_id, message),
                    NodeEvent::Warning { message } => {
                        println!("      [{}] warning: {}", node_id, message)
                    }
                },
            }
        }
    });

    let execution = runtime.execute(&workflow, trigger).await?;

    let _ = tokio::time::timeout(Duration::from_millis(500), event_task).await;

    println!();
    println!("Execution Summary:");
    println!("   Execution ID: {}", execution.id);
    println!("   Status: {}", execution.status);
    if let (Some(started), Some(completed)) = (execution.started_at, execution.completed_at) {
        println!("   Duration: {}ms", (completed - started).num_milliseconds());
    }

    if let Some(Value::Object(results)) = &execution.result_data {
        if !results.is_empty() {
            println!();
            println!("Results:");
            for (node_id, output) in results {
                println!("   {}: {}", node_id, output);
            }
        }
    }

    match execution.status {
        ExecutionStatus::Success => Ok(()),
        status => bail!(
            "execution {} ended {}: {}",
            execution.id,
            status,
            execution.error_message.unwrap_or_default()
        ),
    }
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let graph = runtime().validate(&workflow)?;

    let entries: Vec<&str> = graph.entry_nodes().into_iter().map(String::as_str).collect();

    println!("Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!("   Entry nodes: {}", entries.join(", "));

    Ok(())
}

fn list_nodes() {
    println!("Available Node Types:");
    println!();

    let registry = wfnodes::standard_registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  * {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            for field in metadata.config {
                let required = if field.required { " (required)" } else { "" };
                println!("      - {}{}: {}", field.name, required, field.description);
            }
        } else {
            println!("  * {}", node_type);
        }
    }
}

/// Fetch a URL, check its status and wait a second on success.
fn example_workflow() -> WorkflowDefinition {
    let mut workflow = WorkflowDefinition::new("Example HTTP Workflow");
    workflow.description = Some("Fetches a URL and waits when it answers 200".to_string());

    let fetch = workflow.add_node(
        NodeSpec::new("n1", "http_request")
            .with_name("Fetch")
            .with_config("method", "GET")
            .with_config("url", "{{trigger.payload.url}}")
            .with_position(100.0, 100.0),
    );
    let check = workflow.add_node(
        NodeSpec::new("n2", "conditional")
            .with_name("Status is 200")
            .with_config("left_value", "{{n1.output.status}}")
            .with_config("operator", "==")
            .with_config("right_value", 200)
            .with_position(300.0, 100.0),
    );
    let wait = workflow.add_node(
        NodeSpec::new("n3", "delay")
            .with_name("Wait")
            .with_config("delay_seconds", 1)
            .with_position(500.0, 100.0),
    );

    workflow.connect(fetch, check.clone());
    workflow.connect_branch(check, Branch::OnTrue, wait);
    workflow
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_workflow())?;
    std::fs::write(output, json)?;

    println!("Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  wf run --file {} --payload '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}
