use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use graphcore::{BuildEvent, BuildReport, GraphError, NodeMessage, NodeState};
use graphruntime::{NodeRegistry, PipelineFile, Project, ProjectConfig, StateLayout};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graph")]
#[command(about = "Incremental build graph CLI", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProjectArgs {
    /// Path to pipeline JSON file
    #[arg(short, long)]
    file: PathBuf,

    /// Project root holding `.graph/` and node working directories
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Derive ids of unnamed nodes from their type
    #[arg(long)]
    automatic_node_names: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a pipeline, running only what changed
    Run {
        #[command(flatten)]
        project: ProjectArgs,

        /// Discard persisted state before building
        #[arg(long)]
        remove_existing_graph: bool,

        /// Maximum number of nodes running at once
        #[arg(long, default_value_t = 10)]
        max_parallel: usize,
    },

    /// Show which nodes a build would run
    Status {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Check a pipeline without running it
    Validate {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Remove all persisted state
    Clean {
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example pipeline
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pipeline.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Run {
            project,
            remove_existing_graph,
            max_parallel,
        } => {
            let config = project
                .config()
                .with_remove_existing_graph(remove_existing_graph)
                .with_max_parallel_nodes(max_parallel);
            run_pipeline(&project.file, config).await?;
        }
        Commands::Status { project } => show_status(&project.file, project.config())?,
        Commands::Validate { project } => validate_pipeline(&project.file, project.config())?,
        Commands::Clean { root } => {
            StateLayout::new(root.clone()).remove_state()?;
            println!("🧹 Removed build state under {}", root.display());
        }
        Commands::Nodes => list_nodes(),
        Commands::Init { output } => create_example_pipeline(output)?,
    }

    Ok(())
}

impl ProjectArgs {
    fn config(&self) -> ProjectConfig {
        ProjectConfig::default()
            .with_root(self.root.clone())
            .with_automatic_node_names(self.automatic_node_names)
    }
}

fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    graphnodes::register_all(&mut registry);
    registry
}

/// Open a project and declare the pipeline's nodes in it.
fn declare(file: &Path, config: ProjectConfig) -> Result<(PipelineFile, Project)> {
    let pipeline = PipelineFile::from_path(file).with_context(|| format!("loading {}", file.display()))?;
    let mut project = Project::open(config)?;
    pipeline.declare(&mut project, &registry())?;
    tracing::debug!("Declared {} nodes from {}", pipeline.nodes.len(), file.display());
    Ok((pipeline, project))
}

async fn run_pipeline(file: &Path, config: ProjectConfig) -> Result<()> {
    println!("🚀 Loading pipeline from: {}", file.display());
    let (pipeline, mut project) = declare(file, config)?;
    println!("📋 Pipeline: {}", pipeline.name);
    println!("   Nodes: {}", pipeline.nodes.len());
    println!();

    // Subscribe to events for real-time output
    let event_task = tokio::spawn(print_events(project.subscribe_events()));

    let result = project.build().await;

    // Dropping the project closes the event channel and ends the listener
    drop(project);
    if let Err(e) = event_task.await {
        tracing::warn!("Event printer stopped abnormally: {}", e);
    }

    println!();
    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(GraphError::BuildFailed(report)) => {
            print_report(&report);
            bail!("build failed: {}", report.summary())
        }
        Err(e) => Err(e.into()),
    }
}

/// Prints events until the channel closes. Returns how many were printed.
async fn print_events(mut events: broadcast::Receiver<BuildEvent>) -> usize {
    let mut printed = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                print_event(event);
                printed += 1;
            }
            Err(RecvError::Lagged(missed)) => {
                println!("⚠️  {} events dropped", missed);
            }
            Err(RecvError::Closed) => break,
        }
    }
    printed
}

fn print_event(event: BuildEvent) {
    match event {
        BuildEvent::BuildStarted { node_count, .. } => {
            println!("▶️  Build started ({} nodes)", node_count);
        }
        BuildEvent::NodeSkipped { node_id, .. } => {
            println!("  ⏭️  {} is up to date", node_id);
        }
        BuildEvent::NodeStarted {
            node_id,
            definition,
            reason,
            ..
        } => {
            println!("  ⚡ Running node: {} ({}): {}", node_id, definition, reason);
        }
        BuildEvent::NodeSucceeded { node_id, duration_ms, .. } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        BuildEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        BuildEvent::NodeBlocked { node_id, blocked_by, .. } => {
            println!("  ⛔ Node {} blocked by {}", node_id, blocked_by);
        }
        BuildEvent::NodeMessage { node_id, message, .. } => match message {
            NodeMessage::Info { message } => println!("     ℹ️  [{}] {}", node_id, message),
            NodeMessage::Warning { message } => println!("     ⚠️  [{}] {}", node_id, message),
            NodeMessage::Progress { percent, message } => match message {
                Some(msg) => println!("     📊 [{}] {}% - {}", node_id, percent, msg),
                None => println!("     📊 [{}] {}%", node_id, percent),
            },
        },
        BuildEvent::BuildCompleted { success, duration_ms, .. } => {
            if success {
                println!("✨ Build completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Build failed after {}ms", duration_ms);
            }
        }
    }
}

fn print_report(report: &BuildReport) {
    println!("📊 Build Summary:");
    println!("   Build ID: {}", report.build_id);
    for outcome in &report.outcomes {
        let mark = match outcome.state {
            NodeState::Skipped => "⏭️ ",
            NodeState::Succeeded => "✅",
            NodeState::Failed => "❌",
            NodeState::Blocked => "⛔",
            NodeState::Pending | NodeState::Running => "❔",
        };
        println!("   {} {:<24} {}", mark, outcome.node_id.as_str(), outcome.reason);
    }
    println!(
        "   {} succeeded, {} skipped, {} failed, {} blocked",
        report.succeeded().len(),
        report.skipped().len(),
        report.failed().len(),
        report.blocked().len()
    );
    for error in &report.errors {
        println!("   • {}", error);
    }
}

fn show_status(file: &Path, config: ProjectConfig) -> Result<()> {
    let (_, mut project) = declare(file, config)?;
    let statuses = project.status()?;

    println!("🔍 Status of {}:", file.display());
    for status in &statuses {
        let mark = if status.clean { "✅ clean" } else { "🔄 dirty" };
        println!("   {} {:<24} ({}) {}", mark, status.node_id.as_str(), status.definition, status.reason);
    }
    let dirty = statuses.iter().filter(|s| !s.clean).count();
    println!("   {} of {} nodes would run", dirty, statuses.len());
    Ok(())
}

fn validate_pipeline(file: &Path, config: ProjectConfig) -> Result<()> {
    println!("🔍 Validating pipeline: {}", file.display());
    let (pipeline, mut project) = declare(file, config)?;
    project.close()?;

    println!("✅ Pipeline is valid:");
    println!("   Name: {}", pipeline.name);
    if let Some(description) = &pipeline.description {
        println!("   Description: {}", description);
    }
    println!("   Nodes: {}", pipeline.nodes.len());
    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_pipeline(output: PathBuf) -> Result<()> {
    let example = serde_json::json!({
        "name": "Example pipeline",
        "description": "Writes a greeting to a JSON file and reads it back",
        "nodes": [
            {"type": "echo", "name": "greet", "params": {"message": "hello"}},
            {"type": "json.write", "name": "save", "deps": {"value": "greet.message"}},
            {"type": "json.read", "name": "load", "deps": {"source": "save.target"}}
        ]
    });

    // Round-trip through the typed model so the example always parses
    let pipeline: PipelineFile = serde_json::from_value(example)?;
    std::fs::write(&output, serde_json::to_string_pretty(&pipeline)?)?;

    println!("✨ Created example pipeline: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  graph run --file {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphcore::{BuildId, EventBus, NodeId};

    #[tokio::test]
    async fn test_printer_survives_lagging() {
        let bus = EventBus::new(1);
        let events = bus.subscribe();
        let emitter = bus.create_emitter(BuildId::nil(), NodeId::from("n"));
        for i in 0..3 {
            emitter.info(format!("message {}", i));
        }
        drop(emitter);
        drop(bus);

        // The two oldest are overwritten, the newest still prints
        assert_eq!(print_events(events).await, 1);
    }
}
