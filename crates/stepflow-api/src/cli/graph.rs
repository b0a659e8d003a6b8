//! CLI graph subcommands: validate a definition file, or execute it locally
//! while streaming its log to the terminal.

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use futures_util::StreamExt;

use stepflow_core::graph::{
    DefinitionError, EdgeKind, ValidatedGraph, load_graph_file, serialize_graph_yaml,
    validate_with_callables,
};
use stepflow_types::event::{LogEvent, LogLevel, StreamMessage};
use stepflow_types::graph::Context;
use stepflow_types::run::{RunMode, RunStatus};

use crate::state::AppState;

/// Load `path` and validate it against the registered callables.
fn load_validated(path: &Path, state: &AppState) -> Result<ValidatedGraph> {
    let def = load_graph_file(path).map_err(|e| match e {
        DefinitionError::Parse(msg) => anyhow::anyhow!("Failed to parse graph: {msg}"),
        other => anyhow::anyhow!("Failed to load graph: {other}"),
    })?;
    validate_with_callables(&def, &state.registry)
        .map_err(|e| anyhow::anyhow!("Graph validation failed: {e}"))
}

/// Parse a `--context` argument into a JSON object.
pub fn parse_context(raw: Option<&str>) -> Result<Context> {
    let Some(raw) = raw else {
        return Ok(Context::new());
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--context must be valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("--context must be a JSON object, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn validate_graph(path: &Path, normalize: bool, state: &AppState, json: bool) -> Result<()> {
    let graph = load_validated(path, state)?;

    if json {
        let output = serde_json::json!({
            "id": graph.id(),
            "name": graph.name(),
            "start_node": graph.start_node(),
            "nodes": graph.nodes().len(),
            "edges": graph.edges().len(),
            "diagnostics": graph.diagnostics(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if normalize {
        print!("{}", serialize_graph_yaml(graph.definition())?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Graph '{}' is valid",
        style("✓").green().bold(),
        style(graph.id()).cyan()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("From").fg(Color::Cyan),
            Cell::new("To").fg(Color::Cyan),
            Cell::new("Type").fg(Color::Cyan),
            Cell::new("Rule").fg(Color::Cyan),
        ]);
    for edge in graph.edges() {
        let rule = match &edge.kind {
            EdgeKind::Sequential => String::new(),
            EdgeKind::Branch { condition } => condition.to_string(),
            EdgeKind::Loop {
                max_iterations,
                until,
            } => match until {
                Some(expr) => format!("max {max_iterations}, until {}", expr.source()),
                None => format!("max {max_iterations}"),
            },
        };
        table.add_row(vec![
            Cell::new(edge.index),
            Cell::new(&edge.from),
            Cell::new(&edge.to),
            Cell::new(edge.edge_type()),
            Cell::new(rule),
        ]);
    }

    println!(
        "  Start: {}   Nodes: {}   Edges: {}",
        style(graph.start_node()).bold(),
        graph.nodes().len(),
        graph.edges().len()
    );
    if !graph.edges().is_empty() {
        println!("{table}");
    }

    if !graph.diagnostics().is_empty() {
        println!();
        for diagnostic in graph.diagnostics() {
            println!("  {} {diagnostic}", style("!").yellow().bold());
        }
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Execute the graph in `path` and stream its log. Returns the terminal
/// status so the caller can pick an exit code.
pub async fn run_graph(
    path: &Path,
    context: Option<&str>,
    state: &AppState,
    json: bool,
    quiet: bool,
) -> Result<RunStatus> {
    let def = load_graph_file(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let initial_context = parse_context(context)?;

    let graph = state
        .graph_service
        .register(&def)
        .await
        .map_err(|e| anyhow::anyhow!("Graph validation failed: {e}"))?;

    let started = state
        .run_service
        .start_run(graph.id(), initial_context, RunMode::Background)
        .await?;
    let run_id = started.id;
    tracing::debug!(%run_id, graph_id = graph.id(), "local run started");

    let mut stream = Box::pin(state.run_service.subscribe(run_id).await?);

    // Ctrl-C requests cooperative cancellation instead of killing the process.
    let run_service = state.run_service.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Err(e) = run_service.cancel_run(run_id).await {
                tracing::debug!(%run_id, error = %e, "cancel after ctrl-c ignored");
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            StreamMessage::Log { event } => {
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else if !quiet {
                    print_event(&event);
                }
            }
            StreamMessage::Status { .. } => break,
        }
    }
    ctrl_c.abort();

    let snapshot = state.run_service.get_run(run_id).await?;

    if json {
        let output = serde_json::json!({
            "run_id": snapshot.id,
            "status": snapshot.status,
            "steps": snapshot.steps,
            "context": snapshot.context,
            "failure": snapshot.failure,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(snapshot.status);
    }

    println!();
    let status = match snapshot.status {
        RunStatus::Completed => style(snapshot.status.to_string()).green().bold(),
        RunStatus::Cancelled => style(snapshot.status.to_string()).yellow().bold(),
        _ => style(snapshot.status.to_string()).red().bold(),
    };
    println!("  Run {}  {}  ({} steps)", style(run_id).dim(), status, snapshot.steps);
    if let Some(failure) = &snapshot.failure {
        println!("  {} {failure}", style("✗").red());
    }
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Object(snapshot.context))?
    );

    Ok(snapshot.status)
}

fn print_event(event: &LogEvent) {
    let level = match event.level {
        LogLevel::Debug => style(format!("{:>5}", event.level)).dim(),
        LogLevel::Info => style(format!("{:>5}", event.level)).green(),
        LogLevel::Warn => style(format!("{:>5}", event.level)).yellow(),
        LogLevel::Error => style(format!("{:>5}", event.level)).red(),
    };
    let node = event
        .node_id
        .as_deref()
        .map(|n| format!(" [{n}]"))
        .unwrap_or_default();
    println!(
        "  {} {level} {}{} {}",
        style(format!("{:>3}", event.seq)).dim(),
        style(event.timestamp.format("%H:%M:%S%.3f")).dim(),
        style(node).cyan(),
        event.message
    );
}
