//! stepflow CLI and REST API entry point.
//!
//! Binary name: `stepflow`
//!
//! Parses CLI arguments, loads configuration, wires services, then dispatches
//! to the appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use std::process::ExitCode;

use anyhow::bail;
use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;
use stepflow_infra::config::load_config;
use stepflow_observe::tracing_setup::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};
use stepflow_types::run::RunStatus;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepflow", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let options = TracingOptions {
        filter: cli.log_filter().to_string(),
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Text
        },
        otel: cli.otel,
    };
    if let Err(e) = init_tracing(&options) {
        eprintln!("failed to initialize tracing: {e}");
    }

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = load_config(&cli.config).await;

    match cli.command {
        Commands::Validate { file, normalize } => {
            let state = AppState::init(config)?;
            cli::graph::validate_graph(&file, normalize, &state, cli.json)?;
        }

        Commands::Run {
            file,
            context,
            step_timeout,
        } => {
            if let Some(secs) = step_timeout {
                if !secs.is_finite() || secs <= 0.0 {
                    bail!("--step-timeout must be a positive number of seconds");
                }
                config.engine.step_timeout_secs = secs;
            }
            let state = AppState::init(config)?;
            let status =
                cli::graph::run_graph(&file, context.as_deref(), &state, cli.json, cli.quiet)
                    .await?;
            if status != RunStatus::Completed {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Serve { port, host, graphs } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            let addr = format!("{}:{}", config.server.host, config.server.port);
            let state = AppState::init(config)?;

            for path in &graphs {
                let def = stepflow_core::graph::load_graph_file(path)?;
                let graph = state.graph_service.register(&def).await?;
                if !cli.quiet {
                    println!(
                        "  {} Registered graph '{}'",
                        console::style("✓").green(),
                        console::style(graph.id()).cyan()
                    );
                }
            }

            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, "api server listening");

            if !cli.quiet {
                println!(
                    "  {} stepflow API listening on {}",
                    console::style("⚡").bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::Completions { .. } => {}
    }

    Ok(ExitCode::SUCCESS)
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
