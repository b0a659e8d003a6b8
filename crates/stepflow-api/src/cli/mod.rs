//! CLI command definitions and dispatch for the `stepflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod graph;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run and serve graph workflows.
#[derive(Parser)]
#[command(name = "stepflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the configuration file.
    #[arg(
        long,
        global = true,
        env = "STEPFLOW_CONFIG",
        default_value = stepflow_infra::config::DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, env = "STEPFLOW_LOG_JSON")]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "STEPFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on (overrides the config file).
        #[arg(short, long, env = "STEPFLOW_PORT")]
        port: Option<u16>,

        /// Host to bind to (overrides the config file).
        #[arg(long, env = "STEPFLOW_HOST")]
        host: Option<String>,

        /// Graph files (JSON or YAML) to register at startup.
        #[arg(long = "graph", value_name = "FILE")]
        graphs: Vec<PathBuf>,
    },

    /// Parse and validate a graph file, printing diagnostics.
    Validate {
        /// Graph file (.json, .yaml or .yml).
        file: PathBuf,

        /// Print the normalized definition as YAML.
        #[arg(long)]
        normalize: bool,
    },

    /// Execute a graph locally with the built-in callables.
    Run {
        /// Graph file (.json, .yaml or .yml).
        file: PathBuf,

        /// Initial context as a JSON object.
        #[arg(long, value_name = "JSON")]
        context: Option<String>,

        /// Per-step timeout in seconds (overrides the config file).
        #[arg(long, value_name = "SECS")]
        step_timeout: Option<f64>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Cli {
    /// Filter directives derived from `-v` / `--quiet`.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,stepflow_core=debug,stepflow_api=debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_context() {
        let cli = Cli::try_parse_from([
            "stepflow",
            "--json",
            "run",
            "graphs/code_review.json",
            "--context",
            r#"{"issues_open": 1}"#,
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run { file, context, .. } => {
                assert_eq!(file, PathBuf::from("graphs/code_review.json"));
                assert_eq!(context.as_deref(), Some(r#"{"issues_open": 1}"#));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_log_filter_from_flags() {
        let cli = Cli::try_parse_from(["stepflow", "-vv", "validate", "g.json"]).unwrap();
        assert_eq!(cli.log_filter(), "trace");
        let cli = Cli::try_parse_from(["stepflow", "--quiet", "validate", "g.json"]).unwrap();
        assert_eq!(cli.log_filter(), "error");
    }
}
