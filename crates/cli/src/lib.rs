pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use probatio_core::config::LoggingConfig;

#[derive(Debug, Parser)]
#[command(
    name = "probatio",
    about = "Probatio operator CLI",
    long_about = "Operate the promotion-approval workflow engine: migrations, demo fixtures, \
                  readiness checks, and config inspection.",
    after_help = "Examples:\n  probatio doctor --json\n  probatio config\n  probatio smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo dataset (units, approver ladder, one in-flight request)")]
    Seed,
    #[command(about = "Run readiness checks plus a full approval-chain walk, with per-check timing")]
    Smoke,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity, and schema visibility")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Structured logs go to stderr so command payloads on stdout stay
/// machine-parseable. Repeat initialization (tests) is tolerated.
pub fn init_logging(config: &LoggingConfig) {
    use probatio_core::config::LogFormat::{Compact, Json, Pretty};
    use tracing::Level;

    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);

    let result = match config.format {
        Compact => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .compact()
            .try_init(),
        Pretty => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .pretty()
            .try_init(),
        Json => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .json()
            .try_init(),
    };
    let _ = result;
}
