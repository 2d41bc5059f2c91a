//! Trustflow CLI - Command-line interface for the Trustflow diff engine
//!
//! Computes trust-domain relation maps from interpreter object graphs and
//! flags relations that a package update newly introduces.

mod commands;
mod logging;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use commands::{Commands, EXIT_ERROR, EXIT_FLAGGED, Outcome};
use logging::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "trustflow",
    author,
    version,
    about = "Trust-domain flow diffing for package updates",
    long_about = "Trustflow compares the trust-domain relations of two versions of a package.\n\n\
                  It reads the object graphs an abstract interpreter produced for each\n\
                  version and reports data flows between domains that only exist after\n\
                  the update, such as caller input newly reaching the network."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        value_enum,
        default_value = "warn",
        global = true,
        help = "Set the log level"
    )]
    pub log_level: LogLevel,

    #[arg(long, global = true, help = "Write logs to the specified file")]
    pub log_file: Option<PathBuf>,

    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub log_json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

fn configure_colors(no_color: bool) {
    let no_color_env = std::env::var("NO_COLOR").is_ok();
    if no_color || no_color_env {
        colored::control::set_override(false);
    }
}

/// Errors exit with a status distinct from flagged results.
fn exit_status(result: &anyhow::Result<Outcome>) -> u8 {
    match result {
        Ok(Outcome::Clean) => 0,
        Ok(Outcome::Flagged) => EXIT_FLAGGED,
        Err(_) => EXIT_ERROR,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = logging::init_logging(&cli);
    configure_colors(cli.no_color);

    let result = match cli.command {
        Commands::Relations(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Cross(args) => args.run(),
        Commands::Init(args) => args.run(),
    };
    if let Err(err) = &result {
        eprintln!("{} {:#}", "error:".red().bold(), err);
    }
    ExitCode::from(exit_status(&result))
}
