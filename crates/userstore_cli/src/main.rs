//! `userstore` command-line entry point.
//!
//! # Responsibility
//! - Open the store, run the select probe once, print the JSON report.
//! - Stdout carries only the report; logs go to stderr or a log directory.
//! - Exit non-zero when bootstrap or the seed/verify steps fail.

use clap::Parser;
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;
use userstore_core::{
    default_log_level, init_logging, open_db, open_db_in_memory, spacing_variants, ProbeService,
    SqliteUserRepository, DEFAULT_SELECT,
};

/// Seed a user and probe raw select customizations against it.
#[derive(Debug, Parser)]
#[command(name = "userstore", version)]
struct Cli {
    /// SQLite database file. Uses an in-memory database when omitted.
    #[arg(long, env = "USERSTORE_DB")]
    db: Option<PathBuf>,

    /// trace|debug|info|warn|error. Defaults to debug in debug builds.
    #[arg(long, env = "USERSTORE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Absolute directory for rotating log files. Logs go to stderr when omitted.
    #[arg(long)]
    log_dir: Option<String>,

    /// Name of the seeded user.
    #[arg(long, default_value = "Alice")]
    name: String,

    /// Raw select fragment to probe; repeatable.
    /// Defaults to both spellings of `MAX(id) AS id`.
    #[arg(long = "select")]
    selects: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = cli.log_level.as_deref().unwrap_or(default_log_level());
    if let Err(err) = init_logging(level, cli.log_dir.as_deref()) {
        eprintln!("userstore: {err}");
        return ExitCode::FAILURE;
    }

    let opened = match &cli.db {
        Some(path) => open_db(path),
        None => open_db_in_memory(),
    };
    let conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!("event=cli_run module=cli status=error stage=open error={err}");
            return ExitCode::FAILURE;
        }
    };

    let selects = if cli.selects.is_empty() {
        spacing_variants(DEFAULT_SELECT)
    } else {
        cli.selects
    };

    let service = ProbeService::new(SqliteUserRepository::new(&conn));
    let report = match service.run(&cli.name, &selects) {
        Ok(report) => report,
        Err(err) => {
            error!("event=cli_run module=cli status=error stage=probe error={err}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("event=cli_run module=cli status=error stage=report error={err}");
            ExitCode::FAILURE
        }
    }
}
