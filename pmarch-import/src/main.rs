// pmarch-import - CSV import into pmarch archives
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # pmarch-import
//!
//! Imports CSV metric samples into performance metrics archives, and dumps
//! archives in readable form.
//!
//! ## Usage
//!
//! ```bash
//! # Create an archive from a CSV dataset
//! pmarch-import import --csv dataset.csv --archive /var/log/pmarch/20250101
//!
//! # Add more samples to the same archive
//! pmarch-import import --csv more.csv --archive /var/log/pmarch/20250101 --append
//!
//! # Show what was written
//! pmarch-import dump --archive /var/log/pmarch/20250101
//! ```

mod dump;
mod error;
mod import;

use clap::{Parser, Subcommand};
use error::ImportError;
use import::ImportConfig;
use pmarch::LogVersion;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Performance metrics archive import tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a CSV file into an archive
    Import {
        /// CSV file to import
        #[arg(short, long)]
        csv: PathBuf,

        /// Archive base path
        #[arg(short, long)]
        archive: PathBuf,

        /// Append to the archive if it already exists
        #[arg(long)]
        append: bool,

        /// Hostname recorded in a new archive (default: this host)
        #[arg(long)]
        hostname: Option<String>,

        /// Timezone recorded in a new archive (default: local zone)
        #[arg(long)]
        timezone: Option<String>,

        /// Archive format version for a new archive (2 or 3)
        #[arg(long, default_value = "3", value_parser = parse_version)]
        log_version: LogVersion,
    },

    /// Print the contents of an archive
    Dump {
        /// Archive base path
        #[arg(short, long)]
        archive: PathBuf,
    },
}

fn parse_version(s: &str) -> Result<LogVersion, String> {
    s.parse::<u32>()
        .ok()
        .and_then(LogVersion::from_u32)
        .ok_or_else(|| format!("unsupported archive version '{}'", s))
}

fn run(command: Command) -> Result<(), ImportError> {
    match command {
        Command::Import {
            csv,
            archive,
            append,
            hostname,
            timezone,
            log_version,
        } => {
            let config = ImportConfig {
                csv_path: csv,
                archive,
                append,
                hostname,
                timezone,
                version: log_version,
            };
            let summary = import::run(&config)?;
            info!(
                "{} {} rows, {} metrics",
                if summary.appended { "appended" } else { "wrote" },
                summary.rows,
                summary.metrics
            );
            println!("{}", summary.stats.report());
            Ok(())
        }
        Command::Dump { archive } => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            dump::dump(&archive, &mut out)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("pmarch-import v{} (pmarch {})", env!("CARGO_PKG_VERSION"), pmarch::VERSION);

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
