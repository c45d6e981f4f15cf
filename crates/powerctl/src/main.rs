//! powerctl: per-application power and device setting profiles.
//!
//! `powerctl run` is the daemon; the other subcommands inspect and edit the
//! configuration and stored profiles.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

mod cli;

/// Shared shutdown flag, cleared by the Ctrl+C handler.
pub static RUNNING: AtomicBool = AtomicBool::new(true);

#[derive(Parser)]
#[command(
    name = "powerctl",
    version,
    about = "Per-application power and device setting profiles"
)]
struct Args {
    /// Output as JSON (for status, config, profiles, profile show)
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: cli::Command,
}

/// Initialize the logger. The daemon logs at `info` by default, everything
/// else at `warn`; `RUST_LOG` overrides both.
///
/// With a log file, output goes there, falling back to stderr if the file
/// can't be opened.
fn init_logger(verbose: bool, default_level: &str, log_file: Option<&Path>) {
    let level = if verbose { "debug" } else { default_level };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_target(false);

    if let Some(path) = log_file {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match std::fs::File::create(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {e}", path.display()),
        }
    } else {
        builder.format_timestamp(None);
    }

    builder.init();
}

fn main() {
    let args = Args::parse();

    match &args.command {
        cli::Command::Run { log_file, .. } => init_logger(args.verbose, "info", log_file.as_deref()),
        _ => init_logger(args.verbose, "warn", None),
    }

    ctrlc::set_handler(move || {
        RUNNING.store(false, Ordering::SeqCst);
    })
    .ok();

    if let Err(e) = cli::run(args.command, args.json, args.config.as_deref()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
