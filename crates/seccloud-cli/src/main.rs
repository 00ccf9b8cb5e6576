#![deny(unsafe_code)]

mod commands;
mod exit_code;
mod workspace;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use seccloud_core::{KeyRepositoryError, StoreError};
use seccloud_fs::{ConfigError, FsError};
use tracing_subscriber::EnvFilter;

use crate::commands::{export, get, import, put, rm, space};
use crate::workspace::Workspace;

/// Encrypted storage over local-directory cloud stores
#[derive(Parser)]
#[command(name = "seccloud")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Encrypt a file into the default store
    seccloud --root ~/sc put report report.pdf

    # Decrypt it again
    seccloud --root ~/sc get report -o report.pdf

    # Remove it from every store and forget its key
    seccloud --root ~/sc rm report --purge-keys

    # Write through the cached file layer (deferred upload)
    seccloud --root ~/sc import notes.txt /docs/notes.txt
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Workspace directory holding stores, keys and cache
    #[arg(long, env = "SECCLOUD_ROOT", global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and upload a local file
    Put(put::Args),

    /// Download and decrypt stored content
    Get(get::Args),

    /// Delete content from stores
    Rm(rm::Args),

    /// Show capacity of every store
    Space(space::Args),

    /// Copy a local file into the cached file layer
    Import(import::Args),

    /// Copy a file out of the cached file layer
    Export(export::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);
            let is_quiet = std::env::args().any(|a| a == "-q" || a == "--quiet");
            if !is_quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let Some(root) = cli.root.as_deref() else {
        anyhow::bail!("No workspace given: pass --root or set SECCLOUD_ROOT");
    };
    let workspace = Workspace::open(root)?;

    match cli.command {
        Commands::Put(args) => put::execute(&workspace, &args),
        Commands::Get(args) => get::execute(&workspace, &args),
        Commands::Rm(args) => rm::execute(&workspace, &args),
        Commands::Space(args) => space::execute(&workspace, &args),
        Commands::Import(args) => import::execute(&workspace, &args),
        Commands::Export(args) => export::execute(&workspace, &args),
    }
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Map the first recognized error in the chain to an exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(store_err) = cause.downcast_ref::<StoreError>() {
            return store_exit_code(store_err);
        }

        if let Some(fs_err) = cause.downcast_ref::<FsError>() {
            match fs_err {
                FsError::Store(store_err) => return store_exit_code(store_err),
                FsError::Config(_) | FsError::InvalidPath(_) => return exit_code::CONFIG_INVALID,
                FsError::ContentOpen { source, .. } | FsError::Io(source) => {
                    return io_exit_code(source);
                }
                _ => {}
            }
        }

        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_code::CONFIG_INVALID;
        }

        if let Some(KeyRepositoryError::Corrupt(_)) = cause.downcast_ref::<KeyRepositoryError>() {
            return exit_code::INTEGRITY_FAILED;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return io_exit_code(io_err);
        }
    }

    exit_code::GENERAL_ERROR
}

fn store_exit_code(e: &StoreError) -> u8 {
    match e {
        StoreError::NotFound { .. } => exit_code::NOT_FOUND,
        StoreError::MissingKey { .. } | StoreError::Decryption { .. } => {
            exit_code::INTEGRITY_FAILED
        }
        StoreError::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
            exit_code::PERMISSION_DENIED
        }
        _ if e.is_retryable() => exit_code::STORE_UNAVAILABLE,
        _ => exit_code::GENERAL_ERROR,
    }
}

fn io_exit_code(e: &io::Error) -> u8 {
    match e.kind() {
        io::ErrorKind::NotFound => exit_code::NOT_FOUND,
        io::ErrorKind::PermissionDenied => exit_code::PERMISSION_DENIED,
        _ => exit_code::GENERAL_ERROR,
    }
}
