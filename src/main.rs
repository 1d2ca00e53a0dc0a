//! ceremony - run one CA key ceremony described by a YAML config
//!
//! ```bash
//! ceremony --config root.yaml
//! ceremony --config key.yaml --key-id-file intermediate.keyid
//! ceremony --config intermediate.yaml --check
//! ```
//!
//! The process exits non-zero on any failure. Progress goes to stdout, logs
//! go to stderr (`RUST_LOG` overrides the level).

use anyhow::{Context, Result};
use clap::Parser;
use pki_ceremony::ceremony;
use pki_ceremony::configs::CeremonyConfig;
use pki_ceremony::hsm::Pkcs11Module;
use pki_ceremony::outputs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ceremony", version, about = "Offline CA key ceremonies backed by a PKCS#11 HSM")]
struct Args {
    /// Path to the ceremony YAML config
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,

    /// Validate the config and exit without touching the HSM
    #[arg(long)]
    check: bool,

    /// Write the generated key ID to this file
    #[arg(long, value_name = "PATH")]
    key_id_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Accept the single-dash `-config` spelling used by older ceremony scripts
fn normalize_args(args: impl Iterator<Item = String>) -> Vec<String> {
    args.map(|arg| match arg.strip_prefix("-config") {
        Some(rest) if rest.is_empty() || rest.starts_with('=') => format!("--config{}", rest),
        _ => arg,
    })
    .collect()
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse_from(normalize_args(std::env::args()));
    init_logging(args.verbose);

    let config = CeremonyConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    if args.check {
        ceremony::check(&config).context("Config validation failed")?;
        println!("✓ Config {} is valid", args.config.display());
        return Ok(());
    }

    let outcome = ceremony::run(&config, &Pkcs11Module)
        .with_context(|| format!("{} ceremony failed", config.ceremony_type()))?;

    if let (Some(path), Some(key_id)) = (&args.key_id_file, outcome.key_id) {
        outputs::write_atomic(path, format!("{}\n", key_id).as_bytes())
            .context("Failed to write key ID file")?;
        println!("✓ Key ID written to {}", path.display());
    }

    Ok(())
}
