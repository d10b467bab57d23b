// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sealfleet - encrypted secret bundles rotated across a fleet.
//!
//! This is the binary entry point for the `sealfleet` command.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod app;
mod audit;
mod bundles;
mod host;
mod maintenance;
mod output;
mod rotate;
mod shutdown;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sealfleet_config::SealfleetConfig;
use sealfleet_core::{BundleIdentity, Digest, KeyId, SealError, StrategyId};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::bundles::SecretInput;
use crate::rotate::RolloutArgs;

/// Sealfleet - encrypted secret bundles rotated across a fleet.
#[derive(Parser, Debug)]
#[command(name = "sealfleet", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the XDG and /etc search paths).
    #[arg(long, global = true, env = "SEALFLEET_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new bundle and publish version 1 to its hosts.
    Create {
        identity: BundleIdentity,
        #[command(flatten)]
        input: SecretInput,
        /// Key strategy for the bundle (defaults to keys.default_strategy).
        #[arg(long)]
        strategy: Option<StrategyId>,
        #[command(flatten)]
        rollout: RolloutArgs,
    },
    /// Change secrets in a bundle and publish the next version.
    Edit {
        identity: BundleIdentity,
        #[command(flatten)]
        input: SecretInput,
        /// Remove a secret.
        #[arg(long, value_name = "NAME")]
        unset: Vec<String>,
        /// Seal the new version under a freshly generated key.
        #[arg(long)]
        rotate_key: bool,
        #[command(flatten)]
        rollout: RolloutArgs,
    },
    /// Decrypt and print a stored version.
    View {
        identity: BundleIdentity,
        /// Version to show (defaults to current).
        #[arg(long)]
        version: Option<u64>,
        /// Print names with masked values only.
        #[arg(long)]
        keys_only: bool,
    },
    /// Re-publish the current version, or re-key it with --rotate-key.
    Rotate {
        identity: BundleIdentity,
        #[arg(long)]
        rotate_key: bool,
        #[command(flatten)]
        rollout: RolloutArgs,
    },
    /// Make a previously stored version current again on every host.
    Restore {
        identity: BundleIdentity,
        version: u64,
        #[command(flatten)]
        rollout: RolloutArgs,
    },
    /// Report permission and ownership drift on hosts. Changes nothing.
    Audit {
        /// Only this bundle.
        identity: Option<BundleIdentity>,
        #[arg(long, value_delimiter = ',', value_name = "IDS")]
        hosts: Option<Vec<String>>,
        /// List the paths that would be checked.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        plain: bool,
    },
    /// Copy the state store to a new file.
    Backup { dest: PathBuf },
    /// Show current versions and per-host state.
    Status {
        identity: Option<BundleIdentity>,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        plain: bool,
    },
    /// Show rotation jobs for a bundle, newest first.
    History {
        identity: BundleIdentity,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Delete old stored versions, keeping the newest and the current one.
    Prune {
        identity: BundleIdentity,
        #[arg(long, default_value_t = 5)]
        keep: usize,
        #[arg(long)]
        dry_run: bool,
    },
    /// Host side: check that the deployed artifact matches and opens.
    Verify {
        identity: BundleIdentity,
        #[arg(long)]
        version: u64,
        #[arg(long)]
        checksum: Digest,
        #[arg(long, value_parser = parse_key_id)]
        key_id: KeyId,
        #[arg(long, value_name = "PATH")]
        artifact: String,
        /// Key file for the local strategy.
        #[arg(long, value_name = "PATH")]
        key: Option<String>,
        /// Directory that remote paths are resolved under.
        #[arg(long, env = "SEALFLEET_ROOT", value_name = "DIR")]
        root: Option<PathBuf>,
    },
    /// Host side: run a command with the bundle's secrets in its environment.
    Exec {
        identity: BundleIdentity,
        #[arg(long, env = "SEALFLEET_ROOT", value_name = "DIR")]
        root: Option<PathBuf>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn parse_key_id(s: &str) -> Result<KeyId, SealError> {
    KeyId::parse(s)
}

fn init_tracing(config: &SealfleetConfig, verbose: u8) {
    let level = match verbose {
        0 => config.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sealfleet={level},warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> SealfleetConfig {
    let loaded = match path {
        Some(path) => sealfleet_config::load_and_validate_path(path),
        None => sealfleet_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            sealfleet_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli, config: SealfleetConfig) -> Result<i32, SealError> {
    // Host-side commands never touch the state store.
    match cli.command {
        Commands::Verify {
            identity,
            version,
            checksum,
            key_id,
            artifact,
            key,
            root,
        } => {
            let request = host::VerifyRequest {
                identity,
                version,
                checksum,
                key_id,
                artifact,
                key,
                root,
            };
            host::verify(&config, &request)
                .await
                .map(|()| sealfleet_core::EXIT_OK)
        }
        Commands::Exec {
            identity,
            root,
            command,
        } => host::exec(&config, &identity, root.as_deref(), &command).await,
        command => run_operator(command, config).await,
    }
}

async fn run_operator(command: Commands, config: SealfleetConfig) -> Result<i32, SealError> {
    let app = App::open(config).await?;
    let cancel = shutdown::install_signal_handler();

    match command {
        Commands::Create {
            identity,
            input,
            strategy,
            rollout,
        } => bundles::run_create(&app, identity, &input, strategy, &rollout, cancel).await,
        Commands::Edit {
            identity,
            input,
            unset,
            rotate_key,
            rollout,
        } => {
            bundles::run_edit(&app, identity, &input, unset, rotate_key, &rollout, cancel).await
        }
        Commands::View {
            identity,
            version,
            keys_only,
        } => bundles::run_view(&app, identity, version, keys_only).await,
        Commands::Rotate {
            identity,
            rotate_key,
            rollout,
        } => rotate::run_rotate(&app, identity, rotate_key, &rollout, cancel).await,
        Commands::Restore {
            identity,
            version,
            rollout,
        } => rotate::run_restore(&app, identity, version, &rollout, cancel).await,
        Commands::Audit {
            identity,
            hosts,
            dry_run,
            plain,
        } => audit::run_audit(&app, identity, hosts.as_deref(), dry_run, plain).await,
        Commands::Backup { dest } => maintenance::run_backup(&app, &dest).await,
        Commands::Status {
            identity,
            json,
            plain,
        } => status::run_status(&app, identity, json, plain).await,
        Commands::History {
            identity,
            limit,
            json,
        } => status::run_history(&app, identity, limit, json).await,
        Commands::Prune {
            identity,
            keep,
            dry_run,
        } => maintenance::run_prune(&app, identity, keep, dry_run).await,
        Commands::Verify { .. } | Commands::Exec { .. } => Err(SealError::Internal(
            "host-side command reached the operator path".into(),
        )),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    init_tracing(&config, cli.verbose);

    let code = match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}
