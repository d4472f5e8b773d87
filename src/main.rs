//! swfpatch CLI - patch remote SWF assets and serve them locally
//!
//! Usage: swfpatch <COMMAND>
//!
//! Commands:
//!   sync     Reconcile enabled hacks against the serving directory
//!   serve    Run the local origin server (with an initial sync)
//!   status   Show enabled/deployed state per hack
//!   enable   Enable a hack
//!   disable  Disable a hack
//!   resolve  Show the redirect decision for a URL
//!   setup    Install the FFDec tool distribution

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use swfpatch::config::{load_hacks, AppDirs, Hack, Toggles};
use swfpatch::deploy::Deployer;
use swfpatch::fetch::HttpFetcher;
use swfpatch::ffdec::Ffdec;
use swfpatch::redirect::Redirector;
use swfpatch::server::{OriginServer, DEFAULT_PORT};
use swfpatch::workarea::WorkAreaRegistry;

/// swfpatch - patch remote SWF game assets and serve them locally
#[derive(Parser, Debug)]
#[command(name = "swfpatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Application root directory (hacks.json, config.json, serving tree)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile enabled hacks against the serving directory
    Sync,

    /// Run the local origin server until interrupted
    Serve {
        /// Skip the initial reconciliation pass
        #[arg(long)]
        no_sync: bool,
    },

    /// Show enabled/deployed state per hack
    Status,

    /// Enable a hack (takes effect on the next sync)
    Enable {
        /// Hack identifier from hacks.json
        id: String,
    },

    /// Disable a hack (takes effect on the next sync)
    Disable {
        /// Hack identifier from hacks.json
        id: String,
    },

    /// Show the redirect decision for a request URL
    Resolve {
        /// Request URL to test
        url: String,

        /// Local origin port to rewrite against
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Install the FFDec tool distribution and probe Java
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let root = cli.root.unwrap_or_else(AppDirs::default_root);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create root directory {}", root.display()))?;
    let dirs = AppDirs::new(root);

    match cli.command {
        Commands::Sync => cmd_sync(&dirs).await,
        Commands::Serve { no_sync } => cmd_serve(&dirs, no_sync).await,
        Commands::Status => cmd_status(&dirs),
        Commands::Enable { id } => cmd_toggle(&dirs, &id, true),
        Commands::Disable { id } => cmd_toggle(&dirs, &id, false),
        Commands::Resolve { url, port } => cmd_resolve(&dirs, &url, port),
        Commands::Setup => cmd_setup(&dirs).await,
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_state(dirs: &AppDirs) -> Result<(Vec<Hack>, Toggles)> {
    let hacks_file = dirs.hacks_file();
    let hacks = load_hacks(&hacks_file)
        .with_context(|| format!("failed to load {}", hacks_file.display()))?;
    let toggles = Toggles::load(&dirs.config_file()).context("failed to load config.json")?;
    Ok((hacks, toggles))
}

async fn cmd_sync(dirs: &AppDirs) -> Result<()> {
    let (hacks, toggles) = load_state(dirs)?;
    let fetcher = HttpFetcher::new()?;
    let ffdec = Ffdec::new(dirs.tool_dir());
    ffdec
        .setup(&fetcher, None)
        .await
        .context("FFDec setup failed")?;

    let registry = WorkAreaRegistry::new();
    spawn_interrupt_cleanup(registry.clone());

    let deployer = Deployer::new(
        fetcher,
        ffdec,
        dirs.serving_root(),
        dirs.work_root(),
        registry,
    );
    let results = deployer.sync(&hacks, &toggles).await;

    let mut failures = 0;
    for (id, outcome) in &results {
        if outcome.is_failure() {
            failures += 1;
            eprintln!("✗ {id}: {outcome}");
        } else {
            println!("✓ {id}: {outcome}");
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} hack(s) failed to reconcile");
    }
    Ok(())
}

async fn cmd_serve(dirs: &AppDirs, no_sync: bool) -> Result<()> {
    let (hacks, toggles) = load_state(dirs)?;

    let server = OriginServer::bind(dirs.serving_root())
        .await
        .context("failed to start local origin server")?;
    let port = server.port();

    let registry = WorkAreaRegistry::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    {
        // The handler tolerates repeated signals; cleanup is idempotent
        let registry = registry.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                registry.cleanup_all();
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let server_task = {
        let mut rx = shutdown_rx.clone();
        tokio::spawn(server.serve(async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }))
    };

    println!("Local origin server on http://127.0.0.1:{port}");
    let redirector = Redirector::new(&hacks, port);
    for (url, id) in redirector.mappings() {
        let state = if toggles.is_enabled(id) { "on" } else { "off" };
        println!("  {url} -> {id} [{state}]");
    }

    if !no_sync {
        let fetcher = HttpFetcher::new()?;
        let ffdec = Ffdec::new(dirs.tool_dir());
        // A broken tool setup degrades deploys but leaves serving intact
        match ffdec.setup(&fetcher, None).await {
            Ok(()) => {
                let deployer = Deployer::new(
                    fetcher,
                    ffdec,
                    dirs.serving_root(),
                    dirs.work_root(),
                    registry.clone(),
                );
                for (id, outcome) in deployer.sync(&hacks, &toggles).await {
                    println!("  sync {id}: {outcome}");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "FFDec setup failed; serving existing artifacts only");
            }
        }
    }

    println!("Press Ctrl+C to stop");
    server_task
        .await
        .context("origin server task panicked")?
        .context("origin server error")?;

    // Covers work areas created after the signal handler last ran
    registry.cleanup_all();
    println!("Shut down.");
    Ok(())
}

fn cmd_status(dirs: &AppDirs) -> Result<()> {
    let (hacks, toggles) = load_state(dirs)?;
    if hacks.is_empty() {
        println!("No hacks defined in {}", dirs.hacks_file().display());
        return Ok(());
    }
    for hack in &hacks {
        let enabled = toggles.is_enabled(&hack.id);
        let deployed = hack
            .install_rel_path()
            .map(|rel| dirs.serving_root().join(rel).exists())
            .unwrap_or(false);
        println!(
            "{:<20} enabled={:<5} deployed={:<5} {}",
            hack.id, enabled, deployed, hack.title
        );
    }
    Ok(())
}

fn cmd_toggle(dirs: &AppDirs, id: &str, enabled: bool) -> Result<()> {
    let (hacks, mut toggles) = load_state(dirs)?;
    if !hacks.iter().any(|h| h.id == id) {
        anyhow::bail!("unknown hack '{id}' (see 'swfpatch status')");
    }
    toggles.set(id, enabled);
    toggles.save(&dirs.config_file())?;
    println!(
        "{id} {}. Run 'swfpatch sync' to apply.",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn cmd_resolve(dirs: &AppDirs, url: &str, port: u16) -> Result<()> {
    let (hacks, toggles) = load_state(dirs)?;
    let redirector = Redirector::new(&hacks, port);
    match redirector.should_redirect(url, &toggles) {
        Some(target) => println!("{target}"),
        None => println!("no redirect (pass through)"),
    }
    Ok(())
}

async fn cmd_setup(dirs: &AppDirs) -> Result<()> {
    let fetcher = HttpFetcher::new()?;
    let ffdec = Ffdec::new(dirs.tool_dir());

    let java = ffdec.java().await.context("Java runtime not found")?;
    println!("Java {} at {}", java.version, java.path.display());

    ffdec
        .setup(&fetcher, None)
        .await
        .context("FFDec setup failed")?;
    println!("FFDec installed at {}", ffdec.jar_path().display());
    Ok(())
}

fn spawn_interrupt_cleanup(registry: WorkAreaRegistry) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            registry.cleanup_all();
            std::process::exit(130);
        }
    });
}
