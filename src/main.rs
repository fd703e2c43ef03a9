//! Claude Squad - terminal supervisor for parallel coding agents
//!
//! Run with `claude-squad` or `claude-squad --help` for usage. The interactive
//! full-screen renderer is out of scope; this is the minimal host needed to
//! exercise the engine end-to-end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_squad::{
    autoyes,
    instance::{Instance, Status},
    tmux::{AttachResult, TmuxExecutor, TmuxMultiplexerFactory},
    Config, Storage, APP_NAME, VERSION,
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Run many interactive coding agents in parallel, each in its own tmux session and git worktree")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all instances
    List {
        /// Show Paused instances too
        #[arg(short, long)]
        all: bool,
    },

    /// Create and start a new instance
    New {
        /// Instance title (used as the tmux session name and branch slug source)
        title: String,

        /// Program to run (defaults to Config.default_program)
        #[arg(short, long)]
        program: Option<String>,

        /// Main repository checkout path (defaults to the current directory)
        #[arg(short = 'd', long)]
        path: Option<PathBuf>,

        /// Auto-confirm this instance's agent prompts
        #[arg(long)]
        auto_yes: bool,
    },

    /// Attach to a running instance's session
    Attach {
        /// Instance title
        title: String,
    },

    /// Pause an instance (commit if dirty, release worktree and session)
    Pause {
        /// Instance title
        title: String,
    },

    /// Resume a paused instance
    Resume {
        /// Instance title
        title: String,
    },

    /// Kill an instance, destroying its worktree, branch, and session
    Kill {
        /// Instance title
        title: String,
    },

    /// Commit and push an instance's branch (requires `gh` auth)
    Push {
        /// Instance title
        title: String,

        /// Commit message (an RFC822-timestamped default is used if omitted)
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show or initialize configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },
}

/// Installs the subscriber. `to_file` is set for commands that hand the controlling
/// terminal to tmux (`Attach`) — writing log lines to stdout there would corrupt the
/// attached session's display, so those go to `log_file` instead.
fn setup_logging(debug: bool, to_file: bool, log_file: &std::path::Path) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
            .add_directive("gix=warn".parse()?)
            .add_directive("tokio=warn".parse()?)
    };

    if to_file {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(log_file)?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

fn report_attach_result(result: Result<AttachResult, claude_squad::Error>) {
    match result {
        Ok(AttachResult::Detached) => info!("Detached from session"),
        Ok(AttachResult::SessionEnded) => info!("Session ended"),
        Ok(AttachResult::Error(e)) => eprintln!("Attach error: {e}"),
        Err(e) => eprintln!("Failed to attach: {e}"),
    }
}

fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Running => "●",
        Status::Paused => "◐",
        Status::Ready => "○",
        Status::Loading => "…",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: failed to load config, using defaults: {e}");
        Config::default()
    });

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: failed to create directories: {e}");
    }

    // Attach hands the controlling terminal to tmux; logging to stdout there would
    // corrupt the attached session's display, so it goes to file instead.
    let attaching = matches!(cli.command, Commands::Attach { .. });
    setup_logging(cli.debug, attaching, &config.log_file_path()?)?;

    let executor = TmuxExecutor::with_max_concurrent(config.max_concurrent_tmux);
    executor.check_installed().await?;
    let factory = TmuxMultiplexerFactory::new(executor);

    let instances_path = Config::instances_file_path()?;
    let mut storage = Storage::load(instances_path)?;
    storage.reconnect_all(&factory).await;

    // The AutoYes daemon runs cooperatively alongside whichever command blocks
    // (Attach); for one-shot commands the process exits before it ever ticks.
    let storage = Arc::new(Mutex::new(storage));
    let daemon = autoyes::spawn(Arc::clone(&storage), Duration::from_millis(config.daemon_poll_interval_ms));

    match cli.command {
        Commands::List { all } => {
            let mut storage = storage.lock().await;
            let cache = storage.diff_cache().clone();
            for instance in storage.instances_mut() {
                if let Err(e) = instance.update_diff_stats(&cache).await {
                    warn!(title = %instance.title, error = %e, "failed to refresh diff stats");
                }
            }

            for instance in storage.instances() {
                if !all && instance.status == Status::Paused {
                    continue;
                }
                let diff = instance
                    .diff_stats
                    .as_ref()
                    .map(|d| format!(" {} file(s), +{} -{}", d.files_changed, d.added, d.removed))
                    .unwrap_or_default();
                println!(
                    "{} {} [{}] ({}){}",
                    status_icon(instance.status),
                    instance.title,
                    instance.branch,
                    instance.program,
                    diff
                );
            }
        }

        Commands::New { title, program, path, auto_yes } => {
            let path = path.unwrap_or(std::env::current_dir()?);
            let program = program.unwrap_or_else(|| config.default_program.clone());
            let worktrees_dir = config.worktrees_dir()?;

            let mut instance = Instance::new(
                title.clone(),
                path,
                program,
                auto_yes || config.auto_yes,
                &config.resolved_branch_prefix(),
                &worktrees_dir,
            );

            instance.start_first(&factory, &config.copy_on_create).await?;

            let mut storage = storage.lock().await;
            storage.insert(instance)?;
            storage.save()?;

            println!("Instance '{title}' created and running.");
            println!("Attach with: claude-squad attach \"{title}\"");
        }

        Commands::Attach { title } => {
            // Extract a shareable handle and drop the lock before blocking on the
            // interactive attach, so the AutoYes daemon keeps ticking for other instances.
            let mux = {
                let storage = storage.lock().await;
                let instance = storage.find(&title).ok_or_else(|| eyre!("instance '{title}' not found"))?;
                instance
                    .multiplexer_handle()
                    .ok_or_else(|| eyre!("instance '{title}' is not Running"))?
            };
            report_attach_result(mux.attach().await);
        }

        Commands::Pause { title } => {
            let mut storage = storage.lock().await;
            let instance = storage.find_mut(&title).ok_or_else(|| eyre!("instance '{title}' not found"))?;
            instance.pause().await?;
            storage.save()?;
            println!("Instance '{title}' paused.");
        }

        Commands::Resume { title } => {
            let mut storage = storage.lock().await;
            let instance = storage.find_mut(&title).ok_or_else(|| eyre!("instance '{title}' not found"))?;
            instance.resume(&factory).await?;
            storage.save()?;
            println!("Instance '{title}' resumed.");
        }

        Commands::Kill { title } => {
            let mut storage = storage.lock().await;
            {
                let instance = storage.find_mut(&title).ok_or_else(|| eyre!("instance '{title}' not found"))?;
                instance.kill().await?;
            }
            storage.remove(&title).await;
            storage.save()?;
            println!("Instance '{title}' killed.");
        }

        Commands::Push { title, message } => {
            let storage = storage.lock().await;
            let instance = storage.find(&title).ok_or_else(|| eyre!("instance '{title}' not found"))?;
            let msg = message.unwrap_or_else(|| {
                format!("[claudesquad] update from '{}' on {}", instance.title, chrono::Utc::now().to_rfc2822())
            });
            let adapter = claude_squad::git::WorktreeAdapter::from_record(instance.worktree.clone());
            adapter.push_changes(&msg).await?;
            println!("Instance '{title}' pushed.");
        }

        Commands::Config { init } => {
            if init {
                config.save()?;
                println!("Configuration initialized at {:?}", Config::config_file_path()?);
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
                println!("Config file: {:?}", Config::config_file_path()?);
                println!("Data dir: {:?}", Config::data_dir()?);
                println!("Instances file: {:?}", Config::instances_file_path()?);
            }
        }
    }

    daemon.abort();
    Ok(())
}
