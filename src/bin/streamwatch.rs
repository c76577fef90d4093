//! Streamwatch CLI binary.
//!
//! Keeps a streaming application live by supervising it over its control
//! socket.
//!
//! # Commands
//!
//! - `run` - Start the supervision loop (default)
//! - `check` - Probe, handshake, and print the current stream status once
//! - `stop` - Ask the application to stop streaming
//! - `auth` - Print the challenge-response credential for given inputs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use streamwatch::{
    compute_auth_response, reachable, CommandFallback, CommandProcessProbe, Config,
    ReconnectPolicy, SessionConfig, SessionHandle, StatusTracker, Supervisor, SupervisorSettings,
    WebSocketConnector, VERSION,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "streamwatch")]
#[command(version = VERSION)]
#[command(about = "Streamwatch - keeps a live stream broadcasting", long_about = None)]
struct Cli {
    /// Config file (default: <config_dir>/streamwatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Control socket host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Control socket port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Control socket password
    #[arg(long, global = true)]
    password: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the stream until interrupted
    Run {
        /// Never trigger the fallback actuator
        #[arg(long)]
        no_fallback: bool,
    },

    /// Check the control endpoint once and print the stream status
    Check,

    /// Stop the stream (the supervisor will restart it if running)
    Stop,

    /// Compute the identify credential for a hello challenge
    Auth {
        /// Shared password
        #[arg(long)]
        password: String,

        /// Salt from the hello message
        #[arg(long)]
        salt: String,

        /// Challenge from the hello message
        #[arg(long)]
        challenge: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Auth {
            password,
            salt,
            challenge,
        }) => {
            println!("{}", compute_auth_response(password, salt, challenge));
            Ok(())
        },
        Some(Commands::Check) => {
            let config = load_config(&cli)?;
            init_logging(cli.verbose || config.watchdog.debug_mode);
            cmd_check(&config)
        },
        Some(Commands::Stop) => {
            let config = load_config(&cli)?;
            init_logging(cli.verbose || config.watchdog.debug_mode);
            cmd_stop(&config)
        },
        Some(Commands::Run { no_fallback }) => {
            let mut config = load_config(&cli)?;
            if *no_fallback {
                config.watchdog.use_fallback_on_failure = false;
            }
            init_logging(cli.verbose || config.watchdog.debug_mode);
            cmd_run(&config)
        },
        None => {
            let config = load_config(&cli)?;
            init_logging(cli.verbose || config.watchdog.debug_mode);
            cmd_run(&config)
        },
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(host) = &cli.host {
        config.connection.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    if let Some(password) = &cli.password {
        config.connection.password = Some(password.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

fn cmd_run(config: &Config) -> anyhow::Result<()> {
    let status = Arc::new(StatusTracker::new());
    let session_config = SessionConfig {
        trace_frames: config.watchdog.debug_mode,
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let supervisor = Supervisor::new(
            config.endpoint(),
            WebSocketConnector::new(Arc::clone(&status), session_config),
            ReconnectPolicy::from_config(&config.retry),
            CommandProcessProbe::new(config.watchdog.process_name.clone()),
            CommandFallback::new(config.watchdog.fallback_command.clone()),
            status,
            SupervisorSettings::from_config(&config.watchdog),
        );

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                    trigger.cancel();
                },
                Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
            }
        });

        supervisor.run(shutdown).await;
    });

    Ok(())
}

fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let endpoint = config.endpoint();
    let status = Arc::new(StatusTracker::new());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        if !reachable(&endpoint, config.retry.probe_timeout()).await {
            anyhow::bail!("{endpoint} is unreachable");
        }
        println!("{endpoint}: reachable");

        let mut session = SessionHandle::establish(
            &endpoint,
            Arc::clone(&status),
            SessionConfig {
                trace_frames: config.watchdog.debug_mode,
            },
            config.retry.handshake_timeout(),
        )
        .await
        .with_context(|| format!("Handshake with {endpoint} failed"))?;
        println!("{endpoint}: identified (session {})", session.id());

        // The initial status query is sent on identification
        tokio::time::sleep(config.watchdog.status_grace()).await;
        let state = status.snapshot();
        session.close().await;

        match (state.is_known(), state.active) {
            (true, true) => println!("stream: active"),
            (true, false) => println!("stream: inactive"),
            (false, _) => anyhow::bail!("no status received within the grace period"),
        }
        Ok(())
    })
}

fn cmd_stop(config: &Config) -> anyhow::Result<()> {
    let endpoint = config.endpoint();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut session = SessionHandle::establish(
            &endpoint,
            Arc::new(StatusTracker::new()),
            SessionConfig {
                trace_frames: config.watchdog.debug_mode,
            },
            config.retry.handshake_timeout(),
        )
        .await
        .with_context(|| format!("Handshake with {endpoint} failed"))?;

        session.request_stop()?;
        // Leave time for the acknowledgment to be logged
        tokio::time::sleep(config.watchdog.status_grace()).await;
        session.close().await;

        println!("{endpoint}: stop requested");
        Ok(())
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
