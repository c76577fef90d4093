//! Host-side collaborators of the supervisor.
//!
//! - [`ProcessProbe`]: is the controlled application running at all?
//! - [`FallbackActuator`]: trigger a stream start without the control
//!   protocol. Fire-and-forget, there is no feedback channel.
//!
//! The command-backed implementations shell out to the platform's process
//! listing and to an operator-configured program respectively.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::transport::BoxFuture;

/// Liveness check for the controlled application.
pub trait ProcessProbe: Send + Sync {
    /// `Ok(false)` when the application is not running. `Err` only when the
    /// check itself could not be carried out.
    fn is_running(&self) -> BoxFuture<'_, Result<bool>>;
}

/// Out-of-band start trigger.
pub trait FallbackActuator: Send + Sync {
    /// Fire the trigger and return immediately
    fn trigger_start(&self);
}

/// Probe matching a process name with `pgrep` (Unix) or `tasklist` (Windows).
#[derive(Debug, Clone)]
pub struct CommandProcessProbe {
    process_name: String,
}

impl CommandProcessProbe {
    /// Match processes whose name contains `process_name`, case-insensitively
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }

    #[cfg(not(windows))]
    async fn check(&self) -> Result<bool> {
        let status = Command::new("pgrep")
            .arg("-i")
            .arg(&self.process_name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        // pgrep exits 1 when nothing matched
        Ok(status.success())
    }

    #[cfg(windows)]
    async fn check(&self) -> Result<bool> {
        let output = Command::new("tasklist")
            .arg("/FI")
            .arg(format!("IMAGENAME eq {}*", self.process_name))
            .stdin(Stdio::null())
            .output()
            .await?;
        let listing = String::from_utf8_lossy(&output.stdout).to_lowercase();
        Ok(output.status.success() && listing.contains(&self.process_name.to_lowercase()))
    }
}

impl ProcessProbe for CommandProcessProbe {
    fn is_running(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let running = self.check().await?;
            debug!(process = %self.process_name, running, "Process probe");
            Ok(running)
        })
    }
}

/// Fallback that spawns an operator-configured program.
#[derive(Debug, Clone, Default)]
pub struct CommandFallback {
    argv: Option<Vec<String>>,
}

impl CommandFallback {
    /// `argv[0]` is the program, the rest its arguments. `None` disables
    /// the trigger (it only logs).
    pub fn new(argv: Option<Vec<String>>) -> Self {
        Self {
            argv: argv.filter(|a| !a.is_empty()),
        }
    }

    /// Whether a program is configured
    pub fn is_configured(&self) -> bool {
        self.argv.is_some()
    }
}

impl FallbackActuator for CommandFallback {
    fn trigger_start(&self) {
        let Some((program, args)) = self.argv.as_ref().and_then(|a| a.split_first()) else {
            warn!("Fallback requested but no fallback_command is configured");
            return;
        };

        let spawned = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                info!(%program, "Fallback start triggered");
                // Reap the child in the background
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) => debug!(%status, "Fallback command exited"),
                        Err(e) => warn!(error = %e, "Fallback command wait failed"),
                    }
                });
            },
            Err(e) => warn!(%program, error = %e, "Failed to run fallback command"),
        }
    }
}
