//! # Streamwatch - Live Stream Watchdog
//!
//! Keeps a streaming application broadcasting by supervising it over its
//! WebSocket control protocol, and restarting the broadcast when it stops.
//!
//! ## Features
//!
//! - **Control protocol client**: hello/identify handshake with
//!   challenge-response authentication, request correlation, stream events
//! - **Bounded reconnects**: iterative retry with a fixed delay and a
//!   TCP pre-check that separates "unreachable" from "rejected"
//! - **Supervision loop**: periodic liveness check, status poll, start
//!   request, and an out-of-band fallback when the protocol path is down
//! - **Clean shutdown**: SIGINT/SIGTERM close the session and exit 0
//!
//! ## Architecture
//!
//! ```text
//!  Supervisor ──► ProcessProbe (is the app running?)
//!      │
//!      ├──► ReconnectPolicy ──► reachable() ──► SessionHandle::establish()
//!      │                                              │
//!      │                                        driver task
//!      │                                   (socket + protocol::Session)
//!      │                                              │
//!      ├──◄──────────── StatusTracker ◄───────────────┘
//!      │
//!      └──► FallbackActuator (protocol path unavailable)
//! ```
//!
//! The driver task is the only writer of session state and of the
//! [`StatusTracker`]. The supervisor only reads them and enqueues requests,
//! so no request ever blocks on a network round-trip.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streamwatch::{
//!     CommandFallback, CommandProcessProbe, Config, ReconnectPolicy, SessionConfig,
//!     StatusTracker, Supervisor, SupervisorSettings, WebSocketConnector,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::load(None)?;
//! let status = Arc::new(StatusTracker::new());
//! let supervisor = Supervisor::new(
//!     config.endpoint(),
//!     WebSocketConnector::new(Arc::clone(&status), SessionConfig::default()),
//!     ReconnectPolicy::from_config(&config.retry),
//!     CommandProcessProbe::new(&config.watchdog.process_name),
//!     CommandFallback::new(config.watchdog.fallback_command.clone()),
//!     status,
//!     SupervisorSettings::from_config(&config.watchdog),
//! );
//! supervisor.run(CancellationToken::new()).await;
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Wire frames, auth codec, session state machine
//! - [`transport`]: Reachability probe and WebSocket session driver
//! - [`retry`]: Bounded reconnect policy
//! - [`status`]: Shared streaming state
//! - [`supervisor`]: Periodic supervision loop
//! - [`process`]: Process liveness probe and fallback actuator
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod error;
pub mod process;
pub mod protocol;
pub mod retry;
pub mod status;
pub mod supervisor;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use error::{Result, WatchdogError};
pub use process::{CommandFallback, CommandProcessProbe, FallbackActuator, ProcessProbe};
pub use protocol::{compute_auth_response, Session, SessionState};
pub use retry::{ReconnectPolicy, RetryCounter};
pub use status::{StatusTracker, StreamingState};
pub use supervisor::{Supervisor, SupervisorSettings, TickOutcome};
pub use transport::{
    reachable, Connector, ControlSession, Endpoint, SessionConfig, SessionHandle,
    WebSocketConnector,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
