//! Transport layer for the control socket.
//!
//! Provides:
//! - **Reachability probe**: a bare TCP connect used to tell "peer down"
//!   apart from "peer rejected us" before any handshake is attempted
//! - **WebSocket sessions**: a driver task that owns the socket and the
//!   protocol [`Session`](crate::protocol::Session), exposed through a
//!   non-blocking [`SessionHandle`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Supervisor / ReconnectPolicy      │
//! │        (generic over Connector)          │
//! └──────────────────┬──────────────────────┘
//!                    │
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  reachable()    │ │  SessionHandle  │──► driver task
//! │  (TCP probe)    │ │  (commands)     │    (socket + Session)
//! └─────────────────┘ └─────────────────┘
//! ```

mod probe;
mod websocket;

pub use probe::reachable;
pub use websocket::{SessionConfig, SessionHandle, WebSocketConnector};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::Result;

/// Boxed future used at the trait seams
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Control endpoint, immutable for the process lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    password: Option<String>,
}

impl Endpoint {
    /// Create an endpoint. An empty password is treated as absent.
    pub fn new(host: impl Into<String>, port: u16, password: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.filter(|p| !p.is_empty()),
        }
    }

    /// Host name or address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Shared password, if any
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// `host:port` for socket connects
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// WebSocket URL
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// An established control session as seen by the supervisor.
///
/// Request methods only enqueue; results are observed through the
/// [`StatusTracker`](crate::status::StatusTracker).
pub trait ControlSession: Send {
    /// Session ID for logging
    fn id(&self) -> &str;

    /// True only while identified
    fn is_usable(&self) -> bool;

    /// Fire a status query
    fn query_status(&self) -> Result<()>;

    /// Fire a start request
    fn request_start(&self) -> Result<()>;

    /// Close the session and wait for the socket to be torn down
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Something that can open control sessions.
pub trait Connector: Send + Sync {
    /// Session type produced
    type Session: ControlSession;

    /// Cheap reachability check, never fails past its boundary
    fn probe<'a>(&'a self, endpoint: &'a Endpoint, timeout: Duration) -> BoxFuture<'a, bool>;

    /// Open a session and wait until it is identified
    fn establish<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        handshake_timeout: Duration,
    ) -> BoxFuture<'a, Result<Self::Session>>;
}
