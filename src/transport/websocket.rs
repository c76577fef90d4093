//! WebSocket session driver.
//!
//! A spawned driver task owns the socket and the protocol [`Session`]. It is
//! the only writer of the session state and of the
//! [`StatusTracker`](crate::status::StatusTracker). Callers hold a
//! [`SessionHandle`], which enqueues commands and reads the published state;
//! it never waits for a network round-trip.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{probe, BoxFuture, Connector, ControlSession, Endpoint};
use crate::error::{Result, WatchdogError};
use crate::protocol::{Frame, RequestType, Session, SessionState};
use crate::status::StatusTracker;

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bound on waiting for the driver after a local close
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Per-session options.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Log every raw inbound and outbound frame
    pub trace_frames: bool,
}

enum Command {
    Request(RequestType),
    Close,
}

/// Handle to a live control session.
///
/// Dropping the handle tears the socket down.
pub struct SessionHandle {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

impl SessionHandle {
    /// Connect and start the driver. Returns once the transport is up; the
    /// handshake continues in the background.
    pub async fn connect(
        endpoint: &Endpoint,
        status: Arc<StatusTracker>,
        config: SessionConfig,
    ) -> Result<Self> {
        let mut session = Session::new(endpoint.password().map(String::from), status);
        session.open()?;

        let url = endpoint.url();
        info!(session_id = %session.id(), %url, "Connecting to control socket");

        let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                session.on_connect_failed();
                return Err(match e {
                    WsError::Io(io) => WatchdogError::TransportUnreachable(io.to_string()),
                    other => WatchdogError::from(other),
                });
            },
        };
        session.on_connected()?;

        let id = session.id().to_string();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(session.state());
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(drive(
            session,
            ws,
            command_rx,
            state_tx,
            cancel.clone(),
            config.trace_frames,
        ));

        Ok(Self {
            id,
            commands,
            state,
            cancel,
            driver,
        })
    }

    /// Connect and wait for identification, bounded by `handshake_timeout`.
    pub async fn establish(
        endpoint: &Endpoint,
        status: Arc<StatusTracker>,
        config: SessionConfig,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let attempt = async {
            let mut handle = Self::connect(endpoint, status, config).await?;
            handle.wait_identified().await?;
            Ok(handle)
        };

        match tokio::time::timeout(handshake_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(WatchdogError::HandshakeTimeout(
                handshake_timeout.as_millis() as u64,
            )),
        }
    }

    /// Wait until the session is identified or closed.
    pub async fn wait_identified(&mut self) -> Result<()> {
        let state = self
            .state
            .wait_for(|s| *s == SessionState::Identified || s.is_closed())
            .await
            .map(|s| *s)
            .unwrap_or(SessionState::Closed(crate::protocol::CloseReason::IoError));

        match state {
            SessionState::Closed(reason) => Err(reason.to_error()),
            _ => Ok(()),
        }
    }

    /// Session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest state published by the driver
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// True only while identified
    pub fn is_usable(&self) -> bool {
        self.state() == SessionState::Identified
    }

    /// Fire a `GetStreamStatus` request
    pub fn query_status(&self) -> Result<()> {
        self.send(RequestType::GetStreamStatus)
    }

    /// Fire a `StartStream` request
    pub fn request_start(&self) -> Result<()> {
        self.send(RequestType::StartStream)
    }

    /// Fire a `StopStream` request
    pub fn request_stop(&self) -> Result<()> {
        self.send(RequestType::StopStream)
    }

    fn send(&self, request_type: RequestType) -> Result<()> {
        if !self.is_usable() {
            return Err(WatchdogError::RequestFailed(format!(
                "{request_type}: session not usable ({:?})",
                self.state()
            )));
        }
        self.commands
            .send(Command::Request(request_type))
            .map_err(|_| WatchdogError::RequestFailed(format!("{request_type}: driver stopped")))
    }

    /// Send a close frame and wait briefly for the driver to finish.
    pub async fn close(&mut self) {
        if self.commands.send(Command::Close).is_err() {
            return;
        }
        if tokio::time::timeout(CLOSE_GRACE, &mut self.driver)
            .await
            .is_err()
        {
            debug!(session_id = %self.id, "Driver did not stop in time, cancelling");
            self.cancel.cancel();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.driver.abort();
    }
}

impl ControlSession for SessionHandle {
    fn id(&self) -> &str {
        SessionHandle::id(self)
    }

    fn is_usable(&self) -> bool {
        SessionHandle::is_usable(self)
    }

    fn query_status(&self) -> Result<()> {
        SessionHandle::query_status(self)
    }

    fn request_start(&self) -> Result<()> {
        SessionHandle::request_start(self)
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(SessionHandle::close(self))
    }
}

/// Driver loop - runs in a spawned task.
async fn drive(
    mut session: Session,
    ws: WsConnection,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
    trace_frames: bool,
) {
    let (mut sink, mut stream) = ws.split();
    let session_id = session.id().to_string();
    debug!(%session_id, "Driver started");

    while !session.state().is_closed() {
        let outgoing = tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                session.close();
                Vec::new()
            },
            command = commands.recv() => match command {
                Some(Command::Request(request_type)) => match session.request(request_type) {
                    Ok(frame) => vec![frame],
                    Err(e) => {
                        warn!(%session_id, error = %e, "Dropping request");
                        Vec::new()
                    },
                },
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    session.close();
                    Vec::new()
                },
            },
            incoming = stream.next() => match incoming {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    match into_text(message) {
                        Some(text) => {
                            if trace_frames {
                                debug!(%session_id, frame = %text, "<- frame");
                            }
                            session.handle_text(&text)
                        },
                        None => {
                            warn!(%session_id, "Dropping non-UTF-8 binary frame");
                            Vec::new()
                        },
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(%session_id, frame = ?frame, "Peer closed connection");
                    session.on_peer_closed();
                    Vec::new()
                },
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => {
                    warn!(%session_id, error = %e, "WebSocket read failed");
                    session.on_io_error();
                    Vec::new()
                },
                None => {
                    session.on_peer_closed();
                    Vec::new()
                },
            },
        };

        for frame in outgoing {
            let text = match frame.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(%session_id, error = %e, "Failed to encode frame");
                    continue;
                },
            };
            if trace_frames {
                debug!(%session_id, frame = %text, "-> frame");
            }
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!(%session_id, error = %e, "WebSocket write failed");
                session.on_io_error();
                break;
            }
        }

        state_tx.send_replace(session.state());
    }

    // Send a close frame if none went out yet
    let _ = sink.close().await;

    state_tx.send_replace(session.state());
    debug!(%session_id, stats = ?session.stats(), "Driver ended");
}

/// Payload of a data frame as text; binary frames must be valid UTF-8
fn into_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text),
        Message::Binary(data) => String::from_utf8(data).ok(),
        _ => None,
    }
}

/// [`Connector`] backed by real WebSocket sessions.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    status: Arc<StatusTracker>,
    config: SessionConfig,
}

impl WebSocketConnector {
    /// Sessions opened through this connector write into `status`
    pub fn new(status: Arc<StatusTracker>, config: SessionConfig) -> Self {
        Self { status, config }
    }
}

impl Connector for WebSocketConnector {
    type Session = SessionHandle;

    fn probe<'a>(&'a self, endpoint: &'a Endpoint, timeout: Duration) -> BoxFuture<'a, bool> {
        Box::pin(probe::reachable(endpoint, timeout))
    }

    fn establish<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        handshake_timeout: Duration,
    ) -> BoxFuture<'a, Result<Self::Session>> {
        Box::pin(SessionHandle::establish(
            endpoint,
            Arc::clone(&self.status),
            self.config.clone(),
            handshake_timeout,
        ))
    }
}
