//! Session state machine for the control protocol.
//!
//! [`Session`] is transport-free: the driver feeds it connection events and
//! inbound text frames, and sends whatever frames it returns. This keeps the
//! handshake and dispatch rules testable without a socket.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::auth::compute_auth_response;
use super::message::{Frame, HelloData, Incoming, RequestType, ResponseData};
use crate::error::{Result, WatchdogError};
use crate::status::StatusTracker;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Connect failed or timed out
    TransportError,
    /// Peer closed or answered with an error during the handshake
    AuthRejected,
    /// Peer closed an identified session
    PeerClosed,
    /// Read or write failure
    IoError,
    /// Closed by this client
    Local,
}

impl CloseReason {
    /// Error reported to whoever was waiting on the session
    pub fn to_error(self) -> WatchdogError {
        match self {
            Self::TransportError => {
                WatchdogError::TransportUnreachable("connect failed".to_string())
            },
            Self::AuthRejected => {
                WatchdogError::AuthRejected("peer refused identification".to_string())
            },
            Self::PeerClosed => WatchdogError::PeerClosed("connection closed by peer".to_string()),
            Self::IoError => WatchdogError::RequestFailed("transport failure".to_string()),
            Self::Local => WatchdogError::InvalidState("session closed locally".to_string()),
        }
    }
}

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet opened
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Connected, waiting for the peer's hello
    AwaitingHello,
    /// Credential sent, waiting for identified
    Authenticating,
    /// Ready for requests
    Identified,
    /// Terminal
    Closed(CloseReason),
}

impl SessionState {
    /// Terminal check
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Control protocol session
pub struct Session {
    /// Session ID (log correlation only)
    id: String,
    /// Current state
    state: SessionState,
    /// Shared password, `None` for unauthenticated peers
    password: Option<String>,
    /// Next request id, starts at 1
    next_request_id: u64,
    /// Outstanding requests by id
    pending: HashMap<u64, RequestType>,
    /// Where status responses and events land
    status: Arc<StatusTracker>,
    /// Frames produced for the peer
    messages_sent: u64,
    /// Frames accepted from the peer
    messages_received: u64,
    /// Frames dropped as malformed
    malformed: u64,
}

impl Session {
    /// Create a session for `password`. Empty passwords count as absent.
    pub fn new(password: Option<String>, status: Arc<StatusTracker>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Disconnected,
            password: password.filter(|p| !p.is_empty()),
            next_request_id: 1,
            pending: HashMap::new(),
            status,
            messages_sent: 0,
            messages_received: 0,
            malformed: 0,
        }
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Only an identified session accepts requests
    pub fn is_usable(&self) -> bool {
        self.state == SessionState::Identified
    }

    /// Requests sent and not yet answered
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// `Disconnected → Connecting`
    pub fn open(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(WatchdogError::InvalidState(format!(
                "Cannot open session in state {:?}",
                self.state
            )));
        }
        self.state = SessionState::Connecting;
        Ok(())
    }

    /// `Connecting → AwaitingHello`
    pub fn on_connected(&mut self) -> Result<()> {
        if self.state != SessionState::Connecting {
            return Err(WatchdogError::InvalidState(format!(
                "Cannot accept connection in state {:?}",
                self.state
            )));
        }
        debug!(session_id = %self.id, "Transport connected, awaiting hello");
        self.state = SessionState::AwaitingHello;
        Ok(())
    }

    /// `Connecting → Closed(TransportError)`
    pub fn on_connect_failed(&mut self) {
        self.finish(CloseReason::TransportError);
    }

    /// Transport closed by the peer
    pub fn on_peer_closed(&mut self) {
        let reason = match self.state {
            SessionState::Connecting => CloseReason::TransportError,
            SessionState::AwaitingHello | SessionState::Authenticating => {
                CloseReason::AuthRejected
            },
            _ => CloseReason::PeerClosed,
        };
        self.finish(reason);
    }

    /// Read or write failure
    pub fn on_io_error(&mut self) {
        self.finish(CloseReason::IoError);
    }

    /// Local close
    pub fn close(&mut self) {
        self.finish(CloseReason::Local);
    }

    fn finish(&mut self, reason: CloseReason) {
        if self.state.is_closed() {
            return;
        }
        info!(session_id = %self.id, ?reason, from = ?self.state, "Session closed");
        self.state = SessionState::Closed(reason);
        self.pending.clear();
    }

    /// Error describing how the session ended, `None` while still open
    pub fn close_error(&self) -> Option<WatchdogError> {
        match self.state {
            SessionState::Closed(reason) => Some(reason.to_error()),
            _ => None,
        }
    }

    /// Process one inbound text frame and return frames to send.
    ///
    /// Malformed frames are logged and dropped; they never change state.
    pub fn handle_text(&mut self, text: &str) -> Vec<Frame> {
        match Frame::parse(text) {
            Ok(incoming) => {
                self.messages_received += 1;
                self.process(incoming)
            },
            Err(e) => {
                self.malformed += 1;
                warn!(session_id = %self.id, error = %e, "Dropping malformed frame");
                Vec::new()
            },
        }
    }

    /// Process an already decoded message
    pub fn process(&mut self, incoming: Incoming) -> Vec<Frame> {
        match (self.state, incoming) {
            (SessionState::AwaitingHello, Incoming::Hello(hello)) => self.process_hello(&hello),
            (SessionState::Authenticating, Incoming::Identified(identified)) => {
                info!(
                    session_id = %self.id,
                    rpc_version = ?identified.negotiated_rpc_version,
                    "Identified with peer"
                );
                self.enter_identified()
            },
            (SessionState::AwaitingHello | SessionState::Authenticating, other) => {
                warn!(
                    session_id = %self.id,
                    frame = ?other,
                    "Unexpected frame during handshake"
                );
                self.finish(CloseReason::AuthRejected);
                Vec::new()
            },
            (SessionState::Identified, Incoming::RequestResponse(response)) => {
                self.process_response(&response);
                Vec::new()
            },
            (SessionState::Identified, Incoming::Event(event)) => {
                if let Some(active) = event.output_active() {
                    info!(
                        session_id = %self.id,
                        active,
                        "Stream state changed"
                    );
                    self.status.set(active);
                } else {
                    debug!(session_id = %self.id, event = %event.event_type, "Ignoring event");
                }
                Vec::new()
            },
            (SessionState::Identified, Incoming::Identified(_)) => {
                debug!(session_id = %self.id, "Peer confirmed identification");
                Vec::new()
            },
            (state, other) => {
                debug!(session_id = %self.id, ?state, frame = ?other, "Ignoring frame");
                Vec::new()
            },
        }
    }

    fn process_hello(&mut self, hello: &HelloData) -> Vec<Frame> {
        debug!(
            session_id = %self.id,
            server_version = ?hello.server_version,
            auth_required = hello.authentication.is_some(),
            "Received hello"
        );

        match (&hello.authentication, &self.password) {
            (Some(challenge), Some(password)) => {
                let credential =
                    compute_auth_response(password, &challenge.salt, &challenge.challenge);
                self.state = SessionState::Authenticating;
                self.messages_sent += 1;
                vec![Frame::identify(Some(credential))]
            },
            (Some(_), None) => {
                warn!(
                    session_id = %self.id,
                    "Peer requires authentication but no password is configured"
                );
                self.finish(CloseReason::AuthRejected);
                Vec::new()
            },
            (None, _) => {
                self.messages_sent += 1;
                let mut frames = vec![Frame::identify(None)];
                frames.extend(self.enter_identified());
                frames
            },
        }
    }

    fn enter_identified(&mut self) -> Vec<Frame> {
        self.state = SessionState::Identified;
        self.request(RequestType::GetStreamStatus)
            .map(|frame| vec![frame])
            .unwrap_or_default()
    }

    fn process_response(&mut self, response: &ResponseData) {
        let correlated = response.id().and_then(|id| self.pending.remove(&id));
        if correlated.is_none() {
            debug!(
                session_id = %self.id,
                request_id = %response.request_id,
                "Response for unknown request id"
            );
        }

        if !response.succeeded() {
            let status = response.request_status.as_ref();
            warn!(
                session_id = %self.id,
                request_type = %response.request_type,
                code = status.map_or(0, |s| s.code),
                comment = status.and_then(|s| s.comment.as_deref()).unwrap_or(""),
                "Request failed"
            );
            return;
        }

        match response.kind().or(correlated) {
            Some(RequestType::GetStreamStatus) => match response.output_active() {
                Some(active) => {
                    info!(session_id = %self.id, active, "Streaming status");
                    self.status.set(active);
                },
                None => warn!(session_id = %self.id, "Status response without outputActive"),
            },
            Some(RequestType::StartStream) => {
                info!(session_id = %self.id, "Stream start acknowledged");
            },
            Some(RequestType::StopStream) => {
                info!(session_id = %self.id, "Stream stop acknowledged");
            },
            None => {
                debug!(
                    session_id = %self.id,
                    request_type = %response.request_type,
                    "Ignoring response"
                );
            },
        }
    }

    /// Build a request frame, assigning the next request id
    pub fn request(&mut self, request_type: RequestType) -> Result<Frame> {
        if !self.is_usable() {
            return Err(WatchdogError::InvalidState(format!(
                "Cannot send {request_type} in state {:?}",
                self.state
            )));
        }

        let id = self.next_request_id;
        self.next_request_id += 1;
        // At most one outstanding id per request type
        self.pending.retain(|_, kind| *kind != request_type);
        self.pending.insert(id, request_type);
        self.messages_sent += 1;

        debug!(session_id = %self.id, request_id = id, %request_type, "Sending request");
        Ok(Frame::request(request_type, id))
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            state: self.state,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            malformed_frames: self.malformed,
            pending_requests: self.pending.len(),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Session ID
    pub session_id: String,
    /// Current state
    pub state: SessionState,
    /// Frames sent
    pub messages_sent: u64,
    /// Frames received and understood
    pub messages_received: u64,
    /// Frames dropped as malformed
    pub malformed_frames: u64,
    /// Requests awaiting a response
    pub pending_requests: usize,
}
