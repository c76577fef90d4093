//! Control protocol handshake and session state.
//!
//! Implements the client side of the v5 control protocol (RPC version 1):
//! the hello/identify handshake with optional challenge-response
//! authentication, request correlation, and stream state events.
//!
//! # Message Flow
//!
//! ```text
//! Client                            Peer
//!    |                                |
//!    |<------- HELLO (op 0) ---------|  Optional auth challenge
//!    |                                |
//!    |-------- IDENTIFY (op 1) ----->|  rpcVersion + credential
//!    |<------- IDENTIFIED (op 2) ----|  Session usable
//!    |                                |
//!    |-------- REQUEST (op 6) ------>|  GetStreamStatus / StartStream
//!    |<------- RESPONSE (op 7) ------|  Matched by requestId
//!    |                                |
//!    |<------- EVENT (op 5) ---------|  StreamStateChanged, any time
//! ```
//!
//! ## State Machine
//!
//! | State            | Description                        | Valid Transitions                     |
//! |------------------|------------------------------------|---------------------------------------|
//! | `Disconnected`   | Not opened                         | → Connecting                          |
//! | `Connecting`     | Transport connect in progress      | → AwaitingHello, Closed               |
//! | `AwaitingHello`  | Waiting for the peer's hello       | → Authenticating, Identified, Closed  |
//! | `Authenticating` | Credential sent                    | → Identified, Closed                  |
//! | `Identified`     | Requests and events flow           | → Closed                              |
//! | `Closed`         | Terminal                           | (none)                                |
//!
//! A hello without an authentication section moves straight to
//! `Identified` once identify is sent. Entering `Identified` always queues
//! a `GetStreamStatus` request.
//!
//! # Usage
//!
//! ```rust,ignore
//! use streamwatch::protocol::Session;
//! use streamwatch::status::StatusTracker;
//!
//! let status = Arc::new(StatusTracker::new());
//! let mut session = Session::new(Some("secret".into()), Arc::clone(&status));
//! session.open()?;
//! session.on_connected()?;
//!
//! for frame in session.handle_text(&hello_text) {
//!     socket.send(frame.to_text()?).await?;
//! }
//! ```

mod auth;
mod message;
mod session;

pub use auth::compute_auth_response;
pub use message::{
    AuthChallenge, EventData, Frame, HelloData, IdentifiedData, IdentifyData, Incoming, OpCode,
    RequestData, RequestStatus, RequestType, ResponseData, STREAM_STATE_CHANGED,
};
pub use session::{CloseReason, Session, SessionState, SessionStats};

/// RPC version requested in identify
pub const RPC_VERSION: u32 = 1;
