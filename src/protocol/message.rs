//! Wire frames for the control protocol.
//!
//! Every frame is a JSON object `{"op": <u8>, "d": {...}}`. The envelope is
//! parsed first and the `d` payload is then decoded into the typed struct
//! for that opcode. Payload fields the watchdog does not use are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RPC_VERSION;
use crate::error::{Result, WatchdogError};

/// Event type carrying streaming output transitions
pub const STREAM_STATE_CHANGED: &str = "StreamStateChanged";

/// Protocol opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Peer greeting, optionally with an auth challenge
    Hello = 0,
    /// Client identification
    Identify = 1,
    /// Peer confirms identification
    Identified = 2,
    /// Client updates session parameters
    Reidentify = 3,
    /// Asynchronous peer event
    Event = 5,
    /// Client request
    Request = 6,
    /// Peer response to a request
    RequestResponse = 7,
    /// Client batch request
    RequestBatch = 8,
    /// Peer response to a batch
    RequestBatchResponse = 9,
}

impl OpCode {
    /// Map a raw opcode, `None` for values outside the protocol
    pub fn from_u8(op: u8) -> Option<Self> {
        match op {
            0 => Some(Self::Hello),
            1 => Some(Self::Identify),
            2 => Some(Self::Identified),
            3 => Some(Self::Reidentify),
            5 => Some(Self::Event),
            6 => Some(Self::Request),
            7 => Some(Self::RequestResponse),
            8 => Some(Self::RequestBatch),
            9 => Some(Self::RequestBatchResponse),
            _ => None,
        }
    }
}

/// Requests the watchdog issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    /// Query whether the stream output is active
    GetStreamStatus,
    /// Start streaming
    StartStream,
    /// Stop streaming
    StopStream,
}

impl RequestType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetStreamStatus => "GetStreamStatus",
            Self::StartStream => "StartStream",
            Self::StopStream => "StopStream",
        }
    }

    /// Parse a wire name
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "GetStreamStatus" => Some(Self::GetStreamStatus),
            "StartStream" => Some(Self::StartStream),
            "StopStream" => Some(Self::StopStream),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw frame envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Opcode
    pub op: u8,
    /// Payload
    #[serde(default)]
    pub d: Value,
}

impl Frame {
    /// Create an identify frame, with the credential when one was computed
    pub fn identify(authentication: Option<String>) -> Self {
        let payload = IdentifyData {
            rpc_version: RPC_VERSION,
            authentication,
        };
        Self {
            op: OpCode::Identify as u8,
            d: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Create a request frame
    pub fn request(request_type: RequestType, request_id: u64) -> Self {
        let payload = RequestData {
            request_type,
            request_id: request_id.to_string(),
        };
        Self {
            op: OpCode::Request as u8,
            d: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Serialize for the wire
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame into a typed inbound message.
    ///
    /// Unknown opcodes and payloads of the wrong shape are reported as
    /// [`WatchdogError::MalformedFrame`].
    pub fn parse(text: &str) -> Result<Incoming> {
        let frame: Frame = serde_json::from_str(text)
            .map_err(|e| WatchdogError::MalformedFrame(format!("invalid envelope: {e}")))?;
        frame.into_incoming()
    }

    /// Decode the payload according to the opcode
    pub fn into_incoming(self) -> Result<Incoming> {
        let op = OpCode::from_u8(self.op)
            .ok_or_else(|| WatchdogError::MalformedFrame(format!("unknown op {}", self.op)))?;

        let decoded = match op {
            OpCode::Hello => serde_json::from_value(self.d).map(Incoming::Hello),
            OpCode::Identified => serde_json::from_value(self.d).map(Incoming::Identified),
            OpCode::Event => serde_json::from_value(self.d).map(Incoming::Event),
            OpCode::RequestResponse => {
                serde_json::from_value(self.d).map(Incoming::RequestResponse)
            },
            other => Ok(Incoming::Other(other)),
        };

        decoded.map_err(|e| WatchdogError::MalformedFrame(format!("bad {op:?} payload: {e}")))
    }
}

/// Decoded inbound message
#[derive(Debug, Clone)]
pub enum Incoming {
    /// op 0
    Hello(HelloData),
    /// op 2
    Identified(IdentifiedData),
    /// op 5
    Event(EventData),
    /// op 7
    RequestResponse(ResponseData),
    /// A valid opcode the client never expects to receive
    Other(OpCode),
}

/// Hello payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloData {
    /// Peer's protocol implementation version
    #[serde(default, rename = "obsWebSocketVersion")]
    pub server_version: Option<String>,
    /// Latest RPC version the peer supports
    #[serde(default)]
    pub rpc_version: Option<u32>,
    /// Present when the peer requires authentication
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

/// Authentication challenge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// Password salt
    pub salt: String,
    /// Per-connection challenge
    pub challenge: String,
}

/// Identify payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyData {
    /// Requested RPC version
    pub rpc_version: u32,
    /// Challenge-response credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
}

/// Identified payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedData {
    /// RPC version the peer settled on
    #[serde(default)]
    pub negotiated_rpc_version: Option<u32>,
}

/// Request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// Request type
    pub request_type: RequestType,
    /// Correlation id
    pub request_id: String,
}

/// Event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    /// Event name
    pub event_type: String,
    /// Event-specific body
    #[serde(default)]
    pub event_data: Value,
}

impl EventData {
    /// `outputActive` of a stream state change, `None` for other events
    pub fn output_active(&self) -> Option<bool> {
        if self.event_type != STREAM_STATE_CHANGED {
            return None;
        }
        self.event_data.get("outputActive").and_then(Value::as_bool)
    }
}

/// Request status block of a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatus {
    /// Whether the request succeeded
    pub result: bool,
    /// Peer status code
    #[serde(default)]
    pub code: i64,
    /// Peer explanation on failure
    #[serde(default)]
    pub comment: Option<String>,
}

/// Request response payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    /// Request type this answers
    pub request_type: String,
    /// Correlation id
    #[serde(default)]
    pub request_id: String,
    /// Outcome, when the peer sends one
    #[serde(default)]
    pub request_status: Option<RequestStatus>,
    /// Response body
    #[serde(default)]
    pub response_data: Option<Value>,
}

impl ResponseData {
    /// Known request type, if any
    pub fn kind(&self) -> Option<RequestType> {
        RequestType::from_wire(&self.request_type)
    }

    /// Numeric correlation id
    pub fn id(&self) -> Option<u64> {
        self.request_id.parse().ok()
    }

    /// False only when the peer reported a failed request
    pub fn succeeded(&self) -> bool {
        self.request_status.as_ref().map_or(true, |s| s.result)
    }

    /// `responseData.outputActive`
    pub fn output_active(&self) -> Option<bool> {
        self.response_data
            .as_ref()
            .and_then(|d| d.get("outputActive"))
            .and_then(Value::as_bool)
    }
}
