//! Architect wire protocol: tagged events over a reliable ordered
//! bidirectional message stream, with an opaque type-tagged payload
//! envelope and a length-prefixed frame codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod frame;
pub mod messages;

pub const PROTOCOL_VERSION: u32 = 1;

/// Request/notification kind carried by every [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Register this process's workers (request/response).
    ClientRegisterWorkers,
    /// Request segment-to-partition assignment (request/response).
    ClientUnaryRequestPipelineAssignment,
    /// Demand a fresh state update (fire-and-forget).
    ClientEventRequestStateUpdate,
    /// Create or attach a subscription service (fire-and-forget).
    ClientSubscriptionServiceRegister,
    /// Control-plane state snapshot (server to client).
    ServerStateUpdate,
    /// Fatal, client-scoped error (server to client).
    ServerError,
    /// Error scoped to an addressed partition instance.
    InstanceError,
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("payload type mismatch: carried {carried}, requested {requested}")]
    PayloadType { carried: String, requested: &'static str },

    #[error("frame of {0} bytes exceeds the frame size cap")]
    FrameTooLarge(usize),
}

/// Marker for messages that may travel inside an [`AnyPayload`]. The
/// type URL is the runtime tag checked on unpack.
pub trait Payload: Serialize + DeserializeOwned {
    const TYPE_URL: &'static str;
}

/// Opaque serialized payload tagged with the type URL of its contents.
/// The core copies these around without interpreting the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyPayload {
    pub type_url: String,
    pub bytes: Vec<u8>,
}

impl AnyPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.type_url.is_empty() && self.bytes.is_empty()
    }

    pub fn pack<T: Payload>(value: &T) -> Result<Self, ProtoError> {
        Ok(Self {
            type_url: T::TYPE_URL.to_string(),
            bytes: postcard::to_stdvec(value)?,
        })
    }

    pub fn is<T: Payload>(&self) -> bool {
        self.type_url == T::TYPE_URL
    }

    pub fn unpack<T: Payload>(&self) -> Result<T, ProtoError> {
        if !self.is::<T>() {
            return Err(ProtoError::PayloadType {
                carried: self.type_url.clone(),
                requested: T::TYPE_URL,
            });
        }
        Ok(postcard::from_bytes(&self.bytes)?)
    }
}

/// Error detail attached to an event by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventError {
    pub message: String,
}

/// One message on the architect stream. `tag` is the 64-bit unary
/// correlation id; zero means the event expects no correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub tag: u64,
    pub payload: AnyPayload,
    pub error: Option<EventError>,
}

impl Event {
    pub fn untagged(event_type: EventType, payload: AnyPayload) -> Self {
        Self {
            event_type,
            tag: 0,
            payload,
            error: None,
        }
    }

    pub fn tagged(event_type: EventType, tag: u64, payload: AnyPayload) -> Self {
        Self {
            event_type,
            tag,
            payload,
            error: None,
        }
    }

    pub fn error_response(event_type: EventType, tag: u64, message: impl Into<String>) -> Self {
        Self {
            event_type,
            tag,
            payload: AnyPayload::empty(),
            error: Some(EventError {
                message: message.into(),
            }),
        }
    }
}
