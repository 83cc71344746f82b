//! Error types for the transport layer.

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur during transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection or device objects could not be constructed.
    #[error("initialization failed: {0}")]
    Init(String),

    /// An offer/answer signaling step failed. Carries the literal HTTP
    /// status code and response body from the signaling peer.
    #[error("negotiation failed with status {status}: {body}")]
    Negotiation {
        /// HTTP status code returned by the signaling peer.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// A negotiation was attempted while another one was outstanding.
    #[error("negotiation already in progress")]
    AlreadyInProgress,

    /// The in-flight operation was cancelled by session disposal.
    #[error("operation cancelled")]
    Cancelled,

    /// The active backend does not provide this capability.
    #[error("operation not supported by this transport: {0}")]
    Unsupported(String),

    /// An operation was requested before `connect`.
    #[error("transport not initialized")]
    NotInitialized,

    /// A malformed inbound message. Logged and dropped at transport
    /// boundaries, never propagated to the caller.
    #[error("malformed message: {0}")]
    Decode(String),

    /// A device read/write returned a non-positive result. Fatal to the
    /// owning pipeline thread.
    #[error("device I/O failure: {0}")]
    Device(String),

    /// Network connection error (socket, websocket, HTTP transport).
    #[error("connection error: {0}")]
    Connection(String),

    /// Outbound message could not be sent or encoded for the wire.
    #[error("message error: {0}")]
    Message(String),

    /// Session already closed.
    #[error("session already closed")]
    SessionClosed,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create a new initialization error.
    pub fn init<S: Into<String>>(msg: S) -> Self {
        Self::Init(msg.into())
    }

    /// Create a new negotiation error from an HTTP status and body.
    pub fn negotiation<S: Into<String>>(status: u16, body: S) -> Self {
        Self::Negotiation { status, body: body.into() }
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new protocol/message error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Message(msg.into())
    }

    /// Create a new decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new device I/O error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }

    /// Create a new unsupported-operation error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::Unsupported(msg.into())
    }
}
