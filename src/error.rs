//! Peerlink error types.
//!
//! Every failure in the bootstrap is surfaced to the caller of the operation
//! that detected it. Nothing is retried: a session that hits any of these
//! errors during negotiation is left in [`SessionState::Failed`] and must be
//! replaced by a fresh one.
//!
//! Errors raised by the connectivity engine are kept as the `#[source]` of
//! the wrapping variant, so tools like `anyhow` print the full chain.
//!
//! [`SessionState::Failed`]: crate::protocol::SessionState::Failed

use std::fmt;

use thiserror::Error;

use crate::engine::EngineError;

/// The negotiation layer a handshake failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// ICE transport-candidate negotiation.
    Candidates,
    /// DTLS secure-transport handshake.
    SecureTransport,
    /// SCTP channel multiplexer and data channel setup.
    ChannelMux,
}

impl Layer {
    /// All layers in the order the handshake drives them.
    pub const ORDER: [Layer; 3] = [Layer::Candidates, Layer::SecureTransport, Layer::ChannelMux];

    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Candidates => "ice",
            Layer::SecureTransport => "dtls",
            Layer::ChannelMux => "sctp",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Peerlink errors.
#[derive(Error, Debug)]
pub enum PeerlinkError {
    /// Candidate discovery could not be started or completed.
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(#[source] EngineError),

    /// The local exchange token could not be serialized.
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// The input is not a token produced by this codec.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Both peers carry the same identity fragment, so no role can be chosen.
    #[error("Role collision: local and remote identity are both {0:?}")]
    RoleCollision(String),

    /// One of the three handshake layers reported an error.
    #[error("Negotiation failed at {layer} layer: {source}")]
    NegotiationFailed {
        /// Layer that failed.
        layer: Layer,
        /// Engine error reported by that layer.
        #[source]
        source: EngineError,
    },

    /// A message was sent before the session reached `Connected`.
    #[error("Session not connected")]
    NotConnected,

    /// The engine rejected an outgoing message.
    #[error("Send failed: {0}")]
    SendFailed(#[source] EngineError),

    /// An operation was invoked in a state that does not allow it.
    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: String,
    },

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PeerlinkError {
    /// Layer that failed, for `NegotiationFailed` errors.
    pub fn layer(&self) -> Option<Layer> {
        match self {
            PeerlinkError::NegotiationFailed { layer, .. } => Some(*layer),
            _ => None,
        }
    }
}

/// Result type alias for peerlink operations
pub type Result<T> = std::result::Result<T, PeerlinkError>;

impl From<base64::DecodeError> for PeerlinkError {
    fn from(err: base64::DecodeError) -> Self {
        PeerlinkError::MalformedToken(format!("Base64 decode error: {err}"))
    }
}

impl From<serde_json::Error> for PeerlinkError {
    fn from(err: serde_json::Error) -> Self {
        PeerlinkError::MalformedToken(format!("Payload error: {err}"))
    }
}

impl From<toml::de::Error> for PeerlinkError {
    fn from(err: toml::de::Error) -> Self {
        PeerlinkError::Config(err.to_string())
    }
}
