//! Connectivity engine boundary.
//!
//! The bootstrap never touches sockets, STUN, DTLS or SCTP itself. It drives
//! an injected [`ConnectivityEngine`] through its layers and wires the
//! engine's callbacks back into the session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Session (bootstrap)           │
//! │        (engine-agnostic driver)         │
//! └──────────────────┬──────────────────────┘
//!                    │ ConnectivityEngine
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  WebrtcEngine   │ │  MemoryEngine   │
//! │ (ICE/DTLS/SCTP) │ │ (in-process)    │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! # Contract
//!
//! | Call                     | Precondition                         |
//! |--------------------------|--------------------------------------|
//! | `begin_discovery`        | none                                 |
//! | snapshot accessors       | done signal (`None`) delivered       |
//! | `negotiate_candidates`   | snapshot taken                       |
//! | `start_secure_transport` | `negotiate_candidates` succeeded     |
//! | `start_channel_mux`      | `start_secure_transport` succeeded   |
//! | `open_channel`           | `start_channel_mux` succeeded        |
//!
//! Callbacks (`on_candidate`, channel-opened, message) may be invoked from
//! any thread the engine owns.

pub mod memory;
pub mod webrtc;

pub use self::webrtc::WebrtcEngine;
pub use memory::{EngineCall, FailurePoint, MemoryEngine};

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::protocol::Role;
use crate::token::{DtlsParameters, IceCandidate, IceParameters, SctpCapabilities};

/// Error reported by the connectivity engine.
///
/// The core never inspects these beyond wrapping them, so they carry just
/// the engine's own message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Create an engine error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Engine-provided message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result of an engine operation.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Future returned by blocking engine operations.
pub type EngineFuture<'a, T> = BoxFuture<'a, EngineResult<T>>;

/// Discovery callback: `Some` per candidate, then `None` exactly once.
pub type CandidateHandler = Box<dyn Fn(Option<IceCandidate>) + Send + Sync>;

/// Inbound message callback.
pub type MessageHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Callback for a data channel opened by the remote peer.
pub type ChannelOpenedHandler = Box<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>;

/// A message-oriented channel multiplexed over the secure transport.
///
/// Engines must allow `send` concurrently with message delivery.
pub trait DataChannel: Send + Sync {
    /// Channel label.
    fn label(&self) -> &str;

    /// Send one message.
    fn send(&self, data: Bytes) -> EngineFuture<'_, ()>;

    /// Register the handler for inbound messages, replacing any previous one.
    fn on_message(&self, handler: MessageHandler);
}

/// The connectivity engine the bootstrap drives.
///
/// One engine instance backs exactly one session.
pub trait ConnectivityEngine: Send + Sync {
    /// Engine name for logging.
    fn name(&self) -> &'static str;

    /// Start asynchronous candidate discovery against the given STUN servers.
    fn begin_discovery(
        &self,
        stun_servers: &[String],
        on_candidate: CandidateHandler,
    ) -> EngineResult<()>;

    /// Candidates gathered by the finished discovery.
    fn local_candidates(&self) -> EngineResult<Vec<IceCandidate>>;

    /// Local ICE parameters (identity fragment and password).
    fn local_parameters(&self) -> EngineResult<IceParameters>;

    /// Local secure-transport parameters.
    fn local_dtls_parameters(&self) -> EngineResult<DtlsParameters>;

    /// Local channel multiplexer capabilities.
    fn sctp_capabilities(&self) -> SctpCapabilities;

    /// Establish the candidate layer with the remote peer.
    fn negotiate_candidates(
        &self,
        remote_candidates: Vec<IceCandidate>,
        remote_parameters: IceParameters,
        role: Role,
    ) -> EngineFuture<'_, ()>;

    /// Run the secure-transport handshake over the negotiated candidate pair.
    fn start_secure_transport(&self, remote: DtlsParameters) -> EngineFuture<'_, ()>;

    /// Register the handler for channels opened by the remote peer.
    fn on_channel_opened(&self, handler: ChannelOpenedHandler);

    /// Start the channel multiplexer over the secure transport.
    fn start_channel_mux(&self, remote: SctpCapabilities) -> EngineFuture<'_, ()>;

    /// Open the local side's data channel.
    fn open_channel(&self, label: String) -> EngineFuture<'_, Arc<dyn DataChannel>>;
}

impl<E: ConnectivityEngine + ?Sized> ConnectivityEngine for Arc<E> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn begin_discovery(
        &self,
        stun_servers: &[String],
        on_candidate: CandidateHandler,
    ) -> EngineResult<()> {
        (**self).begin_discovery(stun_servers, on_candidate)
    }

    fn local_candidates(&self) -> EngineResult<Vec<IceCandidate>> {
        (**self).local_candidates()
    }

    fn local_parameters(&self) -> EngineResult<IceParameters> {
        (**self).local_parameters()
    }

    fn local_dtls_parameters(&self) -> EngineResult<DtlsParameters> {
        (**self).local_dtls_parameters()
    }

    fn sctp_capabilities(&self) -> SctpCapabilities {
        (**self).sctp_capabilities()
    }

    fn negotiate_candidates(
        &self,
        remote_candidates: Vec<IceCandidate>,
        remote_parameters: IceParameters,
        role: Role,
    ) -> EngineFuture<'_, ()> {
        (**self).negotiate_candidates(remote_candidates, remote_parameters, role)
    }

    fn start_secure_transport(&self, remote: DtlsParameters) -> EngineFuture<'_, ()> {
        (**self).start_secure_transport(remote)
    }

    fn on_channel_opened(&self, handler: ChannelOpenedHandler) {
        (**self).on_channel_opened(handler);
    }

    fn start_channel_mux(&self, remote: SctpCapabilities) -> EngineFuture<'_, ()> {
        (**self).start_channel_mux(remote)
    }

    fn open_channel(&self, label: String) -> EngineFuture<'_, Arc<dyn DataChannel>> {
        (**self).open_channel(label)
    }
}
