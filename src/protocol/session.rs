//! Bootstrap session.
//!
//! Drives one peer through token production and the three-layer handshake,
//! then exposes the resulting data channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::role::{resolve_role, Role};
use crate::config::Config;
use crate::engine::{
    ChannelOpenedHandler, ConnectivityEngine, DataChannel, EngineError, MessageHandler,
};
use crate::error::{Layer, PeerlinkError, Result};
use crate::token::{self, ExchangeToken, IceCandidate};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, discovery not started
    New,
    /// Discovery running, waiting for the done signal
    Gathering,
    /// Local token produced, waiting for the remote token
    TokenReady,
    /// Handshake in progress
    Negotiating,
    /// Data channel open
    Connected,
    /// Closed by the local side
    Closed,
    /// A step failed; the session cannot be reused
    Failed,
}

impl SessionState {
    /// Check if the session reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::New => "new",
            SessionState::Gathering => "gathering",
            SessionState::TokenReady => "token-ready",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Traffic counters, shared with the inbound callback path.
#[derive(Debug, Default)]
struct Counters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Counters {
    fn record_sent(&self, len: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_received(&self, len: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }
}

/// Manual bootstrap session for one peer.
///
/// ```text
///  produce_local_token()          start(remote)
/// [New] ──> [Gathering] ──> [TokenReady] ──> [Negotiating] ──> [Connected]
///                │                                 │                │
///                └────────────> [Failed] <─────────┘     close()    v
///                                                               [Closed]
/// ```
pub struct Session<E: ConnectivityEngine> {
    /// Session ID (log correlation only, never sent)
    id: String,
    /// Current state
    state: SessionState,
    /// Connectivity engine owning the negotiation layers
    engine: E,
    /// Discovery and channel settings
    config: Config,
    /// Token this side produced
    local_token: Option<ExchangeToken>,
    /// Token received from the peer
    remote_token: Option<ExchangeToken>,
    /// Resolved role
    role: Option<Role>,
    /// Outgoing channel once connected
    channel: Option<Arc<dyn DataChannel>>,
    /// Inbound message handler (last registration wins)
    handler: Arc<RwLock<Option<MessageHandler>>>,
    /// Traffic counters
    counters: Arc<Counters>,
    /// When the session reached `Connected`
    connected_at: Option<Instant>,
}

impl<E: ConnectivityEngine> Session<E> {
    /// Create a session with the default configuration
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, Config::default())
    }

    /// Create a session with explicit configuration
    pub fn with_config(engine: E, config: Config) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::New,
            engine,
            config,
            local_token: None,
            remote_token: None,
            role: None,
            channel: None,
            handler: Arc::new(RwLock::new(None)),
            counters: Arc::new(Counters::default()),
            connected_at: None,
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

    /// Check if the data channel is open
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Resolved role, once `start` got that far
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Token this side produced
    pub fn local_token(&self) -> Option<&ExchangeToken> {
        self.local_token.as_ref()
    }

    /// Token received from the peer
    pub fn remote_token(&self) -> Option<&ExchangeToken> {
        self.remote_token.as_ref()
    }

    /// Underlying engine
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Gather local candidates and encode this side's exchange token.
    ///
    /// Suspends until the engine signals discovery completion. There is no
    /// timeout: a discovery that never completes keeps the caller waiting.
    pub async fn produce_local_token(&mut self) -> Result<String> {
        if self.state != SessionState::New {
            return Err(self.invalid_state("produce local token"));
        }

        self.state = SessionState::Gathering;
        tracing::info!(
            session = %self.id,
            engine = self.engine.name(),
            "Gathering candidates via {:?}",
            self.config.discovery.stun_servers
        );

        match self.gather().await {
            Ok(encoded) => {
                self.state = SessionState::TokenReady;
                Ok(encoded)
            },
            Err(e) => {
                tracing::warn!(session = %self.id, "Token production failed: {}", e);
                self.state = SessionState::Failed;
                Err(e)
            },
        }
    }

    async fn gather(&mut self) -> Result<String> {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let done_tx = Mutex::new(Some(done_tx));
        let session_id = self.id.clone();

        self.engine
            .begin_discovery(
                &self.config.discovery.stun_servers,
                Box::new(move |candidate: Option<IceCandidate>| match candidate {
                    Some(c) => tracing::debug!(session = %session_id, "Found candidate: {}", c),
                    None => {
                        let tx = done_tx.lock().ok().and_then(|mut slot| slot.take());
                        if let Some(tx) = tx {
                            let _ = tx.send(());
                        }
                    },
                }),
            )
            .map_err(PeerlinkError::DiscoveryFailed)?;

        done_rx.await.map_err(|_| {
            PeerlinkError::DiscoveryFailed(EngineError::new(
                "discovery ended without a completion signal",
            ))
        })?;

        let token = ExchangeToken {
            ice_candidates: self
                .engine
                .local_candidates()
                .map_err(PeerlinkError::DiscoveryFailed)?,
            ice_parameters: self
                .engine
                .local_parameters()
                .map_err(PeerlinkError::DiscoveryFailed)?,
            dtls_parameters: self
                .engine
                .local_dtls_parameters()
                .map_err(PeerlinkError::DiscoveryFailed)?,
            sctp_capabilities: self.engine.sctp_capabilities(),
        };

        let encoded = token::encode(&token)?;
        tracing::info!(
            session = %self.id,
            identity = token.identity(),
            "Local token ready ({} candidates)",
            token.ice_candidates.len()
        );
        self.local_token = Some(token);
        Ok(encoded)
    }

    /// Complete the handshake with the peer's token.
    ///
    /// Layers run strictly in order (candidates, secure transport, channel
    /// mux) and the first failure aborts the session.
    pub async fn start(&mut self, remote_token: &str) -> Result<()> {
        if self.state != SessionState::TokenReady {
            return Err(self.invalid_state("start"));
        }

        self.state = SessionState::Negotiating;
        match self.negotiate(remote_token).await {
            Ok(()) => {
                self.state = SessionState::Connected;
                self.connected_at = Some(Instant::now());
                tracing::info!(session = %self.id, "Connected");
                Ok(())
            },
            Err(e) => {
                tracing::warn!(session = %self.id, "Negotiation failed: {}", e);
                self.state = SessionState::Failed;
                self.channel = None;
                Err(e)
            },
        }
    }

    async fn negotiate(&mut self, remote_token: &str) -> Result<()> {
        let remote = token::decode(remote_token)?;
        let local_identity = self
            .local_token
            .as_ref()
            .map(|t| t.identity().to_string())
            .ok_or_else(|| self.invalid_state("start"))?;

        let role = resolve_role(&local_identity, remote.identity())?;
        self.role = Some(role);
        self.remote_token = Some(remote.clone());
        tracing::info!(
            session = %self.id,
            local = %local_identity,
            remote = remote.identity(),
            "Resolved role: {} ({})",
            role,
            role.ice_role_name()
        );

        let ExchangeToken {
            ice_candidates,
            ice_parameters,
            dtls_parameters,
            sctp_capabilities,
        } = remote;

        self.engine
            .negotiate_candidates(ice_candidates, ice_parameters, role)
            .await
            .map_err(failed_at(Layer::Candidates))?;
        tracing::debug!(session = %self.id, "Candidate layer established");

        self.engine
            .start_secure_transport(dtls_parameters)
            .await
            .map_err(failed_at(Layer::SecureTransport))?;
        tracing::debug!(session = %self.id, "Secure transport established");

        self.engine.on_channel_opened(self.inbound_bridge());
        self.engine
            .start_channel_mux(sctp_capabilities)
            .await
            .map_err(failed_at(Layer::ChannelMux))?;

        let channel = self
            .engine
            .open_channel(self.config.channel.label.clone())
            .await
            .map_err(failed_at(Layer::ChannelMux))?;
        tracing::debug!(session = %self.id, "Opened data channel {:?}", channel.label());
        self.channel = Some(channel);

        Ok(())
    }

    /// Route messages from channels the peer opens to the registered handler.
    fn inbound_bridge(&self) -> ChannelOpenedHandler {
        let handler = Arc::clone(&self.handler);
        let counters = Arc::clone(&self.counters);
        let session_id = self.id.clone();

        Box::new(move |channel: Arc<dyn DataChannel>| {
            tracing::info!(session = %session_id, "Peer opened data channel {:?}", channel.label());
            let handler = Arc::clone(&handler);
            let counters = Arc::clone(&counters);
            let session_id = session_id.clone();

            channel.on_message(Arc::new(move |msg: Bytes| {
                counters.record_received(msg.len());
                let current = handler.read().unwrap_or_else(PoisonError::into_inner).clone();
                match current {
                    Some(current) => current(msg),
                    None => tracing::debug!(
                        session = %session_id,
                        "Dropped {} byte message, no handler registered",
                        msg.len()
                    ),
                }
            }));
        })
    }

    /// Register the handler for inbound messages.
    ///
    /// Replaces any previous handler. May be called before `start`.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        let mut slot = self.handler.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(handler));
    }

    /// Send one message to the peer.
    pub async fn send_message(&self, data: impl Into<Bytes>) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(PeerlinkError::NotConnected);
        }
        let channel = self.channel.as_ref().ok_or(PeerlinkError::NotConnected)?;

        let data = data.into();
        let len = data.len();
        channel.send(data).await.map_err(PeerlinkError::SendFailed)?;
        self.counters.record_sent(len);
        Ok(())
    }

    /// Close the session and release the channel.
    ///
    /// A failed session stays `Failed`.
    pub fn close(&mut self) {
        self.channel = None;
        if self.state != SessionState::Failed {
            tracing::info!(session = %self.id, "Closed");
            self.state = SessionState::Closed;
        }
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            state: self.state,
            role: self.role,
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            connected_secs: self.connected_at.map(|t| t.elapsed().as_secs()),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> PeerlinkError {
        PeerlinkError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }
}

fn failed_at(layer: Layer) -> impl FnOnce(EngineError) -> PeerlinkError {
    move |source| PeerlinkError::NegotiationFailed { layer, source }
}

/// Session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Session ID
    pub session_id: String,
    /// Current state
    pub state: SessionState,
    /// Resolved role
    pub role: Option<Role>,
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// Seconds since the channel opened
    pub connected_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    async fn ready(identity: &str) -> (Session<Arc<MemoryEngine>>, String) {
        let engine = Arc::new(MemoryEngine::new(identity));
        let mut session = Session::new(engine);
        let token = session.produce_local_token().await.unwrap();
        (session, token)
    }

    #[tokio::test]
    async fn test_produce_local_token() {
        let engine = MemoryEngine::new("ufragA")
            .with_candidates(vec![IceCandidate::host("1", "10.0.0.1", 4000, 2130706431)]);
        let mut session = Session::new(engine);
        assert_eq!(session.state(), SessionState::New);

        let encoded = session.produce_local_token().await.unwrap();
        assert_eq!(session.state(), SessionState::TokenReady);

        let token = token::decode(&encoded).unwrap();
        assert_eq!(token.identity(), "ufragA");
        assert_eq!(token.ice_candidates.len(), 1);
        assert_eq!(session.local_token(), Some(&token));
    }

    #[tokio::test]
    async fn test_token_produced_once() {
        let (mut session, _) = ready("ufragA").await;
        let err = session.produce_local_token().await.unwrap_err();
        assert!(matches!(err, PeerlinkError::InvalidState { .. }));
        assert_eq!(session.state(), SessionState::TokenReady);
    }

    #[tokio::test]
    async fn test_start_requires_token() {
        let (_, remote) = ready("ufragB").await;
        let mut session = Session::new(MemoryEngine::new("ufragA"));
        let err = session.start(&remote).await.unwrap_err();
        assert!(matches!(err, PeerlinkError::InvalidState { .. }));
        assert_eq!(session.state(), SessionState::New);
    }

    #[tokio::test]
    async fn test_start_connects_with_resolved_role() {
        let (mut a, _) = ready("ufragA").await;
        let (_, b_token) = ready("ufragB").await;

        a.start(&b_token).await.unwrap();
        assert!(a.is_connected());
        assert_eq!(a.role(), Some(Role::Responder));
        assert_eq!(a.remote_token().map(|t| t.identity()), Some("ufragB"));
    }

    #[tokio::test]
    async fn test_role_collision_fails_session() {
        let (mut a, _) = ready("twin").await;
        let (_, other) = ready("twin").await;

        let err = a.start(&other).await.unwrap_err();
        assert!(matches!(err, PeerlinkError::RoleCollision(_)));
        assert_eq!(a.state(), SessionState::Failed);
        assert!(a.engine().layers_started().is_empty());
    }

    #[tokio::test]
    async fn test_close_gates_send() {
        let (mut a, _) = ready("ufragA").await;
        let (_, b_token) = ready("ufragB").await;
        a.start(&b_token).await.unwrap();
        a.send_message("hi").await.unwrap();

        a.close();
        assert_eq!(a.state(), SessionState::Closed);
        assert!(matches!(
            a.send_message("again").await.unwrap_err(),
            PeerlinkError::NotConnected
        ));

        let stats = a.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.bytes_sent, 2);
        assert_eq!(stats.role, Some(Role::Responder));
    }

    #[tokio::test]
    async fn test_handler_registration_survives_poisoned_slot() {
        let (mut a, _) = ready("ufragA").await;
        let (_, b_token) = ready("ufragB").await;
        a.start(&b_token).await.unwrap();

        let slot = Arc::clone(&a.handler);
        let _ = std::thread::spawn(move || {
            let _guard = slot.write().unwrap();
            panic!("handler panicked while registered");
        })
        .join();
        assert!(a.handler.is_poisoned());

        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        a.on_message(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let current = a.handler.read().unwrap_or_else(PoisonError::into_inner).clone();
        current.expect("handler registered")(Bytes::from_static(b"x"));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::TokenReady.to_string(), "token-ready");
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Connected.is_terminal());
    }
}
