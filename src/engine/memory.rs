//! In-process connectivity engine.
//!
//! `MemoryEngine` implements the full [`ConnectivityEngine`] contract without
//! touching the network:
//!
//! - discovery replays a fixed candidate list from a background thread, then
//!   fires the done signal
//! - each layer only starts if the previous one has, mirroring a real stack
//! - every call is appended to a log that tests can inspect
//! - any single step can be scripted to fail via [`FailurePoint`]
//! - two engines joined with [`MemoryEngine::link`] hand each other the
//!   channels they open, so two sessions can talk in-process

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use bytes::Bytes;

use super::{
    CandidateHandler, ChannelOpenedHandler, ConnectivityEngine, DataChannel, EngineError,
    EngineFuture, EngineResult, MessageHandler,
};
use crate::error::Layer;
use crate::protocol::Role;
use crate::token::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, SctpCapabilities,
};

const STAGE_IDLE: u8 = 0;
const STAGE_CANDIDATES: u8 = 1;
const STAGE_SECURE: u8 = 2;
const STAGE_MUX: u8 = 3;

/// A call made into a [`MemoryEngine`], in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `begin_discovery`
    BeginDiscovery {
        /// STUN servers passed in
        stun_servers: Vec<String>,
    },
    /// `local_candidates`
    LocalCandidates,
    /// `local_parameters`
    LocalParameters,
    /// `local_dtls_parameters`
    LocalDtlsParameters,
    /// `sctp_capabilities`
    SctpCapabilities,
    /// `negotiate_candidates`
    NegotiateCandidates {
        /// Remote identity fragment
        remote_identity: String,
        /// Role the core resolved
        role: Role,
    },
    /// `start_secure_transport`
    StartSecureTransport,
    /// `on_channel_opened`
    OnChannelOpened,
    /// `start_channel_mux`
    StartChannelMux,
    /// `open_channel`
    OpenChannel {
        /// Requested label
        label: String,
    },
    /// `DataChannel::send` on a channel this engine opened
    Send {
        /// Payload length
        len: usize,
    },
}

impl EngineCall {
    /// Handshake layer this call starts, if any.
    pub fn layer(&self) -> Option<Layer> {
        match self {
            EngineCall::NegotiateCandidates { .. } => Some(Layer::Candidates),
            EngineCall::StartSecureTransport => Some(Layer::SecureTransport),
            EngineCall::StartChannelMux => Some(Layer::ChannelMux),
            _ => None,
        }
    }
}

/// Step a [`MemoryEngine`] is scripted to fail at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// `begin_discovery` returns an error
    Discovery,
    /// Discovery drops its callback without ever sending the done signal
    DiscoveryAbandoned,
    /// The given handshake layer returns an error
    Layer(Layer),
    /// `open_channel` returns an error
    OpenChannel,
    /// Every send on the opened channel returns an error
    Send,
}

/// Channels opened by the remote peer, waiting for a handler if needed.
#[derive(Default)]
struct Inbox {
    state: Mutex<InboxState>,
}

#[derive(Default)]
struct InboxState {
    handler: Option<Arc<ChannelOpenedHandler>>,
    pending: Vec<Arc<dyn DataChannel>>,
}

impl Inbox {
    fn set_handler(&self, handler: ChannelOpenedHandler) {
        let handler = Arc::new(handler);
        let pending = match self.state.lock() {
            Ok(mut state) => {
                state.handler = Some(Arc::clone(&handler));
                std::mem::take(&mut state.pending)
            },
            Err(_) => return,
        };
        for channel in pending {
            handler(channel);
        }
    }

    fn deliver(&self, channel: Arc<dyn DataChannel>) {
        let handler = match self.state.lock() {
            Ok(mut state) => {
                if let Some(handler) = state.handler.clone() {
                    handler
                } else {
                    state.pending.push(channel);
                    return;
                }
            },
            Err(_) => return,
        };
        handler(channel);
    }
}

/// Shared state behind the two ends of one in-memory data channel.
struct Pipe {
    label: String,
    to_opener: RwLock<Option<MessageHandler>>,
    to_acceptor: RwLock<Option<MessageHandler>>,
}

#[derive(Debug, Clone, Copy)]
enum End {
    Opener,
    Acceptor,
}

struct MemoryChannel {
    pipe: Arc<Pipe>,
    end: End,
    fail_sends: bool,
    calls: Arc<Mutex<Vec<EngineCall>>>,
    sent: Arc<Mutex<Vec<Bytes>>>,
}

impl MemoryChannel {
    fn inbound_slot(&self) -> &RwLock<Option<MessageHandler>> {
        match self.end {
            End::Opener => &self.pipe.to_opener,
            End::Acceptor => &self.pipe.to_acceptor,
        }
    }

    fn outbound_slot(&self) -> &RwLock<Option<MessageHandler>> {
        match self.end {
            End::Opener => &self.pipe.to_acceptor,
            End::Acceptor => &self.pipe.to_opener,
        }
    }
}

impl DataChannel for MemoryChannel {
    fn label(&self) -> &str {
        &self.pipe.label
    }

    fn send(&self, data: Bytes) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            record(&self.calls, EngineCall::Send { len: data.len() });
            if self.fail_sends {
                return Err(EngineError::new("data channel closed"));
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(data.clone());
            }

            let handler = self.outbound_slot().read().ok().and_then(|h| h.clone());
            match handler {
                Some(handler) => handler(data),
                None => tracing::debug!("memory channel {}: no listener, dropped", self.pipe.label),
            }
            Ok(())
        })
    }

    fn on_message(&self, handler: MessageHandler) {
        if let Ok(mut slot) = self.inbound_slot().write() {
            *slot = Some(handler);
        }
    }
}

/// Deterministic in-process [`ConnectivityEngine`].
pub struct MemoryEngine {
    parameters: IceParameters,
    candidates: Vec<IceCandidate>,
    dtls: DtlsParameters,
    sctp: SctpCapabilities,
    failure: Option<FailurePoint>,
    stage: AtomicU8,
    gathered: Arc<Mutex<Option<Vec<IceCandidate>>>>,
    calls: Arc<Mutex<Vec<EngineCall>>>,
    sent: Arc<Mutex<Vec<Bytes>>>,
    inbox: Arc<Inbox>,
    peer_inbox: Option<Arc<Inbox>>,
}

impl MemoryEngine {
    /// Create an engine with the given identity fragment and no candidates.
    pub fn new(identity: &str) -> Self {
        let secret = uuid::Uuid::new_v4();
        let fingerprint = secret
            .as_bytes()
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":");

        Self {
            parameters: IceParameters::new(identity, &secret.simple().to_string()),
            candidates: Vec::new(),
            dtls: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: fingerprint,
                }],
            },
            sctp: SctpCapabilities::default(),
            failure: None,
            stage: AtomicU8::new(STAGE_IDLE),
            gathered: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            inbox: Arc::new(Inbox::default()),
            peer_inbox: None,
        }
    }

    /// Create an engine with a random 16-character identity fragment.
    pub fn random() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::new(&id[..16])
    }

    /// Set the candidates discovery will report.
    pub fn with_candidates(mut self, candidates: Vec<IceCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Script a failure.
    pub fn failing_at(mut self, failure: FailurePoint) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Join two engines so channels opened on one surface on the other.
    pub fn link(a: &mut MemoryEngine, b: &mut MemoryEngine) {
        a.peer_inbox = Some(Arc::clone(&b.inbox));
        b.peer_inbox = Some(Arc::clone(&a.inbox));
    }

    /// Identity fragment this engine reports.
    pub fn identity(&self) -> &str {
        &self.parameters.username_fragment
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Handshake layers started so far, in order.
    pub fn layers_started(&self) -> Vec<Layer> {
        self.calls().iter().filter_map(EngineCall::layer).collect()
    }

    /// Messages successfully sent on channels this engine opened.
    pub fn sent_messages(&self) -> Vec<Bytes> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn fails_at(&self, point: FailurePoint) -> bool {
        self.failure == Some(point)
    }

    fn ensure_gathered(&self) -> EngineResult<()> {
        let done = self.gathered.lock().map(|g| g.is_some()).unwrap_or(false);
        if done {
            Ok(())
        } else {
            Err(EngineError::new("ice gatherer: gathering not complete"))
        }
    }
}

fn record(calls: &Mutex<Vec<EngineCall>>, call: EngineCall) {
    tracing::debug!("memory engine call: {:?}", call);
    if let Ok(mut calls) = calls.lock() {
        calls.push(call);
    }
}

impl ConnectivityEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn begin_discovery(
        &self,
        stun_servers: &[String],
        on_candidate: CandidateHandler,
    ) -> EngineResult<()> {
        record(
            &self.calls,
            EngineCall::BeginDiscovery {
                stun_servers: stun_servers.to_vec(),
            },
        );
        if self.fails_at(FailurePoint::Discovery) {
            return Err(EngineError::new("ice gatherer: no usable network interface"));
        }

        let candidates = self.candidates.clone();
        let gathered = Arc::clone(&self.gathered);
        let abandon = self.fails_at(FailurePoint::DiscoveryAbandoned);

        thread::Builder::new()
            .name("memory-gatherer".to_string())
            .spawn(move || {
                for candidate in &candidates {
                    on_candidate(Some(candidate.clone()));
                }
                if abandon {
                    return;
                }
                if let Ok(mut slot) = gathered.lock() {
                    *slot = Some(candidates);
                }
                on_candidate(None);
            })
            .map_err(|e| EngineError::new(format!("failed to spawn gatherer: {e}")))?;

        Ok(())
    }

    fn local_candidates(&self) -> EngineResult<Vec<IceCandidate>> {
        record(&self.calls, EngineCall::LocalCandidates);
        self.gathered
            .lock()
            .ok()
            .and_then(|g| g.clone())
            .ok_or_else(|| EngineError::new("ice gatherer: gathering not complete"))
    }

    fn local_parameters(&self) -> EngineResult<IceParameters> {
        record(&self.calls, EngineCall::LocalParameters);
        self.ensure_gathered()?;
        Ok(self.parameters.clone())
    }

    fn local_dtls_parameters(&self) -> EngineResult<DtlsParameters> {
        record(&self.calls, EngineCall::LocalDtlsParameters);
        Ok(self.dtls.clone())
    }

    fn sctp_capabilities(&self) -> SctpCapabilities {
        record(&self.calls, EngineCall::SctpCapabilities);
        self.sctp
    }

    fn negotiate_candidates(
        &self,
        remote_candidates: Vec<IceCandidate>,
        remote_parameters: IceParameters,
        role: Role,
    ) -> EngineFuture<'_, ()> {
        record(
            &self.calls,
            EngineCall::NegotiateCandidates {
                remote_identity: remote_parameters.username_fragment.clone(),
                role,
            },
        );
        Box::pin(async move {
            self.ensure_gathered()?;
            if self.fails_at(FailurePoint::Layer(Layer::Candidates)) {
                return Err(EngineError::new("ice: all candidate pairs failed"));
            }
            if remote_parameters.username_fragment.is_empty() {
                return Err(EngineError::new("ice: remote username fragment is empty"));
            }
            tracing::debug!(
                "memory engine: {} remote candidates, acting as {}",
                remote_candidates.len(),
                role.ice_role_name()
            );
            self.stage.store(STAGE_CANDIDATES, Ordering::SeqCst);
            Ok(())
        })
    }

    fn start_secure_transport(&self, remote: DtlsParameters) -> EngineFuture<'_, ()> {
        record(&self.calls, EngineCall::StartSecureTransport);
        Box::pin(async move {
            if self.stage.load(Ordering::SeqCst) != STAGE_CANDIDATES {
                return Err(EngineError::new("dtls: ice transport not connected"));
            }
            if self.fails_at(FailurePoint::Layer(Layer::SecureTransport)) {
                return Err(EngineError::new("dtls: handshake failed"));
            }
            if remote.fingerprints.is_empty() {
                return Err(EngineError::new("dtls: remote offered no fingerprint"));
            }
            self.stage.store(STAGE_SECURE, Ordering::SeqCst);
            Ok(())
        })
    }

    fn on_channel_opened(&self, handler: ChannelOpenedHandler) {
        record(&self.calls, EngineCall::OnChannelOpened);
        self.inbox.set_handler(handler);
    }

    fn start_channel_mux(&self, _remote: SctpCapabilities) -> EngineFuture<'_, ()> {
        record(&self.calls, EngineCall::StartChannelMux);
        Box::pin(async move {
            if self.stage.load(Ordering::SeqCst) != STAGE_SECURE {
                return Err(EngineError::new("sctp: dtls transport not connected"));
            }
            if self.fails_at(FailurePoint::Layer(Layer::ChannelMux)) {
                return Err(EngineError::new("sctp: association aborted"));
            }
            self.stage.store(STAGE_MUX, Ordering::SeqCst);
            Ok(())
        })
    }

    fn open_channel(&self, label: String) -> EngineFuture<'_, Arc<dyn DataChannel>> {
        record(
            &self.calls,
            EngineCall::OpenChannel {
                label: label.clone(),
            },
        );
        Box::pin(async move {
            if self.stage.load(Ordering::SeqCst) != STAGE_MUX {
                return Err(EngineError::new("sctp transport not started"));
            }
            if self.fails_at(FailurePoint::OpenChannel) {
                return Err(EngineError::new("sctp: stream limit reached"));
            }

            let pipe = Arc::new(Pipe {
                label,
                to_opener: RwLock::new(None),
                to_acceptor: RwLock::new(None),
            });
            let local: Arc<dyn DataChannel> = Arc::new(MemoryChannel {
                pipe: Arc::clone(&pipe),
                end: End::Opener,
                fail_sends: self.fails_at(FailurePoint::Send),
                calls: Arc::clone(&self.calls),
                sent: Arc::clone(&self.sent),
            });

            if let Some(peer) = &self.peer_inbox {
                let remote: Arc<dyn DataChannel> = Arc::new(MemoryChannel {
                    pipe,
                    end: End::Acceptor,
                    fail_sends: false,
                    calls: Arc::new(Mutex::new(Vec::new())),
                    sent: Arc::new(Mutex::new(Vec::new())),
                });
                peer.deliver(remote);
            }

            Ok(local)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::mpsc;
    use std::time::Duration;

    fn gather(engine: &MemoryEngine) -> Vec<Option<IceCandidate>> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        engine
            .begin_discovery(
                &[],
                Box::new(move |c: Option<IceCandidate>| {
                    if let Ok(tx) = tx.lock() {
                        let _ = tx.send(c);
                    }
                }),
            )
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(c) = rx.recv_timeout(Duration::from_secs(5)) {
            let done = c.is_none();
            seen.push(c);
            if done {
                break;
            }
        }
        seen
    }

    #[test]
    fn test_discovery_emits_candidates_then_done() {
        let engine = MemoryEngine::new("abc").with_candidates(vec![
            IceCandidate::host("1", "10.0.0.1", 5000, 100),
            IceCandidate::host("2", "10.0.0.2", 5001, 99),
        ]);

        let seen = gather(&engine);
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_some());
        assert!(seen[2].is_none());
        assert_eq!(engine.local_candidates().unwrap().len(), 2);
    }

    #[test]
    fn test_snapshot_requires_done_signal() {
        let engine = MemoryEngine::new("abc");
        assert!(engine.local_candidates().is_err());
        assert!(engine.local_parameters().is_err());
    }

    #[tokio::test]
    async fn test_layers_enforce_order() {
        let engine = MemoryEngine::new("abc");
        gather(&engine);

        let err = engine
            .start_secure_transport(DtlsParameters::default())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "dtls: ice transport not connected");

        let err = engine
            .start_channel_mux(SctpCapabilities::default())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "sctp: dtls transport not connected");
    }

    #[tokio::test]
    async fn test_linked_channel_delivery() {
        let mut a = MemoryEngine::new("a");
        let mut b = MemoryEngine::new("b");
        MemoryEngine::link(&mut a, &mut b);

        for (engine, remote) in [(&a, &b), (&b, &a)] {
            gather(engine);
            engine
                .negotiate_candidates(vec![], remote.parameters.clone(), Role::Initiator)
                .await
                .unwrap();
            engine.start_secure_transport(remote.dtls.clone()).await.unwrap();
            engine.start_channel_mux(remote.sctp).await.unwrap();
        }

        // a opens before b listens; the channel must wait in b's inbox
        let local = a.open_channel("chat".to_string()).await.unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        b.on_channel_opened(Box::new(move |channel: Arc<dyn DataChannel>| {
            assert_eq!(channel.label(), "chat");
            let sink = Arc::clone(&sink);
            channel.on_message(Arc::new(move |msg: Bytes| sink.lock().unwrap().push(msg)));
        }));

        local.send(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(received.lock().unwrap().as_slice(), &[Bytes::from_static(b"hello")]);
        assert_eq!(a.sent_messages().len(), 1);
    }
}
