//! Connectivity engine backed by the `webrtc` crate's ORTC objects.
//!
//! ```text
//! RTCIceGatherer ──> RTCIceTransport ──> RTCDtlsTransport ──> RTCSctpTransport ──> RTCDataChannel
//!   (discovery)        (candidates)        (secure)             (channel mux)
//! ```
//!
//! The transports are built when discovery begins, because the gatherer
//! needs the STUN servers. Gathering runs on a tokio task; once the gatherer
//! reports completion the task snapshots the local candidates and parameters
//! and only then delivers the done signal, so the synchronous snapshot
//! accessors never wait.

use std::sync::{Arc, Mutex, OnceLock};

use ::webrtc::api::{APIBuilder, API};
use ::webrtc::data_channel::data_channel_message::DataChannelMessage;
use ::webrtc::data_channel::data_channel_parameters::DataChannelParameters;
use ::webrtc::data_channel::RTCDataChannel;
use ::webrtc::dtls_transport::dtls_fingerprint::RTCDtlsFingerprint;
use ::webrtc::dtls_transport::dtls_parameters::DTLSParameters;
use ::webrtc::dtls_transport::dtls_role::DTLSRole;
use ::webrtc::dtls_transport::RTCDtlsTransport;
use ::webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use ::webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use ::webrtc::ice_transport::ice_gatherer::{RTCIceGatherOptions, RTCIceGatherer};
use ::webrtc::ice_transport::ice_parameters::RTCIceParameters;
use ::webrtc::ice_transport::ice_protocol::RTCIceProtocol;
use ::webrtc::ice_transport::ice_role::RTCIceRole;
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::ice_transport::RTCIceTransport;
use ::webrtc::sctp_transport::sctp_transport_capabilities::SCTPTransportCapabilities;
use ::webrtc::sctp_transport::RTCSctpTransport;
use bytes::Bytes;
use tokio::sync::oneshot;

use super::{
    CandidateHandler, ChannelOpenedHandler, ConnectivityEngine, DataChannel, EngineError,
    EngineFuture, EngineResult, MessageHandler,
};
use crate::protocol::Role;
use crate::token::{
    CandidateType, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    IceProtocol, SctpCapabilities,
};

/// The ORTC object chain, created once per engine.
struct Transports {
    gatherer: Arc<RTCIceGatherer>,
    ice: Arc<RTCIceTransport>,
    dtls: Arc<RTCDtlsTransport>,
    sctp: Arc<RTCSctpTransport>,
}

/// Local discovery results, taken once gathering completed.
#[derive(Clone)]
struct Gathered {
    candidates: Vec<IceCandidate>,
    parameters: IceParameters,
}

/// [`ConnectivityEngine`] over real ICE, DTLS and SCTP.
///
/// Must be driven from inside a tokio runtime.
pub struct WebrtcEngine {
    api: API,
    transports: OnceLock<Transports>,
    gathered: Arc<Mutex<Option<Gathered>>>,
}

impl WebrtcEngine {
    /// Create an engine with the default `webrtc` API settings.
    pub fn new() -> Self {
        Self {
            api: APIBuilder::new().build(),
            transports: OnceLock::new(),
            gathered: Arc::new(Mutex::new(None)),
        }
    }

    fn transports(&self) -> EngineResult<&Transports> {
        self.transports
            .get()
            .ok_or_else(|| EngineError::new("ice gatherer: discovery not started"))
    }

    fn build_transports(&self, stun_servers: &[String]) -> EngineResult<Transports> {
        let ice_servers = if stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: stun_servers.to_vec(),
                ..Default::default()
            }]
        };

        let gatherer = Arc::new(
            self.api
                .new_ice_gatherer(RTCIceGatherOptions {
                    ice_servers,
                    ..Default::default()
                })
                .map_err(layer_error("ice gatherer"))?,
        );
        let ice = Arc::new(self.api.new_ice_transport(Arc::clone(&gatherer)));
        let dtls = Arc::new(
            self.api
                .new_dtls_transport(Arc::clone(&ice), Vec::new())
                .map_err(layer_error("dtls"))?,
        );
        let sctp = Arc::new(
            self.api
                .new_sctp_transport(Arc::clone(&dtls))
                .map_err(layer_error("sctp"))?,
        );

        Ok(Transports {
            gatherer,
            ice,
            dtls,
            sctp,
        })
    }
}

impl Default for WebrtcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityEngine for WebrtcEngine {
    fn name(&self) -> &'static str {
        "webrtc"
    }

    fn begin_discovery(
        &self,
        stun_servers: &[String],
        on_candidate: CandidateHandler,
    ) -> EngineResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::new(format!("ice gatherer: no async runtime: {e}")))?;

        let transports = self.build_transports(stun_servers)?;
        let gatherer = Arc::clone(&transports.gatherer);
        if self.transports.set(transports).is_err() {
            return Err(EngineError::new("ice gatherer: discovery already started"));
        }

        // Dropping the handler without a done signal fails the waiting session.
        let handler: Arc<Mutex<Option<Arc<CandidateHandler>>>> =
            Arc::new(Mutex::new(Some(Arc::new(on_candidate))));
        let (complete_tx, complete_rx) = oneshot::channel::<()>();
        let complete_tx = Mutex::new(Some(complete_tx));

        let forward = Arc::clone(&handler);
        gatherer.on_local_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            match candidate {
                Some(candidate) => match candidate_from_webrtc(&candidate) {
                    Ok(candidate) => {
                        let current = forward.lock().ok().and_then(|slot| slot.clone());
                        if let Some(current) = current {
                            current(Some(candidate));
                        }
                    },
                    Err(e) => tracing::debug!("Skipping candidate: {}", e),
                },
                None => {
                    let tx = complete_tx.lock().ok().and_then(|mut slot| slot.take());
                    if let Some(tx) = tx {
                        let _ = tx.send(());
                    }
                },
            }
            Box::pin(async {})
        }));

        let gathered = Arc::clone(&self.gathered);
        runtime.spawn(async move {
            let result = gather(&gatherer, complete_rx).await;
            let handler = handler.lock().ok().and_then(|mut slot| slot.take());
            match result {
                Ok(snapshot) => {
                    if let Ok(mut slot) = gathered.lock() {
                        *slot = Some(snapshot);
                    }
                    if let Some(handler) = handler {
                        handler(None);
                    }
                },
                Err(e) => tracing::warn!("Candidate gathering failed: {}", e),
            }
        });

        Ok(())
    }

    fn local_candidates(&self) -> EngineResult<Vec<IceCandidate>> {
        self.gathered
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(|g| g.candidates.clone()))
            .ok_or_else(|| EngineError::new("ice gatherer: gathering not complete"))
    }

    fn local_parameters(&self) -> EngineResult<IceParameters> {
        self.gathered
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(|g| g.parameters.clone()))
            .ok_or_else(|| EngineError::new("ice gatherer: gathering not complete"))
    }

    fn local_dtls_parameters(&self) -> EngineResult<DtlsParameters> {
        let params = self
            .transports()?
            .dtls
            .get_local_parameters()
            .map_err(layer_error("dtls"))?;
        Ok(dtls_from_webrtc(params))
    }

    fn sctp_capabilities(&self) -> SctpCapabilities {
        self.transports
            .get()
            .map(|t| SctpCapabilities {
                max_message_size: t.sctp.get_capabilities().max_message_size,
            })
            .unwrap_or_default()
    }

    fn negotiate_candidates(
        &self,
        remote_candidates: Vec<IceCandidate>,
        remote_parameters: IceParameters,
        role: Role,
    ) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            let transports = self.transports()?;
            let candidates: Vec<RTCIceCandidate> =
                remote_candidates.iter().map(candidate_to_webrtc).collect();
            transports
                .ice
                .set_remote_candidates(&candidates)
                .await
                .map_err(layer_error("ice"))?;
            transports
                .ice
                .start(&parameters_to_webrtc(remote_parameters), Some(ice_role(role)))
                .await
                .map_err(layer_error("ice"))
        })
    }

    fn start_secure_transport(&self, remote: DtlsParameters) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            self.transports()?
                .dtls
                .start(dtls_to_webrtc(remote))
                .await
                .map_err(layer_error("dtls"))
        })
    }

    fn on_channel_opened(&self, handler: ChannelOpenedHandler) {
        let Some(transports) = self.transports.get() else {
            tracing::warn!("Channel handler registered before discovery, ignored");
            return;
        };
        transports
            .sctp
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                handler(Arc::new(WebrtcChannel { inner: channel }));
                Box::pin(async {})
            }));
    }

    fn start_channel_mux(&self, remote: SctpCapabilities) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            self.transports()?
                .sctp
                .start(SCTPTransportCapabilities {
                    max_message_size: remote.max_message_size,
                })
                .await
                .map_err(layer_error("sctp"))
        })
    }

    fn open_channel(&self, label: String) -> EngineFuture<'_, Arc<dyn DataChannel>> {
        Box::pin(async move {
            let sctp = Arc::clone(&self.transports()?.sctp);
            let channel = self
                .api
                .new_data_channel(
                    sctp,
                    DataChannelParameters {
                        label,
                        ordered: true,
                        ..Default::default()
                    },
                )
                .await
                .map_err(layer_error("sctp"))?;
            let channel: Arc<dyn DataChannel> = Arc::new(WebrtcChannel {
                inner: Arc::new(channel),
            });
            Ok(channel)
        })
    }
}

/// Start gathering and snapshot the results once it completes.
async fn gather(
    gatherer: &RTCIceGatherer,
    complete: oneshot::Receiver<()>,
) -> EngineResult<Gathered> {
    gatherer.gather().await.map_err(layer_error("ice gatherer"))?;
    complete
        .await
        .map_err(|_| EngineError::new("ice gatherer: closed before gathering completed"))?;

    let candidates = gatherer
        .get_local_candidates()
        .await
        .map_err(layer_error("ice gatherer"))?
        .iter()
        .filter_map(|c| candidate_from_webrtc(c).ok())
        .collect();
    let parameters = gatherer
        .get_local_parameters()
        .await
        .map_err(layer_error("ice gatherer"))?;

    Ok(Gathered {
        candidates,
        parameters: IceParameters {
            username_fragment: parameters.username_fragment,
            password: parameters.password,
            ice_lite: parameters.ice_lite,
        },
    })
}

/// Data channel wrapper.
struct WebrtcChannel {
    inner: Arc<RTCDataChannel>,
}

impl DataChannel for WebrtcChannel {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn send(&self, data: Bytes) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            self.inner
                .send(&data)
                .await
                .map(|_| ())
                .map_err(|e| EngineError::new(e.to_string()))
        })
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner
            .on_message(Box::new(move |msg: DataChannelMessage| {
                handler(msg.data);
                Box::pin(async {})
            }));
    }
}

fn layer_error<E: std::fmt::Display>(layer: &'static str) -> impl Fn(E) -> EngineError {
    move |e| EngineError::new(format!("{layer}: {e}"))
}

fn ice_role(role: Role) -> RTCIceRole {
    match role {
        Role::Initiator => RTCIceRole::Controlling,
        Role::Responder => RTCIceRole::Controlled,
    }
}

fn candidate_from_webrtc(c: &RTCIceCandidate) -> EngineResult<IceCandidate> {
    let candidate_type = match c.typ {
        RTCIceCandidateType::Host => CandidateType::Host,
        RTCIceCandidateType::Srflx => CandidateType::ServerReflexive,
        RTCIceCandidateType::Prflx => CandidateType::PeerReflexive,
        RTCIceCandidateType::Relay => CandidateType::Relay,
        RTCIceCandidateType::Unspecified => {
            return Err(EngineError::new(format!(
                "ice: candidate {} has no type",
                c.foundation
            )))
        },
    };
    let protocol = match c.protocol {
        RTCIceProtocol::Udp => IceProtocol::Udp,
        RTCIceProtocol::Tcp => IceProtocol::Tcp,
        RTCIceProtocol::Unspecified => {
            return Err(EngineError::new(format!(
                "ice: candidate {} has no protocol",
                c.foundation
            )))
        },
    };

    Ok(IceCandidate {
        foundation: c.foundation.clone(),
        priority: c.priority,
        address: c.address.clone(),
        protocol,
        port: c.port,
        candidate_type,
        component: c.component,
        related_address: c.related_address.clone(),
        related_port: c.related_port,
        tcp_type: c.tcp_type.clone(),
    })
}

fn candidate_to_webrtc(c: &IceCandidate) -> RTCIceCandidate {
    let mut candidate = RTCIceCandidate::default();
    candidate.foundation = c.foundation.clone();
    candidate.priority = c.priority;
    candidate.address = c.address.clone();
    candidate.protocol = match c.protocol {
        IceProtocol::Udp => RTCIceProtocol::Udp,
        IceProtocol::Tcp => RTCIceProtocol::Tcp,
    };
    candidate.port = c.port;
    candidate.typ = match c.candidate_type {
        CandidateType::Host => RTCIceCandidateType::Host,
        CandidateType::ServerReflexive => RTCIceCandidateType::Srflx,
        CandidateType::PeerReflexive => RTCIceCandidateType::Prflx,
        CandidateType::Relay => RTCIceCandidateType::Relay,
    };
    candidate.component = c.component;
    candidate.related_address = c.related_address.clone();
    candidate.related_port = c.related_port;
    candidate.tcp_type = c.tcp_type.clone();
    candidate
}

fn parameters_to_webrtc(p: IceParameters) -> RTCIceParameters {
    RTCIceParameters {
        username_fragment: p.username_fragment,
        password: p.password,
        ice_lite: p.ice_lite,
    }
}

fn dtls_from_webrtc(p: DTLSParameters) -> DtlsParameters {
    DtlsParameters {
        role: match p.role {
            DTLSRole::Client => DtlsRole::Client,
            DTLSRole::Server => DtlsRole::Server,
            _ => DtlsRole::Auto,
        },
        fingerprints: p
            .fingerprints
            .into_iter()
            .map(|f| DtlsFingerprint {
                algorithm: f.algorithm,
                value: f.value,
            })
            .collect(),
    }
}

fn dtls_to_webrtc(p: DtlsParameters) -> DTLSParameters {
    DTLSParameters {
        role: match p.role {
            DtlsRole::Auto => DTLSRole::Auto,
            DtlsRole::Client => DTLSRole::Client,
            DtlsRole::Server => DTLSRole::Server,
        },
        fingerprints: p
            .fingerprints
            .into_iter()
            .map(|f| RTCDtlsFingerprint {
                algorithm: f.algorithm,
                value: f.value,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_conversion_keeps_fields() {
        let mut candidate = IceCandidate::server_reflexive(
            "2",
            "203.0.113.7",
            61000,
            1694498815,
            ("192.168.1.10", 50000),
        );
        candidate.protocol = IceProtocol::Tcp;
        candidate.tcp_type = "passive".to_string();

        let converted = candidate_to_webrtc(&candidate);
        assert_eq!(converted.typ, RTCIceCandidateType::Srflx);
        assert_eq!(converted.related_port, 50000);
        assert_eq!(candidate_from_webrtc(&converted).unwrap(), candidate);
    }

    #[test]
    fn test_untyped_candidate_rejected() {
        let candidate = RTCIceCandidate::default();
        assert!(candidate_from_webrtc(&candidate).is_err());
    }

    #[test]
    fn test_role_maps_to_ice_role() {
        assert_eq!(ice_role(Role::Initiator), RTCIceRole::Controlling);
        assert_eq!(ice_role(Role::Responder), RTCIceRole::Controlled);
    }

    #[test]
    fn test_dtls_parameters_conversion() {
        let params = DtlsParameters {
            role: DtlsRole::Server,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: "AB:CD".to_string(),
            }],
        };
        assert_eq!(dtls_from_webrtc(dtls_to_webrtc(params.clone())), params);
    }

    #[test]
    fn test_accessors_before_discovery() {
        let engine = WebrtcEngine::new();
        assert!(engine.local_candidates().is_err());
        assert!(engine.local_dtls_parameters().is_err());
        assert_eq!(engine.sctp_capabilities(), SctpCapabilities::default());
    }

    #[tokio::test]
    async fn test_discovery_started_once() {
        let engine = WebrtcEngine::new();
        engine.begin_discovery(&[], Box::new(|_: Option<IceCandidate>| {})).unwrap();
        let err = engine
            .begin_discovery(&[], Box::new(|_: Option<IceCandidate>| {}))
            .unwrap_err();
        assert!(err.message().contains("already started"));
    }
}
