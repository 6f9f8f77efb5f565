//! Token production over the real WebRTC stack.
//!
//! No STUN servers are configured, so gathering only looks at local
//! interfaces and finishes without network access.

use peerlink::token;
use peerlink::{Config, PeerlinkError, Session, SessionState, WebrtcEngine};

fn offline_config() -> Config {
    let mut config = Config::default();
    config.discovery.stun_servers.clear();
    config
}

/// Test a local token is produced from the ORTC gatherer and transports
#[tokio::test]
async fn test_produce_token_without_stun() {
    let mut session = Session::with_config(WebrtcEngine::new(), offline_config());
    let encoded = session.produce_local_token().await.unwrap();
    assert_eq!(session.state(), SessionState::TokenReady);

    let decoded = token::decode(&encoded).unwrap();
    assert!(!decoded.identity().is_empty());
    assert!(!decoded.ice_parameters.password.is_empty());
    assert!(!decoded.dtls_parameters.fingerprints.is_empty());
    assert_eq!(session.local_token(), Some(&decoded));
}

/// Test a garbage remote token fails before any transport starts
#[tokio::test]
async fn test_start_rejects_garbage_token() {
    let mut session = Session::with_config(WebrtcEngine::new(), offline_config());
    session.produce_local_token().await.unwrap();

    let err = session.start("not-base64!!").await.unwrap_err();
    assert!(matches!(err, PeerlinkError::MalformedToken(_)));
    assert_eq!(session.state(), SessionState::Failed);
}
