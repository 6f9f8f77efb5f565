//! Exchange token codec properties.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use peerlink::token::{
    self, CandidateType, DtlsFingerprint, DtlsParameters, DtlsRole, ExchangeToken, IceCandidate,
    IceParameters, IceProtocol, SctpCapabilities,
};
use peerlink::PeerlinkError;
use proptest::prelude::*;

fn candidate_type() -> impl Strategy<Value = CandidateType> {
    prop_oneof![
        Just(CandidateType::Host),
        Just(CandidateType::ServerReflexive),
        Just(CandidateType::PeerReflexive),
        Just(CandidateType::Relay),
    ]
}

fn candidate() -> impl Strategy<Value = IceCandidate> {
    (
        "[0-9]{1,10}",
        any::<u32>(),
        "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
        prop_oneof![Just(IceProtocol::Udp), Just(IceProtocol::Tcp)],
        any::<u16>(),
        candidate_type(),
        1u16..=2,
        prop_oneof![
            Just(String::new()),
            "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
            "fe80::[0-9a-f]{1,4}",
        ],
        any::<u16>(),
        prop_oneof![
            Just(String::new()),
            Just("active".to_string()),
            Just("passive".to_string()),
            Just("so".to_string()),
        ],
    )
        .prop_map(
            |(
                foundation,
                priority,
                address,
                protocol,
                port,
                typ,
                component,
                related_address,
                related_port,
                tcp_type,
            )| IceCandidate {
                foundation,
                priority,
                address,
                protocol,
                port,
                candidate_type: typ,
                component,
                related_address,
                related_port,
                tcp_type,
            },
        )
}

fn exchange_token() -> impl Strategy<Value = ExchangeToken> {
    (
        prop::collection::vec(candidate(), 0..6),
        "[a-zA-Z0-9+/]{4,32}",
        "[a-zA-Z0-9+/]{22,32}",
        any::<bool>(),
        prop_oneof![Just(DtlsRole::Auto), Just(DtlsRole::Client), Just(DtlsRole::Server)],
        "([0-9A-F]{2}:){3}[0-9A-F]{2}",
        any::<u32>(),
    )
        .prop_map(
            |(candidates, ufrag, pwd, ice_lite, role, fingerprint, max_message_size)| {
                ExchangeToken {
                    ice_candidates: candidates,
                    ice_parameters: IceParameters {
                        username_fragment: ufrag,
                        password: pwd,
                        ice_lite,
                    },
                    dtls_parameters: DtlsParameters {
                        role,
                        fingerprints: vec![DtlsFingerprint {
                            algorithm: "sha-256".to_string(),
                            value: fingerprint,
                        }],
                    },
                    sctp_capabilities: SctpCapabilities { max_message_size },
                }
            },
        )
}

proptest! {
    #[test]
    fn prop_roundtrip(token in exchange_token()) {
        let encoded = token::encode(&token).unwrap();
        prop_assert!(!encoded.contains('\n'));
        prop_assert_eq!(token::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn prop_truncation_rejected(token in exchange_token(), cut in 1usize..64) {
        let encoded = token::encode(&token).unwrap();
        let end = encoded.len().saturating_sub(cut).max(1);
        let result = token::decode(&encoded[..end]);
        prop_assert!(matches!(result, Err(PeerlinkError::MalformedToken(_))));
    }

    #[test]
    fn prop_foreign_characters_rejected(token in exchange_token(), at in any::<prop::sample::Index>()) {
        let mut encoded = token::encode(&token).unwrap();
        let pos = at.index(encoded.len());
        encoded.insert(pos, '!');
        prop_assert!(matches!(token::decode(&encoded), Err(PeerlinkError::MalformedToken(_))));
    }
}

/// Test a JSON payload with a renamed field is rejected
#[test]
fn test_structurally_altered_payload() {
    let token = ExchangeToken {
        ice_candidates: vec![IceCandidate::host("1", "10.0.0.1", 4000, 1)],
        ice_parameters: IceParameters::new("abcd", "password"),
        dtls_parameters: DtlsParameters::default(),
        sctp_capabilities: SctpCapabilities::default(),
    };
    let json = String::from_utf8(STANDARD.decode(token::encode(&token).unwrap()).unwrap()).unwrap();

    let altered = json.replace("ICEParameters", "IceParameters");
    let result = token::decode(&STANDARD.encode(altered));
    assert!(matches!(result, Err(PeerlinkError::MalformedToken(_))));

    let altered = json.replace("\"priority\":1", "\"priority\":\"high\"");
    let result = token::decode(&STANDARD.encode(altered));
    assert!(matches!(result, Err(PeerlinkError::MalformedToken(_))));
}

/// Test a token with a trailing encoded newline still decodes
#[test]
fn test_trailing_newline_inside_payload() {
    let token = ExchangeToken {
        ice_candidates: vec![],
        ice_parameters: IceParameters::new("abcd", "password"),
        dtls_parameters: DtlsParameters::default(),
        sctp_capabilities: SctpCapabilities::default(),
    };
    let mut json = serde_json::to_vec(&token).unwrap();
    json.push(b'\n');
    assert_eq!(token::decode(&STANDARD.encode(json)).unwrap(), token);
}
