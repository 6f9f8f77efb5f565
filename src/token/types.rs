//! Negotiation material carried inside an exchange token.
//!
//! Field names follow the JSON shape used by ORTC-style WebRTC stacks so a
//! decoded token reads the same as the engine's own debug output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of ICE candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateType {
    /// Local network interface address
    #[serde(rename = "host")]
    Host,
    /// Server reflexive (public address learned from STUN)
    #[serde(rename = "srflx")]
    ServerReflexive,
    /// Peer reflexive (learned during connectivity checks)
    #[serde(rename = "prflx")]
    PeerReflexive,
    /// Relay (allocated on a TURN server)
    #[serde(rename = "relay")]
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateType::Host => write!(f, "host"),
            CandidateType::ServerReflexive => write!(f, "srflx"),
            CandidateType::PeerReflexive => write!(f, "prflx"),
            CandidateType::Relay => write!(f, "relay"),
        }
    }
}

/// Transport protocol of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceProtocol {
    /// UDP
    Udp,
    /// TCP
    Tcp,
}

impl fmt::Display for IceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IceProtocol::Udp => write!(f, "udp"),
            IceProtocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// One locally discovered connectivity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IceCandidate {
    /// Foundation string for candidate pairing
    pub foundation: String,
    /// Priority (higher = more preferred)
    pub priority: u32,
    /// IP address (v4 or v6) or mDNS hostname
    pub address: String,
    /// Transport protocol
    pub protocol: IceProtocol,
    /// Transport port
    pub port: u16,
    /// Candidate type
    #[serde(rename = "type")]
    pub candidate_type: CandidateType,
    /// Component ID (1 for the single data component)
    pub component: u16,
    /// Base address for reflexive and relay candidates, empty for host
    #[serde(rename = "relatedAddress")]
    pub related_address: String,
    /// Base port for reflexive and relay candidates, 0 for host
    #[serde(rename = "relatedPort")]
    pub related_port: u16,
    /// TCP candidate type (active/passive/so), empty for UDP
    #[serde(rename = "tcpType")]
    pub tcp_type: String,
}

impl IceCandidate {
    /// Create a UDP host candidate.
    pub fn host(foundation: &str, address: &str, port: u16, priority: u32) -> Self {
        Self {
            foundation: foundation.to_string(),
            priority,
            address: address.to_string(),
            protocol: IceProtocol::Udp,
            port,
            candidate_type: CandidateType::Host,
            component: 1,
            related_address: String::new(),
            related_port: 0,
            tcp_type: String::new(),
        }
    }

    /// Create a UDP server reflexive candidate for a host base.
    pub fn server_reflexive(
        foundation: &str,
        address: &str,
        port: u16,
        priority: u32,
        base: (&str, u16),
    ) -> Self {
        Self {
            candidate_type: CandidateType::ServerReflexive,
            related_address: base.0.to_string(),
            related_port: base.1,
            ..Self::host(foundation, address, port, priority)
        }
    }

    /// Whether the address is an IPv6 literal.
    pub fn is_ipv6(&self) -> bool {
        self.address.contains(':')
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.candidate_type, self.protocol)?;
        if self.is_ipv6() {
            write!(f, "[{}]:{}", self.address, self.port)?;
        } else {
            write!(f, "{}:{}", self.address, self.port)?;
        }
        write!(f, " priority {}", self.priority)?;
        if !self.related_address.is_empty() {
            write!(f, " related {}:{}", self.related_address, self.related_port)?;
        }
        Ok(())
    }
}

/// Local ICE session identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IceParameters {
    /// Username fragment; also the identity used to break role ties
    #[serde(rename = "usernameFragment")]
    pub username_fragment: String,
    /// ICE password
    pub password: String,
    /// Whether the agent is an ICE-lite implementation
    #[serde(rename = "iceLite")]
    pub ice_lite: bool,
}

impl IceParameters {
    /// Create full (non-lite) ICE parameters.
    pub fn new(username_fragment: &str, password: &str) -> Self {
        Self {
            username_fragment: username_fragment.to_string(),
            password: password.to_string(),
            ice_lite: false,
        }
    }
}

/// DTLS role hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    /// Let the ICE role decide
    #[default]
    Auto,
    /// Act as DTLS client
    Client,
    /// Act as DTLS server
    Server,
}

/// Certificate fingerprint advertised for the DTLS handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DtlsFingerprint {
    /// Hash function name, e.g. `sha-256`
    pub algorithm: String,
    /// Colon-separated hex digest
    pub value: String,
}

/// Secure-transport parameters, passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DtlsParameters {
    /// Role hint
    pub role: DtlsRole,
    /// Certificate fingerprints
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Channel multiplexer capabilities, passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SctpCapabilities {
    /// Largest message the local SCTP stack accepts (0 = unlimited)
    #[serde(rename = "maxMessageSize")]
    pub max_message_size: u32,
}

impl Default for SctpCapabilities {
    fn default() -> Self {
        Self {
            max_message_size: 65536,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_json_shape() {
        let c = IceCandidate::host("1", "192.168.1.10", 50000, 2130706431);
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["type"], "host");
        assert_eq!(value["protocol"], "udp");
        assert_eq!(value["relatedAddress"], "");
        assert!(value.get("statsID").is_none());
        assert!(value.get("typ").is_none());
    }

    #[test]
    fn test_candidate_display() {
        let c = IceCandidate::server_reflexive(
            "2",
            "203.0.113.7",
            61000,
            1694498815,
            ("192.168.1.10", 50000),
        );
        assert_eq!(
            c.to_string(),
            "srflx udp 203.0.113.7:61000 priority 1694498815 related 192.168.1.10:50000"
        );
        assert!(!c.is_ipv6());
    }

    #[test]
    fn test_ipv6_candidate_display() {
        let c = IceCandidate::host("1", "fe80::1", 50000, 2130706431);
        assert!(c.is_ipv6());
        assert_eq!(c.to_string(), "host udp [fe80::1]:50000 priority 2130706431");
    }

    #[test]
    fn test_candidate_from_ortc_json() {
        // Key set written by ORTC stacks for a server reflexive candidate
        let json = r#"{"foundation":"3527593342","priority":1694498815,
            "address":"203.0.113.7","protocol":"udp","port":61000,"type":"srflx",
            "component":1,"relatedAddress":"192.168.1.10","relatedPort":50000,"tcpType":""}"#;
        let c: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(c.candidate_type, CandidateType::ServerReflexive);
        assert_eq!(c.related_port, 50000);
    }

    #[test]
    fn test_unknown_candidate_field_rejected() {
        let json = r#"{"statsID":"","foundation":"1","priority":1,"address":"10.0.0.1",
            "protocol":"udp","port":1,"type":"host","component":1,"relatedAddress":"",
            "relatedPort":0,"tcpType":"","extra":true}"#;
        assert!(serde_json::from_str::<IceCandidate>(json).is_err());
    }

    #[test]
    fn test_dtls_role_default_auto() {
        let params = DtlsParameters::default();
        assert_eq!(serde_json::to_value(params.role).unwrap(), "auto");
    }
}
