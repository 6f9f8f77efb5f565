//! Exchange token codec.
//!
//! A token is everything one peer needs to know about the other to finish
//! the handshake, packed into one line that survives a chat window:
//!
//! ```text
//! ExchangeToken ──serde_json──> {"ICECandidates":[..],"ICEParameters":{..},..}
//!               ──base64 (standard, padded)──> eyJJQ0VDYW5kaWRhdGVzIjpb...
//! ```
//!
//! Decoding is strict. Anything that is not exactly the output of [`encode`]
//! (modulo surrounding whitespace) is rejected with
//! [`PeerlinkError::MalformedToken`]; there is no partial result.

mod types;

pub use types::{
    CandidateType, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    IceProtocol, SctpCapabilities,
};

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{PeerlinkError, Result};

/// One peer's negotiation material.
///
/// Tokens are single-use: a session produces exactly one and it must not be
/// reused for another session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeToken {
    /// Discovered candidates, in engine order
    #[serde(rename = "ICECandidates")]
    pub ice_candidates: Vec<IceCandidate>,
    /// Discovery session identity
    #[serde(rename = "ICEParameters")]
    pub ice_parameters: IceParameters,
    /// Secure-transport parameters
    #[serde(rename = "DTLSParameters")]
    pub dtls_parameters: DtlsParameters,
    /// Channel multiplexer capabilities
    #[serde(rename = "SCTPCapabilities")]
    pub sctp_capabilities: SctpCapabilities,
}

impl ExchangeToken {
    /// Identity fragment used for role tie-breaking.
    pub fn identity(&self) -> &str {
        &self.ice_parameters.username_fragment
    }
}

impl fmt::Display for ExchangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = encode(self).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

impl FromStr for ExchangeToken {
    type Err = PeerlinkError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

/// Encode a token into a single line of standard base64.
pub fn encode(token: &ExchangeToken) -> Result<String> {
    let json = serde_json::to_vec(token)
        .map_err(|e| PeerlinkError::EncodingFailed(format!("Failed to serialize token: {e}")))?;
    Ok(STANDARD.encode(json))
}

/// Decode a token produced by [`encode`].
///
/// Surrounding whitespace, such as the newline of a pasted line, is ignored.
pub fn decode(input: &str) -> Result<ExchangeToken> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PeerlinkError::MalformedToken("empty token".to_string()));
    }

    let json = STANDARD.decode(trimmed)?;
    let token: ExchangeToken = serde_json::from_slice(&json)?;
    Ok(token)
}
