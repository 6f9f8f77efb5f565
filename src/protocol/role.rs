//! Deterministic role assignment.
//!
//! Both peers run [`resolve_role`] independently with their own identity as
//! `local`. Because the comparison is a strict total order on the two
//! strings, exactly one side ends up as [`Role::Initiator`].

use std::cmp::Ordering;
use std::fmt;

use crate::error::{PeerlinkError, Result};

/// Which side drives connection setup timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Drives the handshake (ICE controlling)
    Initiator,
    /// Follows the initiator (ICE controlled)
    Responder,
}

impl Role {
    /// The role the other peer takes.
    pub fn complement(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }

    /// Check if this is the initiating side
    pub fn is_initiator(self) -> bool {
        self == Role::Initiator
    }

    /// ICE agent role name for this side.
    pub fn ice_role_name(self) -> &'static str {
        match self {
            Role::Initiator => "controlling",
            Role::Responder => "controlled",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Resolve the local role from the two identity fragments.
///
/// The identity that sorts strictly greater (byte-wise) initiates. Equal
/// identities are rejected with [`PeerlinkError::RoleCollision`]: picking a
/// default there would leave both peers with the same role.
pub fn resolve_role(local: &str, remote: &str) -> Result<Role> {
    match local.cmp(remote) {
        Ordering::Greater => Ok(Role::Initiator),
        Ordering::Less => Ok(Role::Responder),
        Ordering::Equal => Err(PeerlinkError::RoleCollision(local.to_string())),
    }
}
