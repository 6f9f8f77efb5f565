//! Manual bootstrap protocol.
//!
//! Two peers connect without a signaling server by swapping one token each
//! through any human channel (chat, email, voice).
//!
//! # Message Flow
//!
//! ```text
//! Peer X                                      Peer Y
//!    |                                          |
//!    | produce_local_token()                    | produce_local_token()
//!    |   discovery ... done                     |   discovery ... done
//!    |                                          |
//!    |======== Tx (pasted out-of-band) ========>|
//!    |<======= Ty (pasted out-of-band) =========|
//!    |                                          |
//!    | start(Ty)                                | start(Tx)
//!    |   resolve role                           |   resolve role
//!    |<-------- ICE candidate checks ---------->|
//!    |<-------- DTLS handshake ---------------->|
//!    |<-------- SCTP association -------------->|
//!    |<-------- data channels open ------------>|
//!    |                                          |
//!    |======== send_message / on_message ======>|
//! ```
//!
//! ## State Machine
//!
//! | State         | Description                          | Valid Transitions        |
//! |---------------|--------------------------------------|--------------------------|
//! | `New`         | Session created                      | → Gathering              |
//! | `Gathering`   | Waiting for discovery completion     | → TokenReady, Failed     |
//! | `TokenReady`  | Local token handed to the user       | → Negotiating            |
//! | `Negotiating` | Running the three handshake layers   | → Connected, Failed      |
//! | `Connected`   | Data channel open                    | → Closed                 |
//! | `Closed`      | Closed locally                       | (terminal)               |
//! | `Failed`      | Any step failed                      | (terminal)               |
//!
//! ## Roles
//!
//! Each peer compares its own ICE username fragment with the remote one.
//! The greater fragment takes [`Role::Initiator`] (ICE controlling); equal
//! fragments abort with a role collision.
//!
//! # Usage
//!
//! ```rust,ignore
//! use peerlink::protocol::Session;
//!
//! let mut session = Session::new(engine);
//! let token = session.produce_local_token().await?;
//! println!("{token}");
//!
//! // ... read the peer's token from the user ...
//! session.start(&remote_token).await?;
//! session.on_message(|msg| println!("{}", String::from_utf8_lossy(&msg)));
//! session.send_message("hello").await?;
//! ```

mod role;
mod session;

pub use role::{resolve_role, Role};
pub use session::{Session, SessionState, SessionStats};

/// Default STUN server used for reflexive candidate discovery
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default data channel label
pub const DEFAULT_CHANNEL_LABEL: &str = "peerlink";
