//! # Peerlink - Serverless Peer-to-Peer Bootstrap
//!
//! Connects two endpoints without a signaling server. Each side gathers its
//! connectivity candidates, packs them into one copy-pasteable token, and
//! the two humans swap tokens over any channel they like. Once both tokens
//! are known, each side completes negotiation and gets a bidirectional
//! message channel.
//!
//! ## Features
//!
//! - **Exchange tokens**: single-line base64 JSON, strict decoding
//! - **Deterministic roles**: both peers agree on who initiates, no extra round trip
//! - **Ordered handshake**: ICE candidates → DTLS → SCTP, fail fast at the first error
//! - **Pluggable engine**: discovery and transports are provided by a [`ConnectivityEngine`]
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────┐
//!   token  <──── │   Session (bootstrap FSM)    │ ────> DataChannel
//!                └──┬─────────────┬─────────────┘
//!                   │             │
//!          ┌────────┴───┐   ┌─────┴────────┐
//!          │ token codec│   │ role resolver│
//!          └────────────┘   └──────────────┘
//!                   │
//!          ┌────────┴─────────────────────────┐
//!          │ ConnectivityEngine (ICE/DTLS/SCTP)│
//!          └───────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use peerlink::{Session, WebrtcEngine};
//!
//! let mut session = Session::new(WebrtcEngine::new());
//! let local = session.produce_local_token().await?;
//! println!("Local Token:\n{local}");
//!
//! session.start(&remote).await?;
//! session.on_message(|msg| println!("Received message: {}", String::from_utf8_lossy(&msg)));
//! session.send_message("hello").await?;
//! ```
//!
//! ## Modules
//!
//! - [`token`]: Exchange token types and codec
//! - [`protocol`]: Role resolution and the bootstrap session
//! - [`engine`]: Connectivity engine boundary, the WebRTC engine and the in-memory engine
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod token;

// Re-exports for convenience
pub use config::Config;
pub use engine::{ConnectivityEngine, DataChannel, EngineError, MemoryEngine, WebrtcEngine};
pub use error::{Layer, PeerlinkError, Result};
pub use protocol::{resolve_role, Role, Session, SessionState, SessionStats};
pub use token::ExchangeToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
