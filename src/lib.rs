//! # Arena Lobby Server
//!
//! Real-time matchmaking and session establishment for versus matches.
//! Pairs concurrently-connecting clients into fixed-size groups, binds
//! each group to an exclusive port, supervises an external match-runner
//! process on that port, and relays the peer-to-peer handshake between
//! paired clients until their session starts or a peer disconnects.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ARENA LOBBY SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  lobby/          - Shared matchmaking state (one lock each)  │
//! │  ├── pool.rs     - Per group-size FIFO queues                │
//! │  ├── ports.rs    - Exclusive port allocation                 │
//! │  ├── runner.rs   - Match-runner process supervision          │
//! │  ├── registry.rs - Session <-> participant index             │
//! │  └── mod.rs      - Lobby service, connection state machine   │
//! │                                                              │
//! │  network/        - Sockets and wire concerns                 │
//! │  ├── auth.rs     - Join-token validation, identity lookup    │
//! │  ├── protocol.rs - {code, data} JSON envelopes               │
//! │  ├── relay.rs    - Notices and handshake forwarding          │
//! │  └── server.rs   - WebSocket endpoint, per-connection tasks  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! One tokio task per live socket, plus one writer task per connection
//! and one detached wait task per supervised match-runner process. The
//! matchmaking queues, the port set, and the session registry are the
//! only contended state; each serializes behind its own lock, and the
//! pool's check-and-extract runs as a single critical section so racing
//! joins can never split a group.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod lobby;
pub mod network;

// Re-export commonly used types
pub use lobby::{ConnectionPhase, DisconnectKind, Lobby, LobbyConfig, PlayerHandle};
pub use network::protocol::{Envelope, MessageCode, PublicProfile};
pub use network::server::{LobbyServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Group sizes the matchmaking accepts by default.
pub const SUPPORTED_GROUP_SIZES: &[usize] = &[2, 4];
