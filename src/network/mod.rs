//! Network layer: authentication, wire protocol, signaling, and the
//! WebSocket endpoint itself. Everything here is allowed to be
//! non-deterministic; the lobby components it drives are not aware of
//! sockets at all.

pub mod auth;
pub mod protocol;
pub mod relay;
pub mod server;

pub use protocol::{Envelope, MessageCode};
pub use server::{LobbyServer, ServerConfig};
