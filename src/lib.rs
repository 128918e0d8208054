//! Signaling relay for peer-to-peer connections.
//!
//! Clients connect over a WebSocket, join a named room and exchange session
//! descriptions and ICE candidates with every other member of that room. The
//! relay only routes messages; payloads are never inspected.

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod keepalive;
pub mod model;
pub mod registry;
pub mod relay;
pub mod server;
pub mod util;

pub use config::RelayConfig;
pub use error::RelayError;
pub use registry::Registry;
pub use relay::Relay;
pub use server::RelayServer;
