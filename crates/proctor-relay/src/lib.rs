//! The realtime relay core: a registry of live agent/browser connections
//! keyed by identity, and the request/reply bridge that turns an HTTP
//! trigger into one round-trip over the agent's WebSocket.
//!
//! Everything here is transport-agnostic: handles are built from tokio
//! channels, and the tasks pumping actual sockets live in `proctor-server`.

pub mod connection;
pub mod registry;
pub mod relay;

pub use connection::{ClientConn, ConnId, ServerConn, ServerConnPipes};
pub use registry::ConnectionRegistry;
pub use relay::{Relay, RelayConfig};
