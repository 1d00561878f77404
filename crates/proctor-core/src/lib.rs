//! Shared leaf types for the realtime test-execution relay.

pub mod envelope;
pub mod error;
pub mod identity;

pub use envelope::Envelope;
pub use error::{ConnectionClosed, RelayError};
pub use identity::Identity;
