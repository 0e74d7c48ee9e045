//! # Streaming Dictation
//!
//! The `/stream` WebSocket protocol, transport independent:
//! - **protocol**: JSON envelopes in both directions
//! - **session**: the per-connection state machine
//! - **scope**: cancellation shared between the server, sessions and calls

pub mod protocol;
pub mod scope;
pub mod session;

pub use protocol::{ClientMessage, Outbound, ProtocolError, ServerMessage, StartConfig};
pub use scope::{CancelScope, ScopeError};
pub use session::{SessionDeps, SessionState, StreamingSession};
