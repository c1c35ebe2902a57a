//! # Streaming Speech-to-Braille
//!
//! Turns an unbounded audio stream from one client into bounded
//! transcription requests, keeps linguistic context across chunk boundaries
//! and accumulates a session-level transcript and braille rendering.
//!
//! ## Key Components:
//! - **protocol**: control messages in, events out
//! - **session**: the per-connection state bundle
//! - **dispatch**: recognizer and translator calls for one flushed span
//! - **controller**: the sequential read-handle loop and the flush procedure
//!
//! The transport (see `crate::websocket`) only moves frames; everything
//! here can be driven through in-memory channels.

pub mod controller;
pub mod dispatch;
pub mod protocol;
pub mod session;

pub use controller::{serve_connection, Inbound, Outbound, StreamingSettings, INBOUND_QUEUE_DEPTH};
pub use protocol::{ClientMessage, ServerEvent};
pub use session::{SessionConfig, SessionState, StreamingSession};
