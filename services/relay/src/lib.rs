//! Gesture Relay Library Crate
//!
//! Server side of the streaming protocol: accepts `POST /api/chat`, opens a
//! streamed completion upstream and re-emits the text deltas as simplified
//! Server-Sent Events. The `relay` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod relay;
pub mod router;
pub mod state;
pub mod upstream;
