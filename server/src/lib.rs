//! hubbub: an HTTP-embedded publish/subscribe broker
//!
//! Clients publish to named channels over HTTP bodies; subscribers receive
//! each message in order over long-polling, interval polling, chunked HTTP,
//! multipart/mixed, Server-Sent Events or WebSocket. Channels keep a bounded
//! history, may be composed into multi-channels, and live in a pluggable
//! storage engine (in-process memory or Redis).

pub mod api;
pub mod app;
pub mod channel;
pub mod core;
pub mod store;
