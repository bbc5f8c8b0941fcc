//! Terra Session Server Library
//!
//! A shared-world multiplayer server: HTTP credential issuance, a
//! token-gated WebTransport realtime channel, a single-writer player table
//! and deterministic terrain generation.
//!
//! # Features
//!
//! - `dos_ratelimit` - Per-connection message rate limiting (enabled by default).
//!   Connection caps are always on.

pub mod api;
pub mod auth;
pub mod config;
pub mod metrics;
pub mod net;
pub mod terrain;
pub mod world;
