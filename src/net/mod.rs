//! Networking layer: wire protocol, framing, admission and the WebTransport
//! listener.

pub mod connection;
pub mod dos_protection;
pub mod framing;
pub mod gate;
pub mod protocol;
pub mod tls;
pub mod transport;
