//! The connection/session/room broadcast engine.

pub mod error;
pub mod events;
pub mod grouping;
pub mod rate_limiter;
pub mod relay;
pub mod room;
pub mod session;
