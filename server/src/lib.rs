//! Huddle — a lightweight WebSocket group messaging relay.
//!
//! Clients connect to `/ws`, are partitioned into isolated rooms (by explicit
//! code or client-address bucket), exchange broadcast chat messages, and
//! receive a bounded replay of recent room activity on join.

pub mod config;
pub mod engine;
pub mod web;
