//! `PawChat` — real-time conversation synchronization engine.
//!
//! Keeps a rendered message list consistent with a shared, append-only
//! conversation log delivered over a pub/sub push channel, with paginated
//! history, bidirectional infinite scroll, read receipts, reply threading,
//! search, and jump-to-message.

pub mod config;
pub mod engine;
pub mod history;
pub mod memory;
pub mod moderation;
pub mod net;
pub mod receipts;
pub mod reply;
pub mod search;
pub mod session;
pub mod store;
pub mod transport;
