//! `PawChat` topic broker library.
//!
//! Exposes the broker server for use in tests and embedding. The broker
//! accepts WebSocket connections and fans published payloads out to topic
//! subscribers. It carries no chat business logic — payloads are opaque.

pub mod broker;
pub mod config;
pub mod topics;
