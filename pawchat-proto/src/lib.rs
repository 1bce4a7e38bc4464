//! Shared protocol definitions for the `PawChat` conversation engine.

pub mod broker;
pub mod codec;
pub mod message;
pub mod payload;
pub mod topic;
