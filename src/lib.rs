//! Mindful Match: conversational intake that routes people to a peer support group.

pub mod assessment;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod store;
