#![deny(unsafe_code)]

/// Conversation state machine: log, context window, streaming and citation selection.
pub mod chat;
pub mod command;
pub mod render;
/// Settings persistence and layering.
pub mod settings;
