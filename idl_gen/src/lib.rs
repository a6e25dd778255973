//! Protocol interface compiler.
//!
//! Reads a channel/message interface description, builds and analyzes the
//! type model, and emits message identifier tables and demarshallers for
//! untrusted wire buffers.

pub mod cmds;
pub mod codegen;
pub mod config;
pub mod model;
