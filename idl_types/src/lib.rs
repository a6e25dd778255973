//! Interface Description Declarations
//!
//! This crate contains the declaration structures for protocol interface
//! descriptions: named types, channels and their per-direction message
//! lists. It provides pure data structures with no name resolution, layout
//! or code generation logic.

pub mod types;

// Re-export commonly used types at the crate root
pub use types::*;
