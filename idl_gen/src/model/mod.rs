pub mod error;
pub mod layout;
pub mod layout_graph;
pub mod numbering;
pub mod parser;
pub mod resolved;
pub mod types;

pub use error::{ModelError, ModelErrorKind};
pub use resolved::*;

/// Parses an interface description and runs the layout pass over it.
///
/// The returned model is fully annotated and is not mutated afterwards.
pub fn load(source: &str) -> Result<ProtocolModel, ModelError> {
    let mut model = parser::parse_protocol(source)?;
    layout::analyze(&mut model)?;
    Ok(model)
}
