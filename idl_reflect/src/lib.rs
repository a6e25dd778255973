/* Protocol Reflection Library
 *
 * Decodes untrusted message bytes by executing the decode plan built by
 * idl_gen directly, producing a typed value tree instead of generated code.
 */

pub mod demarshaller;
pub mod errors;
pub mod reflect;
pub mod value;

pub use demarshaller::{DecodeOptions, DecodeStats, Demarshaller};
pub use errors::{DecodeError, DecodeErrorKind, ReflectError, ReflectResult};
pub use reflect::Reflector;
pub use value::Value;
