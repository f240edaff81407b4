//! iCalendar serialization (RFC 5545).
//!
//! - Escape: Parameter value quoting
//! - Fold: Content line folding at 75 octets
//! - Serializer: Document serialization preserving property order

mod escape;
mod fold;
mod serializer;

pub use escape::escape_param_value;
pub use fold::fold_line;
pub use serializer::{serialize, serialize_component, serialize_property};
