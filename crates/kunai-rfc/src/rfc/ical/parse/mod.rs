//! iCalendar parsing primitives (RFC 5545).
//!
//! - Lexer: Content line splitting, unfolding and tokenization
//! - Values: The few value types scheduling needs to interpret
//! - Parser: Full document parsing into the component tree

mod error;
mod lexer;
mod parser;
mod values;

pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use lexer::{parse_content_line, split_lines};
pub use parser::parse;
pub use values::{parse_utc_datetime, unescape_text};
