//! iCalendar (RFC 5545) support for scheduling messages.
//!
//! Only the structural layer is modeled: components, properties and
//! parameters with their raw values. Scheduling needs to read and rewrite
//! calendar-user addresses and a handful of date-times, never to expand
//! recurrences, so value typing is left to the consumers.
//!
//! - `core`: Type definitions for iCalendar structures
//! - `parse`: Content-line lexer and document parser
//! - `build`: Folding, escaping and serialization

pub mod build;
pub mod core;
pub mod parse;

pub use build::serialize;
pub use core::{Component, ComponentKind, ICalendar, Parameter, Property};
pub use parse::{ParseError, ParseErrorKind, ParseResult, parse};
