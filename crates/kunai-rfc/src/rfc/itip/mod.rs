//! iTIP scheduling messages (RFC 5546).

mod error;
mod message;
mod method;

pub use error::{ITipError, ITipResult};
pub use message::{FreeBusyRange, MASK_UID_PROPERTY, PRIVATE_ACCESS_PROPERTY, SchedulingMessage};
pub use method::ITipMethod;
