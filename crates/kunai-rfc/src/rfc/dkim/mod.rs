//! DKIM for HTTP requests, as used by iSchedule.
//!
//! This module holds the pure text layer: tag lists, the signature header
//! model, relaxed canonicalization and public key records. Hashing, RSA and
//! key retrieval live in the service crate.

mod canonical;
mod error;
mod key_record;
mod tags;

pub use canonical::{canonicalize_body, canonicalize_header, remove_signature_value};
pub use error::{DkimError, DkimResult};
pub use key_record::{KEY_SERVICE_TYPE, PublicKeyRecord};
pub use tags::{SignatureTags, TagList};
