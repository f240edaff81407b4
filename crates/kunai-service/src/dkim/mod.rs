//! DKIM signing and verification of iSchedule HTTP requests.
//!
//! The tag, canonicalization and key record formats live in
//! `kunai_rfc::rfc::dkim`; this module adds hashing, RSA, and public key
//! retrieval with its cache.

mod cache;
mod lookup;
mod signer;
mod verifier;

use kunai_core::types::DkimAlgorithm;
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Digest, Sha256};

pub use cache::KeyCache;
pub use lookup::{DnsTxtLookup, HttpWellKnownLookup, KeyLookup, PrivateExchangeLookup};
pub use signer::DkimSigner;
pub use verifier::{DkimVerifier, SignedRequest, VerifiedSignature};

fn digest(algorithm: DkimAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        DkimAlgorithm::RsaSha1 => Sha1::digest(data).to_vec(),
        DkimAlgorithm::RsaSha256 => Sha256::digest(data).to_vec(),
    }
}

fn padding(algorithm: DkimAlgorithm) -> Pkcs1v15Sign {
    match algorithm {
        DkimAlgorithm::RsaSha1 => Pkcs1v15Sign::new::<Sha1>(),
        DkimAlgorithm::RsaSha256 => Pkcs1v15Sign::new::<Sha256>(),
    }
}
