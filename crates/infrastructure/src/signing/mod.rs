//! Request signing that depends on the full request or a server challenge.

pub mod aws_sigv4;
pub mod digest;

pub use aws_sigv4::{EMPTY_PAYLOAD_SHA256, SigningRequest, hmac_sha256, sha256_hex};
pub use digest::{DigestAlgorithm, DigestChallenge, generate_cnonce};
