//! Authentication state shared across requests.
//!
//! Holds `OAuth2` tokens obtained by the token provider so repeated
//! requests with the same grant configuration reuse them until expiry.

mod token_store;

pub use token_store::{TokenStatus, TokenStore};
