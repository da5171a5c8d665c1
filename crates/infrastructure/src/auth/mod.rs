//! Authentication infrastructure adapters.
//!
//! This module provides:
//! - Header/query credentials for Basic, Bearer, API key and `OAuth2`
//! - `OAuth2` client credentials, password and authorization code (PKCE) grants
//! - The local `/callback` listener used by the authorization code grant

mod callback;
mod credentials;
mod oauth2_provider;
mod pkce;

pub use callback::{CALLBACK_PATH, CallbackListener, CallbackParams};
pub use credentials::{AuthApplier, Credential};
pub use oauth2_provider::{AuthorizePrompt, OAuth2Provider};
pub use pkce::{PkcePair, generate_state};
