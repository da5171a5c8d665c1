//! Authentication domain types

mod types;

pub use types::{
    ApiKeyLocation, AuthConfig, AuthError, AwsSigV4Config, OAuth2Config, OAuth2GrantType,
    OAuth2Token,
};
