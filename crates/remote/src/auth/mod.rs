//! Access token handling

pub mod claims;
mod token_cache;

pub use token_cache::{
    CachedToken, Credentials, RENEWAL_SKEW_SECS, RenewalFailure, TokenCache, TokenSource,
};
