//! API key lookup for hosted embedding providers

use crate::error::{Error, Result};
use tracing::error;

/// Name of the environment variable holding the key for `provider`
pub fn api_key_env_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase())
}

/// Log a missing key for `provider` and return [`Error::MissingApiKey`].
///
/// ```
/// use embedkit::credentials::api_key_not_found_help;
///
/// let err = api_key_not_found_help::<String>("openai").unwrap_err();
/// assert_eq!(err.to_string(), "Please set the OPENAI_API_KEY environment variable.");
/// ```
pub fn api_key_not_found_help<T>(provider: &str) -> Result<T> {
    error!("Could not find API key for {}.", provider);
    Err(Error::MissingApiKey {
        provider: provider.to_string(),
        env_var: api_key_env_var(provider),
    })
}

/// Read the key for `provider` from `<PROVIDER>_API_KEY`
pub fn api_key_from_env(provider: &str) -> Result<String> {
    resolve_api_key(provider, std::env::var(api_key_env_var(provider)).ok())
}

fn resolve_api_key(provider: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(key) if !key.trim().is_empty() => Ok(key),
        _ => api_key_not_found_help(provider),
    }
}
