//! Error types for the Hetzner Cloud client.

use thiserror::Error;

/// Errors raised while talking to the Hetzner Cloud API.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when a lookup by name or id matches nothing.
    #[error("{resource} '{selector}' not found")]
    NotFound {
        /// Resource kind, for example `image`.
        resource: &'static str,
        /// Name or id used for the lookup.
        selector: String,
    },
    /// Raised when the API answers with an error envelope.
    #[error("api error {status} ({code}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Hetzner error code, for example `uniqueness_error`.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// Raised when the request could not be sent or the response not read.
    #[error("transport error: {message}")]
    Transport {
        /// Message returned by the HTTP client.
        message: String,
    },
    /// Raised when a successful response cannot be decoded.
    #[error("failed to decode {resource} response: {message}")]
    Decode {
        /// Resource kind being decoded.
        resource: &'static str,
        /// Message returned by the JSON decoder.
        message: String,
    },
}

impl From<reqwest::Error> for ProviderError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            message: value.to_string(),
        }
    }
}
