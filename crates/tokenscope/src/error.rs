use thiserror::Error;

/// Errors produced while talking to an upstream model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connection, TLS, non-2xx without a better bucket).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider rejected our credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The provider throttled the request.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The remote call did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The provider answered with a body we could not interpret.
    #[error("malformed provider response: {message}. Raw response: '{raw_response}'")]
    ResponseFormat {
        message: String,
        raw_response: String,
    },

    /// JSON serialization of the request payload failed.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

/// Errors from the pricing model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// No rate is configured for the given pair and no default rate exists.
    #[error("no pricing configured for {provider}/{model}")]
    RateUnknown { provider: String, model: String },
}
