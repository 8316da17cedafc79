use crate::models::ProviderKind;
use thiserror::Error;

/**
 * \brief Failure classes surfaced by the completion clients and orchestrators.
 *
 * Key Store and Model Catalog never produce these for "not found"
 * conditions — absence is a valid return value there. Every variant
 * renders as a short, actionable message; no raw stack traces reach
 * the UI.
 */
#[derive(Debug, Error)]
pub enum Error {
    /** \brief No API key configured. Resolved by prompting the user, never retried. */
    #[error("no {0} API key configured; add one in settings")]
    Configuration(ProviderKind),

    /** \brief The provider rejected the credential. Not retried. */
    #[error("{0} rejected the API key; check your API key and try again")]
    Authentication(ProviderKind),

    /** \brief Non-2xx response. Eligible for the single model-substitution retry. */
    #[error("{provider} request failed: {status} {message}")]
    Provider {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    /** \brief Transport-level failure (DNS, timeout, refused connection). */
    #[error("could not reach {provider}; check your network connection")]
    Network {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
