//! Error types for the checkout engine.

/// Conversion and encoding errors (pure, no IO involved).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Attach field {field} contains the reserved separator '{separator}'")]
    AttachSeparator {
        field: &'static str,
        separator: char,
    },

    #[error("Attach string must have exactly 3 fields, got {0}")]
    AttachTokenCount(usize),

    #[error("Price cannot be negative: {0}")]
    NegativePrice(String),

    #[error("Price {0} does not fit in integer minor units")]
    PriceOutOfRange(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Currency {currency} uses {exponent} minor-unit digits; only 2 are supported")]
    UnsupportedCurrencyExponent { currency: String, exponent: u32 },

    #[error("Missing metadata field: {0}")]
    MissingMetadata(&'static str),

    #[error("Invalid order token: {0}")]
    InvalidOrderToken(String),
}

/// Adapter-level errors.
///
/// A recognised-but-negative provider status is not an error: it comes back
/// as a `NotifyResult` with `PaymentState::Error`. These variants cover the
/// cases where no trustworthy state could be obtained at all.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("{provider}: transport error: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: HTTP {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider}: malformed response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: provider rejected the request: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: webhook verification failed: {message}")]
    Verification {
        provider: &'static str,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{provider}: {operation} is not supported")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },
}

impl ProviderError {
    pub fn decode(provider: &'static str, message: impl ToString) -> Self {
        ProviderError::Decode {
            provider,
            message: message.to_string(),
        }
    }

    pub fn verification(provider: &'static str, message: impl ToString) -> Self {
        ProviderError::Verification {
            provider,
            message: message.to_string(),
        }
    }

    pub fn provider(provider: &'static str, message: impl ToString) -> Self {
        ProviderError::Provider {
            provider,
            message: message.to_string(),
        }
    }

    /// Returns true for failures the caller may safely retry with `notify`.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport { .. } => true,
            ProviderError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
