use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Identity and credential-exchange error types
///
/// Every variant is terminal for the current chain-construction attempt.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Device code request failed: {0}")]
    DeviceCodeRequestFailed(#[source] RequestError),

    #[error("Device code expired after {attempts} poll attempts without authorization")]
    DeviceCodeExpired { attempts: u64 },

    #[error("Authentication was cancelled")]
    Cancelled,

    #[error("Xbox Live exchange failed during {step}: {source}")]
    XboxLiveExchangeFailed {
        step: ExchangeStep,
        #[source]
        source: RequestError,
    },

    #[error("Xbox Live authorization response carried no user claims")]
    XboxLiveClaimMissing,

    #[error("Minecraft chain request failed: {0}")]
    ChainRequestFailed(#[source] RequestError),

    #[error("Request signing failed: {0}")]
    SigningFailed(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Underlying cause of a failed HTTP exchange
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body_snippet}")]
    Http {
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("XSTS authorization denied: {0}")]
    XstsDenied(#[from] XstsError),
}

impl RequestError {
    /// Build an `Http` error from a non-success response, keeping a short body prefix
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::Http {
            status,
            body_snippet: body.chars().take(200).collect(),
        }
    }
}

/// The Xbox Live hop that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStep {
    DeviceAuthenticate,
    Authorize,
}

impl fmt::Display for ExchangeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceAuthenticate => f.write_str("device authentication"),
            Self::Authorize => f.write_str("user authorization"),
        }
    }
}

/// Reasons SISU refuses to authorize a user for the multiplayer relying party
///
/// Decoded from the `XErr` field of a 401 authorize response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XstsError {
    #[error("Microsoft account has no Xbox profile yet, sign in to xbox.com once to create one (XErr 2148916233)")]
    NoXboxAccount,

    #[error("Xbox Live multiplayer is unavailable in the account's region (XErr 2148916235)")]
    RegionNotSupported,

    #[error("Account must complete adult verification before joining Bedrock servers")]
    AdultVerificationRequired,

    #[error("Child account needs to be added to a Microsoft family to play online")]
    ChildAccountRequiresFamily,

    #[error("SISU authorization refused with XErr {0}")]
    Unknown(u64),
}

impl XstsError {
    pub fn from_xerr(code: u64) -> Self {
        match code {
            2_148_916_233 => Self::NoXboxAccount,
            2_148_916_235 => Self::RegionNotSupported,
            2_148_916_236 | 2_148_916_237 => Self::AdultVerificationRequired,
            2_148_916_238 => Self::ChildAccountRequiresFamily,
            code => Self::Unknown(code),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// Result handed to every caller waiting on the same chain attempt
pub type SharedResult<T> = std::result::Result<T, Arc<AuthError>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xerr_mapping() {
        assert_eq!(XstsError::from_xerr(2148916233), XstsError::NoXboxAccount);
        assert_eq!(XstsError::from_xerr(2148916237), XstsError::AdultVerificationRequired);
        assert_eq!(XstsError::from_xerr(42), XstsError::Unknown(42));
    }

    #[test]
    fn test_xerr_message_names_code() {
        assert!(XstsError::NoXboxAccount.to_string().contains("2148916233"));
        assert!(XstsError::Unknown(7).to_string().contains("SISU"));
    }

    #[test]
    fn test_exchange_step_is_named_in_message() {
        let err = AuthError::XboxLiveExchangeFailed {
            step: ExchangeStep::Authorize,
            source: RequestError::Http {
                status: reqwest::StatusCode::FORBIDDEN,
                body_snippet: String::new(),
            },
        };
        assert!(err.to_string().contains("user authorization"));
    }
}
