use crate::types::ErrorMessage;
use thiserror::Error;

/// Failures surfaced by the auth client.
///
/// `Clone` because one pending operation hands the same outcome to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("auth client is not bootstrapped")]
    NotBootstrapped,
    #[error("no platform to bootstrap")]
    NoPlatform,
    #[error("unknown platform \"{0}\"")]
    UnknownPlatform(String),
    #[error("platform initialization failed: {0}")]
    Init(String),
    /// The platform refused to hand out a credential.
    #[error("credential rejected ({code}): {reason}")]
    Rejected { code: u16, reason: String },
    /// The server answered with an error body.
    #[error("Request failed ({code}): {reason}")]
    Api { code: u16, reason: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Response error: {0}")]
    Parse(String),
    #[error("invalid auth info")]
    InvalidAuthInfo,
    /// A sign-out or a newer authentication superseded this operation.
    #[error("signed out during authenticating")]
    SignedOutDuringAuthenticating,
}

impl ClientError {
    /// HTTP-like code of a server or platform rejection.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Rejected { code, .. } | Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the operation lost a race with a sign-out and must not be retried blindly.
    #[must_use]
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::SignedOutDuringAuthenticating)
    }
}

impl From<ErrorMessage> for ClientError {
    fn from(message: ErrorMessage) -> Self {
        Self::Rejected {
            code: message.code,
            reason: message.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_supersession() {
        let rejected = ClientError::from(ErrorMessage::new(401, "denied"));
        assert_eq!(rejected.code(), Some(401));
        assert_eq!(rejected.to_string(), "credential rejected (401): denied");
        assert_eq!(ClientError::InvalidAuthInfo.code(), None);
        assert!(ClientError::SignedOutDuringAuthenticating.is_superseded());
        assert!(!ClientError::NotBootstrapped.is_superseded());
    }
}
