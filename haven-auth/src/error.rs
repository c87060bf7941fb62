use thiserror::Error;

use crate::{backend::dns::DnsError, result::Outcome};

/// A verification mechanism that could not reach a result.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("DNS failure: {0}")]
    Dns(#[from] DnsError),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Invalid record: {0}")]
    Record(String),

    #[error("Verifier unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported setting: {0}")]
    Unsupported(String),
}

impl VerifyError {
    /// Returns `true` if the same check might succeed later.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        match self {
            Self::Dns(err) => err.is_temporary(),
            Self::Unavailable(_) => true,
            Self::Malformed(_) | Self::Record(_) | Self::Unsupported(_) => false,
        }
    }

    /// The outcome reported in `Authentication-Results` for this error.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        if self.is_temporary() {
            Outcome::TempError
        } else {
            Outcome::PermError
        }
    }
}
