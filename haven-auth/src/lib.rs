//! Sender authenticity verification.
//!
//! [`AuthOrchestrator`] runs SPF when the sender is known and DKIM, ARC,
//! DMARC and BIMI once the message has arrived, recording each outcome in the
//! transaction ledger and in `Received-SPF`/`Authentication-Results` headers.
//! The mechanisms themselves are answered by a [`Verifier`].

pub mod backend;
pub mod config;
pub mod error;
pub mod header;
pub mod orchestrator;
pub mod result;
pub mod verifier;

#[cfg(feature = "mail-auth")]
pub use backend::mail_auth::MailAuthVerifier;
pub use config::MailAuthConfig;
pub use error::VerifyError;
pub use orchestrator::{AuthOrchestrator, AuthRecord};
pub use result::{Mechanism, Outcome, VerificationResult};
pub use verifier::{OfflineVerifier, Verifier};
