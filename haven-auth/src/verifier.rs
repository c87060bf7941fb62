//! The seam between the orchestrator and a verification library.
//!
//! A [`Verifier`] answers one mechanism at a time. The orchestrator decides
//! which mechanisms run, in which order, and with which inputs.

use std::{fmt, net::IpAddr};

use async_trait::async_trait;
use haven_common::headers::Headers;

use crate::{
    error::VerifyError,
    result::{Mechanism, Outcome, VerificationResult},
};

/// The seven SPF results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpfVerdict {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    None,
    TempError,
    PermError,
}

impl SpfVerdict {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::SoftFail => "softfail",
            Self::Neutral => "neutral",
            Self::None => "none",
            Self::TempError => "temperror",
            Self::PermError => "permerror",
        }
    }

    pub const fn outcome(self) -> Outcome {
        match self {
            Self::Pass => Outcome::Pass,
            Self::Fail => Outcome::Fail,
            // A softfail is not held against the sender: the ledger records it
            // as skipped, and the headers still say `softfail`.
            Self::SoftFail | Self::Neutral => Outcome::Neutral,
            Self::None => Outcome::None,
            Self::TempError => Outcome::TempError,
            Self::PermError => Outcome::PermError,
        }
    }
}

impl fmt::Display for SpfVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpfRequest {
    pub ip: IpAddr,
    pub helo: String,
    /// `MAIL FROM`, or `postmaster@<helo>` for the null sender.
    pub mail_from: String,
    /// Our own host name.
    pub host_domain: String,
    /// DNS lookups allowed before the result is `permerror`.
    pub max_lookups: u32,
}

impl SpfRequest {
    /// The domain being authorised.
    pub fn domain(&self) -> &str {
        self.mail_from
            .rsplit_once('@')
            .map_or(self.mail_from.as_str(), |(_, domain)| domain)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpfOutput {
    pub verdict: SpfVerdict,
    pub explanation: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DkimRequest {
    pub min_bit_length: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DkimOutput {
    /// One result per signature.
    pub results: Vec<VerificationResult>,
    /// The domain of the `From` header.
    pub header_from: Option<String>,
    /// The message carries an ARC chain.
    pub arc_chain: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DmarcRequest {
    pub header_from: String,
    /// Domains that passed SPF.
    pub spf_domains: Vec<String>,
    /// Domains with a passing DKIM signature.
    pub dkim_domains: Vec<String>,
    pub arc: Option<Outcome>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmarcPolicy {
    None,
    Quarantine,
    Reject,
}

impl DmarcPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Quarantine => "quarantine",
            Self::Reject => "reject",
        }
    }

    pub const fn is_enforcing(self) -> bool {
        matches!(self, Self::Quarantine | Self::Reject)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DmarcOutput {
    pub result: VerificationResult,
    pub policy: Option<DmarcPolicy>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BimiRequest {
    pub domain: String,
    pub dmarc: Outcome,
    pub policy: Option<DmarcPolicy>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BimiOutput {
    pub result: VerificationResult,
    /// Value for a trusted `BIMI-Location` header.
    pub location: Option<String>,
    /// Value for a trusted `BIMI-Indicator` header.
    pub indicator: Option<String>,
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn spf(&self, request: &SpfRequest) -> Result<SpfOutput, VerifyError>;

    async fn dkim(&self, message: &[u8], request: &DkimRequest) -> Result<DkimOutput, VerifyError>;

    async fn arc(&self, message: &[u8], request: &DkimRequest)
    -> Result<VerificationResult, VerifyError>;

    /// `message` is the same message DKIM saw.
    async fn dmarc(&self, message: &[u8], request: &DmarcRequest)
    -> Result<DmarcOutput, VerifyError>;

    async fn bimi(&self, request: &BimiRequest) -> Result<BimiOutput, VerifyError>;
}

/// The domain of the first address in the `From` header.
pub fn header_from_domain(headers: &Headers) -> Option<String> {
    let from = headers.get("From")?;
    let addresses = mailparse::addrparse(from).ok()?;

    let address = addresses.iter().find_map(|address| match address {
        mailparse::MailAddr::Single(single) => Some(single.addr.clone()),
        mailparse::MailAddr::Group(group) => group.addrs.first().map(|single| single.addr.clone()),
    })?;

    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
}

/// Returns `true` if the message carries ARC headers.
pub fn has_arc_chain(headers: &Headers) -> bool {
    headers.contains("ARC-Seal") || headers.contains("ARC-Message-Signature")
}

/// A verifier that makes no lookups: every mechanism answers `none`.
///
/// DKIM still reports the `From` domain and whether an ARC chain is present,
/// so the rest of the chain runs as it would online.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineVerifier;

#[async_trait]
impl Verifier for OfflineVerifier {
    async fn spf(&self, _request: &SpfRequest) -> Result<SpfOutput, VerifyError> {
        Ok(SpfOutput {
            verdict: SpfVerdict::None,
            explanation: None,
        })
    }

    async fn dkim(&self, message: &[u8], _request: &DkimRequest) -> Result<DkimOutput, VerifyError> {
        let headers =
            Headers::parse(message).map_err(|err| VerifyError::Malformed(err.to_string()))?;

        Ok(DkimOutput {
            results: Vec::new(),
            header_from: header_from_domain(&headers),
            arc_chain: has_arc_chain(&headers),
        })
    }

    async fn arc(
        &self,
        _message: &[u8],
        _request: &DkimRequest,
    ) -> Result<VerificationResult, VerifyError> {
        Ok(VerificationResult::new(Mechanism::Arc, Outcome::None))
    }

    async fn dmarc(
        &self,
        _message: &[u8],
        request: &DmarcRequest,
    ) -> Result<DmarcOutput, VerifyError> {
        Ok(DmarcOutput {
            result: VerificationResult::new(Mechanism::Dmarc, Outcome::None)
                .domain(request.header_from.clone()),
            policy: None,
        })
    }

    async fn bimi(&self, request: &BimiRequest) -> Result<BimiOutput, VerifyError> {
        Ok(BimiOutput {
            result: VerificationResult::new(Mechanism::Bimi, Outcome::None)
                .domain(request.domain.clone()),
            location: None,
            indicator: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn headers(raw: &str) -> Headers {
        Headers::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn from_domain() {
        assert_eq!(
            header_from_domain(&headers("From: Alice <alice@Example.COM>\r\n\r\n")),
            Some(String::from("example.com"))
        );
        assert_eq!(
            header_from_domain(&headers("From: bob@example.org, carol@example.net\r\n\r\n")),
            Some(String::from("example.org"))
        );
        assert_eq!(header_from_domain(&headers("Subject: x\r\n\r\n")), None);
        assert_eq!(header_from_domain(&headers("From: undisclosed\r\n\r\n")), None);
    }

    #[test]
    fn arc_chain() {
        assert!(has_arc_chain(&headers("ARC-Seal: i=1; a=rsa-sha256\r\n\r\n")));
        assert!(!has_arc_chain(&headers("DKIM-Signature: v=1\r\n\r\n")));
    }

    #[test]
    fn spf_verdicts() {
        assert_eq!(SpfVerdict::SoftFail.outcome(), Outcome::Neutral);
        assert_eq!(SpfVerdict::SoftFail.as_str(), "softfail");
        assert_eq!(SpfVerdict::PermError.outcome(), Outcome::PermError);
    }

    #[test]
    fn request_domain() {
        let request = SpfRequest {
            ip: IpAddr::from([192, 0, 2, 1]),
            helo: String::from("mail.example.org"),
            mail_from: String::from("alice@example.org"),
            host_domain: String::from("mx.local"),
            max_lookups: 10,
        };

        assert_eq!(request.domain(), "example.org");
    }

    #[tokio::test]
    async fn offline_answers_none() {
        let message = b"From: Alice <alice@example.org>\r\nARC-Seal: i=1\r\n\r\nHi.\r\n";
        let request = DkimRequest {
            min_bit_length: 1024,
        };

        let dkim = OfflineVerifier.dkim(message, &request).await.unwrap();
        assert!(dkim.results.is_empty());
        assert_eq!(dkim.header_from.as_deref(), Some("example.org"));
        assert!(dkim.arc_chain);

        let dmarc = OfflineVerifier
            .dmarc(
                message,
                &DmarcRequest {
                    header_from: String::from("example.org"),
                    spf_domains: Vec::new(),
                    dkim_domains: Vec::new(),
                    arc: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(dmarc.result.outcome, Outcome::None);
        assert_eq!(dmarc.policy, None);
    }
}
