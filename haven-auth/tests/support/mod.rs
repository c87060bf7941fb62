//! A [`Verifier`] that answers from a script.

use std::sync::Mutex;

use async_trait::async_trait;
use haven_auth::{
    Mechanism, Outcome, VerificationResult, Verifier, VerifyError,
    verifier::{
        BimiOutput, BimiRequest, DkimOutput, DkimRequest, DmarcOutput, DmarcPolicy, DmarcRequest,
        SpfOutput, SpfRequest, SpfVerdict, has_arc_chain, header_from_domain,
    },
};
use haven_common::headers::Headers;

/// What a [`ScriptedVerifier`] answers for one mechanism.
type Script<T> = Option<Result<T, String>>;

/// Unscripted mechanisms answer `none`. A scripted SPF record that needs more
/// DNS lookups than the request allows answers `permerror`.
#[derive(Default)]
pub struct ScriptedVerifier {
    spf: Script<SpfVerdict>,
    spf_lookups: u32,
    dkim: Script<Vec<VerificationResult>>,
    arc: Script<Outcome>,
    dmarc: Script<(Outcome, DmarcPolicy)>,
    bimi: Script<Option<String>>,
    calls: Mutex<Vec<Mechanism>>,
}

impl ScriptedVerifier {
    #[must_use]
    pub fn with_spf(mut self, verdict: SpfVerdict) -> Self {
        self.spf = Some(Ok(verdict));
        self
    }

    /// SPF evaluation will take `lookups` DNS queries.
    #[must_use]
    pub const fn with_spf_lookups(mut self, lookups: u32) -> Self {
        self.spf_lookups = lookups;
        self
    }

    #[must_use]
    pub fn with_dkim(mut self, results: Vec<VerificationResult>) -> Self {
        self.dkim = Some(Ok(results));
        self
    }

    #[must_use]
    pub fn with_arc(mut self, outcome: Outcome) -> Self {
        self.arc = Some(Ok(outcome));
        self
    }

    #[must_use]
    pub fn with_dmarc(mut self, outcome: Outcome, policy: DmarcPolicy) -> Self {
        self.dmarc = Some(Ok((outcome, policy)));
        self
    }

    /// `location` goes into the header as given.
    #[must_use]
    pub fn with_bimi(mut self, location: Option<&str>) -> Self {
        self.bimi = Some(Ok(location.map(str::to_owned)));
        self
    }

    /// Makes `mechanism` fail with `error`.
    #[must_use]
    pub fn failing(mut self, mechanism: Mechanism, error: &str) -> Self {
        let error = error.to_owned();
        match mechanism {
            Mechanism::Spf => self.spf = Some(Err(error)),
            Mechanism::Dkim => self.dkim = Some(Err(error)),
            Mechanism::Arc => self.arc = Some(Err(error)),
            Mechanism::Dmarc => self.dmarc = Some(Err(error)),
            Mechanism::Bimi => self.bimi = Some(Err(error)),
        }
        self
    }

    /// The mechanisms asked so far, in order.
    pub fn calls(&self) -> Vec<Mechanism> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn answer<T: Clone>(
        &self,
        mechanism: Mechanism,
        script: &Script<T>,
    ) -> Result<Option<T>, VerifyError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(mechanism);
        }

        script.clone().transpose().map_err(VerifyError::Unavailable)
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn spf(&self, request: &SpfRequest) -> Result<SpfOutput, VerifyError> {
        let verdict = self.answer(Mechanism::Spf, &self.spf)?;

        if self.spf_lookups > request.max_lookups {
            return Ok(SpfOutput {
                verdict: SpfVerdict::PermError,
                explanation: Some(format!(
                    "too many DNS lookups ({} > {})",
                    self.spf_lookups, request.max_lookups
                )),
            });
        }

        Ok(SpfOutput {
            verdict: verdict.unwrap_or(SpfVerdict::None),
            explanation: None,
        })
    }

    async fn dkim(&self, message: &[u8], _request: &DkimRequest) -> Result<DkimOutput, VerifyError> {
        let results = self.answer(Mechanism::Dkim, &self.dkim)?;
        let headers =
            Headers::parse(message).map_err(|err| VerifyError::Malformed(err.to_string()))?;

        Ok(DkimOutput {
            results: results.unwrap_or_default(),
            header_from: header_from_domain(&headers),
            arc_chain: has_arc_chain(&headers),
        })
    }

    async fn arc(
        &self,
        _message: &[u8],
        _request: &DkimRequest,
    ) -> Result<VerificationResult, VerifyError> {
        let outcome = self.answer(Mechanism::Arc, &self.arc)?;
        Ok(VerificationResult::new(
            Mechanism::Arc,
            outcome.unwrap_or(Outcome::None),
        ))
    }

    async fn dmarc(
        &self,
        _message: &[u8],
        request: &DmarcRequest,
    ) -> Result<DmarcOutput, VerifyError> {
        let scripted = self.answer(Mechanism::Dmarc, &self.dmarc)?;
        let (outcome, policy) = scripted.map_or((Outcome::None, None), |(outcome, policy)| {
            (outcome, Some(policy))
        });

        Ok(DmarcOutput {
            result: VerificationResult::new(Mechanism::Dmarc, outcome)
                .domain(request.header_from.clone()),
            policy,
        })
    }

    async fn bimi(&self, request: &BimiRequest) -> Result<BimiOutput, VerifyError> {
        let location = self.answer(Mechanism::Bimi, &self.bimi)?.flatten();
        let outcome = if location.is_some() {
            Outcome::Pass
        } else {
            Outcome::None
        };

        Ok(BimiOutput {
            result: VerificationResult::new(Mechanism::Bimi, outcome).domain(request.domain.clone()),
            location: location.map(|url| format!("v=BIMI1; l={url}")),
            indicator: None,
        })
    }
}
