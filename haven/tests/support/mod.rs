//! Verification double for pipeline tests.

use async_trait::async_trait;
use haven_auth::{
    OfflineVerifier, VerificationResult, Verifier, VerifyError,
    verifier::{
        BimiOutput, BimiRequest, DkimOutput, DkimRequest, DmarcOutput, DmarcRequest, SpfOutput,
        SpfRequest, SpfVerdict,
    },
};

/// Passes SPF for every sender and answers `none` to everything else.
pub struct SpfPass;

#[async_trait]
impl Verifier for SpfPass {
    async fn spf(&self, _request: &SpfRequest) -> Result<SpfOutput, VerifyError> {
        Ok(SpfOutput {
            verdict: SpfVerdict::Pass,
            explanation: None,
        })
    }

    async fn dkim(&self, message: &[u8], request: &DkimRequest) -> Result<DkimOutput, VerifyError> {
        OfflineVerifier.dkim(message, request).await
    }

    async fn arc(
        &self,
        message: &[u8],
        request: &DkimRequest,
    ) -> Result<VerificationResult, VerifyError> {
        OfflineVerifier.arc(message, request).await
    }

    async fn dmarc(
        &self,
        message: &[u8],
        request: &DmarcRequest,
    ) -> Result<DmarcOutput, VerifyError> {
        OfflineVerifier.dmarc(message, request).await
    }

    async fn bimi(&self, request: &BimiRequest) -> Result<BimiOutput, VerifyError> {
        OfflineVerifier.bimi(request).await
    }
}
