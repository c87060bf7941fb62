//! Runs the verification chain over one transaction.
//!
//! SPF runs when the sender is given; DKIM, ARC, DMARC and BIMI run once the
//! message has arrived, each only when its inputs are available. A mechanism
//! that errors is recorded as such and the chain carries on with whatever
//! inputs remain.

use std::sync::Arc;

use haven_common::{Connection, Transaction, internal, outgoing};

use crate::{
    config::MailAuthConfig,
    error::VerifyError,
    header,
    result::{Mechanism, PRODUCER, VerificationResult},
    verifier::{
        BimiOutput, BimiRequest, DkimOutput, DkimRequest, DmarcOutput, DmarcRequest, SpfRequest,
        Verifier,
    },
};

/// Transaction note holding the [`AuthRecord`].
pub const NOTE: &str = "mailauth";

/// Everything the chain concluded so far for one transaction.
#[derive(Debug, Default)]
pub struct AuthRecord {
    /// The `MAIL FROM` identity SPF evaluated.
    pub sender: Option<String>,
    pub spf: Option<VerificationResult>,
    pub dkim: Vec<VerificationResult>,
    pub header_from: Option<String>,
    pub arc: Option<VerificationResult>,
    pub dmarc: Option<DmarcOutput>,
    pub bimi: Option<BimiOutput>,
    /// Mechanisms that failed to reach a result.
    pub errors: Vec<Mechanism>,
}

impl AuthRecord {
    /// Domains that passed SPF.
    pub fn spf_domains(&self) -> Vec<String> {
        self.spf
            .iter()
            .filter(|result| result.is_pass())
            .filter_map(|result| result.domain.clone())
            .collect()
    }

    /// Domains with a passing DKIM signature.
    pub fn dkim_domains(&self) -> Vec<String> {
        self.dkim
            .iter()
            .filter(|result| result.is_pass())
            .filter_map(|result| result.domain.clone())
            .collect()
    }
}

pub struct AuthOrchestrator {
    verifier: Arc<dyn Verifier>,
    config: MailAuthConfig,
}

impl AuthOrchestrator {
    pub fn new(verifier: Arc<dyn Verifier>, config: MailAuthConfig) -> Self {
        Self { verifier, config }
    }

    pub const fn config(&self) -> &MailAuthConfig {
        &self.config
    }

    fn authserv<'a>(&'a self, connection: &'a Connection) -> &'a str {
        self.config
            .authserv_id
            .as_deref()
            .unwrap_or(connection.local_host.as_str())
    }

    fn contain(
        txn: &mut Transaction,
        record: &mut AuthRecord,
        mechanism: Mechanism,
        err: &VerifyError,
    ) {
        internal!(level = ERROR, "{mechanism} verification failed: {err}");

        txn.results.err(PRODUCER, mechanism.as_str());
        txn.add_auth_result(header::error_fragment(mechanism, err));
        record.errors.push(mechanism);
    }

    fn accept(txn: &mut Transaction, result: &VerificationResult, fragment: String) {
        internal!(
            level = DEBUG,
            "{}: {}",
            result.label(),
            result.outcome
        );

        result.record(&mut txn.results);
        txn.add_auth_result(fragment);
    }

    /// Step 1, at `MAIL FROM`: SPF.
    #[tracing::instrument(level = "debug", skip_all, fields(txn = %txn.id()))]
    pub async fn on_mail(&self, connection: &Connection, txn: &mut Transaction) {
        if connection.relaying {
            internal!(level = DEBUG, "Relaying session, skipping verification");
            return;
        }

        let helo = connection
            .helo
            .clone()
            .unwrap_or_else(|| String::from("unknown"));
        let mail_from = txn
            .sender()
            .map_or_else(|| format!("postmaster@{helo}"), ToString::to_string);

        let request = SpfRequest {
            ip: connection.remote_ip,
            helo,
            mail_from: mail_from.clone(),
            host_domain: connection.local_host.clone(),
            max_lookups: self.config.dns_max_lookups,
        };

        let mut record = AuthRecord {
            sender: Some(mail_from),
            ..AuthRecord::default()
        };

        match self.verifier.spf(&request).await {
            Ok(output) => {
                let mut result = VerificationResult::new(Mechanism::Spf, output.verdict.outcome())
                    .domain(request.domain().to_ascii_lowercase());
                result.info.clone_from(&output.explanation);

                Self::accept(txn, &result, header::spf_fragment(&output, &request));
                txn.add_leading_header(
                    "Received-SPF",
                    header::received_spf(&output, &request, self.authserv(connection)),
                );
                record.spf = Some(result);
            }
            Err(err) => Self::contain(txn, &mut record, Mechanism::Spf, &err),
        }

        txn.notes.insert(NOTE, record);
    }

    /// Steps 2 to 5, once the whole message is available: DKIM, ARC, DMARC
    /// and BIMI. Finishes by adding `Authentication-Results`.
    #[tracing::instrument(level = "debug", skip_all, fields(txn = %txn.id()))]
    pub async fn on_data(&self, connection: &Connection, txn: &mut Transaction, message: &[u8]) {
        if connection.relaying {
            return;
        }

        let mut record = txn
            .notes
            .get_mut::<AuthRecord>(NOTE)
            .map(std::mem::take)
            .unwrap_or_default();

        let dkim = self.dkim(txn, &mut record, message).await;
        let arc = self.arc(txn, &mut record, dkim.as_ref(), message).await;
        record.arc.clone_from(&arc);

        let dmarc = self.dmarc(txn, &mut record, arc.as_ref(), message).await;
        if let Some(dmarc) = &dmarc {
            record.bimi = self.bimi(txn, &mut record, dmarc).await;
        }
        record.dmarc = dmarc;

        let results = header::authentication_results(self.authserv(connection), txn.auth_results());
        outgoing!(level = DEBUG, "Authentication-Results: {results}");
        txn.add_leading_header("Authentication-Results", results);

        internal!(
            level = INFO,
            "Verification finished: {}",
            txn.results.summary(PRODUCER)
        );

        txn.notes.insert(NOTE, record);
    }

    async fn dkim(
        &self,
        txn: &mut Transaction,
        record: &mut AuthRecord,
        message: &[u8],
    ) -> Option<DkimOutput> {
        let request = DkimRequest {
            min_bit_length: self.config.min_bit_length,
        };

        match self.verifier.dkim(message, &request).await {
            Ok(output) => {
                for result in &output.results {
                    Self::accept(txn, result, header::fragment(result, None));
                }
                record.dkim.clone_from(&output.results);
                record.header_from.clone_from(&output.header_from);
                Some(output)
            }
            Err(err) => {
                Self::contain(txn, record, Mechanism::Dkim, &err);
                None
            }
        }
    }

    async fn arc(
        &self,
        txn: &mut Transaction,
        record: &mut AuthRecord,
        dkim: Option<&DkimOutput>,
        message: &[u8],
    ) -> Option<VerificationResult> {
        if !dkim.is_some_and(|output| output.arc_chain) {
            return None;
        }

        let request = DkimRequest {
            min_bit_length: self.config.min_bit_length,
        };

        match self.verifier.arc(message, &request).await {
            Ok(result) => {
                Self::accept(txn, &result, header::fragment(&result, None));
                Some(result)
            }
            Err(err) => {
                Self::contain(txn, record, Mechanism::Arc, &err);
                None
            }
        }
    }

    async fn dmarc(
        &self,
        txn: &mut Transaction,
        record: &mut AuthRecord,
        arc: Option<&VerificationResult>,
        message: &[u8],
    ) -> Option<DmarcOutput> {
        let Some(header_from) = record.header_from.clone() else {
            internal!(level = DEBUG, "No From domain, skipping DMARC");
            return None;
        };

        let request = DmarcRequest {
            header_from,
            spf_domains: record.spf_domains(),
            dkim_domains: record.dkim_domains(),
            arc: arc.map(|result| result.outcome),
        };

        match self.verifier.dmarc(message, &request).await {
            Ok(output) => {
                Self::accept(
                    txn,
                    &output.result,
                    header::fragment(&output.result, output.policy),
                );
                Some(output)
            }
            Err(err) => {
                Self::contain(txn, record, Mechanism::Dmarc, &err);
                None
            }
        }
    }

    async fn bimi(
        &self,
        txn: &mut Transaction,
        record: &mut AuthRecord,
        dmarc: &DmarcOutput,
    ) -> Option<BimiOutput> {
        txn.remove_header("BIMI-Location");
        txn.remove_header("BIMI-Indicator");

        let request = BimiRequest {
            domain: dmarc
                .result
                .domain
                .clone()
                .or_else(|| record.header_from.clone())
                .unwrap_or_default(),
            dmarc: dmarc.result.outcome,
            policy: dmarc.policy,
        };

        match self.verifier.bimi(&request).await {
            Ok(output) => {
                Self::accept(txn, &output.result, header::fragment(&output.result, None));
                if let Some(indicator) = &output.indicator {
                    txn.add_leading_header("BIMI-Indicator", header::sanitize(indicator));
                }
                if let Some(location) = &output.location {
                    txn.add_leading_header("BIMI-Location", header::sanitize(location));
                }
                Some(output)
            }
            Err(err) => {
                Self::contain(txn, record, Mechanism::Bimi, &err);
                None
            }
        }
    }
}
