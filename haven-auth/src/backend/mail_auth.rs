//! The production [`Verifier`]: SPF, DKIM, ARC and DMARC through `mail-auth`,
//! BIMI through the cached record lookups of this crate.
//!
//! `mail-auth` stops SPF evaluation after [`SPF_LOOKUP_LIMIT`] lookups and
//! refuses RSA keys shorter than 1024 bits, so a configuration asking for
//! another lookup budget or a lower key floor is refused. Stricter key floors
//! are applied to the DKIM results here.

use std::{
    borrow::Borrow,
    hash::Hash,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use haven_common::{headers::Headers, internal};
use mail_auth::{
    AuthenticatedMessage, DkimResult, DmarcResult, MessageAuthenticator, Parameters,
    ResolverCache, SpfResult, Txt,
    common::crypto::Algorithm,
    dkim::Signature,
    dmarc::{Policy, verify::DmarcParameters},
    spf::verify::SpfParameters,
};

use super::{
    bimi,
    dns::{DnsConfig, DnsResolver, organizational_domain},
};
use crate::{
    config::MailAuthConfig,
    error::VerifyError,
    result::{Mechanism, Outcome, VerificationResult},
    verifier::{
        BimiOutput, BimiRequest, DkimOutput, DkimRequest, DmarcOutput, DmarcPolicy, DmarcRequest,
        SpfOutput, SpfRequest, SpfVerdict, Verifier, has_arc_chain, header_from_domain,
    },
};

/// DNS-querying mechanisms `mail-auth` evaluates in one SPF check.
pub const SPF_LOOKUP_LIMIT: u32 = 10;

/// The shortest RSA key `mail-auth` verifies.
const MIN_RSA_BITS: u32 = 1024;

/// Parsed records `mail-auth` looked up, kept for their TTL as bounded by
/// [`DnsConfig`].
pub struct TxtCache {
    entries: DashMap<String, (Txt, Instant)>,
    config: DnsConfig,
}

impl TxtCache {
    pub fn new(config: DnsConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResolverCache<String, Txt> for TxtCache {
    fn get<Q>(&self, name: &Q) -> Option<Txt>
    where
        String: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.get(name)?;
        let (txt, valid_until) = entry.value();

        (*valid_until > Instant::now()).then(|| txt.clone())
    }

    fn remove<Q>(&self, name: &Q) -> Option<Txt>
    where
        String: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(name).map(|(_, (txt, _))| txt)
    }

    fn insert(&self, key: String, value: Txt, valid_until: Instant) {
        let now = Instant::now();
        let dns_ttl = u32::try_from(valid_until.saturating_duration_since(now).as_secs())
            .unwrap_or(u32::MAX);
        let valid_until = now + Duration::from_secs(self.config.cache_ttl(dns_ttl));

        self.entries.insert(key, (value, valid_until));
    }
}

pub struct MailAuthVerifier {
    authenticator: MessageAuthenticator,
    cache: TxtCache,
    dns: DnsResolver,
}

impl MailAuthVerifier {
    /// Uses the system resolver configuration, falling back to Cloudflare
    /// DNS when it cannot be loaded.
    pub fn new(config: &MailAuthConfig) -> Result<Self, VerifyError> {
        let system = MessageAuthenticator::new_system_conf()
            .map_err(|err| err.to_string())
            .and_then(|authenticator| {
                DnsResolver::new(config.dns.clone())
                    .map(|dns| (authenticator, dns))
                    .map_err(|err| err.to_string())
            });

        let (authenticator, dns) = match system {
            Ok(resolvers) => resolvers,
            Err(err) => {
                internal!(
                    level = WARN,
                    "Failed to load system DNS config ({err}), falling back to Cloudflare"
                );
                Self::cloudflare(config)?
            }
        };

        Self::with_resolvers(authenticator, dns, config)
    }

    fn cloudflare(
        config: &MailAuthConfig,
    ) -> Result<(MessageAuthenticator, DnsResolver), VerifyError> {
        let authenticator = MessageAuthenticator::new_cloudflare_tls()
            .map_err(|err| VerifyError::Unavailable(err.to_string()))?;

        Ok((authenticator, DnsResolver::cloudflare(config.dns.clone())))
    }

    /// Refuses limits `mail-auth` cannot apply.
    pub fn with_resolvers(
        authenticator: MessageAuthenticator,
        dns: DnsResolver,
        config: &MailAuthConfig,
    ) -> Result<Self, VerifyError> {
        if config.dns_max_lookups != SPF_LOOKUP_LIMIT {
            internal!(
                level = ERROR,
                "mailauth.dns_max_lookups = {} cannot be applied, SPF evaluation always stops after {SPF_LOOKUP_LIMIT} lookups",
                config.dns_max_lookups
            );
            return Err(VerifyError::Unsupported(format!(
                "dns_max_lookups = {} (only {SPF_LOOKUP_LIMIT} is supported)",
                config.dns_max_lookups
            )));
        }

        if config.min_bit_length < MIN_RSA_BITS {
            internal!(
                level = ERROR,
                "mailauth.min_bit_length = {} cannot be applied, RSA keys under {MIN_RSA_BITS} bits are never verified",
                config.min_bit_length
            );
            return Err(VerifyError::Unsupported(format!(
                "min_bit_length = {} (at least {MIN_RSA_BITS} is required)",
                config.min_bit_length
            )));
        }

        Ok(Self {
            authenticator,
            cache: TxtCache::new(config.dns.clone()),
            dns,
        })
    }

    /// The records `mail-auth` has looked up so far.
    pub const fn cache(&self) -> &TxtCache {
        &self.cache
    }

    fn parse(message: &[u8]) -> Result<AuthenticatedMessage<'_>, VerifyError> {
        AuthenticatedMessage::parse(message)
            .ok_or_else(|| VerifyError::Malformed(String::from("unparseable header section")))
    }
}

const fn spf_verdict(result: SpfResult) -> SpfVerdict {
    match result {
        SpfResult::Pass => SpfVerdict::Pass,
        SpfResult::Fail => SpfVerdict::Fail,
        SpfResult::SoftFail => SpfVerdict::SoftFail,
        SpfResult::Neutral => SpfVerdict::Neutral,
        SpfResult::None => SpfVerdict::None,
        SpfResult::TempError => SpfVerdict::TempError,
        SpfResult::PermError => SpfVerdict::PermError,
    }
}

fn dkim_result(mechanism: Mechanism, result: &DkimResult) -> VerificationResult {
    let (outcome, reason) = match result {
        DkimResult::Pass => (Outcome::Pass, None),
        DkimResult::None => (Outcome::None, None),
        DkimResult::Neutral(err) => (Outcome::Neutral, Some(err.to_string())),
        DkimResult::Fail(err) => (Outcome::Fail, Some(err.to_string())),
        DkimResult::PermError(err) => (Outcome::PermError, Some(err.to_string())),
        DkimResult::TempError(err) => (Outcome::TempError, Some(err.to_string())),
    };

    let result = VerificationResult::new(mechanism, outcome);
    match reason {
        Some(reason) => result.info(reason),
        None => result,
    }
}

/// The key size of an RSA signature, which is as long as the key's modulus.
fn rsa_key_bits(signature: &Signature) -> Option<u32> {
    match signature.a {
        Algorithm::RsaSha1 | Algorithm::RsaSha256 => u32::try_from(signature.b.len() * 8).ok(),
        Algorithm::Ed25519Sha256 => None,
    }
}

/// One DKIM signature. A passing signature made with an RSA key shorter than
/// `min_bit_length` fails.
fn signature_result(output: &mail_auth::DkimOutput<'_>, min_bit_length: u32) -> VerificationResult {
    let result = dkim_result(Mechanism::Dkim, output.result());
    let Some(signature) = output.signature() else {
        return result;
    };
    let result = result.domain(signature.d.to_ascii_lowercase());

    match rsa_key_bits(signature) {
        Some(bits) if result.is_pass() && bits < min_bit_length => VerificationResult {
            outcome: Outcome::Fail,
            ..result
        }
        .info(format!("key too short ({bits} < {min_bit_length} bits)")),
        _ => result,
    }
}

fn dmarc_outcome(output: &mail_auth::DmarcOutput) -> (Outcome, Option<String>) {
    let results = [output.spf_result(), output.dkim_result()];

    if results
        .iter()
        .any(|result| matches!(result, DmarcResult::Pass))
    {
        return (Outcome::Pass, None);
    }

    for result in results {
        match result {
            DmarcResult::TempError(err) => return (Outcome::TempError, Some(err.to_string())),
            DmarcResult::PermError(err) => return (Outcome::PermError, Some(err.to_string())),
            DmarcResult::Pass | DmarcResult::Fail(_) | DmarcResult::None => {}
        }
    }

    if output.dmarc_record().is_some() {
        (Outcome::Fail, None)
    } else {
        (Outcome::None, None)
    }
}

const fn dmarc_policy(policy: Policy) -> Option<DmarcPolicy> {
    match policy {
        Policy::None => Some(DmarcPolicy::None),
        Policy::Quarantine => Some(DmarcPolicy::Quarantine),
        Policy::Reject => Some(DmarcPolicy::Reject),
        Policy::Unspecified => None,
    }
}

#[async_trait]
impl Verifier for MailAuthVerifier {
    async fn spf(&self, request: &SpfRequest) -> Result<SpfOutput, VerifyError> {
        let output = self
            .authenticator
            .verify_spf(
                Parameters::new(SpfParameters::verify_mail_from(
                    request.ip,
                    &request.helo,
                    &request.host_domain,
                    &request.mail_from,
                ))
                .with_txt_cache(&self.cache),
            )
            .await;

        Ok(SpfOutput {
            verdict: spf_verdict(output.result()),
            explanation: output.explanation().map(str::to_owned),
        })
    }

    async fn dkim(&self, message: &[u8], request: &DkimRequest) -> Result<DkimOutput, VerifyError> {
        let parsed = Self::parse(message)?;
        let headers =
            Headers::parse(message).map_err(|err| VerifyError::Malformed(err.to_string()))?;

        let results = self
            .authenticator
            .verify_dkim(Parameters::new(&parsed).with_txt_cache(&self.cache))
            .await
            .iter()
            .map(|output| signature_result(output, request.min_bit_length))
            .collect();

        Ok(DkimOutput {
            results,
            header_from: header_from_domain(&headers),
            arc_chain: has_arc_chain(&headers),
        })
    }

    async fn arc(
        &self,
        message: &[u8],
        _request: &DkimRequest,
    ) -> Result<VerificationResult, VerifyError> {
        let parsed = Self::parse(message)?;
        let output = self
            .authenticator
            .verify_arc(Parameters::new(&parsed).with_txt_cache(&self.cache))
            .await;

        Ok(dkim_result(Mechanism::Arc, output.result()))
    }

    /// Alignment is decided by `mail-auth`, with organisational domains taken
    /// from the public suffix list. Only the signatures that passed DKIM here
    /// are offered to it.
    async fn dmarc(
        &self,
        message: &[u8],
        request: &DmarcRequest,
    ) -> Result<DmarcOutput, VerifyError> {
        let parsed = Self::parse(message)?;

        let dkim = parsed
            .dkim_headers
            .iter()
            .filter_map(|header| header.header.as_ref().ok())
            .filter(|signature| {
                request
                    .dkim_domains
                    .iter()
                    .any(|domain| domain.eq_ignore_ascii_case(&signature.d))
            })
            .map(|signature| mail_auth::DkimOutput::pass().with_signature(signature))
            .collect::<Vec<_>>();

        let mail_from = request.spf_domains.first().map_or("", String::as_str);
        let spf = mail_auth::SpfOutput::new(mail_from.to_owned()).with_result(
            if mail_from.is_empty() {
                SpfResult::None
            } else {
                SpfResult::Pass
            },
        );

        let output = self
            .authenticator
            .verify_dmarc(
                Parameters::new(
                    DmarcParameters::new(&parsed, &dkim, mail_from, &spf)
                        .with_domain_suffix_fn(organizational_domain),
                )
                .with_txt_cache(&self.cache),
            )
            .await;

        let domain = if output.domain().is_empty() {
            request.header_from.clone()
        } else {
            output.domain().to_ascii_lowercase()
        };
        let (outcome, reason) = dmarc_outcome(&output);

        let result = VerificationResult::new(Mechanism::Dmarc, outcome).domain(domain);
        let result = match reason {
            Some(reason) => result.info(reason),
            None if outcome == Outcome::Fail && request.arc == Some(Outcome::Pass) => {
                VerificationResult {
                    outcome: Outcome::Policy,
                    ..result.info("arc=pass")
                }
            }
            None => result,
        };

        internal!(
            level = DEBUG,
            "DMARC for {}: {}",
            request.header_from,
            result.outcome
        );

        Ok(DmarcOutput {
            policy: output
                .dmarc_record()
                .and_then(|_| dmarc_policy(output.policy())),
            result,
        })
    }

    async fn bimi(&self, request: &BimiRequest) -> Result<BimiOutput, VerifyError> {
        bimi::verify(&self.dns, request).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::IpAddr;

    use mail_auth::{
        common::{parse::TxtRecordParser, verify::DomainKey},
        dmarc::Dmarc,
        spf::Spf,
    };
    use pretty_assertions::assert_eq;

    use super::*;

    /// The example message of RFC 8463, signed with a 1024-bit RSA key and an
    /// Ed25519 key.
    const RFC8463: &[u8] = b"DKIM-Signature: v=1; a=ed25519-sha256; c=relaxed/relaxed;\r\n \
d=football.example.com; i=@football.example.com;\r\n \
q=dns/txt; s=brisbane; t=1528637909; h=from : to :\r\n \
subject : date : message-id : from : subject : date;\r\n \
bh=2jUSOH9NhtVGCQWNr9BrIAPreKQjO6Sn7XIkfJVOzv8=;\r\n \
b=/gCrinpcQOoIfuHNQIbq4pgh9kyIK3AQUdt9OdqQehSwhEIug4D11Bus\r\n \
Fa3bT3FY5OsU7ZbnKELq+eXdp1Q1Dw==\r\n\
DKIM-Signature: v=1; a=rsa-sha256; c=relaxed/relaxed;\r\n \
d=football.example.com; i=@football.example.com;\r\n \
q=dns/txt; s=test; t=1528637909; h=from : to : subject :\r\n \
date : message-id : from : subject : date;\r\n \
bh=2jUSOH9NhtVGCQWNr9BrIAPreKQjO6Sn7XIkfJVOzv8=;\r\n \
b=F45dVWDfMbQDGHJFlXUNB2HKfbCeLRyhDXgFpEL8GwpsRe0IeIixNTe3\r\n \
DhCVlUrSjV4BwcVcOF6+FF3Zo9Rpo1tFOeS9mPYQTnGdaSGsgeefOsk2Jz\r\n \
dA+L10TeYt9BgDfQNZtKdN1WO//KgIqXP7OdEFE4LjFYNcUxZQ4FADY+8=\r\n\
From: Joe SixPack <joe@football.example.com>\r\n\
To: Suzie Q <suzie@shopping.example.net>\r\n\
Subject: Is dinner ready?\r\n\
Date: Fri, 11 Jul 2003 21:00:37 -0700 (PDT)\r\n\
Message-ID: <20030712040037.46341.5F8J@football.example.com>\r\n\
\r\n\
Hi.\r\n\
\r\n\
We lost the game.  Are you hungry yet?\r\n\
\r\n\
Joe.\r\n";

    const ED25519_KEY: &str = "v=DKIM1; k=ed25519; p=11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=";

    const RSA_KEY: &str = "v=DKIM1; k=rsa; p=MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDkHlOQoBTzWRiGs5V6NpP3\
idY6Wk08a5qhdR6wy5bdOKb2jLQiY/J16JYi0Qvx/byYzCNb3W91y3FutACDfzwQ/BC/e/8uBsCR+yz1Lxj+PL6lHvqMKrM3\
rG4hstT5QjvHO9PzoxZyVYLzBfO2EeC3Ip3G+2kryOTIKT+l/K4w3QIDAQAB";

    fn config() -> MailAuthConfig {
        MailAuthConfig::default()
    }

    fn verifier(config: &MailAuthConfig) -> Result<MailAuthVerifier, VerifyError> {
        MailAuthVerifier::with_resolvers(
            MessageAuthenticator::new_cloudflare().unwrap(),
            DnsResolver::cloudflare(config.dns.clone()),
            config,
        )
    }

    /// Answers `name` from the cache, so no query leaves the process.
    fn seed<T: TxtRecordParser + Into<Txt>>(verifier: &MailAuthVerifier, name: &str, record: &str) {
        let record = T::parse(record.as_bytes()).unwrap();
        verifier.cache().insert(
            format!("{name}."),
            record.into(),
            Instant::now() + Duration::from_secs(3600),
        );
    }

    fn spf_request() -> SpfRequest {
        SpfRequest {
            ip: IpAddr::from([192, 0, 2, 1]),
            helo: String::from("mail.example.org"),
            mail_from: String::from("alice@example.org"),
            host_domain: String::from("mx.local"),
            max_lookups: SPF_LOOKUP_LIMIT,
        }
    }

    /// `v=spf1` with `includes` include mechanisms, each naming a record that
    /// does not authorise the client.
    fn seed_includes(verifier: &MailAuthVerifier, includes: usize) {
        let mechanisms = (0..includes)
            .map(|n| format!("include:i{n}.example.org"))
            .collect::<Vec<_>>()
            .join(" ");
        seed::<Spf>(verifier, "example.org", &format!("v=spf1 {mechanisms} -all"));

        for n in 0..includes {
            seed::<Spf>(
                verifier,
                &format!("i{n}.example.org"),
                "v=spf1 ip4:203.0.113.1 -all",
            );
        }
    }

    #[tokio::test]
    async fn unsupported_limits_are_refused() {
        let lookups = MailAuthConfig {
            dns_max_lookups: 20,
            ..config()
        };
        assert!(matches!(
            verifier(&lookups),
            Err(VerifyError::Unsupported(reason)) if reason.contains("dns_max_lookups = 20")
        ));

        let bits = MailAuthConfig {
            min_bit_length: 512,
            ..config()
        };
        assert!(matches!(
            verifier(&bits),
            Err(VerifyError::Unsupported(reason)) if reason.contains("min_bit_length = 512")
        ));

        let strict = MailAuthConfig {
            min_bit_length: 2048,
            ..config()
        };
        assert!(verifier(&strict).is_ok());
    }

    #[tokio::test]
    async fn spf_within_lookup_limit() {
        let verifier = verifier(&config()).unwrap();
        seed_includes(&verifier, 10);

        let output = verifier.spf(&spf_request()).await.unwrap();

        assert_eq!(output.verdict, SpfVerdict::Fail);
    }

    #[tokio::test]
    async fn spf_over_lookup_limit_is_permerror() {
        let verifier = verifier(&config()).unwrap();
        seed_includes(&verifier, 11);

        let output = verifier.spf(&spf_request()).await.unwrap();

        assert_eq!(output.verdict, SpfVerdict::PermError);
        assert_eq!(output.verdict.outcome(), Outcome::PermError);
    }

    fn seed_rfc8463_keys(verifier: &MailAuthVerifier) {
        seed::<DomainKey>(verifier, "brisbane._domainkey.football.example.com", ED25519_KEY);
        seed::<DomainKey>(verifier, "test._domainkey.football.example.com", RSA_KEY);
    }

    fn outcomes(output: &DkimOutput) -> Vec<(Outcome, Option<&str>)> {
        output
            .results
            .iter()
            .map(|result| (result.outcome, result.info.as_deref()))
            .collect()
    }

    #[tokio::test]
    async fn dkim_keys_at_the_floor_pass() {
        let verifier = verifier(&config()).unwrap();
        seed_rfc8463_keys(&verifier);

        let output = verifier
            .dkim(RFC8463, &DkimRequest { min_bit_length: 1024 })
            .await
            .unwrap();

        assert_eq!(
            outcomes(&output),
            [(Outcome::Pass, None), (Outcome::Pass, None)]
        );
        assert_eq!(output.results[1].domain.as_deref(), Some("football.example.com"));
        assert_eq!(output.header_from.as_deref(), Some("football.example.com"));
    }

    #[tokio::test]
    async fn dkim_keys_below_the_floor_fail() {
        let verifier = verifier(&MailAuthConfig {
            min_bit_length: 2048,
            ..config()
        })
        .unwrap();
        seed_rfc8463_keys(&verifier);

        let output = verifier
            .dkim(RFC8463, &DkimRequest { min_bit_length: 2048 })
            .await
            .unwrap();

        assert_eq!(
            outcomes(&output),
            [
                (Outcome::Pass, None),
                (Outcome::Fail, Some("key too short (1024 < 2048 bits)"))
            ]
        );
    }

    const BANK: &[u8] = b"From: CEO <ceo@bank.co.uk>\r\nSubject: wire transfer\r\n\r\nPay now.\r\n";

    fn dmarc_request(spf_domain: &str) -> DmarcRequest {
        DmarcRequest {
            header_from: String::from("bank.co.uk"),
            spf_domains: vec![spf_domain.to_owned()],
            dkim_domains: Vec::new(),
            arc: None,
        }
    }

    #[tokio::test]
    async fn dmarc_does_not_align_across_public_suffix() {
        let verifier = verifier(&config()).unwrap();
        seed::<Dmarc>(&verifier, "_dmarc.bank.co.uk", "v=DMARC1; p=reject");

        let output = verifier
            .dmarc(BANK, &dmarc_request("attacker.co.uk"))
            .await
            .unwrap();

        assert_eq!(output.result.outcome, Outcome::Fail);
        assert_eq!(output.result.domain.as_deref(), Some("bank.co.uk"));
        assert_eq!(output.policy, Some(DmarcPolicy::Reject));
    }

    #[tokio::test]
    async fn dmarc_aligns_subdomain_of_registrable_domain() {
        let verifier = verifier(&config()).unwrap();
        seed::<Dmarc>(&verifier, "_dmarc.bank.co.uk", "v=DMARC1; p=reject");

        let output = verifier
            .dmarc(BANK, &dmarc_request("mail.bank.co.uk"))
            .await
            .unwrap();

        assert_eq!(output.result.outcome, Outcome::Pass);
    }

    #[tokio::test]
    async fn dmarc_failure_with_passing_arc_is_policy() {
        let verifier = verifier(&config()).unwrap();
        seed::<Dmarc>(&verifier, "_dmarc.bank.co.uk", "v=DMARC1; p=quarantine");

        let output = verifier
            .dmarc(
                BANK,
                &DmarcRequest {
                    arc: Some(Outcome::Pass),
                    ..dmarc_request("attacker.co.uk")
                },
            )
            .await
            .unwrap();

        assert_eq!(output.result.outcome, Outcome::Policy);
        assert_eq!(output.result.info.as_deref(), Some("arc=pass"));
        assert_eq!(output.policy, Some(DmarcPolicy::Quarantine));
    }

    #[test]
    fn cached_ttl_is_bounded() {
        let cache = TxtCache::new(DnsConfig::default());
        let record: Txt = Spf::parse(b"v=spf1 -all").unwrap().into();

        cache.insert(String::from("short.example."), record.clone(), Instant::now());
        cache.insert(
            String::from("long.example."),
            record,
            Instant::now() + Duration::from_secs(86_400),
        );

        assert!(cache.get("short.example.").is_some());
        assert!(cache.get("long.example.").is_some());
        assert!(cache.get("missing.example.").is_none());
        assert_eq!(cache.len(), 2);
    }
}
