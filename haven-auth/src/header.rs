//! `Received-SPF` and `Authentication-Results` header values.

use crate::{
    error::VerifyError,
    result::{Mechanism, VerificationResult},
    verifier::{DmarcPolicy, SpfOutput, SpfRequest, SpfVerdict},
};

/// The property naming what a mechanism authenticated.
const fn property(mechanism: Mechanism) -> Option<&'static str> {
    match mechanism {
        Mechanism::Spf => Some("smtp.mailfrom"),
        Mechanism::Dkim | Mechanism::Bimi => Some("header.d"),
        Mechanism::Dmarc => Some("header.from"),
        Mechanism::Arc => None,
    }
}

fn spf_comment(verdict: SpfVerdict, request: &SpfRequest) -> String {
    let (ip, sender) = (request.ip, request.mail_from.as_str());

    match verdict {
        SpfVerdict::Pass => format!("domain of {sender} designates {ip} as permitted sender"),
        SpfVerdict::Fail => {
            format!("domain of {sender} does not designate {ip} as permitted sender")
        }
        SpfVerdict::SoftFail => format!(
            "domain of transitioning {sender} does not designate {ip} as permitted sender"
        ),
        SpfVerdict::Neutral => {
            format!("{ip} is neither permitted nor denied by domain of {sender}")
        }
        SpfVerdict::None => format!("domain of {sender} does not publish SPF records"),
        SpfVerdict::TempError => format!("error in processing during lookup of {sender}"),
        SpfVerdict::PermError => format!("permanent error in processing domain of {sender}"),
    }
}

/// Makes `value` safe to emit as a single header field: every control
/// character, line breaks included, becomes a space.
///
/// Parts of these values come from DNS (SPF explanations, record errors,
/// indicator locations) and from the sender.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// The value of `Received-SPF`.
pub fn received_spf(output: &SpfOutput, request: &SpfRequest, authserv: &str) -> String {
    let comment = output
        .explanation
        .clone()
        .unwrap_or_else(|| spf_comment(output.verdict, request));

    sanitize(&format!(
        "{} ({authserv}: {comment}) client-ip={}; envelope-from={}; helo={};",
        output.verdict, request.ip, request.mail_from, request.helo
    ))
}

/// The SPF fragment, keeping the `softfail` result that the outcome folds
/// into `neutral`.
pub fn spf_fragment(output: &SpfOutput, request: &SpfRequest) -> String {
    let mut fragment = format!("spf={}", output.verdict);
    if let Some(explanation) = &output.explanation {
        fragment.push_str(&format!(" ({explanation})"));
    }
    fragment.push_str(&format!(" smtp.mailfrom={}", request.mail_from));
    fragment
}

/// `dkim=fail (bad signature) header.d=example.com`. DMARC fragments also
/// carry the applied policy.
pub fn fragment(result: &VerificationResult, policy: Option<DmarcPolicy>) -> String {
    let mut fragment = format!("{}={}", result.mechanism, result.outcome);

    let comment = policy
        .map(|policy| format!("p={}", policy.as_str()))
        .into_iter()
        .chain(result.info.clone())
        .collect::<Vec<_>>();
    if !comment.is_empty() {
        fragment.push_str(&format!(" ({})", comment.join("; ")));
    }

    if let (Some(property), Some(domain)) = (property(result.mechanism), &result.domain) {
        fragment.push_str(&format!(" {property}={domain}"));
    }

    fragment
}

/// `dkim=temperror (DNS failure: ...)` for a mechanism that did not finish.
pub fn error_fragment(mechanism: Mechanism, err: &VerifyError) -> String {
    format!("{mechanism}={} ({err})", err.outcome())
}

/// The value of `Authentication-Results`.
pub fn authentication_results(authserv: &str, fragments: &[String]) -> String {
    if fragments.is_empty() {
        sanitize(&format!("{authserv}; none"))
    } else {
        sanitize(&format!("{authserv}; {}", fragments.join("; ")))
    }
}
