//! BIMI assertion records.
//!
//! A brand indicator is only published for messages that passed DMARC under
//! an enforcing policy. The record at `default._bimi.<domain>` (or at the
//! organisational domain) names the indicator location.

use std::str::FromStr;

use haven_common::internal;

use super::{
    dns::{DnsResolver, organizational_domain},
    tag_list,
};
use crate::{
    error::VerifyError,
    result::{Mechanism, Outcome, VerificationResult},
    verifier::{BimiOutput, BimiRequest, DmarcPolicy},
};

const SELECTOR: &str = "default";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BimiRecord {
    /// `l=`, absent when the domain declines to publish an indicator.
    pub location: Option<String>,
    /// `a=`, the evidence document.
    pub authority: Option<String>,
}

impl FromStr for BimiRecord {
    type Err = String;

    fn from_str(record: &str) -> Result<Self, Self::Err> {
        if record.chars().any(char::is_control) {
            return Err(String::from("record contains control characters"));
        }

        let mut tags = tag_list(record);

        match tags.next() {
            Some(Ok((tag, version))) if tag == "v" && version.eq_ignore_ascii_case("BIMI1") => {}
            _ => return Err(String::from("record does not start with v=BIMI1")),
        }

        let mut location = None;
        let mut authority = None;

        for tag in tags {
            let (tag, value) = tag.map_err(|segment| format!("malformed tag '{segment}'"))?;
            let value = (!value.is_empty()).then(|| value.to_owned());
            match tag.as_str() {
                "l" => location = value,
                "a" => authority = value,
                _ => {}
            }
        }

        if location
            .as_deref()
            .is_some_and(|location| !location.starts_with("https://"))
        {
            return Err(String::from("indicator location is not an https URL"));
        }

        Ok(Self {
            location,
            authority,
        })
    }
}

impl BimiRecord {
    /// The value of a trusted `BIMI-Location` header.
    pub fn header(&self) -> Option<String> {
        let location = self.location.as_deref()?;

        Some(match &self.authority {
            Some(authority) => format!("v=BIMI1; l={location}; a={authority}"),
            None => format!("v=BIMI1; l={location}"),
        })
    }
}

async fn find_record(
    resolver: &DnsResolver,
    domain: &str,
) -> Result<Option<Result<BimiRecord, String>>, VerifyError> {
    let records = resolver.txt(&format!("{SELECTOR}._bimi.{domain}")).await?;

    Ok(records
        .iter()
        .find(|record| {
            record
                .trim_start()
                .get(..7)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("v=BIMI1"))
        })
        .map(|record| record.parse()))
}

pub async fn verify(
    resolver: &DnsResolver,
    request: &BimiRequest,
) -> Result<BimiOutput, VerifyError> {
    let domain = request.domain.trim_end_matches('.').to_ascii_lowercase();
    let skipped = |reason: &str| BimiOutput {
        result: VerificationResult::new(Mechanism::Bimi, Outcome::None)
            .domain(domain.clone())
            .info(reason),
        location: None,
        indicator: None,
    };

    if request.dmarc != Outcome::Pass {
        return Ok(skipped("DMARC did not pass"));
    }
    if !request.policy.is_some_and(DmarcPolicy::is_enforcing) {
        return Ok(skipped("DMARC policy is not enforcing"));
    }

    let mut found = find_record(resolver, &domain).await?.map(|record| (record, domain.clone()));
    let organizational = organizational_domain(&domain);
    if found.is_none() && organizational != domain {
        found = find_record(resolver, organizational)
            .await?
            .map(|record| (record, organizational.to_owned()));
    }

    let output = match found {
        None => skipped("no BIMI record"),
        Some((Err(reason), at)) => BimiOutput {
            result: VerificationResult::new(Mechanism::Bimi, Outcome::PermError)
                .domain(at)
                .info(reason),
            location: None,
            indicator: None,
        },
        Some((Ok(record), at)) => match record.header() {
            Some(location) => BimiOutput {
                result: VerificationResult::new(Mechanism::Bimi, Outcome::Pass).domain(at),
                location: Some(location),
                indicator: None,
            },
            None => skipped("declined"),
        },
    };

    internal!(
        level = DEBUG,
        "BIMI for {}: {}",
        request.domain,
        output.result.outcome
    );

    Ok(output)
}
