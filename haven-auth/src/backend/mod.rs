//! Verification backends: BIMI records looked up over DNS, and the
//! production [`Verifier`](crate::verifier::Verifier).

pub mod bimi;
pub mod dns;
#[cfg(feature = "mail-auth")]
pub mod mail_auth;

/// Splits a `tag=value; tag=value` record into trimmed pairs, tags lowercased.
///
/// Empty segments are skipped. A segment without `=` is returned as `Err`
/// with its text.
fn tag_list(record: &str) -> impl Iterator<Item = Result<(String, &str), &str>> {
    record
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .split_once('=')
                .map(|(tag, value)| (tag.trim().to_ascii_lowercase(), value.trim()))
                .ok_or(segment)
        })
}
