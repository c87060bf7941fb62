//! Envelope addresses.
//!
//! An [`Address`] is parsed from the textual `local-part@domain` form used on
//! the SMTP envelope. Parsing follows RFC 5321 section 4.1.2 for the
//! local-part (dot-string or quoted-string) and the domain (sub-domains or an
//! address literal), and additionally accepts UTF-8 as allowed by SMTPUTF8.
//!
//! Two addresses are equal when their lowercased user and host are equal;
//! the original spelling is kept for display.

use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
    net::{Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_LOCAL_PART: usize = 64;
const MAX_DOMAIN: usize = 255;
const MAX_PATH: usize = 256;

/// Reasons an address fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,

    #[error("Path exceeds {MAX_PATH} octets")]
    PathTooLong,

    #[error("Local-part exceeds {MAX_LOCAL_PART} octets")]
    LocalPartTooLong,

    #[error("Domain exceeds {MAX_DOMAIN} octets")]
    DomainTooLong,

    #[error("Missing closing angle bracket '>'")]
    MissingCloseBracket,

    #[error("Missing '@' separator in mailbox")]
    MissingAtSign,

    #[error("Invalid local-part: {0}")]
    InvalidLocalPart(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid address literal: {0}")]
    InvalidAddressLiteral(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    user: String,
    host: String,
    original_host: String,
    tags: Vec<String>,
}

impl Address {
    /// Parses a mailbox, with or without surrounding angle brackets.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.len() > MAX_PATH {
            return Err(AddressError::PathTooLong);
        }

        let inner = match trimmed.strip_prefix('<') {
            Some(rest) => rest
                .strip_suffix('>')
                .ok_or(AddressError::MissingCloseBracket)?,
            None => trimmed,
        };

        if inner.is_empty() {
            return Err(AddressError::Empty);
        }

        let at = find_unquoted_at(inner)?;
        let (local, domain) = (&inner[..at], &inner[at + 1..]);

        if local.len() > MAX_LOCAL_PART {
            return Err(AddressError::LocalPartTooLong);
        }
        if domain.len() > MAX_DOMAIN {
            return Err(AddressError::DomainTooLong);
        }

        validate_local_part(local)?;
        let host = validate_domain(domain)?;

        let tags = local
            .split_once('+')
            .map(|(_, tags)| {
                tags.split('+')
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            user: local.to_string(),
            host: host.to_string(),
            original_host: domain.to_string(),
            tags,
        })
    }

    /// Parses a `MAIL FROM` argument, where `<>` is the null sender.
    pub fn parse_reverse_path(input: &str) -> Result<Option<Self>, AddressError> {
        if input.trim() == "<>" {
            Ok(None)
        } else {
            Self::parse(input).map(Some)
        }
    }

    /// The full local-part, including any plus-tags.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The local-part with any plus-tags removed.
    pub fn base_user(&self) -> &str {
        self.user
            .split_once('+')
            .map_or(self.user.as_str(), |(base, _)| base)
    }

    /// The domain used for routing decisions.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The domain exactly as it was written.
    pub fn original_host(&self) -> &str {
        &self.original_host
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Lowercased `user@host`, the form used for comparison.
    pub fn normalized(&self) -> String {
        format!(
            "{}@{}",
            self.user.to_lowercase(),
            self.host.to_lowercase()
        )
    }

    /// Returns `true` if `self` is `other` or a plus-extension of `other` on
    /// the same host.
    pub fn is_extension_of(&self, other: &Self) -> bool {
        self.host.eq_ignore_ascii_case(&other.host)
            && (self.user.eq_ignore_ascii_case(&other.user)
                || self.base_user().eq_ignore_ascii_case(&other.user))
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.user.to_lowercase() == other.user.to_lowercase()
            && self.host.to_lowercase() == other.host.to_lowercase()
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.original_host)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

/// Position of the `@` that separates local-part from domain, skipping any
/// inside a quoted local-part or an address literal.
fn find_unquoted_at(input: &str) -> Result<usize, AddressError> {
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;

    for (i, ch) in input.char_indices() {
        match ch {
            '"' if !escaped && !in_brackets => in_quotes = !in_quotes,
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            '@' if !in_quotes && !in_brackets => return Ok(i),
            _ => {}
        }

        escaped = ch == '\\' && !escaped;
    }

    Err(AddressError::MissingAtSign)
}

fn validate_local_part(local: &str) -> Result<(), AddressError> {
    if local.is_empty() {
        return Err(AddressError::InvalidLocalPart("empty local-part".into()));
    }

    if let Some(quoted) = local.strip_prefix('"') {
        let content = quoted
            .strip_suffix('"')
            .ok_or_else(|| AddressError::InvalidLocalPart("unclosed quoted string".into()))?;

        let mut chars = content.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(next) if next == ' ' || next.is_ascii_graphic() => {}
                    _ => {
                        return Err(AddressError::InvalidLocalPart(
                            "invalid quoted-pair".into(),
                        ));
                    }
                },
                ch if is_qtext(ch) => {}
                ch => {
                    return Err(AddressError::InvalidLocalPart(format!(
                        "invalid character '{ch}' in quoted string"
                    )));
                }
            }
        }

        return Ok(());
    }

    for atom in local.split('.') {
        if atom.is_empty() {
            return Err(AddressError::InvalidLocalPart(
                "empty atom in dot-string".into(),
            ));
        }

        if let Some(ch) = atom.chars().find(|&ch| !is_atext(ch)) {
            return Err(AddressError::InvalidLocalPart(format!(
                "invalid character '{ch}' in atom"
            )));
        }
    }

    Ok(())
}

/// Validates the domain and returns the routing form, which drops a
/// trailing root label.
fn validate_domain(domain: &str) -> Result<&str, AddressError> {
    if domain.starts_with('[') {
        validate_address_literal(domain)?;
        return Ok(domain);
    }

    let host = domain.strip_suffix('.').unwrap_or(domain);
    if host.is_empty() {
        return Err(AddressError::InvalidDomain("empty domain".into()));
    }

    for label in host.split('.') {
        let valid = !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|ch| ch.is_alphanumeric() || ch == '-');

        if !valid {
            return Err(AddressError::InvalidDomain(format!(
                "invalid label '{label}' in {domain}"
            )));
        }
    }

    Ok(host)
}

fn validate_address_literal(literal: &str) -> Result<(), AddressError> {
    let content = literal
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| AddressError::InvalidAddressLiteral(literal.to_string()))?;

    if content.parse::<Ipv4Addr>().is_ok() {
        return Ok(());
    }

    if let Some(v6) = content.strip_prefix("IPv6:")
        && v6.parse::<Ipv6Addr>().is_ok()
    {
        return Ok(());
    }

    match content.split_once(':') {
        Some((tag, value)) if !tag.is_empty() && !value.is_empty() => Ok(()),
        _ => Err(AddressError::InvalidAddressLiteral(content.to_string())),
    }
}

/// RFC 5322 atext, widened to any non-ASCII character for SMTPUTF8.
const fn is_atext(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || !ch.is_ascii()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

const fn is_qtext(ch: char) -> bool {
    !ch.is_ascii() || matches!(ch as u32, 32..=33 | 35..=91 | 93..=126)
}
