use std::path::{Path, PathBuf};

use haven_common::{Address, headers::Headers, internal};

use crate::{error::RuleError, pattern::Pattern};

/// A header condition: `Name:pattern`, or `!Name:pattern` when negated.
#[derive(Debug, Clone)]
pub struct Condition {
    header: String,
    pattern: Pattern,
    negated: bool,
}

impl Condition {
    /// Returns `true` if any line of the first `header` field matches,
    /// inverted for a negated condition.
    pub fn holds(&self, headers: &Headers) -> bool {
        let matched = headers
            .lines(&self.header)
            .into_iter()
            .any(|line| self.pattern.is_match(line));

        matched != self.negated
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub const fn is_negated(&self) -> bool {
        self.negated
    }
}

#[derive(Debug, Clone)]
pub enum Line {
    Condition(Condition),
    /// A target address, possibly missing its local-part or its host.
    Address(String),
}

/// What one rule file contributed for one recipient.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Applied {
    pub aliases: Vec<Address>,
    /// The file replaces the original recipient: either it has no rules at
    /// all, or at least one of its address lines was reached and parsed.
    pub applies: bool,
}

/// A compiled rule file.
#[derive(Debug, Clone)]
pub struct RuleFile {
    path: PathBuf,
    lines: Vec<Line>,
}

impl RuleFile {
    /// Compiles the rules in `text`. Any invalid pattern rejects the whole
    /// file.
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self, RuleError> {
        let mut lines = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            let (negated, rest) = line
                .strip_prefix('!')
                .map_or((false, line), |rest| (true, rest.trim_start()));

            let Some((header, pattern)) = split_condition(rest) else {
                lines.push(Line::Address(line.to_lowercase()));
                continue;
            };

            let pattern = Pattern::parse(pattern).map_err(|source| RuleError::Pattern {
                line: index + 1,
                pattern: pattern.to_owned(),
                source: Box::new(source),
            })?;

            lines.push(Line::Condition(Condition {
                header: header.to_owned(),
                pattern,
                negated,
            }));
        }

        Ok(Self {
            path: path.into(),
            lines,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Walks the file for `recipient`, stopping at the first condition that
    /// does not hold.
    pub fn apply(&self, headers: &Headers, recipient: &Address) -> Applied {
        let mut applied = Applied {
            aliases: Vec::new(),
            applies: self.lines.is_empty(),
        };

        for line in &self.lines {
            match line {
                Line::Condition(condition) => {
                    if !condition.holds(headers) {
                        internal!(
                            level = DEBUG,
                            file = %self.path.display(),
                            header = condition.header(),
                            "Condition does not hold, skipping the rest of the file"
                        );
                        break;
                    }
                }
                Line::Address(target) => match expand_target(target, recipient) {
                    Ok(alias) => {
                        applied.applies = true;
                        if !applied.aliases.contains(&alias) {
                            applied.aliases.push(alias);
                        }
                    }
                    Err(err) => {
                        internal!(
                            level = WARN,
                            file = %self.path.display(),
                            alias = target.as_str(),
                            "Skipping malformed alias: {err}"
                        );
                    }
                },
            }
        }

        applied
    }
}

/// Completes a target line from `recipient`: a bare local-part takes the
/// recipient's host, and `@host` takes the recipient's local-part.
pub fn expand_target(
    target: &str,
    recipient: &Address,
) -> Result<Address, haven_common::address::AddressError> {
    let target = if !target.contains('@') {
        format!("{target}@{}", recipient.host())
    } else if target.starts_with('@') {
        format!("{}{target}", recipient.user())
    } else {
        target.to_owned()
    };

    Address::parse(&target.to_lowercase())
}

/// Splits `Name:pattern` when `Name` looks like a header field name.
fn split_condition(line: &str) -> Option<(&str, &str)> {
    let (name, pattern) = line.split_once(':')?;

    let is_field_name = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');

    is_field_name.then_some((name, pattern))
}
