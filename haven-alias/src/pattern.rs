//! Header value patterns.
//!
//! A pattern written as `/expression/flags` is a regular expression. Anything
//! else is a glob in which `*` matches any run of characters; a glob must
//! match the whole value, ignoring surrounding whitespace. Both kinds are
//! case-insensitive.

use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone)]
pub enum Pattern {
    Explicit(Regex),
    Glob(Regex),
}

impl Pattern {
    pub fn parse(text: &str) -> Result<Self, regex::Error> {
        let text = text.trim();

        if let Some((body, flags)) = split_delimited(text) {
            let mut builder = RegexBuilder::new(body);
            builder.case_insensitive(true);

            for flag in flags.chars() {
                match flag.to_ascii_lowercase() {
                    'm' => builder.multi_line(true),
                    's' => builder.dot_matches_new_line(true),
                    'x' => builder.ignore_whitespace(true),
                    // `i` is always on; `g`, `u`, `y` and `d` change nothing for a
                    // yes/no match.
                    'i' | 'g' | 'u' | 'y' | 'd' => &mut builder,
                    other => {
                        return Err(regex::Error::Syntax(format!(
                            "unknown pattern flag '{other}'"
                        )));
                    }
                };
            }

            return builder.build().map(Self::Explicit);
        }

        let glob = text
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        RegexBuilder::new(&format!(r"^\s*{glob}\s*$"))
            .case_insensitive(true)
            .build()
            .map(Self::Glob)
    }

    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Explicit(regex) | Self::Glob(regex) => regex.is_match(value),
        }
    }
}

/// Splits `/body/flags` into its body and flags.
fn split_delimited(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    let (body, flags) = (&rest[..close], &rest[close + 1..]);

    flags
        .chars()
        .all(|ch| ch.is_ascii_alphabetic())
        .then_some((body, flags))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn explicit_is_case_insensitive() {
        let pattern = Pattern::parse("/invoice/").unwrap();

        assert!(matches!(pattern, Pattern::Explicit(_)));
        assert!(pattern.is_match("Invoice #123"));
        assert!(pattern.is_match("your INVOICE"));
        assert!(!pattern.is_match("receipt"));
    }

    #[test]
    fn explicit_with_flags() {
        let pattern = Pattern::parse("/^re: .*urgent$/i").unwrap();
        assert!(pattern.is_match("Re: very URGENT"));

        let pattern = Pattern::parse("/a.b/s").unwrap();
        assert!(pattern.is_match("a\nb"));

        assert!(Pattern::parse("/x/q").is_err());
    }

    #[test]
    fn explicit_keeps_inner_slashes() {
        let pattern = Pattern::parse("/https?://example\\.com/").unwrap();
        assert!(pattern.is_match("see https://example.com/page"));
    }

    #[test]
    fn glob_matches_whole_value() {
        let pattern = Pattern::parse("*@example.com").unwrap();

        assert!(matches!(pattern, Pattern::Glob(_)));
        assert!(pattern.is_match("  Alice@Example.com "));
        assert!(!pattern.is_match("alice@example.com.evil"));
    }

    #[test]
    fn glob_escapes_metacharacters() {
        let pattern = Pattern::parse("[SPAM] (*)").unwrap();

        assert!(pattern.is_match("[spam] (cheap pills)"));
        assert!(!pattern.is_match("S (x)"));
    }

    #[test]
    fn glob_without_wildcard_is_exact() {
        let pattern = Pattern::parse("yes").unwrap();

        assert!(pattern.is_match(" YES"));
        assert!(!pattern.is_match("yes please"));
    }

    #[test]
    fn trailing_slash_without_leading_is_a_glob() {
        let pattern = Pattern::parse("a/b/").unwrap();
        assert!(matches!(pattern, Pattern::Glob(_)));
        assert!(pattern.is_match("a/b/"));
    }

    #[test]
    fn invalid_expression() {
        assert!(Pattern::parse("/(unclosed/").is_err());
    }
}
