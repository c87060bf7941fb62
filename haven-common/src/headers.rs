//! The header section of a message.
//!
//! Field names compare case-insensitively. Values are kept raw, folding
//! included, so a multi-line field can be examined line by line.

use std::fmt::{self, Display};

use mailparse::MailParseError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

impl Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<Field>,
}

impl Headers {
    /// Parses the header section at the start of `message`.
    pub fn parse(message: &[u8]) -> Result<Self, MailParseError> {
        let (parsed, _) = mailparse::parse_headers(message)?;

        let fields = parsed
            .iter()
            .map(|header| Field {
                name: header.get_key(),
                value: String::from_utf8_lossy(header.get_value_raw())
                    .trim_start()
                    .to_string(),
            })
            .collect();

        Ok(Self { fields })
    }

    /// The raw value of the first field called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
            .map(|field| field.value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |field| field.name.eq_ignore_ascii_case(name))
            .map(|field| field.value.as_str())
    }

    /// The physical lines of the first field called `name`.
    ///
    /// A missing field yields a single empty line, so patterns that match the
    /// empty string still apply.
    pub fn lines(&self, name: &str) -> Vec<&str> {
        self.get(name).unwrap_or_default().split('\n').collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn prepend(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(
            0,
            Field {
                name: name.into(),
                value: value.into(),
            },
        );
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Removes every field called `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields
            .retain(|field| !field.name.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const MESSAGE: &[u8] = b"From: Alice <alice@example.com>\r\n\
Subject: Invoice #123\r\n\
Received: from a\r\n\
\tby b\r\n\
Received: from c\r\n\
\r\n\
Body text\r\n";

    #[test]
    fn parse_and_get() {
        let headers = Headers::parse(MESSAGE).unwrap();

        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("subject"), Some("Invoice #123"));
        assert_eq!(headers.get("SUBJECT"), Some("Invoice #123"));
        assert_eq!(headers.get_all("received").count(), 2);
        assert!(headers.get("x-missing").is_none());
    }

    #[test]
    fn lines_of_folded_field() {
        let headers = Headers::parse(MESSAGE).unwrap();
        let lines = headers.lines("Received");

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].trim(), "from a");
        assert_eq!(lines[1].trim(), "by b");
    }

    #[test]
    fn lines_of_missing_field() {
        let headers = Headers::default();
        assert_eq!(headers.lines("Subject"), vec![""]);
    }

    #[test]
    fn prepend_and_remove() {
        let mut headers = Headers::parse(MESSAGE).unwrap();

        headers.prepend("BIMI-Location", "v=BIMI1; l=https://example.com/logo.svg");
        assert_eq!(headers.iter().next().unwrap().name, "BIMI-Location");

        assert_eq!(headers.remove("bimi-location"), 1);
        assert_eq!(headers.remove("received"), 2);
        assert_eq!(headers.len(), 2);
    }
}
