//! Append-only record of what each stage concluded about a transaction.

use std::fmt::{self, Display};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Class {
    Pass,
    Fail,
    Skip,
    Msg,
    Err,
}

impl Class {
    /// `Fail` and `Err` both count against the message.
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Err)
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Msg => "msg",
            Self::Err => "err",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub producer: &'static str,
    pub class: Class,
    pub text: String,
}

#[derive(Clone, Debug, Default)]
pub struct Ledger {
    entries: Vec<Entry>,
}

impl Ledger {
    pub fn record(&mut self, producer: &'static str, class: Class, text: impl Into<String>) {
        self.entries.push(Entry {
            producer,
            class,
            text: text.into(),
        });
    }

    pub fn pass(&mut self, producer: &'static str, text: impl Into<String>) {
        self.record(producer, Class::Pass, text);
    }

    pub fn fail(&mut self, producer: &'static str, text: impl Into<String>) {
        self.record(producer, Class::Fail, text);
    }

    pub fn skip(&mut self, producer: &'static str, text: impl Into<String>) {
        self.record(producer, Class::Skip, text);
    }

    pub fn msg(&mut self, producer: &'static str, text: impl Into<String>) {
        self.record(producer, Class::Msg, text);
    }

    pub fn err(&mut self, producer: &'static str, text: impl Into<String>) {
        self.record(producer, Class::Err, text);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn by<'a>(&'a self, producer: &'a str) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.producer == producer)
    }

    pub fn has(&self, producer: &str, class: Class, text: &str) -> bool {
        self.by(producer)
            .any(|entry| entry.class == class && entry.text == text)
    }

    /// A one-line summary of `producer`'s entries, e.g. `pass: a, b; fail: c`.
    pub fn summary(&self, producer: &str) -> String {
        [Class::Pass, Class::Fail, Class::Skip, Class::Msg, Class::Err]
            .into_iter()
            .filter_map(|class| {
                let texts = self
                    .by(producer)
                    .filter(|entry| entry.class == class)
                    .map(|entry| entry.text.as_str())
                    .collect::<Vec<_>>();

                (!texts.is_empty()).then(|| format!("{class}: {}", texts.join(", ")))
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
