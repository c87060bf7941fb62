use std::fmt::{self, Display};

use haven_common::ledger::{Class, Ledger};

/// Ledger producer for every verification entry.
pub const PRODUCER: &str = "mailauth";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mechanism {
    Spf,
    Dkim,
    Arc,
    Dmarc,
    Bimi,
}

impl Mechanism {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spf => "spf",
            Self::Dkim => "dkim",
            Self::Arc => "arc",
            Self::Dmarc => "dmarc",
            Self::Bimi => "bimi",
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    Neutral,
    /// A failure overridden by local policy, such as a trusted ARC chain.
    Policy,
    PermError,
    TempError,
    None,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Neutral => "neutral",
            Self::Policy => "policy",
            Self::PermError => "permerror",
            Self::TempError => "temperror",
            Self::None => "none",
        }
    }

    /// How the outcome is recorded in the ledger. `None` is not recorded.
    pub const fn class(self) -> Option<Class> {
        match self {
            Self::Pass => Some(Class::Pass),
            Self::Fail | Self::PermError | Self::TempError => Some(Class::Fail),
            Self::Neutral | Self::Policy => Some(Class::Skip),
            Self::None => None,
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one mechanism for one domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub mechanism: Mechanism,
    pub domain: Option<String>,
    pub outcome: Outcome,
    /// Diagnostic text for the `Authentication-Results` header.
    pub info: Option<String>,
}

impl VerificationResult {
    pub const fn new(mechanism: Mechanism, outcome: Outcome) -> Self {
        Self {
            mechanism,
            domain: None,
            outcome,
            info: None,
        }
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn is_pass(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    /// `dkim[example.com]`, or just `dkim` without a domain.
    pub fn label(&self) -> String {
        self.domain.as_ref().map_or_else(
            || self.mechanism.as_str().to_owned(),
            |domain| format!("{}[{domain}]", self.mechanism),
        )
    }

    pub fn record(&self, ledger: &mut Ledger) {
        if let Some(class) = self.outcome.class() {
            ledger.record(PRODUCER, class, self.label());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_classes() {
        assert_eq!(Outcome::Pass.class(), Some(Class::Pass));
        assert_eq!(Outcome::Fail.class(), Some(Class::Fail));
        assert_eq!(Outcome::PermError.class(), Some(Class::Fail));
        assert_eq!(Outcome::TempError.class(), Some(Class::Fail));
        assert_eq!(Outcome::Neutral.class(), Some(Class::Skip));
        assert_eq!(Outcome::Policy.class(), Some(Class::Skip));
        assert_eq!(Outcome::None.class(), None);
    }

    #[test]
    fn records_by_label() {
        let mut ledger = Ledger::default();

        VerificationResult::new(Mechanism::Dkim, Outcome::Pass)
            .domain("example.com")
            .record(&mut ledger);
        VerificationResult::new(Mechanism::Arc, Outcome::None).record(&mut ledger);
        VerificationResult::new(Mechanism::Spf, Outcome::PermError).record(&mut ledger);

        assert!(ledger.has(PRODUCER, Class::Pass, "dkim[example.com]"));
        assert!(ledger.has(PRODUCER, Class::Fail, "spf"));
        assert_eq!(ledger.entries().len(), 2);
    }
}
