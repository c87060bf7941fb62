use core::fmt::{self, Display, Formatter};

/// SMTP reply codes the core hands back to the protocol engine.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    Ok,
    Unavailable,
    ActionUnavailable,
    Error,
    Unknown(u32),
}

impl Status {
    /// Checks if the status is a permanent rejection
    pub fn is_permanent(self) -> bool {
        u32::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u32::from(self))
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            250 => Self::Ok,
            421 => Self::Unavailable,
            451 => Self::ActionUnavailable,
            550 => Self::Error,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::Ok => 250,
            Status::Unavailable => 421,
            Status::ActionUnavailable => 451,
            Status::Error => 550,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}

/// What a stage decided about the current hook.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Verdict {
    /// No opinion; the next stage runs.
    Continue,
    /// Accept and stop running stages for this hook.
    Accept,
    /// Temporary failure, the client should retry.
    SoftReject,
    /// Permanent failure.
    HardReject,
}

impl Verdict {
    /// Reply code relayed to the client, `None` for `Continue`.
    pub const fn status(self) -> Option<Status> {
        match self {
            Self::Continue => None,
            Self::Accept => Some(Status::Ok),
            Self::SoftReject => Some(Status::ActionUnavailable),
            Self::HardReject => Some(Status::Error),
        }
    }

    pub const fn is_final(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Continue => "continue",
            Self::Accept => "accept",
            Self::SoftReject => "soft-reject",
            Self::HardReject => "hard-reject",
        })
    }
}

/// A verdict with the optional text relayed to the remote client.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Reply {
    pub verdict: Verdict,
    pub reason: Option<String>,
}

impl Reply {
    pub const fn next() -> Self {
        Self {
            verdict: Verdict::Continue,
            reason: None,
        }
    }

    pub fn accept(reason: impl Into<Option<String>>) -> Self {
        Self::with(Verdict::Accept, reason)
    }

    pub fn soft_reject(reason: impl Into<Option<String>>) -> Self {
        Self::with(Verdict::SoftReject, reason)
    }

    pub fn hard_reject(reason: impl Into<Option<String>>) -> Self {
        Self::with(Verdict::HardReject, reason)
    }

    fn with(verdict: Verdict, reason: impl Into<Option<String>>) -> Self {
        Self {
            verdict,
            reason: reason.into(),
        }
    }

    pub const fn is_final(&self) -> bool {
        self.verdict.is_final()
    }

    /// The reply code, treating an undecided hook as accepted.
    pub const fn status(&self) -> Status {
        match self.verdict.status() {
            Some(status) => status,
            None => Status::Ok,
        }
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} {reason}", self.status()),
            None => write!(f, "{}", self.status()),
        }
    }
}
