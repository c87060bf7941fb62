use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaildirError {
    /// The recipient has no mailbox and no catch-all applies.
    #[error("Recipient ({recipient}) does not exist.")]
    NoMailbox { recipient: String, path: PathBuf },

    #[error("Failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to resolve catch-all {path}: {source}")]
    CatchAll {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read message: {0}")]
    Stream(#[source] io::Error),

    /// Renaming into `new/` failed after `published` copies were already
    /// visible.
    #[error("Failed to publish {path} after {published} deliveries: {source}")]
    Publish {
        path: PathBuf,
        published: usize,
        #[source]
        source: io::Error,
    },
}

impl MaildirError {
    /// Returns `true` if some recipients already hold a copy.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::Publish { published, .. } if *published > 0)
    }

    /// The text relayed to the remote client.
    #[must_use]
    pub fn reply_reason(&self) -> String {
        match self {
            Self::NoMailbox { .. } => self.to_string(),
            _ => String::from("Temporary error saving message to maildir storage."),
        }
    }
}
