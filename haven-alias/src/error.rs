use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures that stop alias resolution altogether.
#[derive(Debug, Error)]
pub enum AliasError {
    /// Reading rules failed in a way that suggests the storage itself is
    /// unreliable.
    #[error("Failed to read alias rules at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A rule file that cannot be compiled. The file is ignored.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("line {line}: invalid pattern '{pattern}': {source}")]
    Pattern {
        line: usize,
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },
}
