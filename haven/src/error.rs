use std::{io, path::PathBuf};

use haven_alias::AliasError;
use haven_common::stream::StreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("HAVEN_CONFIG points to non-existent file: {0}")]
    Missing(PathBuf),
}

/// A stage could not reach a verdict. Every variant stops the transaction;
/// the protocol engine should drop the worker rather than reply.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Storage failure at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Alias(#[from] AliasError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}
