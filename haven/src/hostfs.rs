//! Whether a domain is served locally, judged by the presence of its
//! directory.

use std::path::PathBuf;

use haven_common::{Address, config::Template, fs::IoClass, internal};

use crate::{config::HostsConfig, error::StageError};

#[derive(Debug, Clone)]
pub struct HostChecker {
    path: Template,
}

impl HostChecker {
    pub fn new(config: &HostsConfig) -> Self {
        Self {
            path: config.path.clone(),
        }
    }

    pub fn path(&self, address: &Address) -> PathBuf {
        self.path.expand(address)
    }

    /// Returns `true` if `address`'s host has a directory.
    ///
    /// A missing path means the host is not local. Permission, name-length
    /// and symlink-loop problems are logged and also count as not local.
    ///
    /// # Errors
    ///
    /// Any other I/O error is returned as [`StageError::Storage`].
    pub async fn exists(&self, address: &Address) -> Result<bool, StageError> {
        let path = self.path(address);

        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(err) => match IoClass::of(&err) {
                IoClass::Missing | IoClass::NotADirectory | IoClass::Exists => Ok(false),
                IoClass::Tolerated => {
                    internal!(
                        level = WARN,
                        "Treating host {} as not local, {}: {err}",
                        address.host(),
                        path.display()
                    );
                    Ok(false)
                }
                IoClass::Fatal => Err(StageError::Storage { path, source: err }),
            },
        }
    }
}
