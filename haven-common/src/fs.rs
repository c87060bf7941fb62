//! Classification of filesystem errors.
//!
//! Storage code distinguishes four outcomes of a failed filesystem call:
//! the path is missing, the path already exists, the failure is a likely
//! configuration problem that should be logged and tolerated, and anything
//! else, which means the storage layer cannot be trusted.

use std::io;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoClass {
    /// `ENOENT`
    Missing,
    /// `EEXIST`
    Exists,
    /// `ENOTDIR`: a path component that was expected to be a directory is not.
    NotADirectory,
    /// Permission, name-length or symlink-loop problems.
    Tolerated,
    Fatal,
}

impl IoClass {
    #[must_use]
    pub fn of(err: &io::Error) -> Self {
        if let Some(code) = err.raw_os_error() {
            return match code {
                libc::ENOENT => Self::Missing,
                libc::EEXIST => Self::Exists,
                libc::ENOTDIR => Self::NotADirectory,
                libc::EACCES | libc::EPERM | libc::ELOOP | libc::ENAMETOOLONG => Self::Tolerated,
                _ => Self::Fatal,
            };
        }

        match err.kind() {
            io::ErrorKind::NotFound => Self::Missing,
            io::ErrorKind::AlreadyExists => Self::Exists,
            io::ErrorKind::NotADirectory => Self::NotADirectory,
            io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidFilename => Self::Tolerated,
            _ => Self::Fatal,
        }
    }

    /// Returns `true` if the error should stop the worker.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }
}

/// Lowercases a path component and removes characters that would let it
/// escape its directory.
#[must_use]
pub fn path_safe(component: &str) -> String {
    component
        .chars()
        .filter(|ch| !matches!(ch, '/' | '\\' | '\0'))
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_raw_os_errors() {
        let cases = [
            (libc::ENOENT, IoClass::Missing),
            (libc::EEXIST, IoClass::Exists),
            (libc::ENOTDIR, IoClass::NotADirectory),
            (libc::EACCES, IoClass::Tolerated),
            (libc::EPERM, IoClass::Tolerated),
            (libc::ELOOP, IoClass::Tolerated),
            (libc::ENAMETOOLONG, IoClass::Tolerated),
            (libc::EIO, IoClass::Fatal),
            (libc::ENOSPC, IoClass::Fatal),
        ];

        for (code, expected) in cases {
            assert_eq!(IoClass::of(&io::Error::from_raw_os_error(code)), expected);
        }
    }

    #[test]
    fn classifies_synthetic_errors() {
        assert_eq!(
            IoClass::of(&io::Error::from(io::ErrorKind::NotFound)),
            IoClass::Missing
        );
        assert!(IoClass::of(&io::Error::other("disk on fire")).is_fatal());
    }

    #[test]
    fn path_safe_strips_separators() {
        assert_eq!(path_safe("Ex/am\\ple\0.COM"), "example.com");
        assert_eq!(path_safe("../etc"), "..etc");
    }
}
