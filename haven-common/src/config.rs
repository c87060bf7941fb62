//! Scoped configuration and path templates.
//!
//! Every component section is a [`ScopedConfig`]: the top-level keys form the
//! default scope and `scopes."<key>"` tables override them for a literal
//! `user@host` or `host`. Lookups walk the keys from most to least specific:
//!
//! 1. `user@host`
//! 2. `user@original_host`
//! 3. `host`
//! 4. `original_host`
//! 5. the default scope
//!
//! ```toml
//! [maildir]
//! maildir = "vmail/<domain>/<user>"
//!
//! [maildir.scopes."example.org"]
//! defaultdir = "vmail/example.org/postmaster"
//! ```

use std::{
    fmt::{self, Display},
    path::PathBuf,
    sync::LazyLock,
};

use ahash::AHashMap;
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{address::Address, fs::path_safe};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopedConfig<T> {
    #[serde(flatten)]
    pub main: T,
    #[serde(default, deserialize_with = "lowercase_keys")]
    pub scopes: AHashMap<String, T>,
}

impl<T> ScopedConfig<T> {
    pub fn new(main: T) -> Self {
        Self {
            main,
            scopes: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, key: &str, scope: T) -> Self {
        self.scopes.insert(key.to_lowercase(), scope);
        self
    }

    /// The most specific scope present for `user` at `address`'s host, or the
    /// default scope if none is.
    pub fn section(&self, user: &str, address: &Address) -> &T {
        scope_keys(user, address)
            .iter()
            .find_map(|key| self.scopes.get(key))
            .unwrap_or(&self.main)
    }

    /// The first scope, from most to least specific, in which `key` yields a
    /// value.
    pub fn lookup<'a, V: ?Sized>(
        &'a self,
        user: &str,
        address: &Address,
        key: impl Fn(&'a T) -> Option<&'a V>,
    ) -> Option<&'a V> {
        scope_keys(user, address)
            .iter()
            .filter_map(|scope| self.scopes.get(scope))
            .chain(std::iter::once(&self.main))
            .find_map(key)
    }
}

/// The scope keys for `user` at `address`'s host, most specific first.
pub fn scope_keys(user: &str, address: &Address) -> [String; 4] {
    let user = user.to_lowercase();
    let host = address.host().to_lowercase();
    let original_host = address.original_host().to_lowercase();

    [
        format!("{user}@{host}"),
        format!("{user}@{original_host}"),
        host,
        original_host,
    ]
}

fn lowercase_keys<'de, D, T>(deserializer: D) -> Result<AHashMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let scopes = AHashMap::<String, T>::deserialize(deserializer)?;
    Ok(scopes
        .into_iter()
        .map(|(key, value)| (key.to_lowercase(), value))
        .collect())
}

#[allow(clippy::unwrap_used)]
static DOMAIN_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)<(domain|domainname|host|hostname)>").unwrap());

#[allow(clippy::unwrap_used)]
static USER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)<(user|username)>").unwrap());

/// A path with `<domain>` and `<user>` placeholders.
///
/// `<domain>`, `<domainname>`, `<host>` and `<hostname>` expand to the
/// recipient's host; `<user>` and `<username>` expand to the local-part
/// without plus-tags. Both are lowercased with path separators and NUL
/// removed. Placeholders are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(String);

impl Template {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn expand(&self, address: &Address) -> PathBuf {
        let host = path_safe(address.host());
        let user = path_safe(address.base_user());

        let expanded = DOMAIN_TOKEN.replace_all(&self.0, |_: &Captures<'_>| host.as_str());
        let expanded = USER_TOKEN.replace_all(&expanded, |_: &Captures<'_>| user.as_str());

        PathBuf::from(expanded.into_owned())
    }
}

impl Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Template {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
