//! The `haven.toml` configuration file.
//!
//! ```toml
//! [hosts]
//! path = "/srv/vmail/<domain>"
//!
//! [aliases]
//! path = "/srv/vmail/<domain>/<user>/aliases"
//!
//! [aliases.scopes."lists.example.org"]
//! path = "/srv/lists/<user>"
//! keep_original = true
//!
//! [maildir]
//! maildir = "/srv/vmail/<domain>/<user>"
//! defaultdir = "/srv/vmail/<domain>/@"
//!
//! [mailauth]
//! min_bit_length = 1024
//! dns_max_lookups = 10
//!
//! [auth]
//! methods = ["PLAIN", "LOGIN"]
//! ```

use std::path::{Path, PathBuf};

use haven_alias::AliasConfig;
use haven_auth::MailAuthConfig;
use haven_common::config::Template;
use haven_maildir::MaildirConfig;
use serde::Deserialize;

use crate::error::ConfigError;

pub const ENV_VAR: &str = "HAVEN_CONFIG";
pub const DEFAULT_HOSTS_PATH: &str = "vmail/<domain>";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hosts: HostsConfig,
    #[serde(default)]
    pub aliases: AliasConfig,
    #[serde(default)]
    pub maildir: MaildirConfig,
    #[serde(default)]
    pub mailauth: MailAuthConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// The `[hosts]` section: where a locally served domain is provisioned.
#[derive(Debug, Clone, Deserialize)]
pub struct HostsConfig {
    #[serde(default = "default_hosts_path")]
    pub path: Template,
}

fn default_hosts_path() -> Template {
    Template::new(DEFAULT_HOSTS_PATH)
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            path: default_hosts_path(),
        }
    }
}

/// The `[auth]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// SASL mechanisms advertised to clients.
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
}

fn default_methods() -> Vec<String> {
    ["PLAIN", "LOGIN", "CRAM-MD5"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            methods: default_methods(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Capabilities,
    SenderAuth,
    Hosts,
    Mailauth,
    Aliases,
    Maildir,
}

/// The `[pipeline]` section: which stages run, in order.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_stages")]
    pub stages: Vec<StageKind>,
}

fn default_stages() -> Vec<StageKind> {
    vec![
        StageKind::Capabilities,
        StageKind::SenderAuth,
        StageKind::Hosts,
        StageKind::Mailauth,
        StageKind::Aliases,
        StageKind::Maildir,
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
        }
    }
}

impl Config {
    /// Reads and parses the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Finds the configuration file using the following precedence:
    /// 1. `explicit`, from the command line
    /// 2. `HAVEN_CONFIG` environment variable
    /// 3. `./haven.toml`
    /// 4. `/etc/haven/haven.toml`
    ///
    /// Returns `None` when no file exists, in which case the defaults apply.
    pub fn locate(explicit: Option<PathBuf>) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(path) = explicit {
            return Ok(Some(path));
        }

        if let Ok(env_path) = std::env::var(ENV_VAR) {
            let path = PathBuf::from(env_path);
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(ConfigError::Missing(path));
        }

        Ok([
            PathBuf::from("./haven.toml"),
            PathBuf::from("/etc/haven/haven.toml"),
        ]
        .into_iter()
        .find(|path| path.exists()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use haven_common::Address;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.hosts.path.as_str(), DEFAULT_HOSTS_PATH);
        assert_eq!(config.auth.methods, ["PLAIN", "LOGIN", "CRAM-MD5"]);
        assert_eq!(config.pipeline.stages, default_stages());
        assert_eq!(config.mailauth.dns_max_lookups, 10);
        assert!(config.aliases.main.path.is_none());
        assert!(config.maildir.scopes.is_empty());
    }

    #[test]
    fn scoped_sections() {
        let config = Config::parse(
            r#"
            [aliases]
            path = "/srv/aliases/<user>"

            [aliases.scopes."Lists.Example.org"]
            file = "/srv/lists/<user>"
            keep_original = true

            [maildir]
            maildir = "/srv/vmail/<domain>/<user>"

            [maildir.scopes."example.org"]
            defaultdir = "/srv/vmail/example.org/postmaster"

            [pipeline]
            stages = ["hosts", "aliases", "maildir"]
            "#,
        )
        .unwrap();

        let list = Address::parse("team@lists.example.org").unwrap();
        let scope = config.aliases.section(list.user(), &list);
        assert_eq!(
            scope.path.as_ref().map(Template::as_str),
            Some("/srv/lists/<user>")
        );
        assert_eq!(scope.keep_original, Some(true));

        let user = Address::parse("john@example.org").unwrap();
        assert_eq!(
            config
                .maildir
                .lookup(user.user(), &user, |scope| scope.maildir.as_ref())
                .map(Template::as_str),
            Some("/srv/vmail/<domain>/<user>")
        );
        assert_eq!(
            config
                .maildir
                .lookup(user.user(), &user, |scope| scope.defaultdir.as_ref())
                .map(Template::as_str),
            Some("/srv/vmail/example.org/postmaster")
        );

        assert_eq!(
            config.pipeline.stages,
            [StageKind::Hosts, StageKind::Aliases, StageKind::Maildir]
        );
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(Config::parse("[pipeline]\nstages = [\"spam\"]").is_err());
    }

    #[test]
    fn explicit_path_wins() {
        let path = PathBuf::from("/nonexistent/haven.toml");

        assert_eq!(Config::locate(Some(path.clone())).unwrap(), Some(path));
    }

    #[test]
    fn unreadable_file() {
        let err = Config::load(Path::new("/nonexistent/haven.toml")).unwrap_err();

        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
