use haven_common::config::{ScopedConfig, Template};
use serde::Deserialize;

pub const DEFAULT_MAILDIR: &str = "vmail/<domain>/<user>";
pub const DEFAULT_CATCH_ALL: &str = "vmail/<domain>/@";

/// One scope of the `[maildir]` section. Keys are looked up independently,
/// so a host scope may set only `defaultdir` and inherit `maildir`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaildirScope {
    /// Mailbox root for a recipient. An empty template disables delivery.
    #[serde(default)]
    pub maildir: Option<Template>,

    /// Catch-all mailbox root used when a recipient has no mailbox.
    #[serde(default)]
    pub defaultdir: Option<Template>,

    /// Installation identity used in file names. Only read from the default
    /// scope.
    #[serde(default)]
    pub id: Option<String>,
}

pub type MaildirConfig = ScopedConfig<MaildirScope>;

impl MaildirScope {
    pub fn with_maildir(maildir: impl Into<String>) -> Self {
        Self {
            maildir: Some(Template::new(maildir)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn defaultdir(mut self, defaultdir: impl Into<String>) -> Self {
        self.defaultdir = Some(Template::new(defaultdir));
        self
    }
}
