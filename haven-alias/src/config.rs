use haven_common::config::{ScopedConfig, Template};
use serde::Deserialize;

pub const DEFAULT_PATH: &str = "vmail/<domain>/<user>/aliases";

/// One scope of the `[aliases]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AliasScope {
    /// A rule file, or a directory whose every entry is a rule file.
    #[serde(default, alias = "file")]
    pub path: Option<Template>,

    /// Deliver to the original recipient as well as to its aliases.
    #[serde(default)]
    pub keep_original: Option<bool>,
}

pub type AliasConfig = ScopedConfig<AliasScope>;

impl AliasScope {
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(Template::new(path)),
            keep_original: None,
        }
    }

    #[must_use]
    pub const fn keep_original(mut self, keep: bool) -> Self {
        self.keep_original = Some(keep);
        self
    }
}
