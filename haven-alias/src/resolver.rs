use std::path::{Path, PathBuf};

use haven_common::{
    Address,
    config::Template,
    fs::IoClass,
    headers::Headers,
    internal,
};
use tokio::fs;

use crate::{
    config::{AliasConfig, DEFAULT_PATH},
    error::AliasError,
    rule::RuleFile,
};

/// Rewrites recipient lists from per-recipient rule files.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    config: AliasConfig,
}

impl AliasResolver {
    pub const fn new(config: AliasConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &AliasConfig {
        &self.config
    }

    /// Resolves every recipient through its rule files and returns the new,
    /// deduplicated recipient list.
    ///
    /// A recipient with no applicable rule, or whose scope sets
    /// `keep_original`, stays in the list. The result may be empty when a rule
    /// file deliberately discards the message.
    ///
    /// # Errors
    ///
    /// Fails if reading a rule source hits an I/O error other than a missing
    /// path or a permission problem.
    #[tracing::instrument(level = "debug", skip_all, fields(recipients = recipients.len()))]
    pub async fn resolve(
        &self,
        recipients: &[Address],
        headers: &Headers,
    ) -> Result<Vec<Address>, AliasError> {
        let mut resolved = Vec::with_capacity(recipients.len());

        for recipient in recipients {
            let scope = self.config.section(recipient.user(), recipient);
            let source = self.source(recipient);

            let mut applies = false;
            for file in load(&source).await? {
                let applied = file.apply(headers, recipient);
                applies |= applied.applies;

                for alias in applied.aliases {
                    internal!(
                        level = DEBUG,
                        "Alias {recipient} -> {alias} from {}",
                        file.path().display()
                    );
                    push_unique(&mut resolved, alias);
                }
            }

            if !applies || scope.keep_original.unwrap_or(false) {
                push_unique(&mut resolved, recipient.clone());
            }
        }

        internal!(
            level = INFO,
            "Resolved {} recipient(s) into {}",
            recipients.len(),
            resolved.len()
        );

        Ok(resolved)
    }

    /// The rule source for `recipient`: the most specific scope's path, or
    /// the default scope's, or the built-in layout.
    pub fn source(&self, recipient: &Address) -> PathBuf {
        let scope = self.config.section(recipient.user(), recipient);

        scope
            .path
            .as_ref()
            .or(self.config.main.path.as_ref())
            .map_or_else(
                || Template::new(DEFAULT_PATH).expand(recipient),
                |template| template.expand(recipient),
            )
    }
}

fn push_unique(list: &mut Vec<Address>, address: Address) {
    if !list.contains(&address) {
        list.push(address);
    }
}

/// Loads the rule files at `path`: every non-directory entry if it is a
/// directory, otherwise the file itself.
async fn load(path: &Path) -> Result<Vec<RuleFile>, AliasError> {
    let mut dir = match fs::read_dir(path).await {
        Ok(dir) => dir,
        Err(err) if IoClass::of(&err) == IoClass::NotADirectory => {
            return Ok(read_rule_file(path).await?.into_iter().collect());
        }
        Err(err) => {
            tolerate(path, err)?;
            return Ok(Vec::new());
        }
    };

    let mut entries = Vec::new();
    loop {
        match dir.next_entry().await {
            Ok(Some(entry)) => {
                let entry = entry.path();
                if let Ok(metadata) = fs::metadata(&entry).await
                    && metadata.is_dir()
                {
                    continue;
                }
                entries.push(entry);
            }
            Ok(None) => break,
            Err(err) => {
                tolerate(path, err)?;
                break;
            }
        }
    }
    entries.sort();

    let mut files = Vec::with_capacity(entries.len());
    for entry in entries {
        files.extend(read_rule_file(&entry).await?);
    }

    Ok(files)
}

async fn read_rule_file(path: &Path) -> Result<Option<RuleFile>, AliasError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tolerate(path, err)?;
            return Ok(None);
        }
    };

    match RuleFile::parse(path, &String::from_utf8_lossy(&bytes)) {
        Ok(file) => Ok(Some(file)),
        Err(err) => {
            internal!(
                level = ERROR,
                "Ignoring alias file {}: {err}",
                path.display()
            );
            Ok(None)
        }
    }
}

/// Decides whether a failed read means "no rules here" or a broken store.
fn tolerate(path: &Path, err: std::io::Error) -> Result<(), AliasError> {
    match IoClass::of(&err) {
        IoClass::Missing | IoClass::NotADirectory => Ok(()),
        IoClass::Tolerated => {
            internal!(
                level = ERROR,
                "Cannot read alias rules at {}: {err}",
                path.display()
            );
            Ok(())
        }
        IoClass::Exists | IoClass::Fatal => Err(AliasError::Io {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}
