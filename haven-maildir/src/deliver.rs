use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use ahash::AHashMap;
use haven_common::{
    Address,
    config::Template,
    fs::IoClass,
    internal,
    stream::MessageStream,
};
use tokio::fs::{self, File, OpenOptions};

use crate::{
    config::{DEFAULT_CATCH_ALL, DEFAULT_MAILDIR, MaildirConfig},
    error::MaildirError,
    fanout::{Fanout, FanoutError, TmpGuard},
    identity::DeliveryIdentity,
    target::MaildirTarget,
};

/// The mailboxes that received a copy.
#[derive(Debug, Default)]
pub struct Delivery {
    pub targets: Vec<MaildirTarget>,
    pub bytes: u64,
}

impl Delivery {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MaildirDelivery {
    config: MaildirConfig,
    identity: Arc<DeliveryIdentity>,
}

impl MaildirDelivery {
    pub const fn new(config: MaildirConfig, identity: Arc<DeliveryIdentity>) -> Self {
        Self { config, identity }
    }

    pub const fn config(&self) -> &MaildirConfig {
        &self.config
    }

    pub fn identity(&self) -> &DeliveryIdentity {
        &self.identity
    }

    /// Delivers one copy of `message` to every distinct mailbox folder of
    /// `recipients`.
    ///
    /// Nothing becomes visible in any `new/` unless every copy was written
    /// completely. With no targets the stream is left unread and the delivery
    /// is empty.
    ///
    /// # Errors
    ///
    /// Every error means the sender should retry. Only
    /// [`MaildirError::Publish`] can leave some recipients with a copy.
    #[tracing::instrument(level = "debug", skip_all, fields(recipients = recipients.len()))]
    pub async fn deliver(
        &self,
        recipients: &[Address],
        message: &mut MessageStream,
    ) -> Result<Delivery, MaildirError> {
        let filename = self.identity.unique_name();
        let mut targets = self.resolve(recipients, &filename);

        if targets.is_empty() {
            internal!(level = INFO, "No maildir targets, discarding message");
            return Ok(Delivery::default());
        }

        self.prepare(&mut targets).await?;
        let bytes = write(&targets, message).await?;

        for target in &targets {
            internal!(
                level = INFO,
                "Delivered message for {} to {}",
                target.recipient(),
                target.new_file().display()
            );
        }

        Ok(Delivery { targets, bytes })
    }

    /// One target per distinct mailbox folder, in recipient order.
    pub fn resolve(&self, recipients: &[Address], filename: &str) -> Vec<MaildirTarget> {
        let mut targets: Vec<MaildirTarget> = Vec::with_capacity(recipients.len());

        for recipient in recipients {
            let template = self
                .config
                .lookup(recipient.base_user(), recipient, |scope| scope.maildir.as_ref());

            let root = match template {
                Some(template) if template.as_str().is_empty() => {
                    internal!(
                        level = WARN,
                        "Empty maildir configured for {recipient}, not storing mail for this recipient"
                    );
                    continue;
                }
                Some(template) => template.expand(recipient),
                None => Template::new(DEFAULT_MAILDIR).expand(recipient),
            };

            let target = MaildirTarget::new(recipient.clone(), root, filename);
            if targets.iter().any(|known| known.folder() == target.folder()) {
                internal!(
                    level = DEBUG,
                    "{recipient} shares {} with an earlier recipient",
                    target.folder().display()
                );
                continue;
            }

            targets.push(target);
        }

        targets
    }

    /// Creates `tmp/` and `new/` for every target, redirecting recipients
    /// without a mailbox to their domain's catch-all.
    async fn prepare(&self, targets: &mut Vec<MaildirTarget>) -> Result<(), MaildirError> {
        let mut catch_alls: AHashMap<String, Option<PathBuf>> = AHashMap::new();

        for target in targets.iter_mut() {
            let mut redirected = false;

            loop {
                let (missing, err) = match create_dirs(target).await {
                    Ok(()) => break,
                    Err((path, err)) if IoClass::of(&err) != IoClass::Missing => {
                        return Err(MaildirError::Prepare { path, source: err });
                    }
                    Err(failure) => failure,
                };

                let catch_all = if redirected {
                    None
                } else {
                    self.catch_all(&mut catch_alls, target.recipient()).await?
                };

                match catch_all {
                    Some(root) if root != target.root() => {
                        internal!(
                            level = INFO,
                            "Recipient ({}) does not exist, catch all to: {}",
                            target.recipient(),
                            root.display()
                        );
                        target.retarget(root);
                        redirected = true;
                    }
                    _ => {
                        internal!(
                            level = WARN,
                            "Received mail for recipient ({}), but it has no mailbox at {}: {}",
                            target.recipient(),
                            missing.display(),
                            err
                        );
                        return Err(MaildirError::NoMailbox {
                            recipient: target.recipient().to_string(),
                            path: target.root().to_path_buf(),
                        });
                    }
                }
            }
        }

        // Several recipients may have landed in the same catch-all folder.
        let mut seen: Vec<PathBuf> = Vec::with_capacity(targets.len());
        targets.retain(|target| {
            if seen.iter().any(|folder| folder == target.folder()) {
                return false;
            }
            seen.push(target.folder().to_path_buf());
            true
        });

        Ok(())
    }

    /// The canonical catch-all root for `recipient`'s host, if one exists.
    async fn catch_all(
        &self,
        cache: &mut AHashMap<String, Option<PathBuf>>,
        recipient: &Address,
    ) -> Result<Option<PathBuf>, MaildirError> {
        if let Some(cached) = cache.get(recipient.host()) {
            return Ok(cached.clone());
        }

        let template = self
            .config
            .lookup(recipient.base_user(), recipient, |scope| scope.defaultdir.as_ref());

        let path = match template {
            Some(template) if template.as_str().is_empty() => None,
            Some(template) => Some(template.expand(recipient)),
            None => Some(Template::new(DEFAULT_CATCH_ALL).expand(recipient)),
        };

        let resolved = match path {
            Some(path) => canonical_dir(&path).await?,
            None => None,
        };

        cache.insert(recipient.host().to_owned(), resolved.clone());
        Ok(resolved)
    }
}

async fn canonical_dir(path: &Path) -> Result<Option<PathBuf>, MaildirError> {
    let resolved = match fs::canonicalize(path).await {
        Ok(resolved) => resolved,
        Err(err) if matches!(IoClass::of(&err), IoClass::Missing | IoClass::NotADirectory) => {
            internal!(
                level = DEBUG,
                "Catch-all does not exist for configured path ({})",
                path.display()
            );
            return Ok(None);
        }
        Err(source) => {
            return Err(MaildirError::CatchAll {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    match fs::metadata(&resolved).await {
        Ok(metadata) if metadata.is_dir() => Ok(Some(resolved)),
        Ok(_) => Ok(None),
        Err(source) => Err(MaildirError::CatchAll {
            path: resolved,
            source,
        }),
    }
}

/// Creates the target's plus-folder, `tmp/` and `new/`. The mailbox root
/// itself is never created.
async fn create_dirs(target: &MaildirTarget) -> Result<(), (PathBuf, std::io::Error)> {
    let mut dirs = Vec::with_capacity(3);
    if target.has_subfolder() {
        dirs.push(target.folder().to_path_buf());
    }
    dirs.push(target.tmp_dir());
    dirs.push(target.new_dir());

    for dir in dirs {
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(err) if IoClass::of(&err) == IoClass::Exists => {}
            Err(err) => return Err((dir, err)),
        }
    }

    Ok(())
}

/// Writes `message` into `tmp/` of every target, then renames each copy into
/// `new/`. On failure no unpublished copy is left in `tmp/`.
async fn write(targets: &[MaildirTarget], message: &mut MessageStream) -> Result<u64, MaildirError> {
    let mut guard = TmpGuard::default();
    let written = write_and_publish(targets, message, &mut guard).await;

    if written.is_err() {
        guard.discard().await;
    }

    written
}

async fn write_and_publish(
    targets: &[MaildirTarget],
    message: &mut MessageStream,
    guard: &mut TmpGuard,
) -> Result<u64, MaildirError> {
    let mut files = Vec::with_capacity(targets.len());

    for target in targets {
        let path = target.tmp_file();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| MaildirError::Write {
                path: path.clone(),
                source,
            })?;

        guard.track(path);
        files.push(file);
    }

    let mut fanout = Fanout::new(files);
    let bytes = fanout.copy(message).await.map_err(|err| match err {
        FanoutError::Read(source) => MaildirError::Stream(source),
        FanoutError::Write { index, source } => MaildirError::Write {
            path: targets[index].tmp_file(),
            source,
        },
    })?;

    for (target, file) in targets.iter().zip(fanout.into_inner()) {
        sync(target, file).await?;
    }

    for (index, target) in targets.iter().enumerate() {
        fs::rename(target.tmp_file(), target.new_file())
            .await
            .map_err(|source| MaildirError::Publish {
                path: target.new_file(),
                published: index,
                source,
            })?;
        guard.published(index);
    }

    Ok(bytes)
}

async fn sync(target: &MaildirTarget, file: File) -> Result<(), MaildirError> {
    file.sync_all()
        .await
        .map_err(|source| MaildirError::Write {
            path: target.tmp_file(),
            source,
        })
}
