use std::path::{Path, PathBuf};

use haven_common::Address;

/// Maildir++ folder for a plus-addressed user: `alice+some+folder` becomes
/// `.some.folder`. Empty if the user has no plus-tag.
pub fn plus_folder(user: &str) -> String {
    let Some(index) = user.find('+') else {
        return String::new();
    };

    let mut folder = String::with_capacity(user.len() - index);
    for ch in user[index..].chars() {
        let ch = match ch {
            '/' | '\\' | '\0' => continue,
            '+' => '.',
            ch => ch,
        };

        if ch == '.' && folder.ends_with('.') {
            continue;
        }
        folder.push(ch);
    }

    folder
}

/// Where one copy of a message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaildirTarget {
    recipient: Address,
    root: PathBuf,
    folder: PathBuf,
    filename: String,
}

impl MaildirTarget {
    pub fn new(recipient: Address, root: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        let root = root.into();
        let folder = root.join(plus_folder(recipient.user()));

        Self {
            recipient,
            root,
            folder,
            filename: filename.into(),
        }
    }

    /// Moves this target to the same plus-folder under another mailbox root.
    pub fn retarget(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
        self.folder = self.root.join(plus_folder(self.recipient.user()));
    }

    pub const fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The Maildir that receives the file: the root, or its plus-folder.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn has_subfolder(&self) -> bool {
        self.folder != self.root
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.folder.join("tmp")
    }

    pub fn new_dir(&self) -> PathBuf {
        self.folder.join("new")
    }

    pub fn tmp_file(&self) -> PathBuf {
        self.tmp_dir().join(&self.filename)
    }

    pub fn new_file(&self) -> PathBuf {
        self.new_dir().join(&self.filename)
    }
}
