use std::{io, path::PathBuf};

use futures_util::future::try_join_all;
use haven_common::{fs::IoClass, internal, stream::MessageStream};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Why a fan-out copy stopped.
#[derive(Debug)]
pub enum FanoutError {
    Read(io::Error),
    Write { index: usize, source: io::Error },
}

/// Writes one stream to several destinations in lock-step: every chunk is
/// written to all of them before the next chunk is read.
pub struct Fanout<W> {
    writers: Vec<W>,
}

impl<W: AsyncWrite + Unpin + Send> Fanout<W> {
    pub const fn new(writers: Vec<W>) -> Self {
        Self { writers }
    }

    /// Copies the whole of `stream` to every writer and flushes them.
    pub async fn copy(&mut self, stream: &mut MessageStream) -> Result<u64, FanoutError> {
        let mut copied = 0u64;

        while let Some(chunk) = stream.next_chunk().await.map_err(FanoutError::Read)? {
            try_join_all(self.writers.iter_mut().enumerate().map(|(index, writer)| {
                let chunk = &chunk;
                async move {
                    writer
                        .write_all(chunk)
                        .await
                        .map_err(|source| FanoutError::Write { index, source })
                }
            }))
            .await?;

            copied += chunk.len() as u64;
        }

        try_join_all(self.writers.iter_mut().enumerate().map(|(index, writer)| async move {
            writer
                .flush()
                .await
                .map_err(|source| FanoutError::Write { index, source })
        }))
        .await?;

        Ok(copied)
    }

    pub fn into_inner(self) -> Vec<W> {
        self.writers
    }
}

/// Temporary files that have not been published yet.
///
/// [`TmpGuard::discard`] removes them on a failed delivery. Dropping a guard
/// that still tracks files, as happens when the delivery future is cancelled,
/// removes them on the blocking pool.
#[derive(Default)]
pub struct TmpGuard {
    pending: Vec<Option<PathBuf>>,
}

impl TmpGuard {
    pub fn track(&mut self, path: PathBuf) {
        self.pending.push(Some(path));
    }

    /// Stops tracking the file at `index`, which now lives in `new/`.
    pub fn published(&mut self, index: usize) {
        if let Some(slot) = self.pending.get_mut(index) {
            *slot = None;
        }
    }

    /// Removes every unpublished file and stops tracking them.
    pub async fn discard(&mut self) {
        for path in self.pending.drain(..).flatten() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if IoClass::of(&err) == IoClass::Missing => {}
                Err(err) => internal!(
                    level = WARN,
                    "Unable to remove {}: {err}",
                    path.display()
                ),
            }
        }
    }
}

impl Drop for TmpGuard {
    fn drop(&mut self) {
        let paths: Vec<PathBuf> = self.pending.drain(..).flatten().collect();
        if paths.is_empty() {
            return;
        }

        let remove = move || {
            for path in paths {
                let _ = std::fs::remove_file(path);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(remove)),
            Err(_) => remove(),
        }
    }
}
