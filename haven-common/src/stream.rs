//! The single-pass message byte stream.
//!
//! A [`MessageStream`] can be read exactly once. A consumer that needs the
//! bytes alongside another one must [`fork`](MessageStream::fork) the stream
//! before anything has been read; each branch then sees every chunk, and a
//! read error on the source reaches every branch.
//!
//! Header edits made by stages are not applied to the source. They are
//! recorded as [`HeaderEdits`] and applied when the stream is read for
//! delivery, see [`MessageStream::edited`].

use std::{io, pin::Pin, sync::Arc};

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};

use crate::headers::{Field, Headers};

pub type Chunk = Arc<[u8]>;

const CHUNK_SIZE: usize = 64 * 1024;

/// Largest header section an edited stream will buffer before giving up.
pub const MAX_HEADER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Message stream has already been read from")]
    AlreadyStarted,
}

enum Source {
    Reader(Pin<Box<dyn AsyncRead + Send + Sync>>),
    Channel(mpsc::UnboundedReceiver<io::Result<Chunk>>),
    Edited(Box<Edited>),
    Exhausted,
}

pub struct MessageStream {
    source: Source,
    started: bool,
}

impl MessageStream {
    pub fn from_reader(reader: impl AsyncRead + Send + Sync + 'static) -> Self {
        Self::new(Source::Reader(Box::pin(reader)))
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_reader(io::Cursor::new(bytes.into()))
    }

    /// A stream fed chunk by chunk, for a protocol engine that is still
    /// receiving the message. Dropping the sender ends the stream.
    pub fn channel() -> (mpsc::UnboundedSender<io::Result<Chunk>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(Source::Channel(rx)))
    }

    const fn new(source: Source) -> Self {
        Self {
            source,
            started: false,
        }
    }

    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// The next chunk, or `None` at the end of the message.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        self.started = true;

        let next = match &mut self.source {
            Source::Reader(reader) => {
                let mut buffer = vec![0; CHUNK_SIZE];
                let read = reader.read(&mut buffer).await?;
                buffer.truncate(read);
                (read > 0).then(|| Chunk::from(buffer))
            }
            Source::Channel(rx) => rx.recv().await.transpose()?,
            Source::Edited(edited) => edited.read_chunk().await?,
            Source::Exhausted => None,
        };

        if next.is_none() {
            self.source = Source::Exhausted;
        }

        Ok(next)
    }

    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut message = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            message.extend_from_slice(&chunk);
        }
        Ok(message)
    }

    /// Splits off an independent branch of this stream.
    ///
    /// Both `self` and the returned stream yield the full message. Must be
    /// called from within a tokio runtime, before the first read.
    pub fn fork(&mut self) -> Result<Self, StreamError> {
        if self.started {
            return Err(StreamError::AlreadyStarted);
        }

        let source = std::mem::replace(self, Self::new(Source::Exhausted));
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();

        tokio::spawn(pump(source, [left_tx, right_tx]));

        *self = Self::new(Source::Channel(left_rx));
        Ok(Self::new(Source::Channel(right_rx)))
    }

    /// Applies `edits` to the header section as the stream is read.
    pub fn edited(self, edits: HeaderEdits) -> Self {
        if edits.is_empty() {
            return self;
        }

        Self::new(Source::Edited(Box::new(Edited {
            source: self,
            edits,
            in_body: false,
        })))
    }
}

async fn pump(
    mut source: MessageStream,
    consumers: [mpsc::UnboundedSender<io::Result<Chunk>>; 2],
) {
    loop {
        match source.next_chunk().await {
            Ok(Some(chunk)) => {
                for consumer in &consumers {
                    let _ = consumer.send(Ok(Arc::clone(&chunk)));
                }
            }
            Ok(None) => break,
            Err(err) => {
                for consumer in &consumers {
                    let _ = consumer.send(Err(io::Error::new(err.kind(), err.to_string())));
                }
                break;
            }
        }

        if consumers.iter().all(mpsc::UnboundedSender::is_closed) {
            break;
        }
    }
}

/// Header fields added and removed by stages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderEdits {
    prepend: Vec<Field>,
    remove: Vec<String>,
}

impl HeaderEdits {
    /// Adds a field above every other, including earlier prepends.
    pub fn prepend(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.prepend.insert(
            0,
            Field {
                name: name.into(),
                value: value.into(),
            },
        );
    }

    /// Drops `name` from the original header section and from earlier
    /// prepends.
    pub fn remove(&mut self, name: &str) {
        self.prepend
            .retain(|field| !field.name.eq_ignore_ascii_case(name));
        if !self.remove.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            self.remove.push(name.to_string());
        }
    }

    pub fn prepended(&self) -> &[Field] {
        &self.prepend
    }

    pub fn is_empty(&self) -> bool {
        self.prepend.is_empty() && self.remove.is_empty()
    }

    /// Applies the edits to a parsed header section.
    pub fn apply_to(&self, headers: &mut Headers) {
        for name in &self.remove {
            headers.remove(name);
        }
        for field in self.prepend.iter().rev() {
            headers.prepend(field.name.clone(), field.value.clone());
        }
    }

    fn is_removed(&self, line: &[u8]) -> bool {
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return false;
        };
        let name = line[..colon].trim_ascii_end();

        self.remove
            .iter()
            .any(|removed| removed.as_bytes().eq_ignore_ascii_case(name))
    }

    fn apply(&self, head: &[u8], newline: &[u8], out: &mut Vec<u8>) {
        for field in &self.prepend {
            out.extend_from_slice(field.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(field.value.as_bytes());
            out.extend_from_slice(newline);
        }

        let mut skipping = false;
        for line in head.split_inclusive(|&b| b == b'\n') {
            if !matches!(line.first(), Some(b' ' | b'\t')) {
                skipping = self.is_removed(line);
            }
            if !skipping {
                out.extend_from_slice(line);
            }
        }
    }
}

struct Edited {
    source: MessageStream,
    edits: HeaderEdits,
    in_body: bool,
}

impl Edited {
    fn read_chunk(&mut self) -> BoxFuture<'_, io::Result<Option<Chunk>>> {
        Box::pin(async move {
            if self.in_body {
                return self.source.next_chunk().await;
            }

            let mut buffer = Vec::new();
            let mut scanned = 0;
            let split = loop {
                if let Some(split) = header_end(&buffer, scanned) {
                    break split;
                }
                if buffer.len() > MAX_HEADER_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("header section exceeds {MAX_HEADER_SIZE} bytes"),
                    ));
                }
                scanned = buffer.len();
                match self.source.next_chunk().await? {
                    Some(chunk) => buffer.extend_from_slice(&chunk),
                    None => break buffer.len(),
                }
            };
            self.in_body = true;

            let (head, body) = buffer.split_at(split);
            let newline: &[u8] = if head.ends_with(b"\r\n") || body.starts_with(b"\r\n") {
                b"\r\n"
            } else {
                b"\n"
            };

            let mut out = Vec::with_capacity(buffer.len());
            self.edits.apply(head, newline, &mut out);
            out.extend_from_slice(body);

            Ok((!out.is_empty()).then(|| Chunk::from(out)))
        })
    }
}

/// Length of the header section including its final line break, if the
/// blank line separating it from the body has been seen.
///
/// The first `scanned` bytes were searched by an earlier call, so the scan
/// resumes just before them to catch a blank line split across chunks.
fn header_end(buffer: &[u8], scanned: usize) -> Option<usize> {
    if buffer.starts_with(b"\n") || buffer.starts_with(b"\r\n") {
        return Some(0);
    }

    let start = scanned.saturating_sub(2);
    buffer
        .get(start..)?
        .windows(2)
        .enumerate()
        .find_map(|(offset, window)| {
            let i = start + offset;
            match window {
                b"\n\n" => Some(i + 1),
                [b'\n', b'\r'] if buffer.get(i + 2) == Some(&b'\n') => Some(i + 1),
                _ => None,
            }
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const MESSAGE: &[u8] = b"BIMI-Location: v=BIMI1;\r\n\
\tl=https://evil.example/logo.svg\r\n\
Subject: hello\r\n\
\r\n\
BIMI-Location: stays in the body\r\n";

    #[tokio::test]
    async fn reads_once() {
        let mut stream = MessageStream::from_bytes(MESSAGE);
        assert!(!stream.is_started());

        assert_eq!(stream.read_to_end().await.unwrap(), MESSAGE);
        assert!(stream.is_started());
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fork_yields_identical_branches() {
        let mut stream = MessageStream::from_bytes(MESSAGE);
        let mut branch = stream.fork().unwrap();
        let mut third = branch.fork().unwrap();

        assert_eq!(branch.read_to_end().await.unwrap(), MESSAGE);
        assert_eq!(stream.read_to_end().await.unwrap(), MESSAGE);
        assert_eq!(third.read_to_end().await.unwrap(), MESSAGE);
    }

    #[tokio::test]
    async fn fork_after_read_is_refused() {
        let mut stream = MessageStream::from_bytes(MESSAGE);
        stream.next_chunk().await.unwrap();

        assert!(matches!(stream.fork(), Err(StreamError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn errors_reach_every_branch() {
        let (tx, mut stream) = MessageStream::channel();
        let mut branch = stream.fork().unwrap();

        tx.send(Ok(Chunk::from(&b"partial"[..]))).unwrap();
        tx.send(Err(io::Error::other("connection reset"))).unwrap();
        drop(tx);

        assert!(stream.read_to_end().await.is_err());
        assert!(branch.read_to_end().await.is_err());
    }

    #[tokio::test]
    async fn edits_rewrite_header_section_only() {
        let mut edits = HeaderEdits::default();
        edits.prepend("Received-SPF", "pass");
        edits.remove("bimi-location");
        edits.prepend("Authentication-Results", "mx.example.com; spf=pass");

        let mut stream = MessageStream::from_bytes(MESSAGE).edited(edits);
        let edited = stream.read_to_end().await.unwrap();

        assert_eq!(
            String::from_utf8(edited).unwrap(),
            "Authentication-Results: mx.example.com; spf=pass\r\n\
Received-SPF: pass\r\n\
Subject: hello\r\n\
\r\n\
BIMI-Location: stays in the body\r\n"
        );
    }

    #[tokio::test]
    async fn edits_across_small_chunks() {
        let (tx, stream) = MessageStream::channel();
        for byte in b"A: 1\nB: 2\n\nbody\n" {
            tx.send(Ok(Chunk::from(&[*byte][..]))).unwrap();
        }
        drop(tx);

        let mut edits = HeaderEdits::default();
        edits.remove("a");

        let mut stream = stream.edited(edits);
        assert_eq!(stream.read_to_end().await.unwrap(), b"B: 2\n\nbody\n");
    }

    #[tokio::test]
    async fn no_edits_is_byte_identical() {
        let mut stream = MessageStream::from_bytes(MESSAGE).edited(HeaderEdits::default());
        assert_eq!(stream.read_to_end().await.unwrap(), MESSAGE);
    }

    #[tokio::test]
    async fn blank_line_split_across_chunks() {
        for parts in [
            ["A: 1\r\nB: 2\r", "\n\r", "\nbody\r\n"],
            ["A: 1\r\nB: 2\r\n", "\r", "\nbody\r\n"],
            ["A: 1\nB: 2\n", "\n", "body\n"],
        ] {
            let (tx, stream) = MessageStream::channel();
            for part in parts {
                tx.send(Ok(Chunk::from(part.as_bytes()))).unwrap();
            }
            drop(tx);

            let mut edits = HeaderEdits::default();
            edits.remove("a");

            let edited = stream.edited(edits).read_to_end().await.unwrap();
            let expected = parts.concat().replacen("A: 1", "", 1);
            assert_eq!(
                String::from_utf8(edited).unwrap(),
                expected.trim_start_matches(['\r', '\n'])
            );
        }
    }

    #[tokio::test]
    async fn oversized_header_section_is_an_error() {
        let (tx, stream) = MessageStream::channel();
        let line = Chunk::from(format!("X-Filler: {}\r\n", "a".repeat(1000)).as_bytes());
        for _ in 0..=MAX_HEADER_SIZE / line.len() {
            tx.send(Ok(Arc::clone(&line))).unwrap();
        }
        tx.send(Ok(Chunk::from(&b"\r\nbody\r\n"[..]))).unwrap();
        drop(tx);

        let mut edits = HeaderEdits::default();
        edits.prepend("Received-SPF", "pass");

        let err = stream.edited(edits).read_to_end().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn finds_header_end() {
        assert_eq!(header_end(b"A: 1\r\n\r\nbody", 0), Some(6));
        assert_eq!(header_end(b"A: 1\n\nbody", 0), Some(5));
        assert_eq!(header_end(b"\r\nbody", 0), Some(0));
        assert_eq!(header_end(b"A: 1\r\n", 0), None);
    }

    #[test]
    fn resumed_scan_skips_searched_bytes() {
        // A blank line wholly inside the searched prefix is not found again.
        assert_eq!(header_end(b"A: 1\n\nB: 2\r\n", 10), None);
        assert_eq!(header_end(b"A: 1\r\nB: 2\r\n\r\nbody", 12), Some(12));
        assert_eq!(header_end(b"A: 1\r\nB: 2\r\n\r\nbody", 13), Some(12));
        assert_eq!(header_end(b"A: 1\n", 40), None);
    }
}
