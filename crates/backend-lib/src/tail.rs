// ============================
// backend-lib/src/tail.rs
// ============================
//! Follow a growing log file by path.
//!
//! A [`LogTail`] attaches at end-of-file and yields each line appended after
//! that point, in order. When the path is replaced by a new file (rotation)
//! the old handle is drained and the new file is read from its start; when
//! the file shrinks below the cursor (truncation) reading restarts at offset
//! zero. A truncate-and-regrow that happens entirely between two polls cannot
//! be told apart from normal growth.
use std::collections::VecDeque;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::GatewayError;

/// Bytes read from the file per poll before yielding lines
const MAX_READ_PER_POLL: usize = 64 * 1024;

/// Longest unterminated line kept before it is emitted as-is
const MAX_PENDING_LINE: usize = 64 * 1024;

/// Lines buffered between the tail task and its consumer
const LINE_CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("could not open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<StreamError> for GatewayError {
    fn from(err: StreamError) -> Self {
        GatewayError::Stream(err.to_string())
    }
}

/// Which file a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_meta: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// Read position and identity of the file being followed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCursor {
    pub position: u64,
    pub identity: Option<FileIdentity>,
}

impl StreamCursor {
    /// True when `other` is known to be a different file
    fn is_replaced_by(&self, other: Option<FileIdentity>) -> bool {
        matches!((self.identity, other), (Some(ours), Some(theirs)) if ours != theirs)
    }
}

/// Follows one log file for one consumer
pub struct LogTail {
    path: PathBuf,
    poll_interval: Duration,
    file: Option<File>,
    cursor: StreamCursor,
    pending: Vec<u8>,
    ready: VecDeque<String>,
}

impl LogTail {
    /// Attach at the current end of `path`.
    ///
    /// A missing file is not an error: the tail waits for it to appear and
    /// then reads it from the start.
    pub async fn attach<P: AsRef<Path>>(path: P, poll_interval: Duration) -> Result<Self, StreamError> {
        let path = path.as_ref().to_path_buf();
        let mut tail = Self {
            path,
            poll_interval,
            file: None,
            cursor: StreamCursor::default(),
            pending: Vec::new(),
            ready: VecDeque::new(),
        };

        match File::open(&tail.path).await {
            Ok(mut file) => {
                let meta = file.metadata().await.map_err(|source| tail.read_error(source))?;
                let position = file
                    .seek(SeekFrom::End(0))
                    .await
                    .map_err(|source| tail.read_error(source))?;
                tail.cursor = StreamCursor {
                    position,
                    identity: FileIdentity::of(&meta),
                };
                tail.file = Some(file);
                debug!(path = %tail.path.display(), position, "tail attached at end of file");
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %tail.path.display(), "log file absent, waiting for it");
            }
            Err(source) => {
                return Err(StreamError::Open {
                    path: tail.path.clone(),
                    source,
                })
            }
        }

        Ok(tail)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> StreamCursor {
        self.cursor
    }

    /// Wait for the next complete line, without its `\n`.
    pub async fn next_line(&mut self) -> Result<String, StreamError> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(line);
            }
            if !self.poll().await? {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    /// Run the tail in its own task, feeding lines into a channel.
    ///
    /// The task stops after the first error or once the receiver is dropped.
    pub fn spawn(mut self) -> mpsc::Receiver<Result<String, StreamError>> {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = tx.closed() => break,
                    item = self.next_line() => item,
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
            debug!(path = %self.path.display(), "tail task finished");
        });
        rx
    }

    /// One poll step; returns whether anything changed.
    async fn poll(&mut self) -> Result<bool, StreamError> {
        if self.file.is_none() {
            return self.open_fresh().await;
        }

        if self.read_available().await? > 0 {
            return Ok(true);
        }

        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            // Renamed away and not recreated yet; keep the old handle
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(self.read_error(source)),
        };

        if self.cursor.is_replaced_by(FileIdentity::of(&meta)) {
            info!(path = %self.path.display(), "log file rotated, reopening");
            self.flush_pending();
            self.file = None;
            self.open_fresh().await?;
            return Ok(true);
        }

        if meta.len() < self.cursor.position {
            info!(
                path = %self.path.display(),
                old_len = self.cursor.position,
                new_len = meta.len(),
                "log file truncated, restarting from the beginning"
            );
            if let Some(file) = self.file.as_mut() {
                file.seek(SeekFrom::Start(0))
                    .await
                    .map_err(|source| StreamError::Read {
                        path: self.path.clone(),
                        source,
                    })?;
            }
            self.cursor.position = 0;
            self.pending.clear();
            return Ok(true);
        }

        Ok(false)
    }

    /// Open whatever the path currently names and read it from offset zero.
    async fn open_fresh(&mut self) -> Result<bool, StreamError> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(StreamError::Open {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let meta = file.metadata().await.map_err(|source| self.read_error(source))?;
        self.cursor = StreamCursor {
            position: 0,
            identity: FileIdentity::of(&meta),
        };
        self.file = Some(file);
        debug!(path = %self.path.display(), "log file opened");
        Ok(true)
    }

    async fn read_available(&mut self) -> Result<usize, StreamError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        let mut buf = [0u8; 8192];
        let mut total = 0;
        while total < MAX_READ_PER_POLL {
            let n = match file.read(&mut buf).await {
                Ok(n) => n,
                Err(source) => {
                    return Err(StreamError::Read {
                        path: self.path.clone(),
                        source,
                    })
                }
            };
            if n == 0 {
                break;
            }
            total += n;
            self.cursor.position += n as u64;
            self.pending.extend_from_slice(&buf[..n]);
        }

        self.split_lines();
        Ok(total)
    }

    fn split_lines(&mut self) {
        while let Some(idx) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=idx).collect();
            self.ready
                .push_back(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        if self.pending.len() > MAX_PENDING_LINE {
            self.flush_pending();
        }
    }

    /// Emit an unterminated remainder as a line of its own
    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.ready.push_back(String::from_utf8_lossy(&line).into_owned());
        }
    }

    fn read_error(&self, source: std::io::Error) -> StreamError {
        StreamError::Read {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const POLL: Duration = Duration::from_millis(10);
    const WAIT: Duration = Duration::from_secs(5);

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    async fn next(tail: &mut LogTail) -> String {
        timeout(WAIT, tail.next_line()).await.expect("timed out").unwrap()
    }

    #[tokio::test]
    async fn test_attach_skips_history_and_follows_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talisman.log");
        std::fs::write(&path, "A\nB\n").unwrap();

        let mut tail = LogTail::attach(&path, POLL).await.unwrap();
        assert_eq!(tail.cursor().position, 4);
        assert_eq!(tail.path(), path.as_path());

        append(&path, "C\n");
        assert_eq!(next(&mut tail).await, "C");

        std::fs::write(&path, "D\n").unwrap();
        assert_eq!(next(&mut tail).await, "D");

        // Nothing else is pending
        assert!(timeout(Duration::from_millis(100), tail.next_line()).await.is_err());
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_terminator() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talisman.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = LogTail::attach(&path, POLL).await.unwrap();
        append(&path, "half a ");
        assert!(timeout(Duration::from_millis(100), tail.next_line()).await.is_err());

        append(&path, "line\nnext\n");
        assert_eq!(next(&mut tail).await, "half a line");
        assert_eq!(next(&mut tail).await, "next");
    }

    #[tokio::test]
    async fn test_waits_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talisman.log");

        let mut tail = LogTail::attach(&path, POLL).await.unwrap();
        assert_eq!(tail.cursor(), StreamCursor::default());

        append(&path, "first\n");
        assert_eq!(next(&mut tail).await, "first");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rename_rotation_reopens_new_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talisman.log");
        std::fs::write(&path, "old\n").unwrap();

        let mut tail = LogTail::attach(&path, POLL).await.unwrap();
        append(&path, "before rotate\n");
        assert_eq!(next(&mut tail).await, "before rotate");

        std::fs::rename(&path, dir.path().join("talisman.log.1")).unwrap();
        std::fs::write(&path, "after rotate\n").unwrap();
        assert_eq!(next(&mut tail).await, "after rotate");

        append(&path, "more\n");
        assert_eq!(next(&mut tail).await, "more");
    }

    #[tokio::test]
    async fn test_spawned_tail_delivers_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talisman.log");
        std::fs::write(&path, "history\n").unwrap();

        let tail = LogTail::attach(&path, POLL).await.unwrap();
        let mut rx = tail.spawn();

        append(&path, "one\ntwo\nthree\n");
        for expected in ["one", "two", "three"] {
            let line = timeout(WAIT, rx.recv()).await.unwrap().unwrap().unwrap();
            assert_eq!(line, expected);
        }
    }

    #[test]
    fn test_cursor_replacement_needs_both_identities() {
        let cursor = StreamCursor::default();
        assert!(!cursor.is_replaced_by(None));

        let a = FileIdentity { dev: 1, ino: 10 };
        let b = FileIdentity { dev: 1, ino: 11 };
        let cursor = StreamCursor {
            position: 0,
            identity: Some(a),
        };
        assert!(!cursor.is_replaced_by(Some(a)));
        assert!(cursor.is_replaced_by(Some(b)));
        assert!(!cursor.is_replaced_by(None));
    }
}
