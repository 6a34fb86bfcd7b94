// ============================
// backend-lib/src/forwarder.rs
// ============================
//! Streams appended log lines to an authenticated peer.
use std::path::PathBuf;
use std::time::Duration;

use metrics::{counter, gauge};
use talisman_common::ServerLine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::metrics::{STREAM_ACTIVE, STREAM_LINES};
use crate::tail::{LogTail, StreamError};

/// Why streaming stopped
#[derive(Debug)]
pub enum StreamEnd {
    /// Reading from the peer failed
    PeerClosed,
    /// Writing a line to the peer failed
    WriteFailed(std::io::Error),
    /// The process is shutting down
    Shutdown,
    /// The log file became unreadable
    SourceFailed(StreamError),
}

/// Forwards one log file to one connection
pub struct LogForwarder {
    log_file: PathBuf,
    poll_interval: Duration,
}

impl LogForwarder {
    pub fn new(log_file: PathBuf, poll_interval: Duration) -> Self {
        Self {
            log_file,
            poll_interval,
        }
    }

    /// Attach to the log file at its current end.
    ///
    /// Fails only if the file exists but cannot be opened.
    pub async fn attach(&self) -> Result<LogTail, StreamError> {
        LogTail::attach(&self.log_file, self.poll_interval).await
    }

    /// Deliver lines from `tail` until a write fails, the peer's read half
    /// errors, the file becomes unreadable or `shutdown` fires.
    ///
    /// A peer that half-closes its side keeps receiving lines.
    pub async fn run<R, W>(
        &self,
        tail: LogTail,
        reader: &mut R,
        writer: &mut W,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StreamEnd
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let cursor = tail.cursor();
        debug!(path = %tail.path().display(), position = cursor.position, "forwarding log lines");
        let mut lines = tail.spawn();
        let mut scratch = [0u8; 512];
        let mut peer_eof = false;

        gauge!(STREAM_ACTIVE).increment(1.0);
        let end = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break StreamEnd::Shutdown;
                    }
                }
                read = reader.read(&mut scratch), if !peer_eof => {
                    match read {
                        Ok(0) => {
                            debug!("peer finished sending, streaming continues");
                            peer_eof = true;
                        }
                        Err(_) => break StreamEnd::PeerClosed,
                        // Input after login is ignored
                        Ok(n) => debug!(bytes = n, "discarding peer input while streaming"),
                    }
                }
                line = lines.recv() => {
                    match line {
                        Some(Ok(text)) => {
                            if let Err(err) = send(writer, &ServerLine::LogLine(text)).await {
                                break StreamEnd::WriteFailed(err);
                            }
                            counter!(STREAM_LINES).increment(1);
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "log stream failed");
                            break StreamEnd::SourceFailed(err);
                        }
                        None => {
                            break StreamEnd::SourceFailed(StreamError::Read {
                                path: self.log_file.clone(),
                                source: std::io::Error::other("tail task ended"),
                            });
                        }
                    }
                }
            }
        };
        gauge!(STREAM_ACTIVE).decrement(1.0);

        end
    }
}

/// Write one protocol line and flush it
pub async fn send<W: AsyncWrite + Unpin>(writer: &mut W, line: &ServerLine) -> std::io::Result<()> {
    writer.write_all(line.to_wire().as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::io::{duplex, split, AsyncBufReadExt, BufReader};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_forwards_new_lines_until_write_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talisman.log");
        std::fs::write(&path, "A\nB\n").unwrap();

        let forwarder = LogForwarder::new(path.clone(), Duration::from_millis(10));
        let tail = forwarder.attach().await.unwrap();

        let (server, client) = duplex(4096);
        let (mut server_read, mut server_write) = split(server);
        let (_tx, mut shutdown) = watch::channel(false);

        let task = tokio::spawn(async move {
            forwarder
                .run(tail, &mut server_read, &mut server_write, &mut shutdown)
                .await
        });

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"C\n").unwrap();

        let (client_read, client_write) = split(client);
        let mut client_lines = BufReader::new(client_read).lines();
        let line = timeout(WAIT, client_lines.next_line()).await.unwrap().unwrap();
        assert_eq!(line.as_deref(), Some("C"));

        drop(client_write);
        drop(client_lines);
        file.write_all(b"D\n").unwrap();
        let end = timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(end, StreamEnd::WriteFailed(_)));
    }

    #[tokio::test]
    async fn test_peer_eof_keeps_streaming() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talisman.log");
        std::fs::write(&path, "").unwrap();

        let forwarder = LogForwarder::new(path.clone(), Duration::from_millis(10));
        let tail = forwarder.attach().await.unwrap();

        let (mut server_write, client_read) = duplex(4096);
        // The peer has nothing more to say
        let mut server_read: &[u8] = b"";
        let (_tx, mut shutdown) = watch::channel(false);

        let task = tokio::spawn(async move {
            forwarder
                .run(tail, &mut server_read, &mut server_write, &mut shutdown)
                .await
        });

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"after eof\n").unwrap();

        let mut client_lines = BufReader::new(client_read).lines();
        let line = timeout(WAIT, client_lines.next_line()).await.unwrap().unwrap();
        assert_eq!(line.as_deref(), Some("after eof"));
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talisman.log");
        std::fs::write(&path, "").unwrap();

        let forwarder = LogForwarder::new(path, Duration::from_millis(10));
        let tail = forwarder.attach().await.unwrap();

        let (server, _client) = duplex(4096);
        let (mut server_read, mut server_write) = split(server);
        let (tx, mut shutdown) = watch::channel(false);

        let task = tokio::spawn(async move {
            forwarder
                .run(tail, &mut server_read, &mut server_write, &mut shutdown)
                .await
        });

        tx.send(true).unwrap();
        let end = timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(end, StreamEnd::Shutdown));
    }
}
