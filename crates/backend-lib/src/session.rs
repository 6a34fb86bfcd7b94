// ============================
// backend-lib/src/session.rs
// ============================
//! Per-connection protocol handler.
//!
//! ```text
//! S: Username:
//! C: <username>
//! S: Password:
//! C: <password>
//! S: Authentication successful! | Authentication failed: <reason>
//! S: <log line> ...            (after success only)
//! ```
//!
//! One username/password exchange per connection, one outcome.
use std::sync::Arc;
use std::time::Duration;

use talisman_common::{AuthFailure, Identity, ServerLine, GENERIC_DENIAL};
use tokio::io::{split, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::FailureDisclosure;
use crate::error::GatewayError;
use crate::forwarder::{send, LogForwarder, StreamEnd};
use crate::GatewayState;

/// Longest accepted username or password line, terminator excluded
pub const MAX_LINE_LEN: usize = 1024;

/// Where a session is in the login exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingUsername,
    AwaitingPassword,
    Authenticating,
    Streaming,
    Closed,
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// The peer went away before authentication finished
    Disconnected { state: SessionState },
    /// No complete line arrived within the login timeout
    TimedOut { state: SessionState },
    /// Authentication was refused
    Denied(AuthFailure),
    /// Authenticated, then streamed until `end`
    Streamed { identity: Identity, end: StreamEnd },
}

enum LineRead {
    Line(String),
    Closed,
    TimedOut,
}

/// Client-facing reason text for a refusal
pub fn failure_text(failure: &AuthFailure, disclosure: FailureDisclosure) -> String {
    match disclosure {
        FailureDisclosure::Generic => GENERIC_DENIAL.to_string(),
        FailureDisclosure::Detailed => failure.category().to_string(),
    }
}

/// Run the whole session protocol on `stream`.
///
/// `location` identifies the peer in logs and in the status registry.
pub async fn handle_connection<S>(
    stream: S,
    location: &str,
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SessionOutcome, GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = split(stream);
    let mut reader = BufReader::new(read_half);
    let login_timeout = state.settings.login_timeout();

    let mut phase = SessionState::AwaitingUsername;
    send(&mut writer, &ServerLine::UsernamePrompt).await?;
    let username = match read_line(&mut reader, login_timeout).await? {
        LineRead::Line(line) => line,
        LineRead::Closed => return Ok(SessionOutcome::Disconnected { state: phase }),
        LineRead::TimedOut => return Ok(SessionOutcome::TimedOut { state: phase }),
    };

    phase = SessionState::AwaitingPassword;
    send(&mut writer, &ServerLine::PasswordPrompt).await?;
    let mut password = match read_line(&mut reader, login_timeout).await? {
        LineRead::Line(line) => line,
        LineRead::Closed => return Ok(SessionOutcome::Disconnected { state: phase }),
        LineRead::TimedOut => return Ok(SessionOutcome::TimedOut { state: phase }),
    };

    phase = SessionState::Authenticating;
    debug!(%location, ?phase, %username, "checking credentials");
    let outcome = state.auth.authenticate(&username, &password).await;
    password.zeroize();

    let identity = match outcome {
        Ok(identity) => identity,
        Err(failure) => {
            info!(%location, %username, reason = %failure, code = failure.code(), "authentication failed");
            let reason = failure_text(&failure, state.settings.failure_disclosure);
            send(&mut writer, &ServerLine::AuthFailed { reason }).await?;
            return Ok(SessionOutcome::Denied(failure));
        }
    };

    info!(%location, username = %identity.username, account_id = %identity.account_id, "user authenticated");
    send(&mut writer, &ServerLine::AuthSucceeded).await?;

    phase = SessionState::Streaming;
    let forwarder = LogForwarder::new(state.paths.log_file.clone(), state.settings.poll_interval());
    let tail = match forwarder.attach().await {
        Ok(tail) => tail,
        Err(err) => {
            warn!(%location, error = %err, "could not stream log file");
            // Best effort: the session ends either way
            let _ = send(&mut writer, &ServerLine::StreamUnavailable).await;
            return Err(err.into());
        }
    };

    let _status = state.status.register(&identity.username, location);
    debug!(%location, ?phase, log_file = %state.paths.log_file.display(), "streaming log file");
    let end = forwarder.run(tail, &mut reader, &mut writer, &mut shutdown).await;
    debug!(%location, state = ?SessionState::Closed, ?end, "session closed");

    Ok(SessionOutcome::Streamed { identity, end })
}

/// Read one `\n`-terminated line and strip trailing whitespace.
async fn read_line<R>(reader: &mut R, limit: Option<Duration>) -> Result<LineRead, GatewayError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = String::new();
    let mut limited = (&mut *reader).take(MAX_LINE_LEN as u64 + 1);
    let read = limited.read_line(&mut buf);

    let n = match limit {
        Some(limit) => match tokio::time::timeout(limit, read).await {
            Ok(result) => result?,
            Err(_) => return Ok(LineRead::TimedOut),
        },
        None => read.await?,
    };

    if n == 0 {
        return Ok(LineRead::Closed);
    }
    if !buf.ends_with('\n') {
        if buf.len() > MAX_LINE_LEN {
            return Err(GatewayError::SessionIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "line too long",
            )));
        }
        // EOF in the middle of a line
        return Ok(LineRead::Closed);
    }

    let trimmed_len = buf.trim_end().len();
    buf.truncate(trimmed_len);
    Ok(LineRead::Line(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_text_generic_hides_category() {
        for failure in [
            AuthFailure::UserNotFound,
            AuthFailure::InvalidPassword,
            AuthFailure::InsufficientPrivilege { seclevel: 1, required: 100 },
        ] {
            assert_eq!(failure_text(&failure, FailureDisclosure::Generic), GENERIC_DENIAL);
        }
    }

    #[test]
    fn test_failure_text_detailed_names_category_only() {
        let failure = AuthFailure::InsufficientPrivilege { seclevel: 1, required: 100 };
        let text = failure_text(&failure, FailureDisclosure::Detailed);
        assert_eq!(text, "insufficient seclevel");
        assert!(!text.contains("100"));
    }

    #[tokio::test]
    async fn test_read_line_trims_crlf() {
        let mut input: &[u8] = b"sysop \r\nnext\n";
        match read_line(&mut input, None).await.unwrap() {
            LineRead::Line(line) => assert_eq!(line, "sysop"),
            _ => panic!("expected a line"),
        }
        match read_line(&mut input, None).await.unwrap() {
            LineRead::Line(line) => assert_eq!(line, "next"),
            _ => panic!("expected a line"),
        }
        assert!(matches!(read_line(&mut input, None).await.unwrap(), LineRead::Closed));
    }

    #[tokio::test]
    async fn test_read_line_rejects_overlong_input() {
        let long = vec![b'a'; MAX_LINE_LEN + 10];
        let mut input: &[u8] = &long;
        assert!(read_line(&mut input, None).await.is_err());
    }

    #[tokio::test]
    async fn test_read_line_partial_line_is_disconnect() {
        let mut input: &[u8] = b"sys";
        assert!(matches!(read_line(&mut input, None).await.unwrap(), LineRead::Closed));
    }
}
