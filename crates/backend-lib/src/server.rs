// ============================
// backend-lib/src/server.rs
// ============================
//! Connection listener: one task per accepted socket.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::forwarder::StreamEnd;
use crate::metrics::{CONNECTION_ACCEPTED, CONNECTION_ACTIVE};
use crate::session::{handle_connection, SessionOutcome};
use crate::GatewayState;

/// Pause after a failed accept, so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the listening socket
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, GatewayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Config(format!("could not listen on {addr}: {e}")))
}

/// Accept connections until `shutdown` fires.
///
/// Per-connection failures are logged and never stop the listener.
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, seclevel = state.auth.min_seclevel(), "gateway listening");
    }

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("listener shutting down");
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "error accepting connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                counter!(CONNECTION_ACCEPTED).increment(1);
                let state = Arc::clone(&state);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    gauge!(CONNECTION_ACTIVE).increment(1.0);
                    let location = peer.to_string();
                    debug!(%location, "connection accepted");
                    let result = handle_connection(stream, &location, state, shutdown).await;
                    log_outcome(&location, result);
                    gauge!(CONNECTION_ACTIVE).decrement(1.0);
                });
            }
        }
    }

    Ok(())
}

fn log_outcome(location: &str, result: Result<SessionOutcome, GatewayError>) {
    match result {
        Ok(SessionOutcome::Disconnected { state }) => {
            debug!(%location, ?state, "peer disconnected during login");
        }
        Ok(SessionOutcome::TimedOut { state }) => {
            info!(%location, ?state, "login timed out");
        }
        Ok(SessionOutcome::Denied(failure)) => {
            debug!(%location, code = failure.code(), "session closed after denial");
        }
        Ok(SessionOutcome::Streamed { identity, end }) => match end {
            StreamEnd::SourceFailed(err) => {
                warn!(%location, username = %identity.username, error = %err, "log stream ended");
            }
            other => {
                info!(%location, username = %identity.username, end = ?other, "stream closed");
            }
        },
        Err(err) => {
            warn!(%location, code = err.error_code(), error = %err, "session error");
        }
    }
}
