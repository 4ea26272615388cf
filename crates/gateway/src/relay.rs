//! Connection-per-request relay to the daemon.
//!
//! Each HTTP request gets its own TCP connection: connect, write the
//! command line, half-close the write side so the daemon sees
//! end-of-request, then stream the reply until the daemon closes.
//! Dropping the reply stream closes the socket, which is how a client
//! disconnect propagates to the daemon.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::Stream;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const READ_CHUNK_SIZE: usize = 4096;

pub(crate) type ReplyStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

/// Where and how to reach the daemon; shared by every request.
#[derive(Debug, Clone)]
pub(crate) struct DaemonEndpoint {
    pub(crate) addr: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) idle_timeout: Duration,
}

#[derive(Debug, Error)]
pub(crate) enum RelayError {
    #[error("daemon connection failed: {0}")]
    ConnectFailed(#[source] io::Error),
    #[error("daemon did not respond within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Idle,
    Connecting,
    Sent,
    Streaming,
    Closed,
    Failed,
}

/// Lifecycle of one relayed exchange. Transitions are logged with the
/// session id so one request can be followed through the log.
pub(crate) struct RelaySession {
    id: String,
    addr: String,
    state: SessionState,
}

impl RelaySession {
    pub(crate) fn new(addr: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            addr: addr.to_string(),
            state: SessionState::Idle,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(
            session = %self.id,
            daemon = %self.addr,
            from = ?self.state,
            to = ?next,
            "relay state"
        );
        self.state = next;
    }

    fn fail(&mut self, error: RelayError) -> RelayError {
        tracing::warn!(
            session = %self.id,
            daemon = %self.addr,
            state = ?self.state,
            error = %error,
            "relay failed"
        );
        self.state = SessionState::Failed;
        error
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        // Dropped mid-stream means the caller cancelled; the socket
        // goes down with the stream that owned it.
        if !matches!(self.state, SessionState::Closed | SessionState::Failed) {
            tracing::debug!(session = %self.id, state = ?self.state, "relay cancelled");
            self.state = SessionState::Failed;
        }
    }
}

/// Sends one command and returns the reply as a byte stream. The stream
/// ends when the daemon closes the connection; each read is bounded by
/// the idle timeout.
pub(crate) async fn relay(
    endpoint: &DaemonEndpoint,
    command: &str,
) -> Result<ReplyStream, RelayError> {
    let mut session = RelaySession::new(&endpoint.addr);
    session.transition(SessionState::Connecting);
    let mut stream =
        match timeout(endpoint.connect_timeout, TcpStream::connect(&endpoint.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => return Err(session.fail(RelayError::ConnectFailed(error))),
            Err(_) => return Err(session.fail(RelayError::Timeout(endpoint.connect_timeout))),
        };

    let mut line = String::with_capacity(command.len() + 1);
    line.push_str(command);
    line.push('\n');
    match timeout(endpoint.idle_timeout, send_request(&mut stream, line.as_bytes())).await {
        Ok(Ok(())) => session.transition(SessionState::Sent),
        Ok(Err(error)) => return Err(session.fail(RelayError::ConnectFailed(error))),
        Err(_) => return Err(session.fail(RelayError::Timeout(endpoint.idle_timeout))),
    }

    let idle_timeout = endpoint.idle_timeout;
    Ok(Box::pin(futures_util::stream::try_unfold(
        (stream, session),
        move |(mut stream, mut session)| async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
            match timeout(idle_timeout, stream.read_buf(&mut buf)).await {
                Ok(Ok(0)) => {
                    // Zero bytes before close is still a successful,
                    // empty reply.
                    if session.state() == SessionState::Sent {
                        session.transition(SessionState::Streaming);
                    }
                    session.transition(SessionState::Closed);
                    Ok(None)
                }
                Ok(Ok(_)) => {
                    if session.state() == SessionState::Sent {
                        session.transition(SessionState::Streaming);
                    }
                    Ok(Some((buf.freeze(), (stream, session))))
                }
                Ok(Err(error)) => Err(session.fail(RelayError::ConnectFailed(error))),
                Err(_) => Err(session.fail(RelayError::Timeout(idle_timeout))),
            }
        },
    )))
}

/// Write then half-close: the shutdown sends FIN on the write side while
/// the read side stays open for the reply.
async fn send_request(stream: &mut TcpStream, line: &[u8]) -> io::Result<()> {
    stream.write_all(line).await?;
    stream.shutdown().await
}
