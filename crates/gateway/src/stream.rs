use axum::body::Body;
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};

use protocol::Transcoder;

use crate::error::ApiError;
use crate::relay::{RelayError, ReplyStream};

enum Phase {
    Begin(ReplyStream, Transcoder),
    Reading(ReplyStream, Transcoder),
    Done,
}

/// Couples a relay byte stream to a transcoder and exposes the result as
/// a response body. The body is produced as it is polled, so HTTP-side
/// backpressure reaches the daemon socket, and dropping the body drops
/// the relay stream with it.
pub(crate) fn transcoded_body<S>(reply: S, transcoder: Transcoder) -> Body
where
    S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
{
    Body::from_stream(stream::try_unfold(
        Phase::Begin(Box::pin(reply), transcoder),
        advance,
    ))
}

async fn advance(phase: Phase) -> Result<Option<(Bytes, Phase)>, ApiError> {
    match phase {
        Phase::Begin(reply, transcoder) => {
            let preamble = transcoder.begin();
            if preamble.is_empty() {
                read_next(reply, transcoder).await
            } else {
                Ok(Some((preamble, Phase::Reading(reply, transcoder))))
            }
        }
        Phase::Reading(reply, transcoder) => read_next(reply, transcoder).await,
        Phase::Done => Ok(None),
    }
}

async fn read_next(
    mut reply: ReplyStream,
    mut transcoder: Transcoder,
) -> Result<Option<(Bytes, Phase)>, ApiError> {
    loop {
        match reply.next().await {
            Some(Ok(chunk)) => {
                let out = match transcoder.push(chunk) {
                    Ok(out) => out,
                    Err(error) => {
                        tracing::warn!(error = %error, "transcode failed mid-response");
                        return Err(error.into());
                    }
                };
                if !out.is_empty() {
                    return Ok(Some((out, Phase::Reading(reply, transcoder))));
                }
            }
            Some(Err(error)) => {
                tracing::warn!(error = %error, "relay failed mid-response");
                return Err(error.into());
            }
            None => {
                let tail = transcoder.finish()?;
                if tail.is_empty() {
                    return Ok(None);
                }
                return Ok(Some((tail, Phase::Done)));
            }
        }
    }
}
