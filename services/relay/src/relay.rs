//! Upstream-to-client SSE transcoding.
//!
//! Upstream events are `data: {"choices":[{"delta":{"content":...}}]}` lines.
//! Only the text deltas survive, re-framed as the simplified protocol from
//! [`gesture_core::protocol`]. A pump task owns the upstream body and feeds a
//! bounded channel; the response body is the receiving end.

use crate::upstream::ByteStream;
use bytes::Bytes;
use futures_util::StreamExt;
use gesture_core::protocol::{DONE_SENTINEL, RecordBuffer, StreamFrame, data_payload};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info_span, warn};

const CHANNEL_CAPACITY: usize = 32;

#[derive(Deserialize, Default)]
struct UpstreamChunk {
    #[serde(default)]
    choices: Vec<UpstreamChoice>,
}

#[derive(Deserialize, Default)]
struct UpstreamChoice {
    #[serde(default)]
    delta: UpstreamDelta,
}

#[derive(Deserialize, Default)]
struct UpstreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Pulls the text delta out of one upstream line, if it carries any.
fn extract_delta(line: &str) -> Option<String> {
    let payload = data_payload(line)?;
    if payload == DONE_SENTINEL {
        return None;
    }
    let chunk: UpstreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(error = %e, "Skipping unparseable upstream line");
            return None;
        }
    };
    chunk
        .choices
        .into_iter()
        .next()?
        .delta
        .content
        .filter(|text| !text.is_empty())
}

/// Spawns the pump and returns the simplified frame stream.
pub fn transcode(upstream: ByteStream) -> ReceiverStream<Bytes> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(pump(upstream, tx).instrument(info_span!("relay_pump")));
    ReceiverStream::new(rx)
}

async fn pump(mut upstream: ByteStream, tx: mpsc::Sender<Bytes>) {
    let mut lines = RecordBuffer::lines();
    let mut forwarded = 0usize;
    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!(forwarded, "Client went away; dropping upstream");
                return;
            }
            next = upstream.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                for line in lines.push(&bytes) {
                    let Some(text) = extract_delta(&line) else {
                        continue;
                    };
                    let frame = StreamFrame::Text(text).encode();
                    if tx.send(Bytes::from(frame)).await.is_err() {
                        debug!(forwarded, "Client went away; dropping upstream");
                        return;
                    }
                    forwarded += 1;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, forwarded, "Upstream read failed");
                let frame = StreamFrame::Error(e.to_string()).encode();
                let _ = tx.send(Bytes::from(frame)).await;
                return;
            }
            None => break,
        }
    }
    debug!(forwarded, "Upstream finished");
    let _ = tx.send(Bytes::from(StreamFrame::Done.encode())).await;
}
