//! Client side of the simplified SSE protocol.
//!
//! A [`CompletionSource`] turns a prompt into a [`DeltaStream`] of text deltas.
//! [`consume`] drains that stream into the final accumulated text while
//! honouring an explicit cancellation token.

use crate::protocol::{ChatRequest, ErrorBody, RecordBuffer, StreamFrame};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream::BoxStream};
use std::{collections::VecDeque, pin::Pin, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumeError {
    /// The session's own token fired. Not a failure.
    #[error("stream cancelled")]
    Cancelled,
    /// The relay refused the request before streaming.
    #[error("{message}")]
    Http { status: u16, message: String },
    /// The relay reported an error frame mid-stream.
    #[error("{0}")]
    Remote(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no data received for {0:?}")]
    Stalled(Duration),
}

impl ConsumeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConsumeError::Cancelled)
    }
}

/// A finite, single-consumer stream of text deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ConsumeError>> + Send>>;

/// Anything that can open a streamed completion for a prompt.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    async fn open(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<DeltaStream, ConsumeError>;
}

/// Opens a stream for `prompt` and accumulates it, calling `on_chunk` for
/// each delta in arrival order.
///
/// Rejects with [`ConsumeError::Cancelled`] as soon as `cancel` fires; the
/// underlying stream is dropped, which releases the connection.
pub async fn consume<F>(
    source: &dyn CompletionSource,
    prompt: &str,
    cancel: &CancellationToken,
    on_chunk: F,
) -> Result<String, ConsumeError>
where
    F: FnMut(&str) + Send,
{
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ConsumeError::Cancelled),
        opened = source.open(prompt, cancel) => opened?,
    };
    collect_deltas(stream, cancel, on_chunk).await
}

/// Drains a delta stream. Resolves once the stream ends, whether or not a
/// `[DONE]` frame was seen. Text accumulated before an error is discarded.
pub async fn collect_deltas<F>(
    mut stream: DeltaStream,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> Result<String, ConsumeError>
where
    F: FnMut(&str) + Send,
{
    let mut accumulated = String::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConsumeError::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(delta)) => {
                accumulated.push_str(&delta);
                on_chunk(&delta);
            }
            Some(Err(e)) => return Err(e),
            None => return Ok(accumulated),
        }
    }
}

struct DecodeState {
    body: BoxStream<'static, Result<Bytes, ConsumeError>>,
    buffer: RecordBuffer,
    pending: VecDeque<StreamFrame>,
    stall_timeout: Option<Duration>,
    finished: bool,
}

impl DecodeState {
    fn finish(&mut self) {
        self.finished = true;
        self.pending.clear();
        self.buffer.clear();
    }
}

/// Decodes a raw response body into text deltas.
///
/// Frames are split on the blank line terminating each record. Frames that
/// fail to parse are skipped on the assumption that they were cut by a read
/// boundary. This also drops genuinely malformed frames without reporting
/// them. An error frame ends the stream with [`ConsumeError::Remote`].
pub fn decode_frames<S>(body: S, stall_timeout: Option<Duration>) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, ConsumeError>> + Send + 'static,
{
    let state = DecodeState {
        body: body.boxed(),
        buffer: RecordBuffer::frames(),
        pending: VecDeque::new(),
        stall_timeout,
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                match frame {
                    StreamFrame::Text(text) => return Some((Ok(text), st)),
                    StreamFrame::Error(message) => {
                        st.finish();
                        return Some((Err(ConsumeError::Remote(message)), st));
                    }
                    StreamFrame::Done => continue,
                }
            }
            if st.finished {
                return None;
            }

            let next = match st.stall_timeout {
                Some(limit) => match tokio::time::timeout(limit, st.body.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        st.finish();
                        return Some((Err(ConsumeError::Stalled(limit)), st));
                    }
                },
                None => st.body.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    let records = st.buffer.push(&chunk);
                    st.pending
                        .extend(records.iter().filter_map(|r| StreamFrame::decode(r)));
                }
                Some(Err(e)) => {
                    st.finish();
                    return Some((Err(e), st));
                }
                None => {
                    if st.buffer.pending() > 0 {
                        debug!(bytes = st.buffer.pending(), "Discarding unterminated frame");
                    }
                    st.finish();
                }
            }
        }
    }))
}

/// HTTP client for the relay's `POST` endpoint.
#[derive(Debug, Clone)]
pub struct StreamConsumer {
    client: reqwest::Client,
    endpoint: String,
    stall_timeout: Option<Duration>,
}

impl StreamConsumer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            stall_timeout: None,
        }
    }

    /// Fails the stream with [`ConsumeError::Stalled`] when no bytes arrive
    /// for `timeout`. Disabled by default.
    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionSource for StreamConsumer {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn open(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<DeltaStream, ConsumeError> {
        let request = self
            .client
            .post(&self.endpoint)
            .json(&ChatRequest {
                prompt: prompt.to_string(),
            })
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConsumeError::Cancelled),
            response = request => response.map_err(|e| ConsumeError::Transport(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .map(|body| body.error)
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            debug!(status = status.as_u16(), %message, "Relay rejected request");
            return Err(ConsumeError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ConsumeError::Transport(e.to_string())));
        Ok(decode_frames(body, self.stall_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Mutex;

    fn body(chunks: Vec<&'static str>) -> impl Stream<Item = Result<Bytes, ConsumeError>> + Send {
        let chunks: Vec<_> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_reassembles_deltas_across_reads() {
        let deltas = decode_frames(
            body(vec![
                "data: {\"text\":\"He\"}\n\ndata: {\"te",
                "xt\":\"llo\"}\n\n",
                "data: [DONE]\n\n",
            ]),
            None,
        );
        let mut chunks = Vec::new();
        let text = collect_deltas(deltas, &CancellationToken::new(), |d| chunks.push(d.to_string()))
            .await
            .unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(chunks, vec!["He", "llo"]);
    }

    #[tokio::test]
    async fn test_resolves_without_done_sentinel() {
        let deltas = decode_frames(body(vec!["data: {\"text\":\"partial\"}\n\n"]), None);
        let text = collect_deltas(deltas, &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(text, "partial");
    }

    #[tokio::test]
    async fn test_error_frame_rejects_and_discards_text() {
        let deltas = decode_frames(
            body(vec![
                "data: {\"text\":\"half an answ\"}\n\n",
                "data: {\"error\":\"boom\"}\n\n",
                "data: {\"text\":\"never seen\"}\n\n",
            ]),
            None,
        );
        let mut chunks = Vec::new();
        let err = collect_deltas(deltas, &CancellationToken::new(), |d| chunks.push(d.to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, ConsumeError::Remote("boom".into()));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(chunks, vec!["half an answ"]);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let deltas = decode_frames(
            body(vec![
                "data: {\"text\":\"a\"}\n\n",
                "data: {not json\n\n",
                ": keep-alive\n\n",
                "data: {\"text\":\"b\"}\n\n",
            ]),
            None,
        );
        let text = collect_deltas(deltas, &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(text, "ab");
    }

    #[tokio::test]
    async fn test_transport_error_mid_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: {\"text\":\"a\"}\n\n")),
            Err(ConsumeError::Transport("connection reset".into())),
        ];
        let deltas = decode_frames(stream::iter(chunks), None);
        let err = collect_deltas(deltas, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, ConsumeError::Transport("connection reset".into()));
    }

    #[tokio::test]
    async fn test_cancellation_stops_a_silent_stream() {
        let deltas = decode_frames(stream::pending(), None);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = collect_deltas(deltas, &cancel, |_| {}).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_stall_timeout() {
        let limit = Duration::from_millis(20);
        let deltas = decode_frames(stream::pending(), Some(limit));
        let err = collect_deltas(deltas, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, ConsumeError::Stalled(limit));
    }

    struct FixedSource {
        chunks: Vec<&'static str>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionSource for FixedSource {
        async fn open(
            &self,
            prompt: &str,
            _cancel: &CancellationToken,
        ) -> Result<DeltaStream, ConsumeError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(decode_frames(body(self.chunks.clone()), None))
        }
    }

    #[tokio::test]
    async fn test_consume_uses_source() {
        let source = FixedSource {
            chunks: vec!["data: {\"text\":\"ok\"}\n\ndata: [DONE]\n\n"],
            prompts: Mutex::new(Vec::new()),
        };
        let text = consume(&source, "prompt", &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(*source.prompts.lock().unwrap(), vec!["prompt".to_string()]);
    }

    #[tokio::test]
    async fn test_consume_with_fired_token_never_opens() {
        let source = FixedSource {
            chunks: vec![],
            prompts: Mutex::new(Vec::new()),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = consume(&source, "prompt", &cancel, |_| {}).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(source.prompts.lock().unwrap().is_empty());
    }
}
