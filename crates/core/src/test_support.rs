//! Scripted collaborators shared by the dispatcher and pipeline tests.

use crate::{
    consumer::{CompletionSource, ConsumeError, DeltaStream},
    dispatcher::DispatchSink,
};
use async_trait::async_trait;
use std::{collections::VecDeque, sync::Mutex, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) type DeltaSender = mpsc::UnboundedSender<Result<String, ConsumeError>>;

enum Script {
    Stream(mpsc::UnboundedReceiver<Result<String, ConsumeError>>),
    Fail(ConsumeError),
}

/// Hands out pre-arranged streams in `open` order.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedSource {
    /// Queues a stream driven by the returned sender. Dropping the sender
    /// ends the stream.
    pub(crate) fn push_stream(&self) -> DeltaSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push_back(Script::Stream(rx));
        tx
    }

    pub(crate) fn push_failure(&self, err: ConsumeError) {
        self.scripts.lock().unwrap().push_back(Script::Fail(err));
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    async fn open(
        &self,
        prompt: &str,
        _cancel: &CancellationToken,
    ) -> Result<DeltaStream, ConsumeError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Stream(rx)) => Ok(Box::pin(futures::stream::unfold(
                rx,
                |mut rx| async move { rx.recv().await.map(|item| (item, rx)) },
            ))),
            Some(Script::Fail(err)) => Err(err),
            None => Err(ConsumeError::Transport("no scripted stream".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkEvent {
    Status(String),
    Chunk(String),
    Completed(String, bool),
    Error(String),
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl DispatchSink for RecordingSink {
    fn status(&self, text: &str) {
        self.record(SinkEvent::Status(text.to_string()));
    }

    fn chunk(&self, text: &str) {
        self.record(SinkEvent::Chunk(text.to_string()));
    }

    fn completed(&self, text: &str, is_fallback: bool) {
        self.record(SinkEvent::Completed(text.to_string(), is_fallback));
    }

    fn error(&self, text: &str) {
        self.record(SinkEvent::Error(text.to_string()));
    }
}

/// Polls `cond` until it holds, panicking after a second.
pub(crate) async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
