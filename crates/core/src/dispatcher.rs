//! Command Dispatcher
//!
//! Owns the single live session slot. Every dispatch cancels the session it
//! replaces before installing its own, and every notification a session sends
//! to the [`DispatchSink`] is checked against the slot under the same lock, so a
//! superseded session can never be heard from once its successor was dispatched.

use crate::{
    command::{
        Command, CommandCatalog, FALLBACK_STATUS, STOP_ACTION, STOP_STATUS, SUCCESS_STATUS,
    },
    consumer::{CompletionSource, ConsumeError, consume},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

/// Receiver of the dispatcher's push notifications (output panel, activity
/// log, clipboard, audio cues). Calls are made while the session slot is
/// locked, so implementations must not call back into the dispatcher.
#[cfg_attr(test, mockall::automock)]
pub trait DispatchSink: Send + Sync {
    /// Replaces the status line.
    fn status(&self, text: &str);
    /// Appends streamed text to the output.
    fn chunk(&self, text: &str);
    /// Delivers the final artifact; `is_fallback` marks a cached substitute.
    fn completed(&self, text: &str, is_fallback: bool);
    /// Reports a failure that was recovered from.
    fn error(&self, text: &str);
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// How a session settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(String),
    Fallback(String),
    Cancelled,
}

/// Handle to a spawned session. Dropping it detaches the session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    action: String,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub async fn outcome(self) -> Result<SessionOutcome, JoinError> {
        self.task.await
    }
}

#[derive(Debug)]
pub enum Dispatched {
    Started(SessionHandle),
    /// The stop action ran; carries the id of the session it cancelled, if any.
    Stopped { cancelled: Option<Uuid> },
}

struct LiveSession {
    id: Uuid,
    action: String,
    cancel: CancellationToken,
}

struct Inner {
    catalog: CommandCatalog,
    source: Arc<dyn CompletionSource>,
    sink: Arc<dyn DispatchSink>,
    live: Mutex<Option<LiveSession>>,
}

impl Inner {
    fn lock_live(&self) -> MutexGuard<'_, Option<LiveSession>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(slot: &Option<LiveSession>, id: Uuid) -> bool {
        slot.as_ref()
            .is_some_and(|s| s.id == id && !s.cancel.is_cancelled())
    }

    /// Runs `f` only if session `id` still owns the slot.
    fn emit_if_live(&self, id: Uuid, f: impl FnOnce(&dyn DispatchSink)) -> bool {
        let slot = self.lock_live();
        if !Self::is_live(&slot, id) {
            return false;
        }
        f(self.sink.as_ref());
        true
    }

    /// Like [`Inner::emit_if_live`], and also releases the slot.
    fn settle(&self, id: Uuid, f: impl FnOnce(&dyn DispatchSink)) -> bool {
        let mut slot = self.lock_live();
        if !Self::is_live(&slot, id) {
            return false;
        }
        f(self.sink.as_ref());
        *slot = None;
        true
    }
}

/// Maps actions to streamed completions, one at a time.
///
/// Constructed once and cloned as a cheap handle by every entry point that
/// dispatches. Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<Inner>,
}

impl CommandDispatcher {
    pub fn new(
        catalog: CommandCatalog,
        source: Arc<dyn CompletionSource>,
        sink: Arc<dyn DispatchSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                source,
                sink,
                live: Mutex::new(None),
            }),
        }
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.inner.catalog
    }

    /// Id and action of the live session, if any.
    pub fn live_session(&self) -> Option<(Uuid, String)> {
        self.inner
            .lock_live()
            .as_ref()
            .filter(|s| !s.cancel.is_cancelled())
            .map(|s| (s.id, s.action.clone()))
    }

    /// Starts `action` with `context` substituted into its prompt, cancelling
    /// whatever session is live. Returns as soon as the new session owns the
    /// slot; the stream itself runs on a spawned task.
    pub fn dispatch(&self, action: &str, context: &str) -> Result<Dispatched, DispatchError> {
        if action == STOP_ACTION {
            return Ok(Dispatched::Stopped {
                cancelled: self.stop(),
            });
        }

        let Some(command) = self.inner.catalog.get(action).cloned() else {
            warn!(action, "Unknown command");
            let err = DispatchError::UnknownCommand(action.to_string());
            self.inner.sink.status(&err.to_string());
            return Err(err);
        };

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let prompt = command.render_prompt(context);
        {
            let mut slot = self.inner.lock_live();
            if let Some(previous) = slot.take() {
                info!(session_id = %previous.id, action = %previous.action, "Superseding live session");
                previous.cancel.cancel();
            }
            *slot = Some(LiveSession {
                id,
                action: command.action.clone(),
                cancel: cancel.clone(),
            });
            self.inner.sink.status(&command.status_message);
        }

        let action = command.action.clone();
        let span = info_span!("dispatch_session", session_id = %id, %action);
        let task = tokio::spawn(
            run_session(self.inner.clone(), id, command, prompt, cancel).instrument(span),
        );

        Ok(Dispatched::Started(SessionHandle { id, action, task }))
    }

    /// Cancels the live session without starting another. Returns the id of
    /// the cancelled session.
    pub fn stop(&self) -> Option<Uuid> {
        let mut slot = self.inner.lock_live();
        let previous = slot.take();
        if let Some(session) = &previous {
            info!(session_id = %session.id, action = %session.action, "Stopping live session");
            session.cancel.cancel();
        }
        self.inner.sink.status(STOP_STATUS);
        previous.map(|s| s.id)
    }
}

async fn run_session(
    inner: Arc<Inner>,
    id: Uuid,
    command: Command,
    prompt: String,
    cancel: CancellationToken,
) -> SessionOutcome {
    info!("Session started");
    let emitter = inner.clone();
    let result = consume(inner.source.as_ref(), &prompt, &cancel, move |delta| {
        emitter.emit_if_live(id, |sink| sink.chunk(delta));
    })
    .await;

    // A failure that races our own cancellation still counts as cancelled.
    if cancel.is_cancelled() {
        info!("Session cancelled");
        return SessionOutcome::Cancelled;
    }

    match result {
        Ok(text) => {
            let settled = inner.settle(id, |sink| {
                sink.status(SUCCESS_STATUS);
                sink.completed(&text, false);
            });
            if !settled {
                return SessionOutcome::Cancelled;
            }
            info!(chars = text.chars().count(), "Session completed");
            SessionOutcome::Completed(text)
        }
        Err(ConsumeError::Cancelled) => {
            info!("Session cancelled");
            SessionOutcome::Cancelled
        }
        Err(e) => {
            warn!(error = %e, "Stream failed; substituting cached result");
            let fallback = command.fallback_artifact;
            let settled = inner.settle(id, |sink| {
                sink.error(&e.to_string());
                sink.status(FALLBACK_STATUS);
                sink.chunk(&fallback);
                sink.completed(&fallback, true);
            });
            if !settled {
                return SessionOutcome::Cancelled;
            }
            SessionOutcome::Fallback(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, ScriptedSource, SinkEvent, wait_for};
    use std::time::Duration;

    fn dispatcher(source: &Arc<ScriptedSource>, sink: &Arc<RecordingSink>) -> CommandDispatcher {
        CommandDispatcher::new(CommandCatalog::default(), source.clone(), sink.clone())
    }

    fn started(dispatched: Result<Dispatched, DispatchError>) -> SessionHandle {
        match dispatched {
            Ok(Dispatched::Started(handle)) => handle,
            other => panic!("expected a started session, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_successful_session() {
        let source = Arc::new(ScriptedSource::default());
        let tx = source.push_stream();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&source, &sink);

        let handle = started(dispatcher.dispatch("explain", "print(1)"));
        assert_eq!(dispatcher.live_session().map(|s| s.0), Some(handle.id()));
        tx.send(Ok("He".into())).unwrap();
        tx.send(Ok("llo".into())).unwrap();
        drop(tx);

        assert_eq!(
            handle.outcome().await.unwrap(),
            SessionOutcome::Completed("Hello".into())
        );
        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::Status("▶ Explaining selected code...".into()),
                SinkEvent::Chunk("He".into()),
                SinkEvent::Chunk("llo".into()),
                SinkEvent::Status(SUCCESS_STATUS.into()),
                SinkEvent::Completed("Hello".into(), false),
            ]
        );
        let prompts = source.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("Explain what this code does"));
        assert!(prompts[0].ends_with("print(1)"));
        assert!(dispatcher.live_session().is_none());
    }

    #[tokio::test]
    async fn test_new_dispatch_supersedes_live_session() {
        let source = Arc::new(ScriptedSource::default());
        let tx_a = source.push_stream();
        let tx_b = source.push_stream();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&source, &sink);

        let a = started(dispatcher.dispatch("fix", "code"));
        tx_a.send(Ok("a1".into())).unwrap();
        wait_for(|| sink.events().contains(&SinkEvent::Chunk("a1".into()))).await;

        let b = started(dispatcher.dispatch("test", "code"));
        let after_b = sink.events().len();
        assert_eq!(dispatcher.live_session().map(|s| s.0), Some(b.id()));

        // Anything A still produces is dropped on the floor.
        let _ = tx_a.send(Ok("a2".into()));
        let _ = tx_a.send(Err(ConsumeError::Transport("late failure".into())));
        tx_b.send(Ok("b1".into())).unwrap();
        drop(tx_b);

        assert_eq!(a.outcome().await.unwrap(), SessionOutcome::Cancelled);
        assert_eq!(
            b.outcome().await.unwrap(),
            SessionOutcome::Completed("b1".into())
        );

        let events = sink.events();
        assert_eq!(events[after_b - 1], SinkEvent::Status("▶ Scaffolding test file...".into()));
        let tail = &events[after_b..];
        assert_eq!(
            tail,
            &[
                SinkEvent::Chunk("b1".into()),
                SinkEvent::Status(SUCCESS_STATUS.into()),
                SinkEvent::Completed("b1".into(), false),
            ]
        );
        assert!(!events.contains(&SinkEvent::Chunk("a2".into())));
        assert!(!events.iter().any(|e| matches!(e, SinkEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_stop_cancels_without_new_session() {
        let source = Arc::new(ScriptedSource::default());
        let tx = source.push_stream();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&source, &sink);

        let handle = started(dispatcher.dispatch("commit", "diff"));
        let id = handle.id();
        tx.send(Ok("fix: ".into())).unwrap();
        wait_for(|| sink.events().len() == 2).await;

        match dispatcher.dispatch(STOP_ACTION, "") {
            Ok(Dispatched::Stopped { cancelled }) => assert_eq!(cancelled, Some(id)),
            other => panic!("expected stop, got {:?}", other),
        }
        assert!(dispatcher.live_session().is_none());
        assert_eq!(handle.outcome().await.unwrap(), SessionOutcome::Cancelled);

        assert_eq!(sink.events().last(), Some(&SinkEvent::Status(STOP_STATUS.into())));
        assert_eq!(source.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_with_nothing_live() {
        let source = Arc::new(ScriptedSource::default());
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&source, &sink);

        assert_eq!(dispatcher.stop(), None);
        assert_eq!(sink.events(), vec![SinkEvent::Status(STOP_STATUS.into())]);
    }

    #[tokio::test]
    async fn test_stream_failure_substitutes_fallback() {
        let source = Arc::new(ScriptedSource::default());
        let tx = source.push_stream();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&source, &sink);
        let fallback = dispatcher.catalog().get("fix").unwrap().fallback_artifact.clone();

        let handle = started(dispatcher.dispatch("fix", "code"));
        tx.send(Ok("partial".into())).unwrap();
        tx.send(Err(ConsumeError::Transport("connection reset".into())))
            .unwrap();

        assert_eq!(
            handle.outcome().await.unwrap(),
            SessionOutcome::Fallback(fallback.clone())
        );
        let events = sink.events();
        assert_eq!(
            &events[2..],
            &[
                SinkEvent::Error("transport error: connection reset".into()),
                SinkEvent::Status(FALLBACK_STATUS.into()),
                SinkEvent::Chunk(fallback.clone()),
                SinkEvent::Completed(fallback, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_request_substitutes_fallback() {
        let source = Arc::new(ScriptedSource::default());
        source.push_failure(ConsumeError::Http {
            status: 502,
            message: "Upstream 503: overloaded".into(),
        });
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&source, &sink);

        let handle = started(dispatcher.dispatch("explain", "code"));
        let outcome = handle.outcome().await.unwrap();
        assert!(matches!(outcome, SessionOutcome::Fallback(_)));
        assert!(sink
            .events()
            .contains(&SinkEvent::Error("Upstream 503: overloaded".into())));
        let completions: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, SinkEvent::Completed(_, true)))
            .collect();
        assert_eq!(completions.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_pending_failure() {
        let source = Arc::new(ScriptedSource::default());
        let tx = source.push_stream();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&source, &sink);

        let handle = started(dispatcher.dispatch("test", "code"));
        tx.send(Ok("def test_".into())).unwrap();
        wait_for(|| sink.events().len() == 2).await;

        dispatcher.stop();
        let _ = tx.send(Err(ConsumeError::Transport("network down".into())));

        assert_eq!(handle.outcome().await.unwrap(), SessionOutcome::Cancelled);
        let events = sink.events();
        assert!(!events.iter().any(|e| matches!(
            e,
            SinkEvent::Error(_) | SinkEvent::Completed(_, _)
        )));
        assert_eq!(events.last(), Some(&SinkEvent::Status(STOP_STATUS.into())));
    }

    #[tokio::test]
    async fn test_rapid_redispatch_keeps_one_live_session() {
        let source = Arc::new(ScriptedSource::default());
        let senders: Vec<_> = (0..5).map(|_| source.push_stream()).collect();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&source, &sink);

        let handles: Vec<_> = ["fix", "explain", "commit", "test", "fix"]
            .iter()
            .map(|action| started(dispatcher.dispatch(action, "code")))
            .collect();
        let last_id = handles.last().unwrap().id();
        assert_eq!(dispatcher.live_session().map(|s| s.0), Some(last_id));

        for tx in &senders {
            let _ = tx.send(Ok("x".into()));
        }
        drop(senders);

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.outcome().await.unwrap());
        }
        assert_eq!(outcomes[..4], vec![SessionOutcome::Cancelled; 4][..]);
        assert_eq!(outcomes[4], SessionOutcome::Completed("x".into()));
    }

    #[test]
    fn test_unknown_command_is_reported_once() {
        let mut sink = MockDispatchSink::new();
        sink.expect_status()
            .withf(|text| text.to_string() == "Unknown command: deploy")
            .times(1)
            .return_const(());
        sink.expect_chunk().never();
        sink.expect_completed().never();
        sink.expect_error().never();

        let source = Arc::new(ScriptedSource::default());
        let dispatcher =
            CommandDispatcher::new(CommandCatalog::default(), source.clone(), Arc::new(sink));

        let err = dispatcher.dispatch("deploy", "code").unwrap_err();
        assert_eq!(err, DispatchError::UnknownCommand("deploy".into()));
        assert!(dispatcher.live_session().is_none());
        assert!(source.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_leaves_live_session_running() {
        let source = Arc::new(ScriptedSource::default());
        let tx = source.push_stream();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&source, &sink);

        let handle = started(dispatcher.dispatch("fix", "code"));
        assert!(dispatcher.dispatch("nope", "code").is_err());
        tx.send(Ok("done".into())).unwrap();
        drop(tx);

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle.outcome())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Completed("done".into()));
    }
}
