//! Frame-by-frame glue between the classifier, the hold tracker and the
//! dispatcher.

use crate::{
    classifier::{Gesture, classify},
    command::{FALLBACK_CONTEXT, GestureAction},
    dispatcher::{CommandDispatcher, Dispatched},
    hold::HoldConfirmTracker,
    landmark::LandmarkSet,
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Supplies the text substituted into a command's prompt, typically the
/// clipboard or the active editor selection.
pub trait ContextSource: Send + Sync {
    fn read_context(&self) -> Option<String>;
}

impl<F> ContextSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn read_context(&self) -> Option<String> {
        self()
    }
}

/// What happened on one frame.
#[derive(Debug)]
pub struct FrameReport {
    pub gesture: Option<Gesture>,
    pub progress: f32,
    pub fired: Option<Gesture>,
    pub dispatched: Option<Dispatched>,
}

pub struct GesturePipeline<C> {
    tracker: HoldConfirmTracker,
    dispatcher: CommandDispatcher,
    context: C,
}

impl<C: ContextSource> GesturePipeline<C> {
    pub fn new(dispatcher: CommandDispatcher, context: C, hold: Duration, now: Instant) -> Self {
        Self {
            tracker: HoldConfirmTracker::new(hold, now),
            dispatcher,
            context,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn tracker(&self) -> &HoldConfirmTracker {
        &self.tracker
    }

    /// Classifies one frame and dispatches when a hold is confirmed. A frame
    /// without a detected hand counts as an interruption.
    pub fn process_frame(&mut self, landmarks: Option<&LandmarkSet>, now: Instant) -> FrameReport {
        let gesture = landmarks.and_then(classify);
        let update = self.tracker.update(gesture, now);
        let dispatched = update.fired.and_then(|g| self.fire(g));
        FrameReport {
            gesture,
            progress: update.progress,
            fired: update.fired,
            dispatched,
        }
    }

    fn fire(&self, gesture: Gesture) -> Option<Dispatched> {
        let action = match self.dispatcher.catalog().for_gesture(gesture) {
            Some(GestureAction::Stop) => {
                info!(%gesture, "Stop gesture confirmed");
                let cancelled = self.dispatcher.stop();
                return Some(Dispatched::Stopped { cancelled });
            }
            Some(GestureAction::Run(cmd)) => cmd.action.clone(),
            None => {
                warn!(%gesture, "No command bound to gesture");
                return None;
            }
        };

        let context = self
            .context
            .read_context()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_CONTEXT.to_string());

        info!(%gesture, %action, "Gesture confirmed");
        match self.dispatcher.dispatch(&action, &context) {
            Ok(dispatched) => Some(dispatched),
            Err(e) => {
                warn!(error = %e, "Dispatch rejected");
                None
            }
        }
    }
}
