//! Gesture-driven command dispatch.
//!
//! Hand landmarks go through [`classifier`] and [`hold`] to become confirmed
//! gestures, which [`dispatcher`] turns into streamed completions consumed over
//! the simplified SSE [`protocol`].

pub mod classifier;
pub mod command;
pub mod consumer;
pub mod dispatcher;
pub mod hold;
pub mod landmark;
pub mod pipeline;
pub mod protocol;

#[cfg(test)]
pub(crate) mod test_support;

pub use classifier::{Gesture, classify};
pub use command::{Command, CommandCatalog, GestureAction};
pub use consumer::{CompletionSource, ConsumeError, StreamConsumer, consume};
pub use dispatcher::{
    CommandDispatcher, DispatchError, DispatchSink, Dispatched, SessionHandle, SessionOutcome,
};
pub use hold::{DEFAULT_HOLD_THRESHOLD, HoldConfirmTracker};
pub use landmark::{Landmark, LandmarkSet};
pub use pipeline::{ContextSource, FrameReport, GesturePipeline};
pub use protocol::StreamFrame;
