//! Newline-delimited JSON frame input.
//!
//! Each line is one detector frame:
//! `{"timestamp_ms": 1234, "landmarks": [[x, y, z], ...]}`. A frame with
//! `"landmarks": null` (or no landmarks key) means no hand was detected.

use crate::sink::ConsoleSink;
use anyhow::Result;
use gesture_core::{
    ContextSource, Dispatched, GesturePipeline, LandmarkSet, SessionHandle, SessionOutcome,
};
use serde::Deserialize;
use std::io::Write;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct HandFrame {
    /// Capture time relative to the start of the feed. Frames without one are
    /// stamped on arrival.
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    #[serde(default)]
    pub landmarks: Option<LandmarkSet>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub frames: usize,
    pub skipped: usize,
    pub fired: usize,
    /// Highest hold progress seen on any frame, from 0 to 1.
    pub peak_progress: f32,
    /// Outcome of the last session started, awaited at end of input.
    pub last_outcome: Option<SessionOutcome>,
}

/// Feeds every frame read from `reader` through the pipeline until EOF, then
/// waits for whichever session is still streaming.
pub async fn run_frames<R, C, W>(
    reader: R,
    pipeline: &mut GesturePipeline<C>,
    console: &ConsoleSink<W>,
    base: Instant,
) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    C: ContextSource,
    W: Write + Send,
{
    let mut summary = RunSummary::default();
    let mut last_session: Option<SessionHandle> = None;
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let frame: HandFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Skipping malformed frame");
                summary.skipped += 1;
                continue;
            }
        };
        summary.frames += 1;

        let now = frame
            .timestamp_ms
            .map(|ms| base + Duration::from_millis(ms))
            .unwrap_or_else(Instant::now);
        let report = pipeline.process_frame(frame.landmarks.as_ref(), now);
        if let (Some(gesture), None) = (report.gesture, report.fired) {
            debug!(%gesture, progress = report.progress, "Holding");
        }
        summary.peak_progress = summary.peak_progress.max(report.progress);

        let Some(gesture) = report.fired else {
            continue;
        };
        summary.fired += 1;
        match report.dispatched {
            Some(Dispatched::Started(handle)) => {
                console.activity(&format!("✋ {} → {}", gesture, handle.action()));
                last_session = Some(handle);
            }
            Some(Dispatched::Stopped { cancelled }) => {
                console.activity(&format!("✋ {} → stop", gesture));
                debug!(?cancelled, "Stop gesture handled");
                last_session = None;
            }
            None => console.activity(&format!("✋ {} (no command)", gesture)),
        }
    }

    if let Some(handle) = last_session {
        info!(session_id = %handle.id(), "Input ended; waiting for live session");
        summary.last_outcome = Some(handle.outcome().await?);
    }
    Ok(summary)
}
