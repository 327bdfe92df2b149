//! Terminal rendering of dispatcher notifications.
//!
//! Streamed text is written as it arrives. Everything else is an activity line
//! prefixed with the local time. Finished artifacts are copied to the
//! clipboard when one is attached.

use crate::clipboard::Clipboard;
use gesture_core::DispatchSink;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

struct Output<W> {
    writer: W,
    mid_line: bool,
}

pub struct ConsoleSink<W: Write + Send> {
    out: Mutex<Output<W>>,
    clipboard: Option<Arc<dyn Clipboard>>,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: Mutex::new(Output {
                writer,
                mid_line: false,
            }),
            clipboard: None,
        }
    }

    pub fn with_clipboard(mut self, clipboard: Option<Arc<dyn Clipboard>>) -> Self {
        self.clipboard = clipboard;
        self
    }

    /// Copies `text`, returning whether it landed on the clipboard.
    fn copy_to_clipboard(&self, text: &str) -> bool {
        let Some(clipboard) = &self.clipboard else {
            return false;
        };
        match clipboard.copy(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Clipboard copy failed");
                self.activity(&format!("✗ Clipboard copy failed: {}", e));
                false
            }
        }
    }

    /// Prints one timestamped activity line.
    pub fn activity(&self, line: &str) {
        self.with_output(|out| {
            if out.mid_line {
                writeln!(out.writer)?;
                out.mid_line = false;
            }
            let ts = chrono::Local::now().format("%H:%M:%S");
            writeln!(out.writer, "[{}] {}", ts, line)
        });
    }

    fn with_output(&self, f: impl FnOnce(&mut Output<W>) -> std::io::Result<()>) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // Write failures are logged and otherwise ignored.
        if let Err(e) = f(&mut out).and_then(|_| out.writer.flush()) {
            tracing::debug!(error = %e, "Console write failed");
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .writer
    }
}

impl<W: Write + Send> DispatchSink for ConsoleSink<W> {
    fn status(&self, text: &str) {
        self.activity(text);
    }

    fn chunk(&self, text: &str) {
        self.with_output(|out| {
            out.writer.write_all(text.as_bytes())?;
            out.mid_line = !text.ends_with('\n');
            Ok(())
        });
    }

    fn completed(&self, text: &str, is_fallback: bool) {
        let source = if is_fallback { "cached" } else { "streamed" };
        let copied = self.copy_to_clipboard(text);
        self.activity(&format!(
            "Result ready ({} chars, {}{})",
            text.chars().count(),
            source,
            if copied { "" } else { ", not copied" }
        ));
    }

    fn error(&self, text: &str) {
        self.activity(&format!("✗ {}", text));
    }
}
