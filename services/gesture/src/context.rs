use crate::clipboard::Clipboard;
use gesture_core::ContextSource;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Where prompt context comes from: a file when one is configured, otherwise
/// the clipboard.
pub enum PromptContext {
    File(FileContext),
    Clipboard(Arc<dyn Clipboard>),
}

impl PromptContext {
    pub fn new(path: Option<PathBuf>, clipboard: Option<Arc<dyn Clipboard>>) -> Self {
        match (path, clipboard) {
            (None, Some(clipboard)) => Self::Clipboard(clipboard),
            (path, _) => Self::File(FileContext::new(path)),
        }
    }
}

impl ContextSource for PromptContext {
    fn read_context(&self) -> Option<String> {
        match self {
            Self::File(file) => file.read_context(),
            Self::Clipboard(clipboard) => match clipboard.paste() {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(error = %e, "Could not read clipboard");
                    None
                }
            },
        }
    }
}

/// Reads the prompt context from a file on every fire, so edits between
/// gestures are picked up. With no path configured there is never any context.
#[derive(Debug, Clone, Default)]
pub struct FileContext {
    path: Option<PathBuf>,
}

impl FileContext {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ContextSource for FileContext {
    fn read_context(&self) -> Option<String> {
        let path = self.path.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read context file");
                None
            }
        }
    }
}
