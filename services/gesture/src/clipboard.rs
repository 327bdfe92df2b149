//! System clipboard access through the desktop's command-line tools
//! (`xclip` on X11, `wl-copy`/`wl-paste` on Wayland).

use anyhow::{Context, Result, bail};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::info;

/// Where finished artifacts are copied and prompt context is read from.
pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> Result<()>;
    fn paste(&self) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardBackend {
    X11,
    Wayland,
}

impl ClipboardBackend {
    /// Picks the backend for the current session, if there is a display.
    pub fn detect() -> Option<Self> {
        let wayland = std::env::var("WAYLAND_DISPLAY").is_ok()
            || std::env::var("XDG_SESSION_TYPE").is_ok_and(|s| s == "wayland");
        if wayland {
            Some(Self::Wayland)
        } else if std::env::var("DISPLAY").is_ok() {
            Some(Self::X11)
        } else {
            None
        }
    }

    fn copy_command(self) -> Command {
        match self {
            Self::X11 => {
                let mut cmd = Command::new("xclip");
                cmd.args(["-selection", "clipboard"]);
                cmd
            }
            Self::Wayland => Command::new("wl-copy"),
        }
    }

    fn paste_command(self) -> Command {
        match self {
            Self::X11 => {
                let mut cmd = Command::new("xclip");
                cmd.args(["-selection", "clipboard", "-o"]);
                cmd
            }
            Self::Wayland => {
                let mut cmd = Command::new("wl-paste");
                cmd.arg("--no-newline");
                cmd
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClipboard {
    backend: ClipboardBackend,
}

impl SystemClipboard {
    pub fn new(backend: ClipboardBackend) -> Self {
        Self { backend }
    }

    pub fn detect() -> Option<Self> {
        let backend = ClipboardBackend::detect()?;
        info!(?backend, "Using system clipboard");
        Some(Self::new(backend))
    }
}

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> Result<()> {
        let mut child = self
            .backend
            .copy_command()
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start {:?} clipboard tool", self.backend))?;

        // Closing stdin signals end of input to the tool.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }
        let status = child.wait()?;
        if !status.success() {
            bail!("clipboard copy exited with {}", status);
        }
        Ok(())
    }

    fn paste(&self) -> Result<String> {
        let output = self
            .backend
            .paste_command()
            .output()
            .with_context(|| format!("failed to start {:?} clipboard tool", self.backend))?;
        if !output.status.success() {
            bail!("clipboard paste exited with {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
