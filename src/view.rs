//! Immutable snapshot handed to the renderer.
//!
//! The supervisor copies everything the renderer needs out of the process
//! handles, so drawing never happens while a handle is locked.

use crate::process::ProcessStatus;

/// Status bar text in navigation mode.
pub const NAVIGATION_HELP: &str = "i: Interact | ↑/↓: Select command | r: Rerun | q: Quit";
/// Status bar text in interactive mode.
pub const INTERACTIVE_HELP: &str = "↑/↓: Scroll logs | Ctrl+Z: Exit interactive mode";

/// Sidebar indicator for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusGlyph {
    Running,
    Success,
    Failure,
    Unknown,
}

impl StatusGlyph {
    pub fn from_status(status: &ProcessStatus) -> Self {
        if status.is_running() {
            StatusGlyph::Running
        } else if status.succeeded() {
            StatusGlyph::Success
        } else if status.failed() {
            StatusGlyph::Failure
        } else {
            StatusGlyph::Unknown
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            StatusGlyph::Running => "▶",
            StatusGlyph::Success => "✓",
            StatusGlyph::Failure => "✗",
            StatusGlyph::Unknown => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarEntry {
    pub name: String,
    pub glyph: StatusGlyph,
    pub selected: bool,
}

/// Everything needed to draw one frame.
#[derive(Debug, Clone, Default)]
pub struct DashboardView {
    /// False until the terminal size is known.
    pub ready: bool,
    pub sidebar: Vec<SidebarEntry>,
    /// Visible window of the selected process's output.
    pub output: Vec<String>,
    pub selected_name: Option<String>,
    pub interactive: bool,
    pub status_bar: &'static str,
    /// When set, drawn full-screen in place of the normal layout.
    pub final_report: Option<String>,
}
