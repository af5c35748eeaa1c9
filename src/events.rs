//! Event definitions for the dashboard control loop.
//!
//! Every state transition the supervisor performs is driven by one of these
//! events, delivered through a single bounded channel.

use crossterm::event::{KeyEvent, MouseEvent};

use crate::process::ProcessHandle;

/// Represents an event in the supervisor's control loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// A mouse event received from the user.
    Mouse(MouseEvent),
    /// The terminal window was resized.
    Resize { width: u16, height: u16 },
    /// A process exited (or could not be spawned).
    ///
    /// `output` and `exit_code` are captured at the moment the exit was
    /// recorded; the handle itself may have been rerun since.
    ProcessFinished {
        name: String,
        exit_code: i32,
        output: Vec<String>,
        handle: ProcessHandle,
    },
    /// The supervisor received SIGINT or SIGTERM.
    Shutdown,
}
