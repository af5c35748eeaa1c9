//! Dashboard state and the supervisor's control logic.
//!
//! `Supervisor` owns every `ProcessHandle` together with the dashboard state
//! (ordering, selection, interactive mode). It is driven exclusively by the
//! single control loop in `main`, so the dashboard state itself needs no lock;
//! anything read from a handle goes through that handle's own lock.

use std::cmp::Ordering;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEvent, MouseEventKind};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::events::Event;
use crate::process::{ProcessHandle, ProcessSpec, ProcessStatus};
use crate::view::{DashboardView, SidebarEntry, StatusGlyph, INTERACTIVE_HELP, NAVIGATION_HELP};

// Rows taken by the output border and the status bar.
const CHROME_HEIGHT: u16 = 3;
const MOUSE_SCROLL_LINES: isize = 3;

/// State owned by the control loop.
#[derive(Debug, Default)]
pub struct DashboardState {
    /// Display order as indices into the supervisor's handles.
    pub ordered: Vec<usize>,
    /// Position of the selection within `ordered`.
    pub selected: usize,
    /// Whether keystrokes are forwarded to the selected process.
    pub interactive: bool,
    /// Height of the output viewport.
    pub content_height: usize,
    pub ready: bool,
    pub quit_requested: bool,
    pub final_report: Option<String>,
}

/// Owns the supervised processes and applies every dashboard transition.
#[derive(Debug)]
pub struct Supervisor {
    handles: Vec<ProcessHandle>,
    exit_on_completion: bool,
    state: DashboardState,
}

impl Supervisor {
    /// Creates a handle for each spec; completions are posted on `event_tx`.
    pub fn new(
        specs: Vec<ProcessSpec>,
        exit_on_completion: bool,
        event_tx: mpsc::Sender<Event>,
    ) -> Self {
        let handles: Vec<ProcessHandle> = specs
            .into_iter()
            .map(|spec| ProcessHandle::new(spec, event_tx.clone()))
            .collect();
        let state = DashboardState {
            ordered: (0..handles.len()).collect(),
            ..DashboardState::default()
        };
        Self {
            handles,
            exit_on_completion,
            state,
        }
    }

    /// Launches every process.
    pub async fn start_all(&self) {
        for handle in &self.handles {
            handle.start().await;
        }
    }

    pub fn handles(&self) -> &[ProcessHandle] {
        &self.handles
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn quit_requested(&self) -> bool {
        self.state.quit_requested
    }

    pub fn final_report(&self) -> Option<&str> {
        self.state.final_report.as_deref()
    }

    pub fn selected_handle(&self) -> Option<&ProcessHandle> {
        self.state
            .ordered
            .get(self.state.selected)
            .and_then(|&idx| self.handles.get(idx))
    }

    /// Applies one event from the control loop's queue.
    pub async fn handle_event(&mut self, event: Event) {
        self.reorder().await;
        match event {
            Event::Key(key) => self.handle_key(key).await,
            Event::Mouse(mouse) => self.handle_mouse(mouse).await,
            Event::Resize { width, height } => self.resize(width, height),
            Event::ProcessFinished {
                name,
                exit_code,
                output,
                handle,
            } => self.on_process_finished(name, exit_code, output, handle).await,
            Event::Shutdown => {
                debug!("shutdown signal received");
                self.state.quit_requested = true;
            }
        }
    }

    /// Recomputes the display order: running first, then failed finished
    /// processes, then by name. The selection follows the selected process.
    pub async fn reorder(&mut self) {
        let mut statuses = Vec::with_capacity(self.handles.len());
        for handle in &self.handles {
            statuses.push(handle.status().await);
        }

        let previous = self.state.ordered.get(self.state.selected).copied();
        let mut ordered: Vec<usize> = (0..self.handles.len()).collect();
        ordered.sort_by(|&a, &b| {
            display_order(
                (&statuses[a], self.handles[a].name()),
                (&statuses[b], self.handles[b].name()),
            )
        });

        self.state.selected = previous
            .and_then(|prev| ordered.iter().position(|&idx| idx == prev))
            .unwrap_or(0);
        self.state.ordered = ordered;
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        debug!(width, height, "resized");
        self.state.content_height = height.saturating_sub(CHROME_HEIGHT) as usize;
        self.state.ready = true;
    }

    /// Copies out everything the renderer needs for one frame.
    pub async fn view(&self) -> DashboardView {
        if self.state.quit_requested {
            if let Some(report) = self.state.final_report.as_ref().filter(|r| !r.is_empty()) {
                return DashboardView {
                    ready: true,
                    final_report: Some(report.clone()),
                    ..DashboardView::default()
                };
            }
        }

        let mut sidebar = Vec::with_capacity(self.state.ordered.len());
        for (position, &idx) in self.state.ordered.iter().enumerate() {
            let handle = &self.handles[idx];
            let status = handle.status().await;
            sidebar.push(SidebarEntry {
                name: handle.name().to_string(),
                glyph: StatusGlyph::from_status(&status),
                selected: position == self.state.selected,
            });
        }

        let (output, selected_name) = match self.selected_handle() {
            Some(handle) => (
                handle.visible_lines(self.state.content_height).await,
                Some(handle.name().to_string()),
            ),
            None => (Vec::new(), None),
        };

        DashboardView {
            ready: self.state.ready,
            sidebar,
            output,
            selected_name,
            interactive: self.state.interactive,
            status_bar: if self.state.interactive {
                INTERACTIVE_HELP
            } else {
                NAVIGATION_HELP
            },
            final_report: None,
        }
    }

    async fn handle_key(&mut self, key: KeyEvent) {
        if key.kind == KeyEventKind::Release {
            return;
        }
        if self.state.interactive {
            self.handle_interactive_key(key).await;
        } else {
            self.handle_navigation_key(key).await;
        }
    }

    async fn handle_navigation_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.state.quit_requested = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.state.quit_requested = true;
            }
            KeyCode::Up => {
                if self.state.selected > 0 {
                    self.state.selected -= 1;
                }
            }
            KeyCode::Down => {
                if self.state.selected + 1 < self.state.ordered.len() {
                    self.state.selected += 1;
                }
            }
            KeyCode::Char('i') => {
                if let Some(handle) = self.selected_handle() {
                    if handle.status().await.is_running() {
                        self.state.interactive = true;
                    }
                }
            }
            KeyCode::Char('r') => {
                if let Some(handle) = self.selected_handle() {
                    if handle.status().await.is_finished() && handle.rerun().await {
                        debug!(process = %handle.name(), "rerun requested");
                    }
                }
            }
            _ => {}
        }
    }

    async fn handle_interactive_key(&mut self, key: KeyEvent) {
        let height = self.state.content_height;
        match key.code {
            KeyCode::Char('z') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.state.interactive = false;
            }
            KeyCode::Up => {
                if let Some(handle) = self.selected_handle() {
                    handle.scroll(1, height).await;
                }
            }
            KeyCode::Down => {
                if let Some(handle) = self.selected_handle() {
                    handle.scroll(-1, height).await;
                }
            }
            _ => {
                if let (Some(handle), Some(bytes)) = (self.selected_handle(), key_bytes(&key)) {
                    handle.write_input(&bytes).await;
                }
            }
        }
    }

    async fn handle_mouse(&mut self, mouse: MouseEvent) {
        let delta = match mouse.kind {
            MouseEventKind::ScrollUp => MOUSE_SCROLL_LINES,
            MouseEventKind::ScrollDown => -MOUSE_SCROLL_LINES,
            _ => return,
        };
        if let Some(handle) = self.selected_handle() {
            handle.scroll(delta, self.state.content_height).await;
        }
    }

    // Evaluates the termination policy for a completed process. The exit code
    // comes from the event: the handle may already be running again.
    async fn on_process_finished(
        &mut self,
        name: String,
        exit_code: i32,
        output: Vec<String>,
        finished: ProcessHandle,
    ) {
        let should_exit = if exit_code != 0 {
            self.exit_on_completion
        } else {
            let mut critical_done = false;
            for handle in &self.handles {
                if !handle.spec().critical {
                    continue;
                }
                if handle.same_as(&finished) || handle.status().await.succeeded() {
                    critical_done = true;
                    break;
                }
            }
            critical_done
        };
        debug!(process = %name, exit_code, should_exit, "process finished");
        if !should_exit {
            return;
        }

        info!(process = %name, exit_code, "ending session");
        let mut report = format!("🚨 {} exited with code {} 🚨\n\n", name, exit_code);
        report.push_str(&output.join("\n"));
        for handle in &self.handles {
            if handle.same_as(&finished) {
                continue;
            }
            let lines = handle.output_snapshot().await;
            report.push_str(&format!("\n\n=== {} ===\n", handle.name()));
            report.push_str(&lines.join("\n"));
        }
        self.state.final_report = Some(report);
        self.state.quit_requested = true;
    }
}

// Running before everything else, failed before succeeded, then by name.
fn display_order(a: (&ProcessStatus, &str), b: (&ProcessStatus, &str)) -> Ordering {
    order_rank(a.0)
        .cmp(&order_rank(b.0))
        .then_with(|| a.1.cmp(b.1))
}

fn order_rank(status: &ProcessStatus) -> u8 {
    if status.is_running() {
        0
    } else if status.failed() {
        1
    } else {
        2
    }
}

/// Translates a key press into the bytes forwarded to a process.
fn key_bytes(key: &KeyEvent) -> Option<Vec<u8>> {
    match key.code {
        KeyCode::Enter => Some(b"\n".to_vec()),
        KeyCode::Backspace => Some(vec![0x08]),
        KeyCode::Tab => Some(b"\t".to_vec()),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            control_byte(c).map(|b| vec![b])
        }
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            Some(c.encode_utf8(&mut buf).as_bytes().to_vec())
        }
        _ => None,
    }
}

fn control_byte(c: char) -> Option<u8> {
    if !c.is_ascii_alphabetic() {
        return None;
    }
    let upper = c.to_ascii_uppercase() as u8;
    Some(upper.saturating_sub(b'@'))
}
