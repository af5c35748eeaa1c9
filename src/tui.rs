//! Terminal User Interface (TUI) rendering and management.
//!
//! This module handles initializing the terminal in raw mode, restoring it on exit,
//! and drawing a `DashboardView` snapshot using `ratatui`. Rendering never touches
//! process handles directly.

use std::io::{self, Stdout};

use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, List, ListItem, Paragraph, Wrap};
use ratatui::{Frame, Terminal};

use crate::output::sanitize_text;
use crate::view::{DashboardView, SidebarEntry, StatusGlyph};

/// Type alias for the specific terminal backend used.
pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

const SIDEBAR_WIDTH: u16 = 20;
const MAX_NAME_CHARS: usize = 16;
const ACCENT: Color = Color::Rgb(0x4A, 0x90, 0xE2);
const STATUS_BAR_BG: Color = Color::Rgb(0x2E, 0x2E, 0x2E);

/// Initializes the terminal for TUI mode.
///
/// Enables raw mode, enters the alternate screen, and creates a `ratatui` Terminal instance.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture, SetTitle("runhub"))?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restores the terminal to its original state.
///
/// Disables raw mode, leaves the alternate screen, and shows the cursor.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Draws one frame from the view snapshot.
pub fn draw(view: &DashboardView, terminal: &mut TuiTerminal) -> io::Result<()> {
    terminal.draw(|frame| render(view, frame))?;
    Ok(())
}

fn render(view: &DashboardView, frame: &mut Frame) {
    let area = frame.size();
    if let Some(report) = &view.final_report {
        render_final_report(report, frame, area);
        return;
    }
    if !view.ready {
        frame.render_widget(Paragraph::new("Initializing..."), area);
        return;
    }

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);
    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(SIDEBAR_WIDTH)])
        .split(vertical[0]);

    let border_style = if view.interactive {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let output = Text::from(
        view.output
            .iter()
            .map(|line| Line::from(sanitize_text(line)))
            .collect::<Vec<_>>(),
    );
    let content = Paragraph::new(output).block(
        Block::default()
            .title(output_title(view))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(border_style),
    );
    frame.render_widget(content, main[0]);

    let items: Vec<ListItem> = view.sidebar.iter().map(sidebar_item).collect();
    frame.render_widget(List::new(items), main[1]);

    let status = Paragraph::new(format!(" {}", view.status_bar))
        .style(Style::default().fg(Color::White).bg(STATUS_BAR_BG));
    frame.render_widget(status, vertical[1]);
}

fn render_final_report(report: &str, frame: &mut Frame, area: Rect) {
    let text = sanitize_text(report);
    let paragraph = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(Color::Rgb(0xFF, 0x55, 0x55))),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn output_title(view: &DashboardView) -> String {
    match (&view.selected_name, view.interactive) {
        (Some(name), true) => format!(" {} (interactive) ", name),
        (Some(name), false) => format!(" {} ", name),
        (None, _) => " No commands ".to_string(),
    }
}

fn sidebar_item(entry: &SidebarEntry) -> ListItem<'static> {
    let glyph = Span::styled(entry.glyph.symbol(), glyph_style(entry.glyph));
    let name = truncate_name(&entry.name);
    let line = if entry.selected {
        Line::from(vec![
            Span::raw(" "),
            glyph,
            Span::styled(
                format!(" {} ", name),
                Style::default()
                    .fg(Color::White)
                    .bg(ACCENT)
                    .add_modifier(Modifier::BOLD),
            ),
        ])
    } else {
        Line::from(vec![
            Span::raw("  "),
            glyph,
            Span::styled(format!(" {}", name), Style::default().fg(Color::Gray)),
        ])
    };
    ListItem::new(line)
}

fn glyph_style(glyph: StatusGlyph) -> Style {
    match glyph {
        StatusGlyph::Running => Style::default().fg(ACCENT),
        StatusGlyph::Success => Style::default().fg(Color::Green),
        StatusGlyph::Failure => Style::default().fg(Color::Red),
        StatusGlyph::Unknown => Style::default().fg(Color::DarkGray),
    }
}

fn truncate_name(name: &str) -> String {
    if name.chars().count() <= MAX_NAME_CHARS {
        return name.to_string();
    }
    let mut out: String = name.chars().take(MAX_NAME_CHARS).collect();
    out.push_str("...");
    out
}
