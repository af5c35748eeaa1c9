//! Output buffering for captured process lines.
//!
//! Each process owns an `OutputBuffer`, a fixed-capacity FIFO of text lines.
//! Once the capacity is exceeded the oldest line is dropped.

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

/// Maximum number of lines retained per process.
pub const OUTPUT_CAPACITY: usize = 100;

/// A fixed-capacity ring buffer of captured output lines.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    max_lines: usize,
    lines: VecDeque<String>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(OUTPUT_CAPACITY)
    }
}

impl OutputBuffer {
    /// Creates a new `OutputBuffer` with the specified maximum capacity.
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(1024)),
        }
    }

    /// Appends a line to the buffer, dropping the oldest lines past capacity.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Returns the number of lines currently in the buffer.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Copies every line out of the buffer.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Copies the lines visible in a viewport of `height` rows scrolled
    /// `scroll` lines back from the live tail.
    pub fn window(&self, height: usize, scroll: usize) -> Vec<String> {
        let total = self.lines.len();
        let end = total.saturating_sub(scroll);
        let start = end.saturating_sub(height);
        self.lines.range(start..end).cloned().collect()
    }
}

/// Removes ANSI escape sequences so captured text can be drawn safely.
///
/// Invalid UTF-8 left behind by stripping is replaced.
pub fn sanitize_text(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_buffer_drops_oldest() {
        let mut buffer = OutputBuffer::new(2);
        buffer.push("a");
        buffer.push("b");
        buffer.push("c");
        assert_eq!(buffer.snapshot(), vec!["b", "c"]);
    }

    #[test]
    fn output_buffer_keeps_most_recent_hundred_in_order() {
        let mut buffer = OutputBuffer::default();
        for i in 0..250 {
            buffer.push(format!("line {i}"));
            assert!(buffer.len() <= OUTPUT_CAPACITY);
        }
        let lines = buffer.snapshot();
        assert_eq!(lines.len(), OUTPUT_CAPACITY);
        assert_eq!(lines.first().map(String::as_str), Some("line 150"));
        assert_eq!(lines.last().map(String::as_str), Some("line 249"));
        let expected: Vec<String> = (150..250).map(|i| format!("line {i}")).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buffer = OutputBuffer::default();
        buffer.push("only");
        assert_eq!(buffer.len(), 1);
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.snapshot().is_empty());
    }

    #[test]
    fn window_follows_tail_and_scrolls_back() {
        let mut buffer = OutputBuffer::new(10);
        for i in 0..10 {
            buffer.push(i.to_string());
        }
        assert_eq!(buffer.window(3, 0), vec!["7", "8", "9"]);
        assert_eq!(buffer.window(3, 2), vec!["5", "6", "7"]);
        assert_eq!(buffer.window(3, 9), vec!["0"]);
        assert!(buffer.window(3, 20).is_empty());
        assert_eq!(buffer.window(50, 0).len(), 10);
    }

    #[test]
    fn sanitize_strips_color_codes() {
        assert_eq!(sanitize_text("\u{1b}[31mred\u{1b}[0m"), "red");
        assert_eq!(sanitize_text("plain"), "plain");
    }
}
