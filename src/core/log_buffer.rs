//! Circular log buffer for storing captured service output

use chrono::{DateTime, Local};
use std::collections::VecDeque;

/// A single captured output line
#[derive(Debug, Clone)]
pub struct LogLine {
    /// The content of the line
    pub content: String,
    /// Timestamp when the line was received
    pub timestamp: DateTime<Local>,
    /// Whether this line came from stderr
    pub is_stderr: bool,
}

/// Circular buffer for storing output lines of one service
#[derive(Debug)]
pub struct LogBuffer {
    /// The captured lines
    lines: VecDeque<LogLine>,
    /// Maximum number of lines to keep
    max_lines: usize,
}

impl LogBuffer {
    /// Create a new log buffer with the given capacity
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines),
            max_lines,
        }
    }

    /// Push a new line to the buffer
    pub fn push_line(&mut self, content: &str, is_stderr: bool) {
        // Remove oldest line if at capacity
        if self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }

        self.lines.push_back(LogLine {
            content: content.to_string(),
            timestamp: Local::now(),
            is_stderr,
        });
    }

    /// Get all lines
    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    /// Get the last `count` lines, oldest first
    pub fn tail(&self, count: usize) -> Vec<&LogLine> {
        let skip = self.lines.len().saturating_sub(count);
        self.lines.iter().skip(skip).collect()
    }

    /// Get the number of lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Export to a string for diagnostics
    pub fn export(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("[{}] {}", l.timestamp.format("%H:%M:%S"), l.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(5000)
    }
}
