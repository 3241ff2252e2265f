//! Logging setup
//!
//! `tracing` with an `EnvFilter`, writing to stdout and into an in-memory
//! ring buffer that backs the `/get_logs/v1` endpoint.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

/// How many recent log lines the ring buffer keeps.
const LOG_BUFFER_LINES: usize = 500;

/// Shared ring of recent log lines.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, line: &str) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == LOG_BUFFER_LINES {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    /// Recent lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// Writer that copies every formatted line to stdout and the ring buffer.
pub struct TeeWriter {
    buffer: Arc<LogBuffer>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut stdout = std::io::stdout();
        let n = stdout.write(buf)?;
        for line in String::from_utf8_lossy(buf).lines() {
            if !line.is_empty() {
                self.buffer.push(line);
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}

/// MakeWriter handing out tee writers over one shared buffer.
#[derive(Clone)]
pub struct TeeMakeWriter {
    buffer: Arc<LogBuffer>,
}

impl TeeMakeWriter {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            buffer: self.buffer.clone(),
        }
    }
}

/// Install the global subscriber. `level` falls back to `info` when the
/// string does not parse; `RUST_LOG` overrides it entirely.
pub fn init_logging(level: &str, buffer: Arc<LogBuffer>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(TeeMakeWriter::new(buffer))
        .init();
}

/// Accepted log level names, for CLI validation.
pub fn parse_log_level(level: &str) -> Option<&'static str> {
    match level.to_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_keeps_recent_lines() {
        let buffer = LogBuffer::new();
        for i in 0..LOG_BUFFER_LINES + 10 {
            buffer.push(&format!("line {}", i));
        }
        let lines = buffer.snapshot();
        assert_eq!(lines.len(), LOG_BUFFER_LINES);
        assert_eq!(lines[0], "line 10");
    }

    #[test]
    fn test_tee_writer_splits_lines() {
        let buffer = LogBuffer::new();
        let mut writer = TeeWriter {
            buffer: buffer.clone(),
        };
        writer.write_all(b"first\nsecond\n").unwrap();
        assert_eq!(buffer.snapshot(), vec!["first", "second"]);
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("INFO"), Some("info"));
        assert_eq!(parse_log_level("warning"), Some("warn"));
        assert_eq!(parse_log_level("nope"), None);
    }
}
