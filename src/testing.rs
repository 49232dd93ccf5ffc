//! Log capture for tests.
//!
//! Install with `tracing::subscriber::with_default` for sync code, or hold the
//! guard from `tracing::subscriber::set_default` inside a current-thread
//! `#[tokio::test]`.

use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Shared buffer that a `fmt` subscriber writes plain-text events into.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber(&self) -> impl Subscriber + Send + Sync + 'static {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .without_time()
            .with_target(true)
            .with_max_level(tracing::Level::TRACE)
            .finish()
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// True if a single line carries the level, the `target:` prefix and the text.
    pub fn has_event(&self, level: &str, target: &str, text: &str) -> bool {
        let target = format!("{}:", target);
        self.contents()
            .lines()
            .any(|line| line.contains(level) && line.contains(&target) && line.contains(text))
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
