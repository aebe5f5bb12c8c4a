//! Progress and log sink used by the planner.
//!
//! The planner never renders anything itself. It pushes typed log entries,
//! progress advances and a "details" message into a [`ProgressDisplay`],
//! and nothing the sink does feeds back into control flow.

use crossterm::style::Stylize;
use std::io::{self, Write};
use strum::{Display, EnumString};
use tracing::debug;

/// Kind of a log entry pushed to the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LogKind {
    Heading,
    Loading,
    Success,
    Warning,
    Error,
}

/// Opaque handle of a progress counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressId(pub usize);

/// Sink for structured log events and progress.
pub trait ProgressDisplay {
    /// Start the live view. Calling it twice is a no-op.
    fn start(&mut self);

    /// Stop the live view. Calling it while stopped is a no-op.
    fn stop(&mut self);

    fn add_progress_bar(&mut self, title: &str, total: u32) -> ProgressId;

    fn advance_progress_bar(&mut self, id: ProgressId, advance_by: u32);

    fn add_item_to_logs(&mut self, text: &str, kind: LogKind);

    /// Replace the details panel. `raw` text is shown verbatim (command output),
    /// otherwise it is treated as formatted prose.
    fn set_details_message(&mut self, message: &str, raw: bool);
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullDisplay {
    bars: usize,
}

impl ProgressDisplay for NullDisplay {
    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn add_progress_bar(&mut self, _title: &str, _total: u32) -> ProgressId {
        self.bars += 1;
        ProgressId(self.bars - 1)
    }

    fn advance_progress_bar(&mut self, _id: ProgressId, _advance_by: u32) {}

    fn add_item_to_logs(&mut self, _text: &str, _kind: LogKind) {}

    fn set_details_message(&mut self, _message: &str, _raw: bool) {}
}

#[derive(Debug, Clone)]
struct ProgressBar {
    title: String,
    total: u32,
    completed: u32,
}

impl ProgressBar {
    fn percent(&self) -> u32 {
        if self.total == 0 {
            100
        } else {
            (self.completed.min(self.total) * 100) / self.total
        }
    }
}

/// Line-oriented terminal display.
///
/// Each log entry becomes one styled line prefixed with the progress of the
/// first progress bar. Write errors are ignored: a broken terminal must not
/// abort a half-provisioned cluster.
pub struct ConsoleDisplay {
    title: String,
    out: Box<dyn Write>,
    running: bool,
    bars: Vec<ProgressBar>,
}

impl ConsoleDisplay {
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_writer(title, Box::new(io::stdout()))
    }

    pub fn with_writer(title: impl Into<String>, out: Box<dyn Write>) -> Self {
        Self {
            title: title.into(),
            out,
            running: false,
            bars: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn progress_prefix(&self) -> String {
        match self.bars.first() {
            Some(bar) => format!("[{:>3}%]", bar.percent()),
            None => String::new(),
        }
    }
}

impl ProgressDisplay for ConsoleDisplay {
    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        let _ = writeln!(self.out, "{}", format!("== {} ==", self.title).bold());
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        for bar in &self.bars {
            let _ = writeln!(
                self.out,
                "{}: {}/{} ({}%)",
                bar.title, bar.completed, bar.total, bar.percent()
            );
        }
        let _ = self.out.flush();
    }

    fn add_progress_bar(&mut self, title: &str, total: u32) -> ProgressId {
        debug!("Adding progress bar {} with total {}", title, total);
        self.bars.push(ProgressBar {
            title: title.to_string(),
            total,
            completed: 0,
        });
        ProgressId(self.bars.len() - 1)
    }

    fn advance_progress_bar(&mut self, id: ProgressId, advance_by: u32) {
        debug!("Advancing progress bar {} by {}", id.0, advance_by);
        if let Some(bar) = self.bars.get_mut(id.0) {
            bar.completed = bar.completed.saturating_add(advance_by);
        }
    }

    fn add_item_to_logs(&mut self, text: &str, kind: LogKind) {
        let prefix = self.progress_prefix();
        let line = match kind {
            LogKind::Heading => format!("\n{}", text.underlined().bold()),
            LogKind::Loading => format!("{} {}", prefix, format!("… {}", text).blue().bold()),
            LogKind::Success => format!("{} {}", prefix, format!("✔ {}", text).green()),
            LogKind::Warning => format!("{} {}", prefix, format!("‼ {}", text).yellow()),
            LogKind::Error => format!("{} {}", prefix, format!("✘ {}", text).red()),
        };
        let _ = writeln!(self.out, "{}", line);
    }

    fn set_details_message(&mut self, message: &str, raw: bool) {
        if raw {
            for line in message.lines() {
                let _ = writeln!(self.out, "    {}", line);
            }
        } else {
            let _ = writeln!(self.out, "{}", message.italic());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    #[test]
    fn test_log_kind_strings() {
        assert_eq!(LogKind::Loading.to_string(), "loading");
        assert_eq!("heading".parse::<LogKind>().unwrap(), LogKind::Heading);
    }

    #[test]
    fn test_console_start_stop_idempotent() {
        let buffer = SharedBuffer::default();
        let mut display = ConsoleDisplay::with_writer("KubeSandbox", Box::new(buffer.clone()));

        display.start();
        display.start();
        assert!(display.is_running());
        display.stop();
        display.stop();
        assert!(!display.is_running());

        assert_eq!(buffer.contents().matches("KubeSandbox").count(), 1);
    }

    #[test]
    fn test_console_progress_is_reported_on_stop() {
        let buffer = SharedBuffer::default();
        let mut display = ConsoleDisplay::with_writer("KubeSandbox", Box::new(buffer.clone()));
        display.start();
        let id = display.add_progress_bar("Progress", 4);
        display.advance_progress_bar(id, 1);
        display.advance_progress_bar(id, 3);
        display.add_item_to_logs("Cluster created", LogKind::Success);
        display.stop();

        let text = buffer.contents();
        assert!(text.contains("Cluster created"));
        assert!(text.contains("Progress: 4/4 (100%)"));
    }

    #[test]
    fn test_console_raw_details_are_indented() {
        let buffer = SharedBuffer::default();
        let mut display = ConsoleDisplay::with_writer("t", Box::new(buffer.clone()));
        display.set_details_message("line one\nline two", true);
        assert_eq!(buffer.contents(), "    line one\n    line two\n");
    }

    #[test]
    fn test_null_display_hands_out_distinct_ids() {
        let mut display = NullDisplay::default();
        let a = display.add_progress_bar("a", 1);
        let b = display.add_progress_bar("b", 1);
        assert_ne!(a, b);
    }
}
