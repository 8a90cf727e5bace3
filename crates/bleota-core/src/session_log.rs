//! Operation log of an update session.
//!
//! Each event with a message becomes one `[HH:MM:SS] message` line. The
//! lines are kept in memory and can be written next to the firmware file
//! once the session ends.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};

use crate::events::{TracingObserver, UpdateEvent, UpdateObserver};

/// `<dir>/<firmware stem>_<YYYYMMDD_HHMM>.log`, stamped with the session start.
pub fn log_path_for(firmware: &Path, started_at: DateTime<Local>) -> PathBuf {
    let stem = firmware
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "firmware".to_string());
    let name = format!("{}_{}.log", stem, started_at.format("%Y%m%d_%H%M"));
    firmware.with_file_name(name)
}

/// Observer that timestamps session events and forwards them to tracing.
#[derive(Default)]
pub struct SessionLog {
    lines: Mutex<Vec<String>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line stamped with the current local time.
    pub fn emit(&self, message: &str) {
        self.emit_at(Local::now(), message);
    }

    pub fn emit_at(&self, at: DateTime<Local>, message: &str) {
        let line = format!("[{}] {}", at.format("%H:%M:%S"), message);
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Write all lines collected so far to `path`.
    pub fn flush_to_file(&self, path: &Path) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for line in self.lines() {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }
}

impl UpdateObserver for SessionLog {
    fn on_event(&self, event: &UpdateEvent) {
        TracingObserver.on_event(event);
        if let Some(message) = event.message() {
            self.emit(&message);
        }
    }
}
