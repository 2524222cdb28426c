// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Per-submission file logging.
//!
//! Grounded on `engine/logging`'s `PantsLogger`: a single process-global
//! `log::Log` implementation, installed once via `log::set_logger`, backed
//! by a file handle that can be swapped out from under it. Unlike
//! `PantsLogger` (which wraps a `simplelog::WriteLogger` to get python-level
//! filtering), the line format here is fixed to `timestamp - level -
//! message`, so the formatting is done directly rather than through
//! `simplelog`'s own layout.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

struct WorkerLogger {
    file: Mutex<Option<File>>,
    mirror_to_stdout: std::sync::atomic::AtomicBool,
}

static LOGGER: WorkerLogger = WorkerLogger {
    file: Mutex::new(None),
    mirror_to_stdout: std::sync::atomic::AtomicBool::new(false),
};

impl Log for WorkerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} - {} - {}\n",
            Local::now().format(TIMESTAMP_FORMAT),
            record.level(),
            record.args()
        );

        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.write_all(line.as_bytes());
            }
        }

        if self.mirror_to_stdout.load(std::sync::atomic::Ordering::Relaxed) {
            print!("{}", colorize(record.level(), &line));
        }
    }

    fn flush(&self) {
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
        let _ = std::io::stdout().flush();
    }
}

fn colorize(level: Level, line: &str) -> String {
    match level {
        Level::Error => line.red().to_string(),
        Level::Warn => line.yellow().to_string(),
        Level::Info => line.normal().to_string(),
        Level::Debug | Level::Trace => line.dimmed().to_string(),
    }
}

/// Installs the process-global logger. Call once at process start; calling
/// it again only adjusts the level/mirror settings (matches `PantsLogger::init`'s
/// "set_logger fails silently on re-init" behavior).
pub fn init(level: LevelFilter, mirror_to_stdout: bool) {
    log::set_max_level(level);
    LOGGER
        .mirror_to_stdout
        .store(mirror_to_stdout, std::sync::atomic::Ordering::Relaxed);
    let _ = log::set_logger(&LOGGER);
}

/// Points the logger at a fresh, truncated file for the submission about to
/// run. Replacing the previous `File` handle drops it, closing it.
pub fn start_submission_log(path: &Path) -> Result<(), String> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {e}", path.display()))?;
    let mut guard = LOGGER
        .file
        .lock()
        .map_err(|_| "log file mutex poisoned".to_string())?;
    *guard = Some(file);
    Ok(())
}

/// Flushes the current log file and reads it back whole, for embedding in
/// the reported result.
pub fn read_submission_log(path: &Path) -> Result<String, String> {
    log::logger().flush();
    std::fs::read_to_string(path).map_err(|e| format!("Failed to read log file {}: {e}", path.display()))
}

/// Truncates `text` to at most `max_bytes`, appending a marker noting how
/// much was cut.
pub fn head(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n...[truncated {} bytes]",
        &text[..end],
        text.len() - end
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_passes_short_text_through_unchanged() {
        assert_eq!(head("hello", 100), "hello");
    }

    #[test]
    fn head_truncates_and_notes_byte_count() {
        let text = "a".repeat(50);
        let truncated = head(&text, 10);
        assert!(truncated.starts_with(&"a".repeat(10)));
        assert!(truncated.contains("truncated 40 bytes"));
    }

    #[test]
    fn head_does_not_split_a_multibyte_character() {
        let text = "a".repeat(9) + "é";
        let truncated = head(&text, 10);
        assert!(truncated.starts_with(&"a".repeat(9)));
        assert!(!truncated.contains('é'));
    }

    #[test]
    fn start_submission_log_writes_and_read_submission_log_reads_back() {
        init(LevelFilter::Info, false);
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("worker.log");
        start_submission_log(&log_path).unwrap();
        log::info!("hello from a test");
        let contents = read_submission_log(&log_path).unwrap();
        assert!(contents.contains("hello from a test"));
        assert!(contents.contains(" - INFO - "));
    }
}
