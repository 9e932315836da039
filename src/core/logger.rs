//! JSON-lines event log for simulator runs
//!
//! Every engine event and deadlock report can be appended to a log file, one
//! JSON object per line. Writes happen on a background thread fed through a
//! channel, so logging never holds up the engine. Call [`EventLogger::flush`]
//! before reading the file back.

use crate::core::types::{DeadlockInfo, EngineEvent};
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// A single line of the log
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// An engine state transition
    Event(EngineEvent),
    /// A circular wait reported by the monitor
    Deadlock(DeadlockInfo),
}

/// Commands for controlling the writer thread
#[derive(Debug)]
enum LoggerCommand {
    /// Write a record to the file
    Record(LogRecord),
    /// Flush all pending records to disk and signal completion
    Flush(Sender<()>),
}

/// Event logger writing through a background thread
pub struct EventLogger {
    /// Channel sender for the writer thread
    sender: Sender<LoggerCommand>,
    /// Resolved path of the log file
    path: PathBuf,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            eprintln!("Warning: Failed to flush logs during EventLogger drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a logger writing to `path`
    ///
    /// If the file name contains "{timestamp}" it is replaced with the current
    /// UTC time. Missing parent directories are created. An existing file is
    /// truncated.
    ///
    /// # Errors
    /// Returns an error if the directory or the file cannot be created
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let requested = path.as_ref().to_string_lossy().into_owned();

        #[allow(clippy::literal_string_with_formatting_args)]
        let path = if requested.contains("{timestamp}") {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            PathBuf::from(requested.replace("{timestamp}", &timestamp))
        } else {
            PathBuf::from(requested)
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        let (tx, rx) = unbounded::<LoggerCommand>();

        thread::Builder::new()
            .name("deadlock-sim-logger".into())
            .spawn(move || writer_thread(file, rx))
            .context("Failed to spawn logger thread")?;

        Ok(EventLogger { sender: tx, path })
    }

    /// Path of the file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an engine event
    pub fn log_event(&self, event: &EngineEvent) {
        self.send(LogRecord::Event(event.clone()));
    }

    /// Queue a deadlock report
    pub fn log_deadlock(&self, info: &DeadlockInfo) {
        self.send(LogRecord::Deadlock(info.clone()));
    }

    fn send(&self, record: LogRecord) {
        if let Err(e) = self.sender.send(LoggerCommand::Record(record)) {
            eprintln!("Failed to send log record: {e:?}");
        }
    }

    /// Block until every record queued before this call is on disk
    ///
    /// Each caller queues its own flush marker behind its records and waits
    /// for the writer to reach it, so concurrent flushes never return early.
    ///
    /// # Errors
    /// Returns an error if the writer thread is gone or does not answer in time
    pub fn flush(&self) -> Result<()> {
        let (flush_tx, flush_rx) = crossbeam_channel::bounded(1);
        self.sender
            .send(LoggerCommand::Flush(flush_tx))
            .context("Logger thread is gone")?;

        flush_rx
            .recv_timeout(Duration::from_secs(10))
            .context("Flush operation timed out")
    }
}

/// Writer loop: serializes records and writes them out until the channel closes
fn writer_thread(file: File, rx: Receiver<LoggerCommand>) {
    let mut writer = BufWriter::new(file);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::Record(record) => {
                if let Ok(json) = serde_json::to_string(&record)
                    && let Err(e) = writeln!(writer, "{json}")
                {
                    eprintln!("Logger write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                if let Err(e) = writer.flush() {
                    eprintln!("Logger flush error: {e:?}");
                }
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        eprintln!("Logger final flush error: {e:?}");
    }
}
