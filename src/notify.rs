//! Activity notifiers.
//!
//! Notifications are fire-and-forget: a sink that fails logs the failure and
//! carries on, so nothing here returns a `Result`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Receives activity start/end announcements from the recording stage.
pub trait Notifier: Send {
    fn activity_started(&mut self);
    fn activity_ended(&mut self);
}

/// Writes announcements to the log.
#[derive(Debug, Default)]
pub struct LogNotifier {
    label: Option<String>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every line with a camera label.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    fn prefix(&self) -> String {
        match &self.label {
            Some(label) => format!("[{label}] "),
            None => String::new(),
        }
    }
}

impl Notifier for LogNotifier {
    fn activity_started(&mut self) {
        log::info!("{}activity started", self.prefix());
    }

    fn activity_ended(&mut self) {
        log::info!("{}activity ended", self.prefix());
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    event: &'a str,
    at: String,
}

/// Appends one JSON object per announcement to a file.
pub struct EventLogNotifier {
    path: PathBuf,
    file: File,
}

impl EventLogNotifier {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: &str) {
        let line = EventLine {
            event,
            at: chrono::Utc::now().to_rfc3339(),
        };
        let result = serde_json::to_string(&line)
            .map_err(anyhow::Error::from)
            .and_then(|json| writeln!(self.file, "{json}").map_err(anyhow::Error::from));
        if let Err(err) = result {
            log::warn!("event log {}: {}", self.path.display(), err);
        }
    }
}

impl Notifier for EventLogNotifier {
    fn activity_started(&mut self) {
        self.write_event("activity_started");
    }

    fn activity_ended(&mut self) {
        self.write_event("activity_ended");
    }
}

/// Fans each announcement out to several notifiers, in insertion order.
#[derive(Default)]
pub struct NotifierSet {
    sinks: Vec<Box<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Box<dyn Notifier>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for NotifierSet {
    fn activity_started(&mut self) {
        for sink in &mut self.sinks {
            sink.activity_started();
        }
    }

    fn activity_ended(&mut self) {
        for sink in &mut self.sinks {
            sink.activity_ended();
        }
    }
}
