use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_core::{Event, Field, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::DEFAULT_LOG_LEVEL;

pub const DEFAULT_LOG_DIRECTORY: &str = "logs";
pub const LOG_FILE_NAME: &str = "webhook.log";
/// Target of every `EventLog` entry; always written to the log file at INFO
pub const DEPLOY_TARGET: &str = "deploy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }

    pub fn to_line(&self) -> String {
        format_line(&self.timestamp, self.level.as_str(), &self.message)
    }
}

/// `[2024-01-01T00:00:00.000Z] [LEVEL] message\n`
pub fn format_line(timestamp: &DateTime<Utc>, level: &str, message: &str) -> String {
    format!(
        "[{}] [{}] {}\n",
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        level,
        message
    )
}

/// Sink for deployment and dispatch events
pub trait EventLog: Send + Sync {
    fn append(&self, level: LogLevel, message: &str);
}

/// Forwards entries to `tracing`, and from there to the console and log file
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn append(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!(target: DEPLOY_TARGET, "{}", message),
            LogLevel::Success => info!(target: DEPLOY_TARGET, success = true, "{}", message),
            LogLevel::Warn => warn!(target: DEPLOY_TARGET, "{}", message),
            LogLevel::Error => error!(target: DEPLOY_TARGET, "{}", message),
        }
    }
}

/// Keeps entries in memory; handy for asserting on what a run logged
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, level: LogLevel, message: &str) {
        let entry = LogEntry::new(level, message);
        match self.entries.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

/// Helper to extract the message and the `success` marker of an event
#[derive(Default)]
struct LogLineVisitor {
    message: String,
    success: bool,
}

impl tracing::field::Visit for LogLineVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "success" {
            self.success = value;
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

/// Appends every event to the log file as a single plain-text line
pub struct LogFileLayer<W> {
    make_writer: W,
}

impl<W> LogFileLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    pub fn new(make_writer: W) -> Self {
        Self { make_writer }
    }
}

impl<S, W> Layer<S> for LogFileLayer<W>
where
    S: Subscriber,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LogLineVisitor::default();
        event.record(&mut visitor);

        let level = if visitor.success {
            LogLevel::Success.as_str().to_string()
        } else {
            event.metadata().level().to_string()
        };
        let line = format_line(&Utc::now(), &level, &visitor.message);

        let mut writer = self.make_writer.make_writer();
        // Nowhere left to report a failed log write
        let _ = writer.write_all(line.as_bytes());
    }
}

pub struct FileLogger {
    log_directory: PathBuf,
    file_name: String,
}

impl FileLogger {
    pub fn new(log_directory: impl Into<PathBuf>) -> Self {
        Self {
            log_directory: log_directory.into(),
            file_name: LOG_FILE_NAME.to_string(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_directory.join(&self.file_name)
    }

    pub fn log_directory(&self) -> &Path {
        &self.log_directory
    }

    /// Append-only writer to the log file, never rotated. Blocks instead of
    /// dropping lines when the buffer is full.
    pub fn setup_file_logging(&self) -> io::Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory)?;
        let file_appender = tracing_appender::rolling::never(&self.log_directory, &self.file_name);
        Ok(NonBlockingBuilder::default().lossy(false).finish(file_appender))
    }
}

fn level_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|e| {
        eprintln!(
            "Invalid LOG_LEVEL '{}' ({}), falling back to '{}'",
            log_level, e, DEFAULT_LOG_LEVEL
        );
        EnvFilter::new(DEFAULT_LOG_LEVEL)
    })
}

/// `LOG_LEVEL` for everything else, but deploy entries always reach the file
pub fn file_filter(log_level: &str) -> EnvFilter {
    let filter = level_filter(log_level);
    match format!("{}=info", DEPLOY_TARGET).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Installs the global subscriber: console output filtered by `LOG_LEVEL`,
/// plus the append-only log file. The returned guard must live as long as
/// the process.
pub fn setup_logging(log_level: &str, file_logger: &FileLogger) -> io::Result<WorkerGuard> {
    let (file_writer, guard) = file_logger.setup_file_logging()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(level_filter(log_level)))
        .with(LogFileLayer::new(file_writer).with_filter(file_filter(log_level)))
        .init();

    Ok(guard)
}
