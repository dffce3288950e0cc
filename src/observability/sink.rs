//! Durable, append-only security log files.
//!
//! Each category is written to its own date-partitioned file
//! (`security-2026-10-18.log`, ...) as JSON lines. Files older than the
//! category's retention are pruned whenever a new day's file is opened.
//!
//! Writes go through a bounded queue to a single background task, so the
//! request path never touches the disk. When the queue is full, or a write
//! fails, the line is reported through `tracing` and dropped; neither case
//! reaches the request that produced it.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::LoggingConfig;

/// Lines buffered ahead of the writer before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Log file family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    /// General application events (short retention).
    App,
    /// Security alerts and threats.
    Security,
    /// Audit trail (long retention).
    Audit,
}

impl LogCategory {
    pub fn file_prefix(self) -> &'static str {
        match self {
            LogCategory::App => "app",
            LogCategory::Security => "security",
            LogCategory::Audit => "audit",
        }
    }

    fn file_name(self, date: NaiveDate) -> String {
        format!("{}-{}.log", self.file_prefix(), date.format("%Y-%m-%d"))
    }
}

/// Days each category is kept on disk.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub app_days: u32,
    pub security_days: u32,
    pub audit_days: u32,
}

impl RetentionPolicy {
    pub fn days(&self, category: LogCategory) -> u32 {
        match category {
            LogCategory::App => self.app_days,
            LogCategory::Security => self.security_days,
            LogCategory::Audit => self.audit_days,
        }
    }
}

impl From<&LoggingConfig> for RetentionPolicy {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            app_days: config.app_retention_days,
            security_days: config.security_retention_days,
            audit_days: config.audit_retention_days,
        }
    }
}

struct SinkRecord {
    category: LogCategory,
    date: NaiveDate,
    line: String,
}

/// Handle for submitting log lines. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SinkRecord>,
}

impl std::fmt::Debug for SinkRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRecord")
            .field("category", &self.category)
            .field("date", &self.date)
            .finish()
    }
}

impl EventSink {
    /// Spawn the writer task. Must be called from within a Tokio runtime.
    ///
    /// The task exits once every clone of the returned sink is dropped and
    /// the queue is drained.
    pub fn spawn(directory: impl Into<PathBuf>, retention: RetentionPolicy) -> (Self, JoinHandle<()>) {
        Self::with_capacity(directory, retention, DEFAULT_QUEUE_CAPACITY)
    }

    /// Like [`EventSink::spawn`] with a queue of `capacity` lines.
    pub fn with_capacity(
        directory: impl Into<PathBuf>,
        retention: RetentionPolicy,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SinkRecord>(capacity.max(1));
        let mut writer = SinkWriter {
            directory: directory.into(),
            retention,
            open: HashMap::new(),
        };

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = writer.append(&record).await {
                    tracing::error!(
                        category = record.category.file_prefix(),
                        error = %e,
                        line = %record.line,
                        "Failed to persist security log line"
                    );
                }
            }
        });

        (Self { tx }, handle)
    }

    /// Queue a line for the category's file dated `timestamp`.
    pub fn write(&self, category: LogCategory, timestamp: DateTime<Utc>, line: String) {
        let record = SinkRecord {
            category,
            date: timestamp.date_naive(),
            line,
        };
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => tracing::warn!(
                category = category.file_prefix(),
                "Security log queue is full; line dropped"
            ),
            Err(mpsc::error::TrySendError::Closed(_)) => tracing::warn!(
                category = category.file_prefix(),
                "Security log writer has stopped; line dropped"
            ),
        }
    }
}

struct SinkWriter {
    directory: PathBuf,
    retention: RetentionPolicy,
    open: HashMap<LogCategory, (NaiveDate, File)>,
}

impl SinkWriter {
    async fn append(&mut self, record: &SinkRecord) -> io::Result<()> {
        let stale = self
            .open
            .get(&record.category)
            .map_or(true, |(date, _)| *date != record.date);
        if stale {
            let file = self.open_file(record.category, record.date).await?;
            self.open.insert(record.category, (record.date, file));
            if let Err(e) = self.prune(record.category, record.date).await {
                tracing::warn!(error = %e, "Failed to prune expired security logs");
            }
        }

        let Some((_, file)) = self.open.get_mut(&record.category) else {
            return Ok(());
        };
        let mut buf = Vec::with_capacity(record.line.len() + 1);
        buf.extend_from_slice(record.line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf).await?;
        file.flush().await
    }

    async fn open_file(&self, category: LogCategory, date: NaiveDate) -> io::Result<File> {
        fs::create_dir_all(&self.directory).await?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.directory.join(category.file_name(date)))
            .await
    }

    /// Remove this category's files older than its retention. Returns how
    /// many were removed.
    async fn prune(&self, category: LogCategory, today: NaiveDate) -> io::Result<usize> {
        let days = u64::from(self.retention.days(category));
        let Some(cutoff) = today.checked_sub_days(Days::new(days)) else {
            return Ok(0);
        };

        let mut removed = 0;
        let mut entries = fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(date) = file_date(&path, category) {
                if date < cutoff {
                    fs::remove_file(&path).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn file_date(path: &Path, category: LogCategory) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let stamp = name
        .strip_prefix(category.file_prefix())?
        .strip_prefix('-')?
        .strip_suffix(".log")?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retention() -> RetentionPolicy {
        RetentionPolicy {
            app_days: 30,
            security_days: 90,
            audit_days: 365,
        }
    }

    #[tokio::test]
    async fn test_lines_land_in_dated_category_file() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, handle) = EventSink::spawn(dir.path(), retention());
        let now = Utc::now();

        sink.write(LogCategory::Security, now, r#"{"eventType":"xss_attempt"}"#.into());
        sink.write(LogCategory::Audit, now, r#"{"action":"security_logs_cleared"}"#.into());
        sink.write(LogCategory::Security, now, r#"{"eventType":"brute_force"}"#.into());
        drop(sink);
        handle.await.unwrap();

        let security = std::fs::read_to_string(
            dir.path().join(LogCategory::Security.file_name(now.date_naive())),
        )
        .unwrap();
        assert_eq!(security.lines().count(), 2);
        assert!(security.contains("brute_force"));

        let audit = std::fs::read_to_string(
            dir.path().join(LogCategory::Audit.file_name(now.date_naive())),
        )
        .unwrap();
        assert!(audit.contains("security_logs_cleared"));
    }

    #[tokio::test]
    async fn test_expired_files_pruned_per_category() {
        let dir = tempfile::tempdir().unwrap();
        let today = Utc::now().date_naive();
        let old = today.checked_sub_days(Days::new(40)).unwrap();

        let expired_app = dir.path().join(LogCategory::App.file_name(old));
        let kept_security = dir.path().join(LogCategory::Security.file_name(old));
        std::fs::write(&expired_app, "{}\n").unwrap();
        std::fs::write(&kept_security, "{}\n").unwrap();

        let (sink, handle) = EventSink::spawn(dir.path(), retention());
        sink.write(LogCategory::App, Utc::now(), "{}".into());
        sink.write(LogCategory::Security, Utc::now(), "{}".into());
        drop(sink);
        handle.await.unwrap();

        assert!(!expired_app.exists(), "app logs keep 30 days");
        assert!(kept_security.exists(), "security logs keep 90 days");
    }

    #[tokio::test]
    async fn test_full_queue_drops_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, handle) = EventSink::with_capacity(dir.path(), retention(), 1);
        let now = Utc::now();

        // The writer cannot run until this task yields.
        for i in 0..3 {
            sink.write(LogCategory::App, now, format!(r#"{{"n":{i}}}"#));
        }
        drop(sink);
        handle.await.unwrap();

        let app = std::fs::read_to_string(
            dir.path().join(LogCategory::App.file_name(now.date_naive())),
        )
        .unwrap();
        assert_eq!(app.lines().collect::<Vec<_>>(), vec![r#"{"n":0}"#]);
    }

    #[test]
    fn test_file_date_requires_exact_prefix() {
        let path = Path::new("logs/security-2026-01-02.log");
        assert_eq!(
            file_date(path, LogCategory::Security),
            NaiveDate::from_ymd_opt(2026, 1, 2)
        );
        assert_eq!(file_date(path, LogCategory::Audit), None);
    }
}
