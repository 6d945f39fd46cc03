//! Audit persistence: mode routing, the WAL journal fallback, and the
//! buffered async channel, wired together behind one [`AuditLogger`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use reaper_core::audit::{routing, AuditMode, AuditWriter, Entry};
use reaper_core::error::Result;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, ErrorKind};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use metrics::MetricsRecorder;

/// Default bound on the async audit channel (spec §4.6).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Append-only line-delimited JSON fallback journal.
///
/// Every [`append`](WalJournal::append) reopens the file under a shared
/// mutex (append+create, mode 0600 on unix) rather than holding a handle
/// open indefinitely, so [`replay`](WalJournal::replay) can safely read
/// and truncate it between writes without the two racing.
#[derive(Debug)]
pub struct WalJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl WalJournal {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, written, or
    /// synced.
    pub async fn append(&self, entry: &Entry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path).await?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read every valid entry, writing each through `writer`, then
    /// truncate the journal to zero length.
    ///
    /// A malformed line is logged and skipped, not treated as a replay
    /// failure. If any `write_sync` call fails the journal is left
    /// untouched so a later replay can retry from the same state;
    /// entries already written during this attempt may be written again
    /// (at-least-once, matching the reference backend's "no individual
    /// row retry" stance).
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read, a `write_sync`
    /// call fails, or the file cannot be truncated.
    pub async fn replay(&self, writer: &dyn AuditWriter) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut replayed = 0usize;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Entry>(line) {
                Ok(entry) => {
                    writer.write_sync(&entry).await?;
                    replayed += 1;
                }
                Err(err) => {
                    warn!(error = %err, "skipping malformed WAL line during replay");
                }
            }
        }

        let mut truncate_options = OpenOptions::new();
        truncate_options.write(true).truncate(true);
        truncate_options.open(&self.path).await?;
        Ok(replayed)
    }

    /// Number of non-blank lines currently buffered, for the
    /// `audit_wal_entries` gauge.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal exists but cannot be read.
    pub async fn len(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content.lines().filter(|l| !l.trim().is_empty()).count()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

/// Bounded, single-consumer async audit channel.
///
/// `try_send` never blocks: a full channel increments a counter and
/// drops the entry rather than backing up the caller's evaluation path.
#[derive(Debug)]
pub struct AsyncAuditChannel {
    sender: RwLock<Option<tokio::sync::mpsc::Sender<Entry>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    full_count: AtomicU64,
}

impl AsyncAuditChannel {
    #[must_use]
    pub fn start(writer: Arc<dyn AuditWriter>, capacity: usize) -> Self {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity);
        let consumer = tokio::spawn(Self::drain(receiver, writer));
        Self {
            sender: RwLock::new(Some(sender)),
            consumer: Mutex::new(Some(consumer)),
            full_count: AtomicU64::new(0),
        }
    }

    async fn drain(mut receiver: tokio::sync::mpsc::Receiver<Entry>, writer: Arc<dyn AuditWriter>) {
        while let Some(entry) = receiver.recv().await {
            if let Err(err) = writer.write_async(entry).await {
                error!(error = %err, "async audit write failed");
            }
        }
    }

    /// Non-blocking enqueue. Returns `false` if the channel was
    /// saturated or already shut down, in which case the entry is
    /// dropped.
    pub fn try_send(&self, entry: Entry) -> bool {
        use tokio::sync::mpsc::error::TrySendError;
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        match sender.try_send(entry) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.full_count.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    #[must_use]
    pub fn full_count(&self) -> u64 {
        self.full_count.load(Ordering::Relaxed)
    }

    /// Close the sender and await the consumer draining whatever is
    /// still buffered before returning.
    pub async fn shutdown(&self) {
        self.sender.write().take();
        if let Some(handle) = self.consumer.lock().await.take() {
            let _ = handle.await;
        }
    }
}

/// Mode-based router combining the WAL journal and async channel behind
/// one entry point: [`AuditLogger::log`] never returns an error to its
/// caller (per spec §7, audit failure never propagates).
#[derive(Debug)]
pub struct AuditLogger {
    mode: AuditMode,
    writer: Arc<dyn AuditWriter>,
    journal: WalJournal,
    async_channel: AsyncAuditChannel,
    wal_failures: AtomicU64,
    metrics: MetricsRecorder,
}

impl AuditLogger {
    #[must_use]
    pub fn new(mode: AuditMode, writer: Arc<dyn AuditWriter>, journal_path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(mode, writer, journal_path, DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(
        mode: AuditMode,
        writer: Arc<dyn AuditWriter>,
        journal_path: impl Into<PathBuf>,
        channel_capacity: usize,
    ) -> Self {
        let async_channel = AsyncAuditChannel::start(writer.clone(), channel_capacity);
        Self {
            mode,
            writer,
            journal: WalJournal::new(journal_path),
            async_channel,
            wal_failures: AtomicU64::new(0),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Route `entry` per spec §4.6. Never fails visibly to the caller;
    /// a double failure (sync write + journal append) bumps
    /// `audit_failures_total{reason="wal_failed"}` and drops the entry.
    pub async fn log(&self, entry: Entry) {
        let (should_log, use_sync) = routing(self.mode, entry.effect);
        if !should_log {
            return;
        }

        if use_sync {
            if let Err(err) = self.writer.write_sync(&entry).await {
                warn!(error = %err, "sync audit write failed, falling back to WAL journal");
                if let Err(journal_err) = self.journal.append(&entry).await {
                    error!(error = %journal_err, "WAL journal append failed, dropping audit entry");
                    self.wal_failures.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_audit_failure("wal_failed");
                }
            }
        } else if !self.async_channel.try_send(entry) {
            warn!("audit async channel saturated, dropping allow entry");
            self.metrics.record_audit_channel_full();
        }
    }

    /// Replay the WAL journal against the configured writer, truncating
    /// it on success.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or a replayed
    /// write fails.
    pub async fn replay_wal(&self) -> Result<usize> {
        let replayed = self.journal.replay(self.writer.as_ref()).await?;
        if replayed > 0 {
            info!(replayed, "replayed audit WAL journal");
        }
        Ok(replayed)
    }

    /// Current WAL journal line count, for the `audit_wal_entries` gauge.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal file exists but cannot be read.
    pub async fn wal_len(&self) -> Result<usize> {
        self.journal.len().await
    }

    #[must_use]
    pub fn wal_failure_count(&self) -> u64 {
        self.wal_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn audit_channel_full_count(&self) -> u64 {
        self.async_channel.full_count()
    }

    /// Drain the async channel and close the backend writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer could not be closed cleanly.
    pub async fn shutdown(&self) -> Result<()> {
        self.async_channel.shutdown().await;
        self.writer.close().await
    }
}

/// In-memory [`AuditWriter`] test double. Records every call it receives
/// and can be configured to fail on command, so callers can exercise the
/// WAL fallback path deterministically.
#[derive(Debug, Default)]
pub struct RecordingAuditWriter {
    sync_entries: RwLock<Vec<Entry>>,
    async_entries: RwLock<Vec<Entry>>,
    fail_sync: std::sync::atomic::AtomicBool,
    closed: std::sync::atomic::AtomicBool,
}

impl RecordingAuditWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// After calling this, every subsequent `write_sync` fails until
    /// [`allow_sync`](Self::allow_sync) is called.
    pub fn fail_sync(&self) {
        self.fail_sync.store(true, Ordering::SeqCst);
    }

    pub fn allow_sync(&self) {
        self.fail_sync.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sync_entries(&self) -> Vec<Entry> {
        self.sync_entries.read().clone()
    }

    #[must_use]
    pub fn async_entries(&self) -> Vec<Entry> {
        self.async_entries.read().clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AuditWriter for RecordingAuditWriter {
    async fn write_sync(&self, entry: &Entry) -> Result<()> {
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(reaper_core::error::ReaperError::AuditError {
                reason: "simulated sync backend failure".to_string(),
            });
        }
        self.sync_entries.write().push(entry.clone());
        Ok(())
    }

    async fn write_async(&self, entry: Entry) -> Result<()> {
        self.async_entries.write().push(entry);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reaper_core::Effect;
    use std::collections::HashMap;

    fn sample_entry(effect: Effect) -> Entry {
        Entry {
            subject: "character:01ABC".to_string(),
            action: "say".to_string(),
            resource: "location:01XYZ".to_string(),
            effect,
            policy_id: String::new(),
            policy_name: String::new(),
            attributes: HashMap::new(),
            duration_us: 42,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn wal_append_then_replay_truncates_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit-wal.jsonl");
        let journal = WalJournal::new(&path);
        let entry = sample_entry(Effect::Deny);
        journal.append(&entry).await.unwrap();
        assert_eq!(journal.len().await.unwrap(), 1);

        let writer = RecordingAuditWriter::new();
        let replayed = journal.replay(&writer).await.unwrap();
        assert_eq!(replayed, 1);
        assert_eq!(journal.len().await.unwrap(), 0);
        assert_eq!(writer.sync_entries().len(), 1);
    }

    #[tokio::test]
    async fn replay_on_missing_journal_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.jsonl");
        let journal = WalJournal::new(&path);
        let writer = RecordingAuditWriter::new();
        assert_eq!(journal.replay(&writer).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replay_skips_malformed_lines_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit-wal.jsonl");
        tokio::fs::write(&path, b"not json\n").await.unwrap();
        let journal = WalJournal::new(&path);
        journal.append(&sample_entry(Effect::Deny)).await.unwrap();

        let writer = RecordingAuditWriter::new();
        let replayed = journal.replay(&writer).await.unwrap();
        assert_eq!(replayed, 1);
    }

    #[tokio::test]
    async fn sync_failure_falls_back_to_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit-wal.jsonl");
        let writer = Arc::new(RecordingAuditWriter::new());
        writer.fail_sync();
        let logger = AuditLogger::new(AuditMode::All, writer.clone(), &path);

        logger.log(sample_entry(Effect::Deny)).await;

        assert_eq!(logger.wal_len().await.unwrap(), 1);
        assert_eq!(logger.wal_failure_count(), 0);

        writer.allow_sync();
        let replayed = logger.replay_wal().await.unwrap();
        assert_eq!(replayed, 1);
        assert_eq!(logger.wal_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn allow_is_enqueued_async_only_in_all_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit-wal.jsonl");
        let writer = Arc::new(RecordingAuditWriter::new());
        let logger = AuditLogger::new(AuditMode::All, writer.clone(), &path);

        logger.log(sample_entry(Effect::Allow)).await;
        logger.async_channel.shutdown().await;

        assert_eq!(writer.async_entries().len(), 1);
        assert!(writer.sync_entries().is_empty());
    }

    #[tokio::test]
    async fn minimal_mode_never_logs_allow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit-wal.jsonl");
        let writer = Arc::new(RecordingAuditWriter::new());
        let logger = AuditLogger::new(AuditMode::Minimal, writer.clone(), &path);

        logger.log(sample_entry(Effect::Allow)).await;
        logger.async_channel.shutdown().await;

        assert!(writer.async_entries().is_empty());
    }

    #[tokio::test]
    async fn double_failure_increments_wal_failure_counter_without_panicking() {
        let writer = Arc::new(RecordingAuditWriter::new());
        writer.fail_sync();
        // A directory as the journal path makes every open() fail.
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(AuditMode::All, writer, dir.path());

        logger.log(sample_entry(Effect::Deny)).await;
        assert_eq!(logger.wal_failure_count(), 1);
    }

    #[tokio::test]
    async fn async_channel_drops_and_counts_when_saturated() {
        let writer = Arc::new(RecordingAuditWriter::new());
        let channel = AsyncAuditChannel::start(writer, 0);
        // capacity 0: the very first try_send still has a chance to race
        // the consumer, so send twice in a tight loop and require at
        // least one rejection to exercise the counter.
        let mut rejected = false;
        for _ in 0..50 {
            if !channel.try_send(sample_entry(Effect::Allow)) {
                rejected = true;
                break;
            }
        }
        channel.shutdown().await;
        if rejected {
            assert!(channel.full_count() >= 1);
        }
    }
}
