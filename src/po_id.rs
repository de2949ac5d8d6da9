// src/po_id.rs

use async_trait::async_trait;
use fs2::FileExt;
use regex::Regex;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

static RECORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d{4})-)?(\d+)$").expect("static regex"));

/// A purchase order number, printed as `<year>-<seq:03>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoId {
    pub year: i32,
    pub seq: u64,
}

impl fmt::Display for PoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", self.year, self.seq)
    }
}

/// Content of the counter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// `None` for a bare `<number>` written by older runs.
    pub year: Option<i32>,
    pub value: u64,
}

impl CounterRecord {
    /// `Ok(None)` for empty content, which counts as a first run.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let caps = RECORD_RE
            .captures(text)
            .ok_or_else(|| Error::CounterFormat(text.to_string()))?;
        let year = caps
            .get(1)
            .map(|m| m.as_str().parse::<i32>())
            .transpose()
            .map_err(|_| Error::CounterFormat(text.to_string()))?;
        let value = caps[2]
            .parse::<u64>()
            .map_err(|_| Error::CounterFormat(text.to_string()))?;
        Ok(Some(Self { year, value }))
    }
}

impl fmt::Display for CounterRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year {
            Some(year) => write!(f, "{year}-{}", self.value),
            None => write!(f, "{}", self.value),
        }
    }
}

/// How the stored number relates to the ID handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    /// The store holds the last issued number; sequences start at 1.
    Increment,
    /// The store holds the next number to hand out; sequences start at 0.
    Reserve,
}

impl CounterMode {
    fn base(self) -> u64 {
        match self {
            CounterMode::Increment => 1,
            CounterMode::Reserve => 0,
        }
    }

    /// Pure step: the ID to issue now and the record to write back.
    ///
    /// A record without a year is treated as belonging to the current year.
    pub fn advance(self, record: Option<CounterRecord>, year: i32) -> Result<(PoId, CounterRecord)> {
        let current = record.filter(|r| r.year.is_none_or(|y| y == year));
        if let Some(r) = record {
            if current.is_none() {
                info!(stored_year = ?r.year, year, "Counter is from a previous year, resetting");
            }
        }

        let seq = match (self, current) {
            (_, None) => Some(self.base()),
            (CounterMode::Increment, Some(r)) => r.value.checked_add(1),
            (CounterMode::Reserve, Some(r)) => Some(r.value),
        };
        let stored = seq.and_then(|seq| match self {
            CounterMode::Increment => Some(seq),
            CounterMode::Reserve => seq.checked_add(1),
        });
        let (Some(seq), Some(stored)) = (seq, stored) else {
            let text = current.map(|r| r.to_string()).unwrap_or_default();
            return Err(Error::CounterFormat(format!("{text} (sequence exhausted)")));
        };

        Ok((
            PoId { year, seq },
            CounterRecord {
                year: Some(year),
                value: stored,
            },
        ))
    }
}

/// Held for one read-modify-write cycle of the counter.
///
/// The lock is an advisory lock on an open file, so the OS drops it when the
/// holder exits, crashed or not. The lock file itself stays on disk.
#[derive(Debug, Default)]
pub struct CounterLock {
    held: Option<(PathBuf, File)>,
}

impl CounterLock {
    pub fn none() -> Self {
        Self::default()
    }

    /// Exclusive lock on the file next to the counter. Fails if another run holds it.
    pub fn acquire(path: PathBuf) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(Error::CounterLocked { path });
            }
            return Err(e.into());
        }

        // Holder's PID, for whoever finds the file while it is locked.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(lock = %path.display(), "Counter lock acquired");
        Ok(Self {
            held: Some((path, file)),
        })
    }
}

impl Drop for CounterLock {
    fn drop(&mut self) {
        if let Some((path, file)) = self.held.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(lock = %path.display(), error = %e, "Failed to release counter lock");
            }
        }
    }
}

/// Where the counter text lives.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// `None` when the counter has never been written.
    async fn read(&self) -> Result<Option<String>>;

    async fn write(&self, content: &str) -> Result<()>;

    async fn lock(&self) -> Result<CounterLock> {
        Ok(CounterLock::none())
    }

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// Plain text file on local disk.
#[derive(Debug, Clone)]
pub struct FileCounter {
    path: PathBuf,
}

impl FileCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for FileCounter {
    async fn read(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, content: &str) -> Result<()> {
        Self::ensure_parent(&self.path)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, format!("{content}\n")).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn lock(&self) -> Result<CounterLock> {
        Self::ensure_parent(&self.path)?;
        CounterLock::acquire(self.lock_path())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Sequential PO-ID generator over any counter store.
pub struct PoCounter {
    store: Box<dyn CounterStore>,
    mode: CounterMode,
}

impl PoCounter {
    pub fn new(store: Box<dyn CounterStore>, mode: CounterMode) -> Self {
        Self { store, mode }
    }

    async fn load(&self) -> Result<Option<CounterRecord>> {
        match self.store.read().await? {
            Some(content) => CounterRecord::parse(&content),
            None => {
                info!(store = %self.store.describe(), "No counter yet, treating as first run");
                Ok(None)
            }
        }
    }

    /// The ID `next` would hand out, without touching the store.
    pub async fn peek(&self, year: i32) -> Result<PoId> {
        let record = self.load().await?;
        Ok(self.mode.advance(record, year)?.0)
    }

    /// Read, advance and write back under the store's lock.
    pub async fn next(&self, year: i32) -> Result<PoId> {
        let _lock = self.store.lock().await?;
        let record = self.load().await?;
        let (id, stored) = self.mode.advance(record, year)?;
        self.store.write(&stored.to_string()).await?;
        info!(po_id = %id, stored = %stored, store = %self.store.describe(), "PO ID issued");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_forms() {
        assert_eq!(
            CounterRecord::parse("2025-7\n").unwrap(),
            Some(CounterRecord {
                year: Some(2025),
                value: 7
            })
        );
        assert_eq!(
            CounterRecord::parse(" 12 ").unwrap(),
            Some(CounterRecord {
                year: None,
                value: 12
            })
        );
        assert_eq!(CounterRecord::parse("   \n").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["abc", "2025-", "-5", "2025-x", "25-3"] {
            assert!(
                matches!(CounterRecord::parse(bad), Err(Error::CounterFormat(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_zero_pads() {
        assert_eq!(PoId { year: 2025, seq: 7 }.to_string(), "2025-007");
        assert_eq!(PoId { year: 2025, seq: 1234 }.to_string(), "2025-1234");
    }

    #[test]
    fn test_increment_same_year() {
        let rec = CounterRecord::parse("2025-41").unwrap();
        let (id, stored) = CounterMode::Increment.advance(rec, 2025).unwrap();
        assert_eq!(id, PoId { year: 2025, seq: 42 });
        assert_eq!(stored.to_string(), "2025-42");
    }

    #[test]
    fn test_reserve_same_year() {
        let rec = CounterRecord::parse("2025-41").unwrap();
        let (id, stored) = CounterMode::Reserve.advance(rec, 2025).unwrap();
        assert_eq!(id, PoId { year: 2025, seq: 41 });
        assert_eq!(stored.to_string(), "2025-42");
    }

    #[test]
    fn test_previous_year_resets() {
        let rec = CounterRecord::parse("2024-310").unwrap();
        let (id, stored) = CounterMode::Increment.advance(rec, 2025).unwrap();
        assert_eq!(id.to_string(), "2025-001");
        assert_eq!(stored.to_string(), "2025-1");

        let (id, stored) = CounterMode::Reserve.advance(rec, 2025).unwrap();
        assert_eq!(id.to_string(), "2025-000");
        assert_eq!(stored.to_string(), "2025-1");
    }

    #[test]
    fn test_missing_record_starts_at_base() {
        let (id, _) = CounterMode::Increment.advance(None, 2026).unwrap();
        assert_eq!(id.to_string(), "2026-001");
        let (id, stored) = CounterMode::Reserve.advance(None, 2026).unwrap();
        assert_eq!(id.to_string(), "2026-000");
        assert_eq!(stored.value, 1);
    }

    #[test]
    fn test_bare_number_counts_as_current_year() {
        let rec = CounterRecord::parse("5").unwrap();
        let (id, stored) = CounterMode::Reserve.advance(rec, 2025).unwrap();
        assert_eq!(id.to_string(), "2025-005");
        assert_eq!(stored.to_string(), "2025-6");
    }

    #[tokio::test]
    async fn test_file_counter_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids").join("last_po_id.txt");

        let counter = PoCounter::new(Box::new(FileCounter::new(&path)), CounterMode::Increment);
        assert_eq!(counter.peek(2025).await.unwrap().to_string(), "2025-001");
        assert_eq!(counter.next(2025).await.unwrap().to_string(), "2025-001");
        assert_eq!(counter.next(2025).await.unwrap().to_string(), "2025-002");

        // A fresh instance picks up where the file left off.
        let counter = PoCounter::new(Box::new(FileCounter::new(&path)), CounterMode::Increment);
        assert_eq!(counter.peek(2025).await.unwrap().to_string(), "2025-003");
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "2025-2");
        // Released after each cycle.
        FileCounter::new(&path).lock().await.unwrap();
    }

    #[tokio::test]
    async fn test_peek_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_po_id.txt");
        fs::write(&path, "2025-9").unwrap();

        let counter = PoCounter::new(Box::new(FileCounter::new(&path)), CounterMode::Increment);
        counter.peek(2025).await.unwrap();
        counter.peek(2025).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "2025-9");
    }

    #[tokio::test]
    async fn test_held_lock_blocks_next() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_po_id.txt");
        let store = FileCounter::new(&path);
        let _held = store.lock().await.unwrap();

        let counter = PoCounter::new(Box::new(store.clone()), CounterMode::Increment);
        let err = counter.next(2025).await.unwrap_err();
        assert!(matches!(err, Error::CounterLocked { .. }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_po_id.txt");
        fs::write(&path, "not a number").unwrap();

        let counter = PoCounter::new(Box::new(FileCounter::new(&path)), CounterMode::Reserve);
        assert!(matches!(
            counter.next(2025).await,
            Err(Error::CounterFormat(_))
        ));
    }

    #[test]
    fn test_exhausted_sequence_is_an_error() {
        let rec = CounterRecord::parse("2025-18446744073709551615").unwrap();
        assert!(matches!(
            CounterMode::Increment.advance(rec, 2025),
            Err(Error::CounterFormat(_))
        ));
        assert!(matches!(
            CounterMode::Reserve.advance(rec, 2025),
            Err(Error::CounterFormat(_))
        ));
        // A new year starts over regardless.
        let (id, _) = CounterMode::Increment.advance(rec, 2026).unwrap();
        assert_eq!(id.to_string(), "2026-001");
    }

    #[tokio::test]
    async fn test_lock_left_by_dead_run_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_po_id.txt");
        fs::write(&path, "2025-4").unwrap();
        // A killed run leaves its lock file behind without holding it.
        fs::write(dir.path().join("last_po_id.txt.lock"), "4242\n").unwrap();

        let counter = PoCounter::new(Box::new(FileCounter::new(&path)), CounterMode::Increment);
        assert_eq!(counter.next(2025).await.unwrap().to_string(), "2025-005");
        assert_eq!(counter.next(2025).await.unwrap().to_string(), "2025-006");
    }

    #[tokio::test]
    async fn test_lock_file_names_holder() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCounter::new(dir.path().join("last_po_id.txt"));
        let held = store.lock().await.unwrap();
        let pid = fs::read_to_string(dir.path().join("last_po_id.txt.lock")).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
        drop(held);
        store.lock().await.unwrap();
    }
}
