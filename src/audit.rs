//! Append-only audit trail of lookups
//!
//! Every lookup is recorded with the caller, what was asked and whether
//! anything was found. Entries are never mutated or deleted. When a file
//! path is configured each entry is appended to it as one JSON line by a
//! background writer task, and the file is reloaded on the next start.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::{GatewayError, GatewayResult};
use crate::model::{CallerIdentity, QueryKind};

/// A recorded lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Sequential, starting at 1
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub caller: CallerIdentity,
    pub kind: QueryKind,
    pub parameter: String,
    pub found: bool,
}

/// A lookup about to be recorded
#[derive(Debug, Clone)]
pub struct LookupEvent {
    pub caller: CallerIdentity,
    pub kind: QueryKind,
    pub parameter: String,
    pub found: bool,
}

/// Conjunctive audit filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuditFilter {
    pub caller_id: Option<String>,
    /// From the start of this day (UTC)
    pub from: Option<NaiveDate>,
    /// Through the end of this day (UTC)
    pub to: Option<NaiveDate>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(caller_id) = &self.caller_id {
            if &entry.caller.id != caller_id {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from.and_time(NaiveTime::MIN).and_utc() {
                return false;
            }
        }
        if let Some(to) = self.to {
            // inclusive through the end of the day
            let next_day = to.succ_opt().unwrap_or(NaiveDate::MAX);
            if entry.timestamp >= next_day.and_time(NaiveTime::MIN).and_utc() {
                return false;
            }
        }
        true
    }
}

enum WriterCommand {
    Append(AuditEntry),
    Flush(oneshot::Sender<()>),
}

/// In-memory audit trail with optional JSON-lines persistence
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    writer: Option<mpsc::UnboundedSender<WriterCommand>>,
}

impl AuditLog {
    /// Memory-only trail
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            writer: None,
        }
    }

    /// File-backed trail. Must be called inside a tokio runtime.
    ///
    /// Existing entries are loaded. A file that does not parse is renamed to
    /// `<name>.corrupt-<timestamp>` and a fresh trail is started, so earlier
    /// history is never overwritten.
    pub fn open(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref().to_path_buf();
        let source = path.display().to_string();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| GatewayError::data_load(&source, e.to_string()))?;
        }

        let entries = if path.exists() {
            match read_trail(&path) {
                Ok(entries) => {
                    tracing::info!(path = %source, entries = entries.len(), "Audit trail loaded");
                    entries
                }
                Err(e) => {
                    let aside = set_aside(&path)
                        .map_err(|err| GatewayError::data_load(&source, err.to_string()))?;
                    tracing::warn!(
                        path = %source,
                        moved_to = %aside.display(),
                        error = %e,
                        "Audit trail unreadable, moved aside and starting a new one"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| GatewayError::data_load(&source, e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_trail(path, tokio::fs::File::from_std(file), rx));

        Ok(Self {
            entries: Mutex::new(entries),
            writer: Some(tx),
        })
    }

    /// Append a lookup and return the stored entry.
    pub fn record(&self, event: LookupEvent) -> AuditEntry {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let id = entries.last().map(|e| e.id).unwrap_or(0) + 1;
        let entry = AuditEntry {
            id,
            timestamp: Utc::now(),
            caller: event.caller,
            kind: event.kind,
            parameter: event.parameter,
            found: event.found,
        };
        entries.push(entry.clone());

        // queued under the lock so file order matches id order
        if let Some(writer) = &self.writer {
            if writer.send(WriterCommand::Append(entry.clone())).is_err() {
                tracing::error!(audit_id = id, "Audit writer stopped, entry kept in memory only");
            }
        }
        drop(entries);

        tracing::info!(
            audit_id = id,
            caller = %entry.caller.id,
            kind = ?entry.kind,
            parameter = %entry.parameter,
            found = entry.found,
            "Lookup recorded"
        );

        entry
    }

    /// Wait until every entry recorded so far has been written to the file.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if writer.send(WriterCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Entries matching every set filter, in id order
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn read_trail(path: &Path) -> Result<Vec<AuditEntry>, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<AuditEntry>(line).map_err(|e| format!("line {}: {}", n + 1, e))
        })
        .collect()
}

fn set_aside(path: &Path) -> std::io::Result<PathBuf> {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));
    let aside = path.with_file_name(name);
    std::fs::rename(path, &aside)?;
    Ok(aside)
}

async fn write_trail(
    path: PathBuf,
    mut file: tokio::fs::File,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Append(entry) => {
                let mut line = match serde_json::to_vec(&entry) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(audit_id = entry.id, error = %e, "Failed to encode audit entry");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = file.write_all(&line).await {
                    tracing::error!(path = %path.display(), audit_id = entry.id, error = %e, "Failed to persist audit entry");
                }
            }
            WriterCommand::Flush(done) => {
                if let Err(e) = file.flush().await {
                    tracing::error!(path = %path.display(), error = %e, "Failed to flush audit trail");
                }
                let _ = done.send(());
            }
        }
    }

    let _ = file.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn caller(id: &str) -> CallerIdentity {
        CallerIdentity::new(id, id.to_uppercase(), "coordinator")
    }

    fn event(caller_id: &str, parameter: &str, found: bool) -> LookupEvent {
        LookupEvent {
            caller: caller(caller_id),
            kind: QueryKind::ByNumber,
            parameter: parameter.to_string(),
            found,
        }
    }

    fn entry_at(id: u64, caller_id: &str, timestamp: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id,
            timestamp,
            caller: caller(caller_id),
            kind: QueryKind::ByName,
            parameter: "ANA".to_string(),
            found: true,
        }
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let log = AuditLog::in_memory();
        assert_eq!(log.count(), 0);

        let first = log.record(event("a", "1", true));
        let second = log.record(event("b", "2", false));
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(!second.found);
        assert_eq!(log.count(), 2);
    }

    #[test]
    fn test_filter_by_caller() {
        let log = AuditLog::in_memory();
        log.record(event("orlando", "1", true));
        log.record(event("admin", "2", true));
        log.record(event("orlando", "3", false));

        let filter = AuditFilter {
            caller_id: Some("orlando".to_string()),
            ..AuditFilter::default()
        };
        let hits = log.query(&filter);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|e| e.caller.id == "orlando"));
        assert_eq!(log.query(&AuditFilter::default()).len(), 3);
    }

    #[test]
    fn test_date_range_is_inclusive_through_end_of_day() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let filter = AuditFilter {
            caller_id: None,
            from: Some(day),
            to: Some(day),
        };

        let before = entry_at(1, "a", Utc.with_ymd_and_hms(2026, 3, 7, 23, 59, 59).unwrap());
        let start = entry_at(2, "a", Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).unwrap());
        let late = entry_at(3, "a", Utc.with_ymd_and_hms(2026, 3, 8, 23, 59, 59).unwrap());
        let after = entry_at(4, "a", Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap());

        assert!(!filter.matches(&before));
        assert!(filter.matches(&start));
        assert!(filter.matches(&late));
        assert!(!filter.matches(&after));
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let filter = AuditFilter {
            caller_id: Some("a".to_string()),
            from: NaiveDate::from_ymd_opt(2026, 1, 1),
            to: None,
        };
        let ts = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        assert!(filter.matches(&entry_at(1, "a", ts)));
        assert!(!filter.matches(&entry_at(2, "b", ts)));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("trail.jsonl");

        let log = AuditLog::open(&path).unwrap();
        log.record(event("a", "1", true));
        log.record(event("a", "2", false));
        log.flush().await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let reopened = AuditLog::open(&path).unwrap();
        assert_eq!(reopened.count(), 2);
        let next = reopened.record(event("b", "3", true));
        assert_eq!(next.id, 3);
        reopened.flush().await;

        // appended, earlier lines untouched
        let content = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<u64> = content
            .lines()
            .map(|l| serde_json::from_str::<AuditEntry>(l).unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trail.jsonl");

        let log = AuditLog::open(&path).unwrap();
        for i in 0..3 {
            log.record(event("a", &i.to_string(), true));
        }
        log.flush().await;
        drop(log);

        let mut damaged = std::fs::read_to_string(&path).unwrap();
        damaged.push('x');
        std::fs::write(&path, &damaged).unwrap();

        let reopened = AuditLog::open(&path).unwrap();
        assert_eq!(reopened.count(), 0);
        assert_eq!(reopened.record(event("b", "9", true)).id, 1);
        reopened.flush().await;

        let aside: Vec<PathBuf> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("trail.jsonl.corrupt-"))
            })
            .collect();
        assert_eq!(aside.len(), 1);
        assert_eq!(std::fs::read_to_string(&aside[0]).unwrap(), damaged);

        let fresh = std::fs::read_to_string(&path).unwrap();
        assert_eq!(fresh.lines().count(), 1);
    }

    #[test]
    fn test_concurrent_appends_have_unique_ids() {
        let log = std::sync::Arc::new(AuditLog::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.record(event(&format!("c{t}"), &i.to_string(), true));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut ids: Vec<u64> = log.query(&AuditFilter::default()).iter().map(|e| e.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 400);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&400));
    }
}
