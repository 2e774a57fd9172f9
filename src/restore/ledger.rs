use crate::error::LedgerError;
use crate::restore::comment::CommentKey;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Lifecycle of a delivery record. `Pending` is promoted to `Verified` or
/// demoted to `Lost` by the reconciler; `Verified` falls to `Lost` only
/// when re-verification is enabled; `Lost` re-enters `Pending` when the
/// dispatcher resends the comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Verified,
    Lost,
}

impl DeliveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Lost => "lost",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durably recorded delivery, keyed by fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub fingerprint: String,
    pub bvid: String,
    pub cid: u64,
    pub text: String,
    pub progress_ms: u64,
    pub color: u32,
    pub font_size: u32,
    pub state: DeliveryState,
    pub remote_id: Option<u64>,
    pub created_at_epoch_secs: u64,
    pub last_checked_at_epoch_secs: Option<u64>,
}

impl DeliveryRecord {
    /// The normalized tuple this record was fingerprinted from.
    pub fn key(&self) -> CommentKey {
        CommentKey {
            text: self.text.clone(),
            progress_ms: self.progress_ms,
            color: self.color,
            font_size: self.font_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    AlreadyPending,
    /// A `Lost` record was overwritten by a fresh delivery.
    Reopened,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TargetCounts {
    pub pending: usize,
    pub verified: usize,
    pub lost: usize,
    pub oldest_pending_epoch_secs: Option<u64>,
}

/// Durable delivery ledger backed by a JSONL file.
///
/// Every operation takes an fs2 lock on a sidecar lock file for its whole
/// read-modify-write, so a dispatch run and a reconcile cycle (threads or
/// separate processes) serialize on the file instead of sharing memory.
/// No lock is ever held across a network call.
#[derive(Debug, Clone)]
pub struct Ledger {
    file: PathBuf,
    lock_file: PathBuf,
}

struct LockGuard {
    _file: fs::File,
}

impl Ledger {
    pub fn open(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let lock_file = file.with_extension("lock");
        Self { file, lock_file }
    }

    fn lock(&self, exclusive: bool) -> Result<LockGuard> {
        if let Some(parent) = self.lock_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)
            .with_context(|| format!("failed to open {}", self.lock_file.display()))?;
        if exclusive {
            file.lock_exclusive()
                .with_context(|| format!("failed to lock {}", self.lock_file.display()))?;
        } else {
            file.lock_shared()
                .with_context(|| format!("failed to lock {}", self.lock_file.display()))?;
        }
        Ok(LockGuard { _file: file })
    }

    fn read_records(&self) -> Result<Vec<DeliveryRecord>> {
        read_records_at(&self.file)
    }

    fn write_records(&self, records: &[DeliveryRecord]) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        fs::write(&self.file, out)
            .with_context(|| format!("failed to write {}", self.file.display()))?;
        Ok(())
    }

    /// Local-only lookup by fingerprint.
    pub fn lookup(&self, fingerprint: &str) -> Result<Option<DeliveryRecord>> {
        let _guard = self.lock(false)?;
        let records = self.read_records()?;
        Ok(records.into_iter().find(|r| r.fingerprint == fingerprint))
    }

    /// Record a confirmed submission as `Pending`.
    ///
    /// Idempotent: if the fingerprint is already `Pending` this is a no-op.
    /// A `Lost` record is overwritten in place (the comment was resent, so
    /// it re-enters the verification cycle). A `Verified` fingerprint
    /// yields `LedgerError::Conflict` (the caller decides whether that
    /// counts as already satisfied).
    pub fn upsert_pending(&self, record: DeliveryRecord) -> Result<UpsertOutcome> {
        let _guard = self.lock(true)?;
        let mut records = self.read_records()?;

        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.fingerprint == record.fingerprint)
        {
            return match existing.state {
                DeliveryState::Pending => Ok(UpsertOutcome::AlreadyPending),
                DeliveryState::Verified => Err(LedgerError::Conflict(record.fingerprint).into()),
                DeliveryState::Lost => {
                    *existing = record;
                    self.write_records(&records)?;
                    Ok(UpsertOutcome::Reopened)
                }
            };
        }

        records.push(record);
        self.write_records(&records)?;
        Ok(UpsertOutcome::Inserted)
    }

    /// Compare-and-set state transition. Fails with
    /// `LedgerError::StateMismatch` when a concurrent writer already moved
    /// the record, so exactly one of two racing transitions wins.
    pub fn transition(
        &self,
        fingerprint: &str,
        from: DeliveryState,
        to: DeliveryState,
        now_epoch_secs: u64,
    ) -> Result<()> {
        let _guard = self.lock(true)?;
        let mut records = self.read_records()?;

        let Some(record) = records.iter_mut().find(|r| r.fingerprint == fingerprint) else {
            return Err(LedgerError::NotFound(fingerprint.to_string()).into());
        };
        if record.state != from {
            return Err(LedgerError::StateMismatch {
                fingerprint: fingerprint.to_string(),
                expected: from,
                found: record.state,
            }
            .into());
        }

        record.state = to;
        record.last_checked_at_epoch_secs = Some(now_epoch_secs);
        self.write_records(&records)?;
        Ok(())
    }

    /// Refresh `last_checked_at` for records examined but left untouched.
    pub fn mark_checked(&self, fingerprints: &[String], now_epoch_secs: u64) -> Result<usize> {
        if fingerprints.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock(true)?;
        let mut records = self.read_records()?;
        let mut touched = 0usize;
        for record in &mut records {
            if fingerprints.iter().any(|fp| fp == &record.fingerprint) {
                record.last_checked_at_epoch_secs = Some(now_epoch_secs);
                touched += 1;
            }
        }
        if touched > 0 {
            self.write_records(&records)?;
        }
        Ok(touched)
    }

    /// Snapshot of all records for one video part, optionally filtered by
    /// state. Taken under the shared lock, so no torn reads across records.
    pub fn query_by_target(
        &self,
        cid: u64,
        state: Option<DeliveryState>,
    ) -> Result<Vec<DeliveryRecord>> {
        let _guard = self.lock(false)?;
        let records = self.read_records()?;
        Ok(records
            .into_iter()
            .filter(|r| r.cid == cid && state.is_none_or(|s| r.state == s))
            .collect())
    }

    /// Per-state totals for one video part, for status reporting.
    pub fn counts_by_target(&self, cid: u64) -> Result<TargetCounts> {
        let mut counts = TargetCounts::default();
        for record in self.query_by_target(cid, None)? {
            match record.state {
                DeliveryState::Pending => {
                    counts.pending += 1;
                    counts.oldest_pending_epoch_secs = Some(
                        counts
                            .oldest_pending_epoch_secs
                            .map_or(record.created_at_epoch_secs, |v| {
                                v.min(record.created_at_epoch_secs)
                            }),
                    );
                }
                DeliveryState::Verified => counts.verified += 1,
                DeliveryState::Lost => counts.lost += 1,
            }
        }
        Ok(counts)
    }

    /// Distinct (bvid, cid) pairs present in the ledger, in first-seen order.
    pub fn targets(&self) -> Result<Vec<(String, u64)>> {
        let _guard = self.lock(false)?;
        let records = self.read_records()?;
        let mut out: Vec<(String, u64)> = Vec::new();
        for record in records {
            if !out.iter().any(|(_, cid)| *cid == record.cid) {
                out.push((record.bvid, record.cid));
            }
        }
        Ok(out)
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

fn read_records_at(path: &Path) -> Result<Vec<DeliveryRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut out = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: DeliveryRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("failed to parse ledger line in {}", path.display()))?;
        out.push(record);
    }
    Ok(out)
}
