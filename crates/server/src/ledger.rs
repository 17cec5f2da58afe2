//! Durable record of upload sessions and per-chunk receipt state.
//!
//! [`Ledger`] is the seam between the session service and whatever storage
//! backs it; the contract mirrors a transactional key-value store with one
//! atomic primitive, [`Ledger::claim_chunk`]: an insert that conflicts on
//! the `(session, index)` key. Claim exclusivity is what makes concurrent
//! chunk writes safe without any file locking.
//!
//! [`MemoryLedger`] is the in-process implementation. A relational backend
//! would map `claim_chunk` to an insert under a uniqueness constraint and
//! `lock_session` to a `SELECT ... FOR UPDATE`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use chunkferry_protocol::SessionStatus;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use uuid::Uuid;

/// Boxed future returned by ledger methods.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Errors produced by a ledger backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// One upload session row.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub filename: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub status: SessionStatus,
    /// Set exactly once, when the session transitions to `Completed`.
    pub final_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Receipt state of one claimed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptState {
    /// Claimed; write in flight or abandoned.
    Receiving,
    /// Write completed and acknowledged.
    Received,
}

#[derive(Debug, Clone)]
struct ChunkReceipt {
    state: ReceiptState,
    received_at: DateTime<Utc>,
}

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the chunk index now.
    Claimed,
    /// Someone claimed it earlier; not an error.
    AlreadyClaimed,
}

/// Session and chunk bookkeeping with atomic claim semantics.
pub trait Ledger: Send + Sync {
    /// Finds the session for `(filename, total_size)` or creates one.
    ///
    /// Safe under concurrent identical calls: exactly one session exists
    /// afterwards and every caller observes its id. Also returns the
    /// indices already `Received`, for resume.
    fn find_or_create_session(
        &self,
        filename: &str,
        total_size: u64,
        total_chunks: u32,
    ) -> LedgerFuture<'_, (SessionRecord, Vec<u32>)>;

    /// Atomically claims `(session_id, chunk_index)`.
    fn claim_chunk(&self, session_id: &str, chunk_index: u32) -> LedgerFuture<'_, ClaimOutcome>;

    /// Transitions a claim to `Received`. Idempotent.
    fn mark_received(&self, session_id: &str, chunk_index: u32) -> LedgerFuture<'_, ()>;

    /// Number of chunks in `Received` state.
    fn count_received(&self, session_id: &str) -> LedgerFuture<'_, u32>;

    fn get_session(&self, session_id: &str) -> LedgerFuture<'_, SessionRecord>;

    /// Exclusive per-session lock serializing finalize attempts.
    ///
    /// Held across the completeness check through the commit; must not
    /// block operations on other sessions.
    fn lock_session(&self, session_id: &str) -> LedgerFuture<'_, OwnedMutexGuard<()>>;

    /// Commits `status = Completed` and the final hash together.
    fn commit_completed(&self, session_id: &str, hash: &str) -> LedgerFuture<'_, ()>;
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    /// (filename, total_size) -> session id, for idempotent init.
    by_key: HashMap<(String, u64), String>,
    chunks: HashMap<(String, u32), ChunkReceipt>,
}

/// In-process ledger. All mutations happen under one mutex, which is what
/// gives `claim_chunk` its insert-or-conflict atomicity.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
    finalize_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receipt state and timestamp for a chunk, if it was ever claimed.
    pub fn receipt(
        &self,
        session_id: &str,
        chunk_index: u32,
    ) -> Option<(ReceiptState, DateTime<Utc>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .chunks
            .get(&(session_id.to_string(), chunk_index))
            .map(|r| (r.state, r.received_at))
    }

    fn received_indices(inner: &Inner, session_id: &str) -> Vec<u32> {
        let mut indices: Vec<u32> = inner
            .chunks
            .iter()
            .filter(|((id, _), receipt)| id == session_id && receipt.state == ReceiptState::Received)
            .map(|((_, index), _)| *index)
            .collect();
        indices.sort_unstable();
        indices
    }
}

impl Ledger for MemoryLedger {
    fn find_or_create_session(
        &self,
        filename: &str,
        total_size: u64,
        total_chunks: u32,
    ) -> LedgerFuture<'_, (SessionRecord, Vec<u32>)> {
        let result = {
            let mut inner = self.inner.lock().unwrap();
            let key = (filename.to_string(), total_size);

            let existing = inner
                .by_key
                .get(&key)
                .and_then(|id| inner.sessions.get(id))
                .cloned();
            let record = match existing {
                Some(record) => record,
                None => {
                    let id = Uuid::new_v4().to_string();
                    let record = SessionRecord {
                        id: id.clone(),
                        filename: filename.to_string(),
                        total_size,
                        total_chunks,
                        status: SessionStatus::Uploading,
                        final_hash: None,
                        created_at: Utc::now(),
                    };
                    inner.sessions.insert(id.clone(), record.clone());
                    inner.by_key.insert(key, id.clone());
                    info!(session = %id, filename, total_chunks, "upload session created");
                    record
                }
            };

            let received = Self::received_indices(&inner, &record.id);
            Ok((record, received))
        };
        Box::pin(async move { result })
    }

    fn claim_chunk(&self, session_id: &str, chunk_index: u32) -> LedgerFuture<'_, ClaimOutcome> {
        let result = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.sessions.contains_key(session_id) {
                Err(LedgerError::SessionNotFound(session_id.to_string()))
            } else {
                let key = (session_id.to_string(), chunk_index);
                if inner.chunks.contains_key(&key) {
                    debug!(session = %session_id, chunk = chunk_index, "claim conflict");
                    Ok(ClaimOutcome::AlreadyClaimed)
                } else {
                    inner.chunks.insert(
                        key,
                        ChunkReceipt {
                            state: ReceiptState::Receiving,
                            received_at: Utc::now(),
                        },
                    );
                    Ok(ClaimOutcome::Claimed)
                }
            }
        };
        Box::pin(async move { result })
    }

    fn mark_received(&self, session_id: &str, chunk_index: u32) -> LedgerFuture<'_, ()> {
        let result = {
            let mut inner = self.inner.lock().unwrap();
            let key = (session_id.to_string(), chunk_index);
            if let Some(receipt) = inner.chunks.get_mut(&key)
                && receipt.state == ReceiptState::Receiving
            {
                receipt.state = ReceiptState::Received;
                receipt.received_at = Utc::now();
            }
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn count_received(&self, session_id: &str) -> LedgerFuture<'_, u32> {
        let result = {
            let inner = self.inner.lock().unwrap();
            Ok(Self::received_indices(&inner, session_id).len() as u32)
        };
        Box::pin(async move { result })
    }

    fn get_session(&self, session_id: &str) -> LedgerFuture<'_, SessionRecord> {
        let result = {
            let inner = self.inner.lock().unwrap();
            inner
                .sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| LedgerError::SessionNotFound(session_id.to_string()))
        };
        Box::pin(async move { result })
    }

    fn lock_session(&self, session_id: &str) -> LedgerFuture<'_, OwnedMutexGuard<()>> {
        let lock = {
            let inner = self.inner.lock().unwrap();
            if !inner.sessions.contains_key(session_id) {
                Err(LedgerError::SessionNotFound(session_id.to_string()))
            } else {
                let mut locks = self.finalize_locks.lock().unwrap();
                Ok(Arc::clone(
                    locks
                        .entry(session_id.to_string())
                        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
                ))
            }
        };
        Box::pin(async move {
            let lock = lock?;
            Ok(lock.lock_owned().await)
        })
    }

    fn commit_completed(&self, session_id: &str, hash: &str) -> LedgerFuture<'_, ()> {
        let result = {
            let mut inner = self.inner.lock().unwrap();
            match inner.sessions.get_mut(session_id) {
                None => Err(LedgerError::SessionNotFound(session_id.to_string())),
                Some(session) => {
                    // Monotonic: a completed session never reverts or rehashes.
                    if session.status == SessionStatus::Uploading {
                        session.status = SessionStatus::Completed;
                        session.final_hash = Some(hash.to_string());
                    }
                    Ok(())
                }
            }
        };
        Box::pin(async move { result })
    }
}
