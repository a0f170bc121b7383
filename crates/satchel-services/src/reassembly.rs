//! Chunk reassembly — rebuilds attachment files from size-bounded datagrams
//! that arrive in any order, duplicated, or not at all.
//!
//! One transfer is identified by (recipient account, file name). The first
//! chunk observed for a key fixes the slot count, capped at a configured
//! maximum since the declaration arrives off the wire; every chunk stores
//! into its declared slot, so arrival order never matters. The ingest call that
//! fills the last slot assembles and persists the file synchronously, then
//! drops the transfer state. Transfers that never complete are evicted
//! after an idle timeout, checked on every ingest and by the daemon's
//! periodic sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use satchel_core::wire::AttachmentFrame;

use crate::mailbox::{MailboxStore, StoreError};

/// Identifies one in-flight transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub account: String,
    pub file_name: String,
}

/// Mutable reassembly state for one transfer.
struct ChunkSet {
    slots: Vec<Option<Bytes>>,
    filled: usize,
    last_chunk_at: Instant,
}

impl ChunkSet {
    fn new(total: usize) -> Self {
        Self {
            slots: vec![None; total],
            filled: 0,
            last_chunk_at: Instant::now(),
        }
    }

    /// Store a chunk. Duplicates overwrite in place, idempotent by index.
    fn store(&mut self, index: usize, payload: Bytes) {
        if self.slots[index].is_none() {
            self.filled += 1;
        }
        self.slots[index] = Some(payload);
        self.last_chunk_at = Instant::now();
    }

    fn complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// Concatenate all slots in index order. Only valid once complete.
    fn assemble(&self) -> Vec<u8> {
        let total: usize = self.slots.iter().flatten().map(Bytes::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in self.slots.iter().flatten() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

// ── Errors and outcomes ───────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("chunk count must be at least 1")]
    ZeroChunkCount,

    /// The declared count doubles as the slot allocation size, so it is
    /// bounded before anything is allocated.
    #[error("chunk count {declared} exceeds the limit of {max}")]
    TooManyChunks { declared: u32, max: u32 },

    #[error("chunk index {index} out of range for {count} chunks")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("chunk declares {got} total chunks, transfer started with {expected}")]
    ChunkCountMismatch { expected: u32, got: u32 },

    #[error("account not found: {0}")]
    UnknownAccount(String),

    /// Persistence failed; the transfer state is retained so a
    /// retransmitted final chunk can retry assembly.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one ingest call did.
#[derive(Debug, PartialEq, Eq)]
pub enum Ingest {
    /// Chunk stored, transfer still missing slots.
    Pending { filled: usize, total: usize },
    /// Final slot filled; the file was assembled and persisted.
    Completed { bytes: usize },
}

// ── Reassembler ───────────────────────────────────────────────────────────────

/// Owns the process-wide reassembly table. All mutation goes through
/// [`ingest`](Reassembler::ingest); the sharded map makes the key the unit
/// of mutual exclusion if the receive loop is ever parallelised.
pub struct Reassembler {
    active: DashMap<TransferKey, ChunkSet>,
    store: Arc<dyn MailboxStore>,
    idle_timeout: Duration,
    max_chunks: u32,
}

impl Reassembler {
    pub fn new(store: Arc<dyn MailboxStore>, idle_timeout: Duration, max_chunks: u32) -> Self {
        Self {
            active: DashMap::new(),
            store,
            idle_timeout,
            max_chunks,
        }
    }

    /// Ingest one attachment chunk.
    ///
    /// The first chunk of a transfer validates the recipient and writes the
    /// email record; the chunk that fills the last slot writes the file and
    /// removes the transfer. Constraint violations leave existing state
    /// untouched.
    pub fn ingest(
        &self,
        frame: &AttachmentFrame,
        timestamp: u64,
    ) -> Result<Ingest, IngestError> {
        self.evict_idle();

        if frame.chunk_count == 0 {
            return Err(IngestError::ZeroChunkCount);
        }
        if frame.chunk_count > self.max_chunks {
            return Err(IngestError::TooManyChunks {
                declared: frame.chunk_count,
                max: self.max_chunks,
            });
        }
        if frame.chunk_index >= frame.chunk_count {
            return Err(IngestError::IndexOutOfRange {
                index: frame.chunk_index,
                count: frame.chunk_count,
            });
        }

        let key = TransferKey {
            account: frame.to.clone(),
            file_name: frame.file_name.clone(),
        };

        // Creation happens under the entry guard, so chunks racing for the
        // same key on parallel workers see exactly one insertion.
        let mut created = false;
        let mut set = match self.active.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                if !self.store.account_exists(&frame.to) {
                    return Err(IngestError::UnknownAccount(frame.to.clone()));
                }
                created = true;
                entry.insert(ChunkSet::new(frame.chunk_count as usize))
            }
        };

        if created {
            // The email record is written once per transfer, on whichever
            // chunk created the set. Still under the guard: a concurrent
            // second chunk must not observe the set before the record
            // exists. A failure here is independent of the file transfer
            // itself.
            if let Err(e) =
                self.store
                    .append_email(&frame.to, &frame.from, &frame.body, timestamp)
            {
                tracing::warn!(
                    account = %frame.to,
                    error = %e,
                    "email record for attachment not written"
                );
            }
        }

        if set.slots.len() != frame.chunk_count as usize {
            return Err(IngestError::ChunkCountMismatch {
                expected: set.slots.len() as u32,
                got: frame.chunk_count,
            });
        }

        set.store(frame.chunk_index as usize, frame.payload.clone());
        if !set.complete() {
            return Ok(Ingest::Pending {
                filled: set.filled,
                total: set.slots.len(),
            });
        }

        let data = set.assemble();
        // Release the shard guard before touching the map again.
        drop(set);

        // On write failure the entry stays in the table, so retransmitting
        // the final chunk re-attempts assembly.
        self.store
            .write_file(&key.account, &key.file_name, &data)?;
        self.active.remove(&key);
        Ok(Ingest::Completed { bytes: data.len() })
    }

    /// Drop transfers with no chunk activity within the idle timeout.
    pub fn evict_idle(&self) {
        self.active.retain(|key, set| {
            let idle = set.last_chunk_at.elapsed() > self.idle_timeout;
            if idle {
                tracing::warn!(
                    account = %key.account,
                    file = %key.file_name,
                    filled = set.filled,
                    total = set.slots.len(),
                    "evicting idle transfer"
                );
            }
            !idle
        });
    }

    /// Number of transfers currently in flight.
    pub fn in_progress(&self) -> usize {
        self.active.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
