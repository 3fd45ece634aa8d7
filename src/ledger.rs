//! Deferred release of allocations the engine may still be reading.
//!
//! Values written into an engine collection, the host memory they alias and
//! names the engine allocated for us cannot be released while the engine
//! call that consumes them is running. They wait here until the owner of the
//! ledger decides the engine is done and calls [`CleanupLedger::flush`].
//!
//! Entries are released in push order, so a value must be pushed before the
//! pin holding the memory it aliases.

use tracing::trace;

use crate::boundary::AllocatedStr;
use crate::values::{OwnedValue, PinnedBuffer};

/// A resource awaiting release. Each variant releases through its own path.
#[derive(Debug)]
pub enum LedgerEntry {
    /// Host memory aliased by a boundary value; released by unpinning.
    Pinned(PinnedBuffer),
    /// A value created by the codec; released through `release_value`.
    Value(OwnedValue),
    /// A string allocated by the engine; released through its allocator.
    Text(AllocatedStr),
}

impl From<PinnedBuffer> for LedgerEntry {
    fn from(pin: PinnedBuffer) -> Self {
        LedgerEntry::Pinned(pin)
    }
}

impl From<OwnedValue> for LedgerEntry {
    fn from(value: OwnedValue) -> Self {
        LedgerEntry::Value(value)
    }
}

impl From<AllocatedStr> for LedgerEntry {
    fn from(text: AllocatedStr) -> Self {
        LedgerEntry::Text(text)
    }
}

/// FIFO list of pending releases.
#[derive(Debug, Default)]
pub struct CleanupLedger {
    entries: Vec<LedgerEntry>,
}

impl CleanupLedger {
    /// Queue `entry` behind everything already pending.
    pub fn push(&mut self, entry: impl Into<LedgerEntry>) {
        self.entries.push(entry.into());
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every pending entry, oldest first. Returns how many were
    /// released; flushing an empty ledger is a no-op.
    pub fn flush(&mut self) -> usize {
        let released = self.entries.len();
        if released == 0 {
            return 0;
        }
        for entry in self.entries.drain(..) {
            match entry {
                LedgerEntry::Pinned(pin) => trace!(bytes = pin.byte_len(), "unpinning buffer"),
                LedgerEntry::Value(value) => trace!(?value, "releasing value"),
                LedgerEntry::Text(text) => trace!(?text, "freeing engine string"),
            }
        }
        released
    }
}
