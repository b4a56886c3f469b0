// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Record sources: the identity→record mapping and its lifecycle.
//!
//! A source distinguishes three states per identity:
//!
//! - **Existent** — a record is present.
//! - **Nonexistent** — the server (or an updater) explicitly deleted the
//!   entity; the source holds a tombstone.
//! - **Unknown** — the identity was never fetched.
//!
//! `delete` writes a tombstone; `remove` erases the mapping entirely and
//! returns the id to Unknown; a later `set` restores Existent.
//!
//! The read surface ([`RecordSource`]) and the write surface
//! ([`MutableRecordSource`]) are separate traits so overlays and views
//! can expose reads without ever granting mutation, the same way the
//! engine's read-only graph view does.

use std::collections::BTreeMap;

use crate::ident::DataId;
use crate::record::Record;

/// Lifecycle state of an identity within a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// A record is present for the id.
    Existent,
    /// The entity was explicitly deleted; the source holds a tombstone.
    Nonexistent,
    /// The id was never written to this source.
    Unknown,
}

/// Result of looking up an identity in a source.
#[derive(Debug, Clone, Copy)]
pub enum RecordLookup<'a> {
    /// The id resolves to a record.
    Present(&'a Record),
    /// The id resolves to a tombstone.
    Deleted,
    /// The id is unknown to the source.
    Missing,
}

impl<'a> RecordLookup<'a> {
    /// Returns the record when one is present.
    #[must_use]
    pub fn record(self) -> Option<&'a Record> {
        match self {
            Self::Present(record) => Some(record),
            Self::Deleted | Self::Missing => None,
        }
    }

    /// Returns the lifecycle state this lookup corresponds to.
    #[must_use]
    pub fn state(self) -> RecordState {
        match self {
            Self::Present(_) => RecordState::Existent,
            Self::Deleted => RecordState::Nonexistent,
            Self::Missing => RecordState::Unknown,
        }
    }
}

/// Shared read surface over a record source.
pub trait RecordSource {
    /// Looks up `id`.
    fn get(&self, id: &DataId) -> RecordLookup<'_>;

    /// Returns the lifecycle state of `id`.
    fn status(&self, id: &DataId) -> RecordState {
        self.get(id).state()
    }

    /// Returns `true` iff the status of `id` is not
    /// [`RecordState::Unknown`].
    fn has(&self, id: &DataId) -> bool {
        !matches!(self.status(id), RecordState::Unknown)
    }

    /// Number of non-Unknown entries (records and tombstones).
    fn len(&self) -> usize;

    /// Returns `true` when the source holds no entries at all.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All non-Unknown ids, in unspecified order.
    fn record_ids(&self) -> Vec<DataId>;
}

/// Write surface extending the shared read surface.
pub trait MutableRecordSource: RecordSource {
    /// Inserts or replaces the record stored under its own id.
    fn set(&mut self, record: Record);

    /// Marks `id` as explicitly deleted (tombstone).
    fn delete(&mut self, id: DataId);

    /// Erases the mapping for `id` entirely, returning it to Unknown.
    fn remove(&mut self, id: &DataId);

    /// Drops every entry.
    fn clear(&mut self);
}

/// One entry in an in-memory source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StoredRecord {
    /// A live record.
    Present(Record),
    /// An explicit-deletion tombstone.
    Tombstone,
}

/// The default mutable source: a `BTreeMap` keyed by identity.
///
/// `BTreeMap` keeps iteration deterministic, which matters for merge
/// order, GC sweeps, and test reproducibility.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryRecordSource {
    records: BTreeMap<DataId, StoredRecord>,
}

impl InMemoryRecordSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a mutable reference to the record stored under `id`,
    /// when one is present (tombstones and unknown ids yield `None`).
    pub fn get_mut(&mut self, id: &DataId) -> Option<&mut Record> {
        match self.records.get_mut(id) {
            Some(StoredRecord::Present(record)) => Some(record),
            _ => None,
        }
    }

    /// Raw entry access for overlay composition and publish merging.
    pub(crate) fn entry(&self, id: &DataId) -> Option<&StoredRecord> {
        self.records.get(id)
    }

    /// Iterates all entries in id order.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (&DataId, &StoredRecord)> {
        self.records.iter()
    }
}

impl RecordSource for InMemoryRecordSource {
    fn get(&self, id: &DataId) -> RecordLookup<'_> {
        match self.records.get(id) {
            Some(StoredRecord::Present(record)) => RecordLookup::Present(record),
            Some(StoredRecord::Tombstone) => RecordLookup::Deleted,
            None => RecordLookup::Missing,
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn record_ids(&self) -> Vec<DataId> {
        self.records.keys().cloned().collect()
    }
}

impl MutableRecordSource for InMemoryRecordSource {
    fn set(&mut self, record: Record) {
        self.records
            .insert(record.id().clone(), StoredRecord::Present(record));
    }

    fn delete(&mut self, id: DataId) {
        self.records.insert(id, StoredRecord::Tombstone);
    }

    fn remove(&mut self, id: &DataId) {
        self.records.remove(id);
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

/// Read-only composition of a base source and an optional overlay.
///
/// Overlay entries — including tombstones — shadow the base. This is the
/// view the store presents while optimistic updates are live, and the
/// view updater proxies read through. It exposes no write surface, so a
/// holder can never reach the base through it.
#[derive(Debug, Clone, Copy)]
pub struct OverlayedRecordSource<'a> {
    base: &'a InMemoryRecordSource,
    overlay: Option<&'a InMemoryRecordSource>,
}

impl<'a> OverlayedRecordSource<'a> {
    /// Composes `base` with an optional `overlay`.
    #[must_use]
    pub fn new(base: &'a InMemoryRecordSource, overlay: Option<&'a InMemoryRecordSource>) -> Self {
        Self { base, overlay }
    }
}

impl RecordSource for OverlayedRecordSource<'_> {
    fn get(&self, id: &DataId) -> RecordLookup<'_> {
        if let Some(overlay) = self.overlay {
            match overlay.entry(id) {
                Some(StoredRecord::Present(record)) => return RecordLookup::Present(record),
                Some(StoredRecord::Tombstone) => return RecordLookup::Deleted,
                None => {}
            }
        }
        self.base.get(id)
    }

    fn len(&self) -> usize {
        match self.overlay {
            None => self.base.len(),
            Some(overlay) => {
                let extra = overlay
                    .entries()
                    .filter(|(id, _)| self.base.entry(id).is_none())
                    .count();
                self.base.len() + extra
            }
        }
    }

    fn record_ids(&self) -> Vec<DataId> {
        match self.overlay {
            None => self.base.record_ids(),
            Some(overlay) => {
                let mut ids: std::collections::BTreeSet<DataId> =
                    self.base.record_ids().into_iter().collect();
                ids.extend(overlay.record_ids());
                ids.into_iter().collect()
            }
        }
    }
}
