// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The store: authoritative base source, subscriptions, retention, and
//! change notification.
//!
//! The store owns the single mutable base source. Everything else
//! observes it: subscriptions hold the last snapshot delivered to their
//! callback plus the dependency set that produced it; retainers pin
//! selectors against garbage collection; `updated_record_ids`
//! accumulates between notify passes so multiple publishes coalesce into
//! one dispatch.
//!
//! # Notification contract
//!
//! Within one [`Store::notify`] every subscriber sees the same state. A
//! subscriber is re-read when its dependency set intersects the
//! accumulated updated ids (or when it was marked stale by an optimistic
//! view change), and its callback fires only when the re-read data
//! differs structurally from the last delivered snapshot. Callbacks
//! receive `&Snapshot` only; they cannot reach back into the store, so
//! reentrant publish/notify is impossible by construction.
//!
//! # Garbage collection
//!
//! Mark-sweep: seed the reachable set with the root id and every
//! retained selector, mark by reading each retained selector (its
//! `seen_records` is exactly the reachable frontier), sweep every
//! unmarked id out of the base. A retainer dropping to zero schedules a
//! pass; scheduled passes run coalesced at the end of the next notify
//! tick, or explicitly via [`Store::collect`].

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::ast::Selector;
use crate::checker::{check_selector, Availability, MissingFieldHandler};
use crate::ident::DataId;
use crate::reader::{read_selector, Snapshot};
use crate::record::Record;
use crate::source::{
    InMemoryRecordSource, MutableRecordSource, OverlayedRecordSource, RecordLookup, RecordSource,
    StoredRecord,
};
use crate::telemetry::{NullStoreTelemetry, StoreTelemetry};

/// Store construction options.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Identity of the root record. Defaults to `client:root`.
    pub root_id: DataId,
    /// Whether scheduled GC passes run automatically at the end of a
    /// notify tick. Explicit [`Store::collect`] calls always run.
    pub gc_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_id: DataId::root(),
            gc_enabled: true,
        }
    }
}

/// Handle for a subscription; pass back to [`Store::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

/// Handle for a retainer; pass back to [`Store::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RetainToken(u64);

type SubscriberFn = Box<dyn FnMut(&Snapshot)>;

struct SubscriptionEntry {
    snapshot: Snapshot,
    callback: SubscriberFn,
    stale: bool,
}

struct Retainer {
    selector: Selector,
    ref_count: u32,
}

/// The reactive record store.
pub struct Store {
    base: InMemoryRecordSource,
    optimistic: Option<InMemoryRecordSource>,
    subscriptions: BTreeMap<u64, SubscriptionEntry>,
    retainers: BTreeMap<u64, Retainer>,
    retain_tokens: BTreeMap<u64, u64>,
    updated: BTreeSet<DataId>,
    gc_due: bool,
    config: StoreConfig,
    telemetry: Box<dyn StoreTelemetry>,
    next_id: u64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("base", &self.base)
            .field("optimistic", &self.optimistic.is_some())
            .field("subscriptions", &self.subscriptions.len())
            .field("retainers", &self.retainers.len())
            .field("updated", &self.updated)
            .field("gc_due", &self.gc_due)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates an empty store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an empty store with `config`.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            base: InMemoryRecordSource::new(),
            optimistic: None,
            subscriptions: BTreeMap::new(),
            retainers: BTreeMap::new(),
            retain_tokens: BTreeMap::new(),
            updated: BTreeSet::new(),
            gc_due: false,
            config,
            telemetry: Box::new(NullStoreTelemetry),
            next_id: 1,
        }
    }

    /// Installs a telemetry sink.
    pub fn set_telemetry(&mut self, telemetry: Box<dyn StoreTelemetry>) {
        self.telemetry = telemetry;
    }

    /// The authoritative base source.
    #[must_use]
    pub fn source(&self) -> &InMemoryRecordSource {
        &self.base
    }

    /// Identity of the root record.
    #[must_use]
    pub fn root_id(&self) -> &DataId {
        &self.config.root_id
    }

    /// The read view: base composed with the installed optimistic
    /// overlay, when one is live.
    #[must_use]
    pub fn read_view(&self) -> OverlayedRecordSource<'_> {
        OverlayedRecordSource::new(&self.base, self.optimistic.as_ref())
    }

    /// Merges `source` into the base, record by record.
    ///
    /// A tombstone in `source` tombstones the base entry; an id absent
    /// from `source` is left alone; a present record is field-merged.
    /// Only ids whose merged value actually differs from their previous
    /// value are accumulated for the next notify.
    pub fn publish(&mut self, source: &InMemoryRecordSource) {
        let mut changed = 0_usize;
        for (id, entry) in source.entries() {
            match entry {
                StoredRecord::Tombstone => {
                    if !matches!(self.base.get(id), RecordLookup::Deleted) {
                        self.base.delete(id.clone());
                        self.updated.insert(id.clone());
                        changed += 1;
                    }
                }
                StoredRecord::Present(record) => {
                    let merged: Option<Record> = match self.base.get(id) {
                        RecordLookup::Present(existing) => {
                            let mut merged = existing.clone();
                            merged.merge_from(record);
                            (merged != *existing).then_some(merged)
                        }
                        RecordLookup::Deleted | RecordLookup::Missing => Some(record.clone()),
                    };
                    if let Some(merged) = merged {
                        self.base.set(merged);
                        self.updated.insert(id.clone());
                        changed += 1;
                    }
                }
            }
        }
        debug!(records = source.len(), changed, "publish");
        self.telemetry.on_publish(changed);
    }

    /// Installs (or clears) the optimistic overlay computed by the
    /// publish queue. Any transition involving a live overlay marks all
    /// subscriptions stale, since their last-delivered snapshots may no
    /// longer match the read view.
    pub fn set_optimistic_source(&mut self, source: Option<InMemoryRecordSource>) {
        let view_changes = self.optimistic.is_some() || source.is_some();
        self.optimistic = source;
        if view_changes {
            for entry in self.subscriptions.values_mut() {
                entry.stale = true;
            }
        }
    }

    /// Reads `selector` through the current read view.
    #[must_use]
    pub fn lookup(&self, selector: &Selector) -> Snapshot {
        read_selector(&self.read_view(), selector)
    }

    /// Checks `selector` for completeness against the base, without
    /// missing-field handlers.
    pub fn check(&mut self, selector: &Selector) -> Availability {
        self.check_with_handlers(selector, &[])
    }

    /// Checks `selector` for completeness against the base, patching
    /// through `handlers` where possible.
    pub fn check_with_handlers(
        &mut self,
        selector: &Selector,
        handlers: &[MissingFieldHandler],
    ) -> Availability {
        check_selector(&mut self.base, selector, handlers)
    }

    /// Registers a subscription seeded with `snapshot`.
    pub fn subscribe(
        &mut self,
        snapshot: Snapshot,
        callback: impl FnMut(&Snapshot) + 'static,
    ) -> SubscriptionToken {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(
            id,
            SubscriptionEntry {
                snapshot,
                callback: Box::new(callback),
                stale: false,
            },
        );
        SubscriptionToken(id)
    }

    /// Removes a subscription. Idempotent.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        self.subscriptions.remove(&token.0);
    }

    /// Pins `selector` against garbage collection.
    ///
    /// Retaining an already-retained selector increments its reference
    /// count rather than adding a second retainer.
    pub fn retain(&mut self, selector: Selector) -> RetainToken {
        let entry_id = self
            .retainers
            .iter()
            .find_map(|(id, retainer)| (retainer.selector == selector).then_some(*id));
        let entry_id = match entry_id {
            Some(id) => {
                if let Some(retainer) = self.retainers.get_mut(&id) {
                    retainer.ref_count += 1;
                }
                id
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.retainers.insert(
                    id,
                    Retainer {
                        selector,
                        ref_count: 1,
                    },
                );
                id
            }
        };
        let token = self.next_id;
        self.next_id += 1;
        self.retain_tokens.insert(token, entry_id);
        trace!(token, "retain");
        RetainToken(token)
    }

    /// Releases one retain. Idempotent per token. When a retainer's
    /// count reaches zero, a GC pass is scheduled for the next notify
    /// tick.
    pub fn release(&mut self, token: RetainToken) {
        let Some(entry_id) = self.retain_tokens.remove(&token.0) else {
            return;
        };
        let emptied = match self.retainers.get_mut(&entry_id) {
            Some(retainer) => {
                retainer.ref_count = retainer.ref_count.saturating_sub(1);
                retainer.ref_count == 0
            }
            None => false,
        };
        if emptied {
            self.retainers.remove(&entry_id);
            self.gc_due = true;
        }
        trace!(token = token.0, emptied, "release");
    }

    /// Re-reads affected subscriptions and dispatches callbacks whose
    /// data changed. Clears the accumulated updated-id set, then runs a
    /// scheduled GC pass, if one is due. Returns the number of callbacks
    /// dispatched.
    pub fn notify(&mut self) -> usize {
        let updated = std::mem::take(&mut self.updated);
        let mut notified = 0_usize;
        {
            let view = OverlayedRecordSource::new(&self.base, self.optimistic.as_ref());
            for entry in self.subscriptions.values_mut() {
                let affected = entry.stale
                    || entry
                        .snapshot
                        .seen_records
                        .iter()
                        .any(|id| updated.contains(id));
                if !affected {
                    continue;
                }
                let next = read_selector(&view, &entry.snapshot.selector);
                let data_changed = next.data != entry.snapshot.data;
                entry.snapshot = next;
                entry.stale = false;
                if data_changed {
                    (entry.callback)(&entry.snapshot);
                    notified += 1;
                }
            }
        }
        debug!(updated = updated.len(), notified, "notify");
        self.telemetry.on_notify(notified);
        if self.gc_due && self.config.gc_enabled {
            self.collect();
        }
        notified
    }

    /// Runs a mark-sweep GC pass now. Returns the number of records
    /// reclaimed.
    pub fn collect(&mut self) -> usize {
        let mut reachable: FxHashSet<DataId> = FxHashSet::default();
        reachable.insert(self.config.root_id.clone());
        for retainer in self.retainers.values() {
            let snapshot = read_selector(&self.base, &retainer.selector);
            reachable.extend(snapshot.seen_records);
        }
        let mut collected = 0_usize;
        for id in self.base.record_ids() {
            if !reachable.contains(&id) {
                self.base.remove(&id);
                collected += 1;
            }
        }
        self.gc_due = false;
        debug!(collected, retained = self.retainers.len(), "gc");
        self.telemetry.on_gc(collected);
        collected
    }
}
