// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The publish queue: staged sources, overlay composition, and the
//! single linearization point.
//!
//! Three stage kinds feed the queue:
//!
//! - **Server payloads** — already-normalized sources plus their handle
//!   payloads, held until [`PublishQueue::run`].
//! - **Commit updaters** — non-revertible updater closures, run once.
//! - **Optimistic updates** — revocable via [`UpdateToken`]; either a
//!   store-updater closure or a `(selector updater, operation,
//!   response)` triple re-normalized on every overlay rebuild.
//!
//! `run` is the only place state moves:
//!
//! 1. Staged payloads are merged — in enqueue order — into a fresh
//!    overlay relative to the store's base; handle payloads dispatch to
//!    their registered [`Handler`]s against the same overlay, then
//!    commit updaters run against it.
//! 2. The overlay is written back into the store's base
//!    ([`crate::store::Store::publish`] computes the set of ids whose
//!    value actually changed).
//! 3. When optimistic updates are live (or were just applied/reverted),
//!    the optimistic overlay is rebuilt from scratch against the new
//!    base: every live update reapplies in its original enqueue order,
//!    so a later update always observes earlier optimistic effects. The
//!    result is installed as the store's read overlay.
//!
//! Reverting an update never rolls records back; the overlay is simply
//! regenerated from the base without the revoked update on the next run.
//! A failed run discards its overlay, leaving the base untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::ast::{OperationDescriptor, Selector, Variables};
use crate::error::{PayloadError, PublishError, StoreError};
use crate::handles::{Handler, HandleFieldPayload};
use crate::normalizer::normalize_response;
use crate::proxy::{RecordSourceProxy, SelectorRecordSourceProxy};
use crate::record::{JsonValue, Record};
use crate::source::{InMemoryRecordSource, MutableRecordSource, RecordSource, StoredRecord};
use crate::store::Store;

/// A normalized server response ready for publishing.
#[derive(Debug)]
pub struct ResponsePayload {
    /// Records produced by normalization.
    pub source: InMemoryRecordSource,
    /// Handle payloads collected during normalization, in traversal
    /// order.
    pub field_payloads: Vec<HandleFieldPayload>,
    /// Field-level errors the server reported alongside the data.
    pub errors: Vec<PayloadError>,
}

/// A revocable optimistic update.
pub enum OptimisticUpdate {
    /// A plain updater closure run against the optimistic overlay.
    StoreUpdater(Box<dyn FnMut(&mut RecordSourceProxy<'_>)>),
    /// An optimistic server response and/or selector-bound updater,
    /// re-normalized and re-applied on every overlay rebuild.
    SelectorUpdater {
        /// Operation the optimistic response answers.
        operation: Arc<OperationDescriptor>,
        /// Variables the operation was issued with.
        variables: Variables,
        /// The optimistic response tree, when one was supplied.
        response: Option<JsonValue>,
        /// Updater invoked after the response (if any) is normalized.
        updater: Option<Box<dyn FnMut(&mut SelectorRecordSourceProxy<'_, '_>)>>,
    },
}

impl OptimisticUpdate {
    /// Wraps a store-updater closure.
    pub fn store_updater(f: impl FnMut(&mut RecordSourceProxy<'_>) + 'static) -> Self {
        Self::StoreUpdater(Box::new(f))
    }
}

impl std::fmt::Debug for OptimisticUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoreUpdater(_) => f.write_str("OptimisticUpdate::StoreUpdater"),
            Self::SelectorUpdater { operation, .. } => f
                .debug_struct("OptimisticUpdate::SelectorUpdater")
                .field("operation", &operation.name)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle for a live optimistic update; pass back to
/// [`PublishQueue::revert_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateToken(u64);

/// Staged publishes awaiting the next [`PublishQueue::run`].
pub struct PublishQueue {
    pending_payloads: Vec<ResponsePayload>,
    pending_updaters: Vec<Box<dyn FnOnce(&mut RecordSourceProxy<'_>)>>,
    optimistic: Vec<(u64, OptimisticUpdate)>,
    optimistic_dirty: bool,
    handlers: BTreeMap<String, Box<dyn Handler>>,
    next_token: u64,
}

impl Default for PublishQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PublishQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishQueue")
            .field("pending_payloads", &self.pending_payloads.len())
            .field("pending_updaters", &self.pending_updaters.len())
            .field("optimistic", &self.optimistic.len())
            .field("optimistic_dirty", &self.optimistic_dirty)
            .finish_non_exhaustive()
    }
}

impl PublishQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending_payloads: Vec::new(),
            pending_updaters: Vec::new(),
            optimistic: Vec::new(),
            optimistic_dirty: false,
            handlers: BTreeMap::new(),
            next_token: 1,
        }
    }

    /// Registers `handler` under `name`. Handle payloads naming an
    /// unregistered handler fail the run.
    pub fn register_handler(&mut self, name: impl Into<String>, handler: Box<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Stages a normalized server payload.
    pub fn commit_payload(&mut self, payload: ResponsePayload) {
        self.pending_payloads.push(payload);
    }

    /// Stages a non-revertible updater.
    pub fn commit_updater(&mut self, updater: impl FnOnce(&mut RecordSourceProxy<'_>) + 'static) {
        self.pending_updaters.push(Box::new(updater));
    }

    /// Applies an optimistic update. The update stays live — and is
    /// reapplied on every overlay rebuild — until its token is passed to
    /// [`PublishQueue::revert_update`].
    pub fn apply_update(&mut self, update: OptimisticUpdate) -> UpdateToken {
        let token = self.next_token;
        self.next_token += 1;
        self.optimistic.push((token, update));
        self.optimistic_dirty = true;
        UpdateToken(token)
    }

    /// Revokes an optimistic update. Idempotent; the overlay is rebuilt
    /// without it on the next run.
    pub fn revert_update(&mut self, token: UpdateToken) {
        let before = self.optimistic.len();
        self.optimistic.retain(|(id, _)| *id != token.0);
        if self.optimistic.len() != before {
            self.optimistic_dirty = true;
        }
    }

    /// True when a run would do work.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        !self.pending_payloads.is_empty()
            || !self.pending_updaters.is_empty()
            || self.optimistic_dirty
    }

    /// Drains every stage into `store`: merges payloads and commit
    /// updaters into the base, then rebuilds and installs the optimistic
    /// overlay.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when a handle payload names an
    /// unregistered handler or an optimistic response fails to
    /// normalize. The failed cycle's overlay is discarded; staged
    /// payloads and updaters drained by the failed run are dropped, and
    /// the base source is left unchanged.
    pub fn run(&mut self, store: &mut Store) -> Result<(), PublishError> {
        let has_server_work =
            !self.pending_payloads.is_empty() || !self.pending_updaters.is_empty();

        if has_server_work {
            let payloads = std::mem::take(&mut self.pending_payloads);
            let updaters = std::mem::take(&mut self.pending_updaters);
            let mut overlay = InMemoryRecordSource::new();
            let mut touched = BTreeSet::new();

            for payload in &payloads {
                merge_into_overlay(store.source(), &mut overlay, &payload.source);
                for field_payload in &payload.field_payloads {
                    self.dispatch_handler(store, &mut overlay, &mut touched, field_payload)?;
                }
            }
            for updater in updaters {
                let mut proxy = RecordSourceProxy::new(
                    store.source(),
                    &mut overlay,
                    &mut touched,
                    store.root_id().clone(),
                );
                updater(&mut proxy);
            }
            store.publish(&overlay);
        }

        let rebuild = self.optimistic_dirty || (has_server_work && !self.optimistic.is_empty());
        if rebuild {
            let overlay = self.build_optimistic_overlay(store)?;
            store.set_optimistic_source(overlay);
            self.optimistic_dirty = false;
        }

        debug!(
            server_work = has_server_work,
            optimistic = self.optimistic.len(),
            "publish queue run"
        );
        Ok(())
    }

    fn dispatch_handler(
        &self,
        store: &Store,
        overlay: &mut InMemoryRecordSource,
        touched: &mut BTreeSet<crate::ident::DataId>,
        field_payload: &HandleFieldPayload,
    ) -> Result<(), PublishError> {
        let handler = self
            .handlers
            .get(&field_payload.handle)
            .ok_or_else(|| StoreError::MissingHandler(field_payload.handle.clone()))?;
        let mut proxy =
            RecordSourceProxy::new(store.source(), overlay, touched, store.root_id().clone());
        handler.update(&mut proxy, field_payload);
        Ok(())
    }

    /// Reapplies every live optimistic update, in original enqueue
    /// order, against the current base.
    fn build_optimistic_overlay(
        &mut self,
        store: &Store,
    ) -> Result<Option<InMemoryRecordSource>, PublishError> {
        if self.optimistic.is_empty() {
            return Ok(None);
        }
        let mut overlay = InMemoryRecordSource::new();
        let mut touched = BTreeSet::new();
        let handlers = &self.handlers;
        for (_, update) in &mut self.optimistic {
            match update {
                OptimisticUpdate::StoreUpdater(updater) => {
                    let mut proxy = RecordSourceProxy::new(
                        store.source(),
                        &mut overlay,
                        &mut touched,
                        store.root_id().clone(),
                    );
                    updater(&mut proxy);
                }
                OptimisticUpdate::SelectorUpdater {
                    operation,
                    variables,
                    response,
                    updater,
                } => {
                    if let Some(response) = response {
                        let selector = Selector::operation_root(operation, variables.clone());
                        let mut normalized = InMemoryRecordSource::new();
                        let field_payloads =
                            normalize_response(&mut normalized, &selector, response)?;
                        // The normalized records merge relative to the
                        // evolving overlay so earlier optimistic effects
                        // remain visible.
                        merge_into_overlay(store.source(), &mut overlay, &normalized);
                        for field_payload in &field_payloads {
                            let handler = handlers.get(&field_payload.handle).ok_or_else(|| {
                                StoreError::MissingHandler(field_payload.handle.clone())
                            })?;
                            let mut proxy = RecordSourceProxy::new(
                                store.source(),
                                &mut overlay,
                                &mut touched,
                                store.root_id().clone(),
                            );
                            handler.update(&mut proxy, field_payload);
                        }
                    }
                    if let Some(updater) = updater {
                        let mut proxy = RecordSourceProxy::new(
                            store.source(),
                            &mut overlay,
                            &mut touched,
                            store.root_id().clone(),
                        );
                        let mut selector_proxy = SelectorRecordSourceProxy::new(
                            &mut proxy,
                            Arc::clone(operation),
                            variables.clone(),
                        );
                        updater(&mut selector_proxy);
                    }
                }
            }
        }
        Ok(Some(overlay))
    }
}

/// Merges `incoming` into `overlay`, field-merging against the effective
/// record (overlay entry if present, else `base`). This reproduces the
/// effect of publishing each staged source in sequence.
fn merge_into_overlay(
    base: &InMemoryRecordSource,
    overlay: &mut InMemoryRecordSource,
    incoming: &InMemoryRecordSource,
) {
    for (id, entry) in incoming.entries() {
        match entry {
            StoredRecord::Tombstone => overlay.delete(id.clone()),
            StoredRecord::Present(record) => {
                let effective: Option<Record> = match overlay.entry(id) {
                    Some(StoredRecord::Present(existing)) => Some(existing.clone()),
                    Some(StoredRecord::Tombstone) => None,
                    None => base.get(id).record().cloned(),
                };
                let merged = match effective {
                    Some(mut existing) => {
                        existing.merge_from(record);
                        existing
                    }
                    None => record.clone(),
                };
                overlay.set(merged);
            }
        }
    }
}
