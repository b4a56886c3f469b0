// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Updater-facing overlay proxies.
//!
//! User updaters and handle-field handlers never touch the base source.
//! They receive a [`RecordSourceProxy`]: reads fall through to a base
//! view, writes buffer into a sibling overlay source with copy-on-write
//! record cloning, and every touched identity is accumulated so the
//! publish cycle can compute its changed-id set. The overlay is local to
//! one publish cycle; discarding it on failure leaves the base
//! untouched.
//!
//! [`RecordProxy`] mutably borrows its parent proxy, so exactly one
//! record handle is live at a time; record-to-record links are expressed
//! by [`DataId`], which is also how records reference each other in
//! storage.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::ast::{ArgumentValues, OperationDescriptor, Selection, Variables};
use crate::error::StoreError;
use crate::ident::{client_id, DataId};
use crate::record::{JsonValue, Record, RecordValue};
use crate::source::{
    InMemoryRecordSource, MutableRecordSource, RecordLookup, RecordSource, RecordState,
    StoredRecord,
};
use crate::storage_key::{storage_key, storage_key_of_values};

/// Computes the storage key for proxy accessors, which take concrete
/// argument values rather than argument ASTs.
fn proxy_key(name: &str, args: Option<&ArgumentValues>) -> String {
    match args {
        None => name.to_owned(),
        Some(args) => storage_key_of_values(name, args),
    }
}

/// The mutable record-source view handed to updaters and handlers.
pub struct RecordSourceProxy<'e> {
    base: &'e InMemoryRecordSource,
    sink: &'e mut InMemoryRecordSource,
    updated: &'e mut BTreeSet<DataId>,
    root_id: DataId,
}

impl<'e> RecordSourceProxy<'e> {
    pub(crate) fn new(
        base: &'e InMemoryRecordSource,
        sink: &'e mut InMemoryRecordSource,
        updated: &'e mut BTreeSet<DataId>,
        root_id: DataId,
    ) -> Self {
        Self {
            base,
            sink,
            updated,
            root_id,
        }
    }

    /// Looks up `id` through the overlay: sink entries (including
    /// tombstones) shadow the base.
    #[must_use]
    pub fn lookup(&self, id: &DataId) -> RecordLookup<'_> {
        match self.sink.entry(id) {
            Some(StoredRecord::Present(record)) => RecordLookup::Present(record),
            Some(StoredRecord::Tombstone) => RecordLookup::Deleted,
            None => self.base.get(id),
        }
    }

    /// Returns the lifecycle state of `id` through the overlay.
    #[must_use]
    pub fn status(&self, id: &DataId) -> RecordState {
        self.lookup(id).state()
    }

    /// Creates a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateRecord`] when `id` already
    /// resolves to an existent record.
    pub fn create(
        &mut self,
        id: DataId,
        typename: &str,
    ) -> Result<RecordProxy<'_, 'e>, StoreError> {
        if matches!(self.lookup(&id), RecordLookup::Present(_)) {
            return Err(StoreError::DuplicateRecord(id));
        }
        self.sink
            .set(Record::new(id.clone(), Some(typename.to_owned())));
        self.updated.insert(id.clone());
        Ok(RecordProxy { src: self, id })
    }

    /// Marks `id` as deleted in the overlay.
    pub fn delete(&mut self, id: &DataId) {
        self.sink.delete(id.clone());
        self.updated.insert(id.clone());
    }

    /// Returns a proxy for `id` when it resolves to an existent record.
    pub fn get(&mut self, id: &DataId) -> Option<RecordProxy<'_, 'e>> {
        match self.lookup(id) {
            RecordLookup::Present(_) => {}
            RecordLookup::Deleted | RecordLookup::Missing => return None,
        }
        let id = id.clone();
        Some(RecordProxy { src: self, id })
    }

    /// Returns a proxy for the root record, creating it when absent.
    pub fn get_root(&mut self) -> RecordProxy<'_, 'e> {
        let root_id = self.root_id.clone();
        if !matches!(self.lookup(&root_id), RecordLookup::Present(_)) {
            self.sink.set(Record::new(root_id.clone(), None));
            self.updated.insert(root_id.clone());
        }
        RecordProxy {
            src: self,
            id: root_id,
        }
    }
}

/// A mutable handle onto one record within a [`RecordSourceProxy`].
pub struct RecordProxy<'p, 'e> {
    src: &'p mut RecordSourceProxy<'e>,
    id: DataId,
}

impl<'p, 'e> RecordProxy<'p, 'e> {
    /// The record's identity.
    #[must_use]
    pub fn data_id(&self) -> &DataId {
        &self.id
    }

    /// The record's type name, when known.
    #[must_use]
    pub fn record_type(&self) -> Option<String> {
        self.src
            .lookup(&self.id)
            .record()
            .and_then(Record::typename)
            .map(str::to_owned)
    }

    /// Reads the scalar stored under `(name, args)`.
    #[must_use]
    pub fn value(&self, name: &str, args: Option<&ArgumentValues>) -> Option<JsonValue> {
        let key = proxy_key(name, args);
        self.src
            .lookup(&self.id)
            .record()
            .and_then(|record| record.get(&key))
            .and_then(RecordValue::as_scalar)
            .cloned()
    }

    /// Writes a scalar under `(name, args)`.
    pub fn set_value(
        &mut self,
        name: &str,
        args: Option<&ArgumentValues>,
        value: JsonValue,
    ) -> &mut Self {
        let key = proxy_key(name, args);
        if let Some(record) = self.ensure_writable() {
            record.set(key, RecordValue::Scalar(value));
        }
        self
    }

    /// Reads the singular link stored under `(name, args)`.
    /// `None` means the field is absent or undefined; `Some(None)` means
    /// an explicit null.
    #[must_use]
    #[allow(clippy::option_option)]
    pub fn linked_record_id(
        &self,
        name: &str,
        args: Option<&ArgumentValues>,
    ) -> Option<Option<DataId>> {
        let key = proxy_key(name, args);
        match self
            .src
            .lookup(&self.id)
            .record()
            .and_then(|record| record.get(&key))
        {
            Some(RecordValue::Link(id)) => Some(Some(id.clone())),
            Some(RecordValue::Scalar(JsonValue::Null)) => Some(None),
            _ => None,
        }
    }

    /// Returns a proxy for the record linked under `(name, args)`.
    pub fn get_linked_record(
        &mut self,
        name: &str,
        args: Option<&ArgumentValues>,
    ) -> Option<RecordProxy<'_, 'e>> {
        let id = self.linked_record_id(name, args).flatten()?;
        self.src.get(&id)
    }

    /// Links `target` under `(name, args)`.
    pub fn set_linked_record(
        &mut self,
        name: &str,
        args: Option<&ArgumentValues>,
        target: &DataId,
    ) -> &mut Self {
        let key = proxy_key(name, args);
        let target = target.clone();
        if let Some(record) = self.ensure_writable() {
            record.set(key, RecordValue::Link(target));
        }
        self
    }

    /// Reads the plural link stored under `(name, args)`.
    #[must_use]
    pub fn linked_record_ids(
        &self,
        name: &str,
        args: Option<&ArgumentValues>,
    ) -> Option<Vec<Option<DataId>>> {
        let key = proxy_key(name, args);
        self.src
            .lookup(&self.id)
            .record()
            .and_then(|record| record.get(&key))
            .and_then(RecordValue::as_link_list)
            .map(<[Option<DataId>]>::to_vec)
    }

    /// Links `targets` under `(name, args)`, wholesale.
    pub fn set_linked_records(
        &mut self,
        name: &str,
        args: Option<&ArgumentValues>,
        targets: Vec<Option<DataId>>,
    ) -> &mut Self {
        let key = proxy_key(name, args);
        if let Some(record) = self.ensure_writable() {
            record.set(key, RecordValue::LinkList(targets));
        }
        self
    }

    /// Returns the record linked under `(name, args)`, creating (and
    /// linking) one with a deterministic client id when the field is
    /// unset or dangling.
    ///
    /// # Errors
    ///
    /// Currently infallible in practice; the `Result` mirrors
    /// [`RecordSourceProxy::create`] for forward compatibility.
    pub fn get_or_create_linked_record(
        &mut self,
        name: &str,
        args: Option<&ArgumentValues>,
        typename: &str,
    ) -> Result<RecordProxy<'_, 'e>, StoreError> {
        let key = proxy_key(name, args);
        let existing = self
            .linked_record_id(name, args)
            .flatten()
            .filter(|id| matches!(self.src.lookup(id), RecordLookup::Present(_)));
        if let Some(id) = existing {
            return Ok(RecordProxy {
                src: &mut *self.src,
                id,
            });
        }
        let child_id = client_id(&self.id, &key);
        if !matches!(self.src.lookup(&child_id), RecordLookup::Present(_)) {
            self.src
                .sink
                .set(Record::new(child_id.clone(), Some(typename.to_owned())));
            self.src.updated.insert(child_id.clone());
        }
        let target = child_id.clone();
        if let Some(record) = self.ensure_writable() {
            record.set(key, RecordValue::Link(target));
        }
        Ok(RecordProxy {
            src: &mut *self.src,
            id: child_id,
        })
    }

    /// Copies every field of the record stored under `source_id` into
    /// this record. No-op when the source record does not exist.
    pub fn copy_fields_from(&mut self, source_id: &DataId) -> &mut Self {
        let source = self.src.lookup(source_id).record().cloned();
        if let Some(source) = source {
            if let Some(record) = self.ensure_writable() {
                record.copy_fields_from(&source);
            }
        }
        self
    }

    /// Copy-on-write: materializes this record in the sink (cloning the
    /// base record when the sink has no entry yet) and marks it updated.
    fn ensure_writable(&mut self) -> Option<&mut Record> {
        let fresh = match self.src.sink.entry(&self.id) {
            Some(StoredRecord::Present(_)) => None,
            // A write after delete is a fresh record, not a revival of
            // the base's fields.
            Some(StoredRecord::Tombstone) => Some(Record::new(self.id.clone(), None)),
            None => Some(match self.src.base.get(&self.id) {
                RecordLookup::Present(record) => record.clone(),
                RecordLookup::Deleted | RecordLookup::Missing => {
                    Record::new(self.id.clone(), None)
                }
            }),
        };
        if let Some(record) = fresh {
            self.src.sink.set(record);
        }
        self.src.updated.insert(self.id.clone());
        self.src.sink.get_mut(&self.id)
    }
}

/// A [`RecordSourceProxy`] bound to an operation, adding root-field
/// accessors that index into the operation's root selections.
pub struct SelectorRecordSourceProxy<'p, 'e> {
    proxy: &'p mut RecordSourceProxy<'e>,
    operation: Arc<OperationDescriptor>,
    variables: Variables,
}

impl<'p, 'e> SelectorRecordSourceProxy<'p, 'e> {
    pub(crate) fn new(
        proxy: &'p mut RecordSourceProxy<'e>,
        operation: Arc<OperationDescriptor>,
        variables: Variables,
    ) -> Self {
        Self {
            proxy,
            operation,
            variables,
        }
    }

    /// The unbound proxy surface, for writes beyond root fields.
    pub fn inner(&mut self) -> &mut RecordSourceProxy<'e> {
        self.proxy
    }

    /// Returns a proxy for the singular root field `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownRootField`] when the operation does
    /// not select a singular linked field named `name`.
    pub fn get_root_field(&mut self, name: &str) -> Result<Option<RecordProxy<'_, 'e>>, StoreError> {
        let key = self.root_field_key(name, false)?;
        let root_id = self.proxy.root_id.clone();
        let id = self
            .proxy
            .lookup(&root_id)
            .record()
            .and_then(|record| record.get(&key))
            .and_then(RecordValue::as_link)
            .cloned();
        match id {
            None => Ok(None),
            Some(id) => Ok(self.proxy.get(&id)),
        }
    }

    /// Returns the linked identities of the plural root field `name`.
    ///
    /// Ids are returned rather than proxies because only one record
    /// handle can be live at a time; resolve each through
    /// [`RecordSourceProxy::get`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownRootField`] when the operation does
    /// not select a plural linked field named `name`.
    pub fn get_plural_root_field(
        &mut self,
        name: &str,
    ) -> Result<Option<Vec<Option<DataId>>>, StoreError> {
        let key = self.root_field_key(name, true)?;
        let root_id = self.proxy.root_id.clone();
        Ok(self
            .proxy
            .lookup(&root_id)
            .record()
            .and_then(|record| record.get(&key))
            .and_then(RecordValue::as_link_list)
            .map(<[Option<DataId>]>::to_vec))
    }

    fn root_field_key(&self, name: &str, plural: bool) -> Result<String, StoreError> {
        self.operation
            .selections
            .iter()
            .find_map(|selection| match selection {
                Selection::Linked(field) if field.name == name && field.plural == plural => {
                    Some(storage_key(&field.name, &field.args, &self.variables))
                }
                _ => None,
            })
            .ok_or_else(|| StoreError::UnknownRootField(name.to_owned()))
    }
}
