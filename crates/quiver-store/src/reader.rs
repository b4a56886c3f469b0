// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Structured reads: selection AST × record source → snapshot.
//!
//! The reader mirrors the normalizer's traversal but pulls from a record
//! source instead of a response tree. Reads are infallible — missing
//! data is soft and reported through `is_missing_data` — and every
//! visited identity lands in `seen_records`, *including* ids resolved
//! through dangling references, so a later write to them re-triggers the
//! subscriber diff.
//!
//! Lookup semantics per target state:
//! - Unknown → the subtree reads as undefined and the snapshot is marked
//!   missing;
//! - Nonexistent → the parent field reads as explicit null;
//! - Existent → descend.
//!
//! Masked fragment spreads are not inlined: the reader records a
//! fragment pointer (name → variables, plus the owning operation) on the
//! enclosing object so a downstream consumer can re-read that fragment
//! independently.
//!
//! Cyclic data is representable (records reference each other by id);
//! the reader keeps a stack of `(id, fragment)` pairs for the current
//! path and skips a spread already on the stack, so cyclic fragment
//! spreads terminate.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::ast::{
    FragmentSpread, HandleField, LinkedField, ScalarField, Selection, Selector, Variables,
};
use crate::ident::DataId;
use crate::normalizer::evaluate_condition;
use crate::record::{JsonValue, Record, RecordValue};
use crate::source::{RecordLookup, RecordSource};
use crate::storage_key::{handle_field_key, resolve_arguments, storage_key};

/// One value slot in a snapshot tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    /// The field (or record) is not available in the source.
    Missing,
    /// Explicit null: the server answered that there is no value.
    Null,
    /// A non-null scalar value or scalar list.
    Scalar(JsonValue),
    /// A linked record's sub-snapshot.
    Record(Box<SnapshotRecord>),
    /// A plural linked field's elements.
    List(Vec<SnapshotValue>),
}

/// A materialized record within a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    /// Identity of the record this object was read from.
    pub id: DataId,
    /// Field values keyed by response key.
    pub fields: BTreeMap<String, SnapshotValue>,
    /// Fragment pointers: fragment name → the variables it should be
    /// re-read with. Populated by masked fragment spreads.
    pub fragments: BTreeMap<String, Variables>,
    /// Name of the operation the read was rooted in, when fragment
    /// pointers were emitted under one.
    pub owner: Option<String>,
}

impl SnapshotRecord {
    /// Returns the value read for `response_key`, if the selection
    /// produced one.
    #[must_use]
    pub fn field(&self, response_key: &str) -> Option<&SnapshotValue> {
        self.fields.get(response_key)
    }
}

/// The result of reading a selector: the data tree plus the dependency
/// set that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The selector this snapshot materializes.
    pub selector: Selector,
    /// The data tree; [`SnapshotValue::Missing`] when the root record is
    /// unknown.
    pub data: SnapshotValue,
    /// Every identity visited during the read.
    pub seen_records: BTreeSet<DataId>,
    /// Whether any selected field or record was unavailable.
    pub is_missing_data: bool,
}

/// Reads `selector` against `source`.
pub fn read_selector<S: RecordSource>(source: &S, selector: &Selector) -> Snapshot {
    let mut reader = Reader {
        source,
        seen: BTreeSet::new(),
        missing: false,
        owner: selector.node.operation_name().map(str::to_owned),
        spread_stack: Vec::new(),
    };
    let data = reader.read_record(
        &selector.data_id,
        selector.node.selections(),
        &selector.variables,
    );
    Snapshot {
        selector: selector.clone(),
        data,
        seen_records: reader.seen,
        is_missing_data: reader.missing,
    }
}

struct Reader<'a, S> {
    source: &'a S,
    seen: BTreeSet<DataId>,
    missing: bool,
    owner: Option<String>,
    /// `(record, fragment)` pairs on the current traversal path.
    spread_stack: Vec<(DataId, usize)>,
}

impl<S: RecordSource> Reader<'_, S> {
    fn read_record(
        &mut self,
        id: &DataId,
        selections: &[Selection],
        variables: &Variables,
    ) -> SnapshotValue {
        self.seen.insert(id.clone());
        let source = self.source;
        match source.get(id) {
            RecordLookup::Missing => {
                self.missing = true;
                SnapshotValue::Missing
            }
            RecordLookup::Deleted => SnapshotValue::Null,
            RecordLookup::Present(record) => {
                let mut snap = SnapshotRecord {
                    id: id.clone(),
                    fields: BTreeMap::new(),
                    fragments: BTreeMap::new(),
                    owner: None,
                };
                self.visit_selections(record, &mut snap, selections, variables);
                SnapshotValue::Record(Box::new(snap))
            }
        }
    }

    fn visit_selections(
        &mut self,
        record: &Record,
        snap: &mut SnapshotRecord,
        selections: &[Selection],
        variables: &Variables,
    ) {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => self.read_scalar(record, snap, field, variables),
                Selection::Linked(field) => self.read_linked(record, snap, field, variables),
                Selection::Spread(spread) => self.read_spread(record, snap, spread, variables),
                Selection::Inline(inline) => {
                    if type_matches(record, Some(&inline.type_condition)) {
                        self.visit_selections(record, snap, &inline.selections, variables);
                    }
                }
                Selection::Condition(condition) => {
                    // A condition that cannot be resolved reads as not
                    // passing; the normalizer rejects such payloads
                    // before they reach the source.
                    if evaluate_condition(condition, variables).unwrap_or(false) {
                        self.visit_selections(record, snap, &condition.selections, variables);
                    }
                }
                Selection::Handle(handle) => self.read_handle(record, snap, handle, variables),
            }
        }
    }

    fn read_scalar(
        &mut self,
        record: &Record,
        snap: &mut SnapshotRecord,
        field: &ScalarField,
        variables: &Variables,
    ) {
        let key = storage_key(&field.name, &field.args, variables);
        let value = self.scalar_value(record.get(&key));
        snap.fields.insert(field.response_key().to_owned(), value);
    }

    fn scalar_value(&mut self, stored: Option<&RecordValue>) -> SnapshotValue {
        match stored {
            Some(RecordValue::Scalar(JsonValue::Null)) => SnapshotValue::Null,
            Some(RecordValue::Scalar(value)) => SnapshotValue::Scalar(value.clone()),
            // Absent, known-missing, and shape-mismatched slots all read
            // as missing data.
            None | Some(_) => {
                self.missing = true;
                SnapshotValue::Missing
            }
        }
    }

    fn read_linked(
        &mut self,
        record: &Record,
        snap: &mut SnapshotRecord,
        field: &LinkedField,
        variables: &Variables,
    ) {
        let key = storage_key(&field.name, &field.args, variables);
        let value = self.linked_value(record.get(&key), field, variables);
        snap.fields.insert(field.response_key().to_owned(), value);
    }

    fn linked_value(
        &mut self,
        stored: Option<&RecordValue>,
        field: &LinkedField,
        variables: &Variables,
    ) -> SnapshotValue {
        match stored {
            Some(RecordValue::Scalar(JsonValue::Null)) => SnapshotValue::Null,
            Some(RecordValue::Link(child)) if !field.plural => {
                let child = child.clone();
                self.read_record(&child, &field.selections, variables)
            }
            Some(RecordValue::LinkList(ids)) if field.plural => {
                let ids = ids.clone();
                let items = ids
                    .iter()
                    .map(|id| match id {
                        None => SnapshotValue::Null,
                        Some(id) => self.read_record(id, &field.selections, variables),
                    })
                    .collect();
                SnapshotValue::List(items)
            }
            None | Some(_) => {
                self.missing = true;
                SnapshotValue::Missing
            }
        }
    }

    fn read_spread(
        &mut self,
        record: &Record,
        snap: &mut SnapshotRecord,
        spread: &FragmentSpread,
        variables: &Variables,
    ) {
        if !type_matches(record, spread.fragment.type_condition.as_deref()) {
            return;
        }
        let mut merged = variables.clone();
        merged.extend(resolve_arguments(&spread.args, variables));
        if spread.masked {
            snap.fragments
                .insert(spread.fragment.name.clone(), merged);
            snap.owner.clone_from(&self.owner);
            return;
        }
        let guard = (record.id().clone(), Arc::as_ptr(&spread.fragment) as usize);
        if self.spread_stack.contains(&guard) {
            return;
        }
        self.spread_stack.push(guard);
        self.visit_selections(record, snap, &spread.fragment.selections, &merged);
        self.spread_stack.pop();
    }

    fn read_handle(
        &mut self,
        record: &Record,
        snap: &mut SnapshotRecord,
        handle: &HandleField,
        variables: &Variables,
    ) {
        let args = resolve_arguments(&handle.args, variables);
        let key = crate::storage_key::storage_key_of_values(
            &handle_field_key(&handle.handle, handle.key.as_deref(), &handle.name),
            &args,
        );
        let value = match &handle.selections {
            None => self.scalar_value(record.get(&key)),
            Some(selections) => {
                let linked = LinkedField {
                    alias: handle.alias.clone(),
                    name: handle.name.clone(),
                    args: handle.args.clone(),
                    concrete_type: None,
                    // Identity derivation never runs on the read path.
                    uses_global_id: false,
                    plural: handle.plural,
                    selections: selections.clone(),
                };
                self.linked_value(record.get(&key), &linked, variables)
            }
        };
        snap.fields.insert(handle.response_key().to_owned(), value);
    }
}

fn type_matches(record: &Record, condition: Option<&str>) -> bool {
    match condition {
        None => true,
        Some(condition) => record
            .typename()
            .is_some_and(|typename| typename == condition),
    }
}
