// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Response normalization: selection AST × response tree → record writes.
//!
//! The normalizer descends the selection AST with a parallel cursor into
//! the response object and a current record id. Scalars are written
//! under their storage keys; linked objects are written as references
//! and recursed into; handle fields are recorded as
//! [`HandleFieldPayload`]s in traversal order for the publish queue to
//! dispatch.
//!
//! Child identity derivation, in priority order:
//! 1. the response object's own `id` scalar, but only when the field's
//!    type uses global identity,
//! 2. a synthesized client id `parentId:storageKey`,
//! 3. for elements of a plural field without an adopted `id`, the index
//!    is appended (`parentId:storageKey:index`).
//!
//! Normalization is idempotent: re-normalizing the same response and
//! selector into a source performs field-wise merges that change
//! nothing. Shape conflicts abort the whole pass with [`ShapeError`];
//! callers normalize into a fresh source, so an aborted pass leaves no
//! partial writes behind.

use serde_json::Map;

use crate::ast::{
    ArgumentValue, Condition, HandleField, LinkedField, Selection, Selector, Variables,
};
use crate::error::ShapeError;
use crate::handles::HandleFieldPayload;
use crate::ident::{client_id, client_id_indexed, DataId};
use crate::record::{JsonValue, Record, RecordValue};
use crate::source::{InMemoryRecordSource, MutableRecordSource, RecordLookup, RecordSource};
use crate::storage_key::{
    handle_field_key, resolve_arguments, storage_key, storage_key_of_values,
};

/// Normalizes `payload` under `selector` into `source`.
///
/// Returns the handle-field payloads collected in traversal order.
///
/// # Errors
///
/// Returns [`ShapeError`] when the payload's shape conflicts with the
/// selection; `source` may then hold partial writes and must be
/// discarded by the caller.
pub fn normalize_response(
    source: &mut InMemoryRecordSource,
    selector: &Selector,
    payload: &JsonValue,
) -> Result<Vec<HandleFieldPayload>, ShapeError> {
    let JsonValue::Object(data) = payload else {
        return Err(ShapeError::NonObjectRoot);
    };
    let mut normalizer = Normalizer {
        source,
        handle_payloads: Vec::new(),
    };
    normalizer.ensure_record(&selector.data_id, None);
    normalizer.visit_selections(
        &selector.data_id,
        selector.node.selections(),
        &selector.variables,
        data,
    )?;
    Ok(normalizer.handle_payloads)
}

struct Normalizer<'a> {
    source: &'a mut InMemoryRecordSource,
    handle_payloads: Vec<HandleFieldPayload>,
}

impl Normalizer<'_> {
    fn visit_selections(
        &mut self,
        id: &DataId,
        selections: &[Selection],
        variables: &Variables,
        data: &Map<String, JsonValue>,
    ) -> Result<(), ShapeError> {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => {
                    let key = storage_key(&field.name, &field.args, variables);
                    let value = match data.get(field.response_key()) {
                        None => RecordValue::Undefined,
                        Some(value) => RecordValue::Scalar(value.clone()),
                    };
                    self.set_field(id, key, value);
                }
                Selection::Linked(field) => {
                    self.visit_linked(id, field, variables, data)?;
                }
                Selection::Spread(spread) => {
                    if self.type_matches(id, spread.fragment.type_condition.as_deref()) {
                        let mut merged = variables.clone();
                        merged.extend(resolve_arguments(&spread.args, variables));
                        self.visit_selections(id, &spread.fragment.selections, &merged, data)?;
                    }
                }
                Selection::Inline(inline) => {
                    if self.type_matches(id, Some(&inline.type_condition)) {
                        self.visit_selections(id, &inline.selections, variables, data)?;
                    }
                }
                Selection::Condition(condition) => {
                    if evaluate_condition(condition, variables)? {
                        self.visit_selections(id, &condition.selections, variables, data)?;
                    }
                }
                Selection::Handle(handle) => {
                    self.emit_handle_payload(id, handle, variables);
                }
            }
        }
        Ok(())
    }

    fn visit_linked(
        &mut self,
        id: &DataId,
        field: &LinkedField,
        variables: &Variables,
        data: &Map<String, JsonValue>,
    ) -> Result<(), ShapeError> {
        let key = storage_key(&field.name, &field.args, variables);
        let raw = data.get(field.response_key());
        if field.plural {
            match raw {
                None => self.set_field(id, key, RecordValue::Undefined),
                Some(JsonValue::Null) => {
                    self.set_field(id, key, RecordValue::Scalar(JsonValue::Null));
                }
                Some(JsonValue::Array(items)) => {
                    let mut ids = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        match item {
                            JsonValue::Null => ids.push(None),
                            JsonValue::Object(child) => {
                                let child_id =
                                    derive_child_id(id, &key, field, child, Some(index));
                                self.visit_child(&child_id, field, variables, child)?;
                                ids.push(Some(child_id));
                            }
                            _ => {
                                return Err(ShapeError::ExpectedObject {
                                    field: field.response_key().to_owned(),
                                });
                            }
                        }
                    }
                    self.set_field(id, key, RecordValue::LinkList(ids));
                }
                Some(_) => {
                    return Err(ShapeError::ExpectedList {
                        field: field.response_key().to_owned(),
                    });
                }
            }
        } else {
            match raw {
                None => self.set_field(id, key, RecordValue::Undefined),
                Some(JsonValue::Null) => {
                    self.set_field(id, key, RecordValue::Scalar(JsonValue::Null));
                }
                Some(JsonValue::Object(child)) => {
                    let child_id = derive_child_id(id, &key, field, child, None);
                    self.set_field(id, key, RecordValue::Link(child_id.clone()));
                    self.visit_child(&child_id, field, variables, child)?;
                }
                Some(_) => {
                    return Err(ShapeError::ExpectedObject {
                        field: field.response_key().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    fn visit_child(
        &mut self,
        child_id: &DataId,
        field: &LinkedField,
        variables: &Variables,
        child: &Map<String, JsonValue>,
    ) -> Result<(), ShapeError> {
        let typename = child_typename(field, child)?;
        self.ensure_record(child_id, Some(typename));
        self.visit_selections(child_id, &field.selections, variables, child)
    }

    fn emit_handle_payload(&mut self, id: &DataId, handle: &HandleField, variables: &Variables) {
        let args = resolve_arguments(&handle.args, variables);
        let field_key = storage_key_of_values(&handle.name, &args);
        let handle_key = storage_key_of_values(
            &handle_field_key(&handle.handle, handle.key.as_deref(), &handle.name),
            &args,
        );
        self.handle_payloads.push(HandleFieldPayload {
            args,
            data_id: id.clone(),
            field_key,
            handle: handle.handle.clone(),
            handle_key,
        });
    }

    /// Creates the record for `id` when the source does not already hold
    /// one. Tombstoned ids are revived: a normalization write is a fresh
    /// authoritative statement that the entity exists.
    fn ensure_record(&mut self, id: &DataId, typename: Option<String>) {
        if matches!(self.source.get(id), RecordLookup::Present(_)) {
            if let Some(typename) = typename {
                if let Some(record) = self.source.get_mut(id) {
                    if record.typename().is_none() {
                        record.set_typename(typename);
                    }
                }
            }
        } else {
            self.source.set(Record::new(id.clone(), typename));
        }
    }

    fn set_field(&mut self, id: &DataId, key: String, value: RecordValue) {
        debug_assert!(
            matches!(self.source.get(id), RecordLookup::Present(_)),
            "record must be ensured before its fields are written"
        );
        if let Some(record) = self.source.get_mut(id) {
            record.set(key, value);
        }
    }

    fn type_matches(&self, id: &DataId, condition: Option<&str>) -> bool {
        match condition {
            None => true,
            Some(condition) => self
                .source
                .get(id)
                .record()
                .and_then(Record::typename)
                .is_some_and(|typename| typename == condition),
        }
    }
}

/// Derives the identity of a linked child object.
///
/// A response `id` scalar is adopted only when the field's type uses
/// global identity; a local `id` on an embedded object must not alias
/// into the global keyspace. Everything else gets a synthesized client
/// id, stable across re-normalizations of the same parent and key.
fn derive_child_id(
    parent: &DataId,
    storage_key: &str,
    field: &LinkedField,
    child: &Map<String, JsonValue>,
    index: Option<usize>,
) -> DataId {
    if field.uses_global_id {
        if let Some(JsonValue::String(id)) = child.get("id") {
            return DataId::new(id);
        }
    }
    match index {
        None => client_id(parent, storage_key),
        Some(index) => client_id_indexed(parent, storage_key, index),
    }
}

fn child_typename(
    field: &LinkedField,
    child: &Map<String, JsonValue>,
) -> Result<String, ShapeError> {
    if let Some(concrete) = &field.concrete_type {
        return Ok(concrete.clone());
    }
    match child.get("__typename") {
        Some(JsonValue::String(typename)) => Ok(typename.clone()),
        _ => Err(ShapeError::MissingTypename {
            field: field.response_key().to_owned(),
        }),
    }
}

/// Evaluates an `@include`/`@skip` condition against `variables`.
pub(crate) fn evaluate_condition(
    condition: &Condition,
    variables: &Variables,
) -> Result<bool, ShapeError> {
    let value = match &condition.value {
        ArgumentValue::Literal(value) => value.clone(),
        ArgumentValue::Variable(name) => variables.get(name).cloned().ok_or_else(|| {
            ShapeError::NonBooleanCondition {
                variable: name.clone(),
            }
        })?,
    };
    match value {
        JsonValue::Bool(passed) => Ok(passed == condition.passing_value),
        _ => Err(ShapeError::NonBooleanCondition {
            variable: match &condition.value {
                ArgumentValue::Variable(name) => name.clone(),
                ArgumentValue::Literal(_) => "<literal>".to_owned(),
            },
        }),
    }
}
