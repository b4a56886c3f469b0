// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Completeness checking: can a selector be read without missing data?
//!
//! The checker mirrors the reader's traversal but produces a single
//! [`Availability`] answer, short-circuiting on the first gap. When
//! missing-field handlers are supplied, a gap is first offered to each
//! handler of the matching kind, in registration order; the first one to
//! answer patches the source (so the subsequent fetch-or-read can use
//! the substituted value) and traversal continues.
//!
//! Handlers substitute for *Unknown* data only. A tombstone is an
//! authoritative server statement that the entity does not exist;
//! patching over it would resurrect deleted entities, so deleted targets
//! read as complete (null) and are never offered to handlers.

use crate::ast::{
    ArgumentValues, HandleField, LinkedField, ScalarField, Selection, Selector, Variables,
};
use crate::ident::DataId;
use crate::normalizer::evaluate_condition;
use crate::record::{JsonValue, Record, RecordValue};
use crate::source::{InMemoryRecordSource, RecordLookup, RecordSource};
use crate::storage_key::{handle_field_key, resolve_arguments, storage_key_of_values};

/// Result of a completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Every selected field can be read without gaps.
    Available,
    /// At least one selected field is unavailable and no handler could
    /// substitute for it.
    Missing,
}

/// Substitute-value callback for a missing scalar field.
pub type ScalarHandleFn =
    Box<dyn Fn(&ScalarField, Option<&Record>, &ArgumentValues) -> Option<JsonValue>>;

/// Substitute-id callback for a missing singular linked field.
pub type LinkedHandleFn =
    Box<dyn Fn(&LinkedField, Option<&Record>, &ArgumentValues) -> Option<DataId>>;

/// Substitute-ids callback for a missing plural linked field.
pub type PluralLinkedHandleFn =
    Box<dyn Fn(&LinkedField, Option<&Record>, &ArgumentValues) -> Option<Vec<Option<DataId>>>>;

/// A handler consulted when the checker hits a missing field,
/// discriminated by the kind of field it can substitute for.
pub enum MissingFieldHandler {
    /// Substitutes scalar values.
    Scalar(ScalarHandleFn),
    /// Substitutes singular linked ids.
    Linked(LinkedHandleFn),
    /// Substitutes plural linked id lists.
    PluralLinked(PluralLinkedHandleFn),
}

impl MissingFieldHandler {
    /// Wraps a scalar substitute callback.
    pub fn scalar(
        f: impl Fn(&ScalarField, Option<&Record>, &ArgumentValues) -> Option<JsonValue> + 'static,
    ) -> Self {
        Self::Scalar(Box::new(f))
    }

    /// Wraps a singular linked substitute callback.
    pub fn linked(
        f: impl Fn(&LinkedField, Option<&Record>, &ArgumentValues) -> Option<DataId> + 'static,
    ) -> Self {
        Self::Linked(Box::new(f))
    }

    /// Wraps a plural linked substitute callback.
    pub fn plural_linked(
        f: impl Fn(&LinkedField, Option<&Record>, &ArgumentValues) -> Option<Vec<Option<DataId>>>
            + 'static,
    ) -> Self {
        Self::PluralLinked(Box::new(f))
    }
}

impl std::fmt::Debug for MissingFieldHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Scalar(_) => "Scalar",
            Self::Linked(_) => "Linked",
            Self::PluralLinked(_) => "PluralLinked",
        };
        f.debug_tuple("MissingFieldHandler").field(&kind).finish()
    }
}

/// Checks whether `selector` can be read from `source` without missing
/// data, patching the source through `handlers` where possible.
pub fn check_selector(
    source: &mut InMemoryRecordSource,
    selector: &Selector,
    handlers: &[MissingFieldHandler],
) -> Availability {
    let mut checker = Checker {
        source,
        handlers,
        spread_stack: Vec::new(),
    };
    match checker.check_record(
        &selector.data_id,
        selector.node.selections(),
        &selector.variables,
    ) {
        Ok(()) => Availability::Available,
        Err(Incomplete) => Availability::Missing,
    }
}

/// Internal short-circuit marker.
struct Incomplete;

struct Checker<'a> {
    source: &'a mut InMemoryRecordSource,
    handlers: &'a [MissingFieldHandler],
    spread_stack: Vec<(DataId, usize)>,
}

impl Checker<'_> {
    fn check_record(
        &mut self,
        id: &DataId,
        selections: &[Selection],
        variables: &Variables,
    ) -> Result<(), Incomplete> {
        // The record is cloned so the borrow on the source is released
        // before any handler patches it.
        let record = match self.source.get(id) {
            RecordLookup::Missing => return Err(Incomplete),
            RecordLookup::Deleted => return Ok(()),
            RecordLookup::Present(record) => record.clone(),
        };
        self.check_selections(&record, selections, variables)
    }

    fn check_selections(
        &mut self,
        record: &Record,
        selections: &[Selection],
        variables: &Variables,
    ) -> Result<(), Incomplete> {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => self.check_scalar(record, field, variables)?,
                Selection::Linked(field) => self.check_linked(record, field, variables)?,
                Selection::Spread(spread) => {
                    if !type_matches(record, spread.fragment.type_condition.as_deref()) {
                        continue;
                    }
                    let mut merged = variables.clone();
                    merged.extend(resolve_arguments(&spread.args, variables));
                    let guard = (record.id().clone(), std::sync::Arc::as_ptr(&spread.fragment)
                        as usize);
                    if self.spread_stack.contains(&guard) {
                        continue;
                    }
                    self.spread_stack.push(guard);
                    let result =
                        self.check_selections(record, &spread.fragment.selections, &merged);
                    self.spread_stack.pop();
                    result?;
                }
                Selection::Inline(inline) => {
                    if type_matches(record, Some(&inline.type_condition)) {
                        self.check_selections(record, &inline.selections, variables)?;
                    }
                }
                Selection::Condition(condition) => {
                    if evaluate_condition(condition, variables).unwrap_or(false) {
                        self.check_selections(record, &condition.selections, variables)?;
                    }
                }
                Selection::Handle(handle) => self.check_handle(record, handle, variables)?,
            }
        }
        Ok(())
    }

    fn check_scalar(
        &mut self,
        record: &Record,
        field: &ScalarField,
        variables: &Variables,
    ) -> Result<(), Incomplete> {
        let args = resolve_arguments(&field.args, variables);
        let key = storage_key_of_values(&field.name, &args);
        match record.get(&key) {
            Some(RecordValue::Scalar(_)) => Ok(()),
            None | Some(RecordValue::Undefined) => {
                let value = self.consult_scalar_handlers(record.id(), field, &args);
                match value {
                    Some(value) => {
                        self.patch(record.id(), &key, RecordValue::Scalar(value));
                        Ok(())
                    }
                    None => Err(Incomplete),
                }
            }
            Some(_) => Err(Incomplete),
        }
    }

    fn check_linked(
        &mut self,
        record: &Record,
        field: &LinkedField,
        variables: &Variables,
    ) -> Result<(), Incomplete> {
        let args = resolve_arguments(&field.args, variables);
        let key = storage_key_of_values(&field.name, &args);
        match record.get(&key) {
            Some(RecordValue::Scalar(JsonValue::Null)) => Ok(()),
            Some(RecordValue::Link(child)) if !field.plural => {
                let child = child.clone();
                self.check_record(&child, &field.selections, variables)
            }
            Some(RecordValue::LinkList(ids)) if field.plural => {
                let ids = ids.clone();
                for id in ids.into_iter().flatten() {
                    self.check_record(&id, &field.selections, variables)?;
                }
                Ok(())
            }
            None | Some(RecordValue::Undefined) => {
                if field.plural {
                    let ids = self.consult_plural_handlers(record.id(), field, &args);
                    match ids {
                        Some(ids) => {
                            self.patch(record.id(), &key, RecordValue::LinkList(ids.clone()));
                            for id in ids.into_iter().flatten() {
                                self.check_record(&id, &field.selections, variables)?;
                            }
                            Ok(())
                        }
                        None => Err(Incomplete),
                    }
                } else {
                    let id = self.consult_linked_handlers(record.id(), field, &args);
                    match id {
                        Some(id) => {
                            self.patch(record.id(), &key, RecordValue::Link(id.clone()));
                            self.check_record(&id, &field.selections, variables)
                        }
                        None => Err(Incomplete),
                    }
                }
            }
            Some(_) => Err(Incomplete),
        }
    }

    fn check_handle(
        &mut self,
        record: &Record,
        handle: &HandleField,
        variables: &Variables,
    ) -> Result<(), Incomplete> {
        let args = resolve_arguments(&handle.args, variables);
        let key = storage_key_of_values(
            &handle_field_key(&handle.handle, handle.key.as_deref(), &handle.name),
            &args,
        );
        match (record.get(&key), &handle.selections) {
            (Some(RecordValue::Scalar(_)), None) => Ok(()),
            (Some(RecordValue::Scalar(JsonValue::Null)), Some(_)) => Ok(()),
            (Some(RecordValue::Link(child)), Some(selections)) if !handle.plural => {
                let (child, selections) = (child.clone(), selections.clone());
                self.check_record(&child, &selections, variables)
            }
            (Some(RecordValue::LinkList(ids)), Some(selections)) if handle.plural => {
                let (ids, selections) = (ids.clone(), selections.clone());
                for id in ids.into_iter().flatten() {
                    self.check_record(&id, &selections, variables)?;
                }
                Ok(())
            }
            _ => Err(Incomplete),
        }
    }

    fn consult_scalar_handlers(
        &self,
        id: &DataId,
        field: &ScalarField,
        args: &ArgumentValues,
    ) -> Option<JsonValue> {
        let record = self.source.get(id).record();
        self.handlers.iter().find_map(|handler| match handler {
            MissingFieldHandler::Scalar(f) => f(field, record, args),
            _ => None,
        })
    }

    fn consult_linked_handlers(
        &self,
        id: &DataId,
        field: &LinkedField,
        args: &ArgumentValues,
    ) -> Option<DataId> {
        let record = self.source.get(id).record();
        self.handlers.iter().find_map(|handler| match handler {
            MissingFieldHandler::Linked(f) => f(field, record, args),
            _ => None,
        })
    }

    fn consult_plural_handlers(
        &self,
        id: &DataId,
        field: &LinkedField,
        args: &ArgumentValues,
    ) -> Option<Vec<Option<DataId>>> {
        let record = self.source.get(id).record();
        self.handlers.iter().find_map(|handler| match handler {
            MissingFieldHandler::PluralLinked(f) => f(field, record, args),
            _ => None,
        })
    }

    fn patch(&mut self, id: &DataId, key: &str, value: RecordValue) {
        if let Some(record) = self.source.get_mut(id) {
            record.set(key, value);
        }
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
