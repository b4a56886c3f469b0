// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Shared fixtures for scenario tests.
#![allow(dead_code)]

use std::sync::Arc;

use quiver_store::{
    normalize_response, Argument, DataId, FragmentDefinition, FragmentSpread,
    InMemoryRecordSource, JsonValue, LinkedField, OperationDescriptor, ScalarField, Selection,
    Selector, Store, Variables,
};
use serde_json::json;

/// Argument-less scalar selection.
pub fn scalar(name: &str) -> Selection {
    Selection::Scalar(ScalarField::new(name))
}

/// Singular linked selection with literal arguments and a concrete
/// type, on a globally-identified type.
pub fn linked_one(
    name: &str,
    args: Vec<(&str, JsonValue)>,
    concrete_type: Option<&str>,
    selections: Vec<Selection>,
) -> Selection {
    Selection::Linked(LinkedField {
        alias: None,
        name: name.to_owned(),
        args: args
            .into_iter()
            .map(|(n, v)| Argument::literal(n, v))
            .collect(),
        concrete_type: concrete_type.map(str::to_owned),
        uses_global_id: true,
        plural: false,
        selections,
    })
}

/// Plural linked selection with literal arguments and a concrete type,
/// on a globally-identified type.
pub fn linked_many(
    name: &str,
    args: Vec<(&str, JsonValue)>,
    concrete_type: Option<&str>,
    selections: Vec<Selection>,
) -> Selection {
    Selection::Linked(LinkedField {
        alias: None,
        name: name.to_owned(),
        args: args
            .into_iter()
            .map(|(n, v)| Argument::literal(n, v))
            .collect(),
        concrete_type: concrete_type.map(str::to_owned),
        uses_global_id: true,
        plural: true,
        selections,
    })
}

/// Fragment spread selection.
pub fn spread(fragment: &Arc<FragmentDefinition>, masked: bool) -> Selection {
    Selection::Spread(FragmentSpread {
        fragment: Arc::clone(fragment),
        args: Vec::new(),
        masked,
    })
}

/// Operation descriptor from root selections.
pub fn operation(name: &str, selections: Vec<Selection>) -> Arc<OperationDescriptor> {
    Arc::new(OperationDescriptor {
        name: name.to_owned(),
        selections,
    })
}

/// `{ user(id:"4") { id name } }` with a concrete `User` type.
pub fn user_query() -> Arc<OperationDescriptor> {
    operation(
        "UserQuery",
        vec![linked_one(
            "user",
            vec![("id", json!("4"))],
            Some("User"),
            vec![scalar("id"), scalar("name")],
        )],
    )
}

/// The root selector of `operation` with empty variables.
pub fn root_selector(operation: &Arc<OperationDescriptor>) -> Selector {
    Selector::operation_root(operation, Variables::new())
}

/// Normalizes `payload` for `operation` into a fresh source.
pub fn normalized(operation: &Arc<OperationDescriptor>, payload: &JsonValue) -> InMemoryRecordSource {
    let mut source = InMemoryRecordSource::new();
    normalize_response(&mut source, &root_selector(operation), payload)
        .unwrap_or_else(|err| panic!("normalize failed: {err}"));
    source
}

/// Publishes `{user: {id: "4", name}}` into `store` and clears the
/// pending notify state.
pub fn seed_user(store: &mut Store, name: &str) {
    let source = normalized(&user_query(), &json!({"user": {"id": "4", "name": name}}));
    store.publish(&source);
    store.notify();
}

/// Convenience id constructor.
pub fn id(raw: &str) -> DataId {
    DataId::new(raw)
}
