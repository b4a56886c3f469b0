// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use common::{id, linked_many, linked_one, normalized, operation, root_selector, scalar};
use quiver_store::{
    normalize_response, Argument, ArgumentValue, Condition, HandleField, InMemoryRecordSource,
    RecordSource, RecordValue, Selection, Selector, ShapeError, Variables,
};
use serde_json::json;

#[test]
fn normalizes_a_simple_node() {
    let source = normalized(
        &common::user_query(),
        &json!({"user": {"id": "4", "name": "Zuck", "__typename": "User"}}),
    );

    let root = source
        .get(&id("client:root"))
        .record()
        .cloned()
        .unwrap_or_else(|| panic!("root record missing"));
    assert_eq!(
        root.get("user(id:\"4\")"),
        Some(&RecordValue::Link(id("4")))
    );

    let user = source
        .get(&id("4"))
        .record()
        .cloned()
        .unwrap_or_else(|| panic!("user record missing"));
    assert_eq!(user.typename(), Some("User"));
    assert_eq!(user.get("id"), Some(&RecordValue::Scalar(json!("4"))));
    assert_eq!(user.get("name"), Some(&RecordValue::Scalar(json!("Zuck"))));
}

#[test]
fn argument_order_does_not_change_the_source() {
    let forward = operation(
        "Friends",
        vec![linked_many(
            "friends",
            vec![("first", json!(10)), ("orderby", json!("name"))],
            Some("User"),
            vec![scalar("id")],
        )],
    );
    let reversed = operation(
        "Friends",
        vec![linked_many(
            "friends",
            vec![("orderby", json!("name")), ("first", json!(10))],
            Some("User"),
            vec![scalar("id")],
        )],
    );
    let payload = json!({"friends": [{"id": "1"}]});

    let a = normalized(&forward, &payload);
    let b = normalized(&reversed, &payload);
    assert_eq!(a, b);

    let root = a.get(&id("client:root"));
    let key_hit = root
        .record()
        .and_then(|r| r.get("friends(first:10,orderby:\"name\")"))
        .is_some();
    assert!(key_hit, "storage key must be canonical");
}

#[test]
fn renormalizing_is_idempotent() {
    let op = common::user_query();
    let payload = json!({"user": {"id": "4", "name": "Zuck"}});

    let once = normalized(&op, &payload);
    let mut twice = InMemoryRecordSource::new();
    for _ in 0..2 {
        let result = normalize_response(&mut twice, &root_selector(&op), &payload);
        assert!(result.is_ok());
    }
    assert_eq!(once, twice);
}

#[test]
fn children_without_ids_get_deterministic_client_ids() {
    let op = operation(
        "Viewer",
        vec![linked_one(
            "viewer",
            vec![],
            Some("Viewer"),
            vec![linked_one(
                "actor",
                vec![],
                Some("User"),
                vec![scalar("name")],
            )],
        )],
    );
    let source = normalized(&op, &json!({"viewer": {"actor": {"name": "Zuck"}}}));

    assert!(source.has(&id("client:root:viewer")));
    assert!(source.has(&id("client:root:viewer:actor")));
    let actor = source.get(&id("client:root:viewer:actor"));
    assert_eq!(
        actor.record().and_then(|r| r.get("name")),
        Some(&RecordValue::Scalar(json!("Zuck")))
    );
}

#[test]
fn plural_children_without_ids_get_indexed_client_ids() {
    let op = operation(
        "Comments",
        vec![linked_many(
            "comments",
            vec![],
            Some("Comment"),
            vec![scalar("text")],
        )],
    );
    let source = normalized(
        &op,
        &json!({"comments": [{"text": "first"}, null, {"id": "c7", "text": "third"}]}),
    );

    let root = source.get(&id("client:root"));
    let list = root
        .record()
        .and_then(|r| r.get("comments"))
        .and_then(RecordValue::as_link_list)
        .map(<[Option<quiver_store::DataId>]>::to_vec)
        .unwrap_or_default();
    assert_eq!(
        list,
        vec![
            Some(id("client:root:comments:0")),
            None,
            // The field's type uses global identity, so a child that
            // carries an `id` adopts it, index or not.
            Some(id("c7")),
        ]
    );
}

#[test]
fn locally_identified_types_never_adopt_a_response_id() {
    // `settings` is an embedded value object: it happens to carry an
    // `id` column, but its type does not participate in global
    // identity.
    let op = operation(
        "Settings",
        vec![Selection::Linked(quiver_store::LinkedField {
            alias: None,
            name: "settings".into(),
            args: vec![],
            concrete_type: Some("Settings".into()),
            uses_global_id: false,
            plural: false,
            selections: vec![scalar("id"), scalar("theme")],
        })],
    );
    let source = normalized(&op, &json!({"settings": {"id": "row-17", "theme": "dark"}}));

    assert!(
        !source.has(&id("row-17")),
        "a local row id must not alias into the global keyspace"
    );
    let settings = source.get(&id("client:root:settings"));
    assert_eq!(
        settings.record().and_then(|r| r.get("id")),
        Some(&RecordValue::Scalar(json!("row-17"))),
        "the local id is still stored as an ordinary scalar field"
    );
    assert_eq!(
        settings.record().and_then(|r| r.get("theme")),
        Some(&RecordValue::Scalar(json!("dark")))
    );
}

#[test]
fn missing_fields_are_recorded_as_undefined() {
    let source = normalized(&common::user_query(), &json!({"user": {"id": "4"}}));
    let user = source.get(&id("4"));
    assert_eq!(
        user.record().and_then(|r| r.get("name")),
        Some(&RecordValue::Undefined)
    );
}

#[test]
fn scalar_where_link_expected_fails_the_pass() {
    let mut source = InMemoryRecordSource::new();
    let result = normalize_response(
        &mut source,
        &root_selector(&common::user_query()),
        &json!({"user": "not-an-object"}),
    );
    assert_eq!(
        result.err(),
        Some(ShapeError::ExpectedObject {
            field: "user".into()
        })
    );
}

#[test]
fn polymorphic_fields_require_typename() {
    let op = operation(
        "Node",
        vec![linked_one(
            "node",
            vec![("id", json!("4"))],
            None,
            vec![scalar("id")],
        )],
    );
    let mut source = InMemoryRecordSource::new();
    let result = normalize_response(&mut source, &root_selector(&op), &json!({"node": {"id": "4"}}));
    assert_eq!(
        result.err(),
        Some(ShapeError::MissingTypename {
            field: "node".into()
        })
    );
}

#[test]
fn conditions_skip_subtrees() {
    let conditional = |passing: bool| {
        operation(
            "Profile",
            vec![linked_one(
                "user",
                vec![("id", json!("4"))],
                Some("User"),
                vec![
                    scalar("id"),
                    Selection::Condition(Condition {
                        passing_value: passing,
                        value: ArgumentValue::Variable("withName".into()),
                        selections: vec![scalar("name")],
                    }),
                ],
            )],
        )
    };
    let payload = json!({"user": {"id": "4", "name": "Zuck"}});
    let mut variables = Variables::new();
    variables.insert("withName".into(), json!(false));

    // @include with a false variable: subtree skipped.
    let mut skipped = InMemoryRecordSource::new();
    let selector = Selector::operation_root(&conditional(true), variables.clone());
    assert!(normalize_response(&mut skipped, &selector, &payload).is_ok());
    assert_eq!(
        skipped.get(&id("4")).record().and_then(|r| r.get("name")),
        None
    );

    // @skip with a false variable: subtree written.
    let mut written = InMemoryRecordSource::new();
    let selector = Selector::operation_root(&conditional(false), variables);
    assert!(normalize_response(&mut written, &selector, &payload).is_ok());
    assert_eq!(
        written.get(&id("4")).record().and_then(|r| r.get("name")),
        Some(&RecordValue::Scalar(json!("Zuck")))
    );
}

#[test]
fn inline_fragments_gate_on_typename() {
    let op = operation(
        "Node",
        vec![linked_one(
            "node",
            vec![("id", json!("4"))],
            None,
            vec![
                scalar("__typename"),
                Selection::Inline(quiver_store::InlineFragment {
                    type_condition: "User".into(),
                    selections: vec![scalar("name")],
                }),
                Selection::Inline(quiver_store::InlineFragment {
                    type_condition: "Page".into(),
                    selections: vec![scalar("likes")],
                }),
            ],
        )],
    );
    let source = normalized(
        &op,
        &json!({"node": {"__typename": "User", "name": "Zuck", "likes": 9}}),
    );
    let node = source.get(&id("client:root:node(id:\"4\")"));
    let record = node.record().cloned();
    assert!(
        record.as_ref().and_then(|r| r.get("name")).is_some(),
        "matching inline fragment is entered"
    );
    assert!(
        record.as_ref().and_then(|r| r.get("likes")).is_none(),
        "non-matching inline fragment is skipped"
    );
}

#[test]
fn handle_fields_emit_payloads_in_traversal_order() {
    let op = operation(
        "Feed",
        vec![linked_one(
            "viewer",
            vec![],
            Some("Viewer"),
            vec![
                Selection::Handle(HandleField {
                    alias: None,
                    name: "newsFeed".into(),
                    args: vec![Argument::literal("first", json!(10))],
                    handle: "connection".into(),
                    key: Some("Feed_newsFeed".into()),
                    plural: false,
                    selections: Some(vec![scalar("id")]),
                }),
                Selection::Handle(HandleField {
                    alias: None,
                    name: "title".into(),
                    args: vec![],
                    handle: "intern".into(),
                    key: None,
                    plural: false,
                    selections: None,
                }),
            ],
        )],
    );
    let mut source = InMemoryRecordSource::new();
    let payloads = normalize_response(
        &mut source,
        &root_selector(&op),
        &json!({"viewer": {"title": "x"}}),
    )
    .unwrap_or_else(|err| panic!("normalize failed: {err}"));

    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0].handle, "connection");
    assert_eq!(payloads[0].data_id, id("client:root:viewer"));
    assert_eq!(payloads[0].field_key, "newsFeed(first:10)");
    assert_eq!(
        payloads[0].handle_key,
        "__Feed_newsFeed_connection(first:10)"
    );
    assert_eq!(payloads[1].handle, "intern");
    assert_eq!(payloads[1].handle_key, "__title_intern");
}
