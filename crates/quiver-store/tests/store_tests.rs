// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{id, normalized, root_selector, seed_user};
use quiver_store::{
    InMemoryRecordSource, MutableRecordSource, Record, RecordSource, RecordState, RecordValue,
    SnapshotValue, Store,
};
use serde_json::json;

/// Collects the `name` field delivered to a subscriber.
fn subscribe_names(store: &mut Store) -> Rc<RefCell<Vec<String>>> {
    let names: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&names);
    let selector = root_selector(&common::user_query());
    let snapshot = store.lookup(&selector);
    store.subscribe(snapshot, move |snapshot| {
        let name = match &snapshot.data {
            SnapshotValue::Record(root) => match root.field("user") {
                Some(SnapshotValue::Record(user)) => match user.field("name") {
                    Some(SnapshotValue::Scalar(value)) => {
                        value.as_str().unwrap_or("<non-string>").to_owned()
                    }
                    other => format!("<{other:?}>"),
                },
                other => format!("<{other:?}>"),
            },
            other => format!("<{other:?}>"),
        };
        sink.borrow_mut().push(name);
    });
    names
}

#[test]
fn notify_dispatches_only_on_change() {
    let mut store = Store::new();
    seed_user(&mut store, "Zuck");
    let names = subscribe_names(&mut store);

    // Same value again: re-publish is a no-op, no callback.
    let same = normalized(&common::user_query(), &json!({"user": {"id": "4", "name": "Zuck"}}));
    store.publish(&same);
    store.notify();
    assert!(names.borrow().is_empty());

    let renamed = normalized(
        &common::user_query(),
        &json!({"user": {"id": "4", "name": "Zuckerberg"}}),
    );
    store.publish(&renamed);
    store.notify();
    assert_eq!(*names.borrow(), vec!["Zuckerberg".to_owned()]);
}

#[test]
fn notify_skips_subscribers_with_disjoint_dependencies() {
    let mut store = Store::new();
    seed_user(&mut store, "Zuck");
    let names = subscribe_names(&mut store);

    // An unrelated record changes.
    let mut unrelated = InMemoryRecordSource::new();
    let mut record = Record::new(id("99"), Some("Page".into()));
    record.set("title", RecordValue::Scalar(json!("News")));
    unrelated.set(record);
    store.publish(&unrelated);
    store.notify();

    assert!(
        names.borrow().is_empty(),
        "disjoint subscriber must not be called"
    );
}

#[test]
fn multiple_publishes_coalesce_into_one_dispatch() {
    let mut store = Store::new();
    seed_user(&mut store, "Zuck");
    let names = subscribe_names(&mut store);

    for name in ["A", "B", "C"] {
        let source = normalized(
            &common::user_query(),
            &json!({"user": {"id": "4", "name": name}}),
        );
        store.publish(&source);
    }
    store.notify();
    assert_eq!(
        *names.borrow(),
        vec!["C".to_owned()],
        "subscribers see only the net result"
    );
}

#[test]
fn unsubscribe_stops_dispatch() {
    let mut store = Store::new();
    seed_user(&mut store, "Zuck");
    let names: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&names);
    let selector = root_selector(&common::user_query());
    let snapshot = store.lookup(&selector);
    let token = store.subscribe(snapshot, move |_| sink.borrow_mut().push("called".into()));

    store.unsubscribe(token);
    store.unsubscribe(token);

    let renamed = normalized(
        &common::user_query(),
        &json!({"user": {"id": "4", "name": "Zuckerberg"}}),
    );
    store.publish(&renamed);
    store.notify();
    assert!(names.borrow().is_empty());
}

#[test]
fn tombstone_publish_deletes_and_notifies() {
    let mut store = Store::new();
    seed_user(&mut store, "Zuck");
    let names = subscribe_names(&mut store);

    let mut source = InMemoryRecordSource::new();
    source.delete(id("4"));
    store.publish(&source);
    store.notify();

    assert!(matches!(
        store.source().status(&id("4")),
        RecordState::Nonexistent
    ));
    assert_eq!(names.borrow().len(), 1, "deletion is a visible change");
}

#[test]
fn gc_reclaims_unretained_records() {
    let mut store = Store::new();
    seed_user(&mut store, "Zuck");

    let selector = root_selector(&common::user_query());
    let token = store.retain(selector);

    // Publish an unrelated record X.
    let mut unrelated = InMemoryRecordSource::new();
    unrelated.set(Record::new(id("X"), Some("Page".into())));
    store.publish(&unrelated);
    store.notify();

    // While retained, an explicit collect keeps everything reachable.
    store.collect();
    assert!(store.source().has(&id("4")), "retained records survive GC");
    assert!(!store.source().has(&id("X")), "unreachable records do not");

    // Releasing the retainer schedules a pass for the next tick.
    store.release(token);
    assert!(store.source().has(&id("4")), "GC has not run yet");
    store.notify();

    assert!(matches!(store.source().status(&id("4")), RecordState::Unknown));
    assert!(matches!(store.source().status(&id("X")), RecordState::Unknown));
    assert_eq!(store.source().len(), 1, "only the root record remains");
}

#[test]
fn release_is_idempotent_per_token() {
    let mut store = Store::new();
    seed_user(&mut store, "Zuck");
    let selector = root_selector(&common::user_query());

    let first = store.retain(selector.clone());
    let second = store.retain(selector);

    store.release(first);
    store.release(first);
    store.collect();
    assert!(
        store.source().has(&id("4")),
        "double release of one token must not drain the other retainer"
    );

    store.release(second);
    store.collect();
    assert!(!store.source().has(&id("4")));
}

#[test]
fn lookup_reads_through_the_optimistic_overlay() {
    let mut store = Store::new();
    seed_user(&mut store, "Zuck");

    let mut overlay = InMemoryRecordSource::new();
    let mut user = Record::new(id("4"), Some("User".into()));
    user.set("id", RecordValue::Scalar(json!("4")));
    user.set("name", RecordValue::Scalar(json!("Mark")));
    overlay.set(user);
    store.set_optimistic_source(Some(overlay));

    let snapshot = store.lookup(&root_selector(&common::user_query()));
    let name = match &snapshot.data {
        SnapshotValue::Record(root) => match root.field("user") {
            Some(SnapshotValue::Record(user)) => user.field("name").cloned(),
            _ => None,
        },
        _ => None,
    };
    assert_eq!(name, Some(SnapshotValue::Scalar(json!("Mark"))));

    store.set_optimistic_source(None);
    let snapshot = store.lookup(&root_selector(&common::user_query()));
    let name = match &snapshot.data {
        SnapshotValue::Record(root) => match root.field("user") {
            Some(SnapshotValue::Record(user)) => user.field("name").cloned(),
            _ => None,
        },
        _ => None,
    };
    assert_eq!(name, Some(SnapshotValue::Scalar(json!("Zuck"))));
}

#[test]
fn disabled_gc_does_not_run_at_notify() {
    let mut store = Store::with_config(quiver_store::StoreConfig {
        gc_enabled: false,
        ..Default::default()
    });
    seed_user(&mut store, "Zuck");
    let token = store.retain(root_selector(&common::user_query()));
    store.release(token);
    store.notify();
    assert!(
        store.source().has(&id("4")),
        "with gc disabled, scheduled passes do not run at notify"
    );
}
