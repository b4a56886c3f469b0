// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use common::{id, root_selector};
use quiver_store::{
    Availability, Environment, GraphResponse, MissingFieldHandler, MutationConfig, MutationError,
    Network, NetworkError, Observable, OperationDescriptor, PayloadError, RecordSource,
    SnapshotValue, Variables,
};
use serde_json::json;

/// A transport that replays a scripted result and counts executions.
struct ScriptedNetwork {
    result: RefCell<Option<Result<GraphResponse, NetworkError>>>,
    calls: Rc<Cell<u32>>,
}

impl ScriptedNetwork {
    fn ok(data: serde_json::Value, calls: &Rc<Cell<u32>>) -> Self {
        Self {
            result: RefCell::new(Some(Ok(GraphResponse {
                data,
                errors: Vec::new(),
            }))),
            calls: Rc::clone(calls),
        }
    }

    fn err(message: &str, calls: &Rc<Cell<u32>>) -> Self {
        Self {
            result: RefCell::new(Some(Err(NetworkError {
                message: message.to_owned(),
            }))),
            calls: Rc::clone(calls),
        }
    }

    fn payload_errors(errors: Vec<PayloadError>, calls: &Rc<Cell<u32>>) -> Self {
        Self {
            result: RefCell::new(Some(Ok(GraphResponse {
                data: json!({}),
                errors,
            }))),
            calls: Rc::clone(calls),
        }
    }
}

impl Network for ScriptedNetwork {
    fn execute(
        &self,
        _operation: &Arc<OperationDescriptor>,
        _variables: &Variables,
    ) -> Observable<GraphResponse, NetworkError> {
        self.calls.set(self.calls.get() + 1);
        match self.result.borrow_mut().take() {
            Some(Ok(response)) => Observable::of(response),
            Some(Err(err)) => Observable::throw(err),
            None => Observable::throw(NetworkError {
                message: "script exhausted".to_owned(),
            }),
        }
    }
}

fn user_name(env: &Environment) -> Option<String> {
    let snapshot = env.lookup(&root_selector(&common::user_query()));
    match &snapshot.data {
        SnapshotValue::Record(root) => match root.field("user") {
            Some(SnapshotValue::Record(user)) => match user.field("name") {
                Some(SnapshotValue::Scalar(value)) => value.as_str().map(str::to_owned),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

#[test]
fn execute_mutation_commits_and_reverts_optimistically() {
    let calls = Rc::new(Cell::new(0));
    let mut env = Environment::builder()
        .network(Box::new(ScriptedNetwork::ok(
            json!({"user": {"id": "4", "name": "Zuckerberg"}}),
            &calls,
        )))
        .build();
    let op = common::user_query();
    env.commit_payload(&op, Variables::new(), &json!({"user": {"id": "4", "name": "Zuck"}}))
        .unwrap_or_else(|err| panic!("seed failed: {err}"));

    let names: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&names);
    let snapshot = env.lookup(&root_selector(&op));
    env.subscribe(snapshot, move |snapshot| {
        if let SnapshotValue::Record(root) = &snapshot.data {
            if let Some(SnapshotValue::Record(user)) = root.field("user") {
                if let Some(SnapshotValue::Scalar(value)) = user.field("name") {
                    sink.borrow_mut()
                        .push(value.as_str().unwrap_or_default().to_owned());
                }
            }
        }
    });

    let mut config = MutationConfig::new(Arc::clone(&op), Variables::new());
    config.optimistic_response = Some(json!({"user": {"id": "4", "name": "Mark"}}));
    env.execute_mutation(config)
        .unwrap_or_else(|err| panic!("mutation failed: {err}"));

    assert_eq!(calls.get(), 1);
    assert_eq!(
        *names.borrow(),
        vec!["Mark".to_owned(), "Zuckerberg".to_owned()],
        "optimistic value, then the committed value"
    );
    assert_eq!(user_name(&env).as_deref(), Some("Zuckerberg"));
}

#[test]
fn network_errors_revert_the_optimistic_update() {
    let calls = Rc::new(Cell::new(0));
    let mut env = Environment::builder()
        .network(Box::new(ScriptedNetwork::err("boom", &calls)))
        .build();
    let op = common::user_query();
    env.commit_payload(&op, Variables::new(), &json!({"user": {"id": "4", "name": "Zuck"}}))
        .unwrap_or_else(|err| panic!("seed failed: {err}"));

    let mut config = MutationConfig::new(Arc::clone(&op), Variables::new());
    config.optimistic_response = Some(json!({"user": {"id": "4", "name": "Mark"}}));
    let result = env.execute_mutation(config);

    assert!(matches!(result, Err(MutationError::Network(_))));
    assert_eq!(
        user_name(&env).as_deref(),
        Some("Zuck"),
        "the optimistic value must not survive the failure"
    );
}

#[test]
fn payload_errors_surface_and_commit_nothing() {
    let calls = Rc::new(Cell::new(0));
    let mut env = Environment::builder()
        .network(Box::new(ScriptedNetwork::payload_errors(
            vec![PayloadError {
                message: "field error".to_owned(),
                path: Some(vec!["user".to_owned()]),
            }],
            &calls,
        )))
        .build();
    let op = common::user_query();
    env.commit_payload(&op, Variables::new(), &json!({"user": {"id": "4", "name": "Zuck"}}))
        .unwrap_or_else(|err| panic!("seed failed: {err}"));

    let result = env.execute_mutation(MutationConfig::new(Arc::clone(&op), Variables::new()));
    assert!(matches!(result, Err(MutationError::Payload(errors)) if errors.len() == 1));
    assert_eq!(user_name(&env).as_deref(), Some("Zuck"));
}

#[test]
fn check_consults_environment_missing_field_handlers() {
    let mut env = Environment::builder()
        .missing_field_handler(MissingFieldHandler::scalar(|field, _, _| {
            (field.name == "name").then(|| json!("Zuck"))
        }))
        .build();
    let op = common::user_query();
    env.commit_payload(&op, Variables::new(), &json!({"user": {"id": "4"}}))
        .unwrap_or_else(|err| panic!("seed failed: {err}"));

    assert_eq!(env.check(&root_selector(&op)), Availability::Available);
    let patched = env
        .store()
        .source()
        .get(&id("4"))
        .record()
        .and_then(|r| r.get("name"))
        .cloned();
    assert_eq!(
        patched,
        Some(quiver_store::RecordValue::Scalar(json!("Zuck")))
    );
}

#[test]
fn commit_update_survives_optimistic_reverts() {
    let mut env = Environment::default();
    let op = common::user_query();
    env.commit_payload(&op, Variables::new(), &json!({"user": {"id": "4", "name": "Zuck"}}))
        .unwrap_or_else(|err| panic!("seed failed: {err}"));

    let token = env
        .apply_update(quiver_store::OptimisticUpdate::store_updater(|proxy| {
            if let Some(mut user) = proxy.get(&quiver_store::DataId::new("4")) {
                user.set_value("name", None, json!("Optimist"));
            }
        }))
        .unwrap_or_else(|err| panic!("apply failed: {err}"));
    assert_eq!(user_name(&env).as_deref(), Some("Optimist"));

    env.commit_update(|proxy| {
        if let Some(mut user) = proxy.get(&quiver_store::DataId::new("4")) {
            user.set_value("nickname", None, json!("Z"));
        }
    })
    .unwrap_or_else(|err| panic!("commit failed: {err}"));

    env.revert_update(token)
        .unwrap_or_else(|err| panic!("revert failed: {err}"));
    assert_eq!(user_name(&env).as_deref(), Some("Zuck"));
    let nickname = env
        .store()
        .source()
        .get(&id("4"))
        .record()
        .and_then(|r| r.get("nickname"))
        .cloned();
    assert_eq!(
        nickname,
        Some(quiver_store::RecordValue::Scalar(json!("Z"))),
        "committed updater writes are permanent"
    );
}
