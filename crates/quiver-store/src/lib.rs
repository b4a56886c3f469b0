// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! quiver-store: an in-memory normalized cache for reactive graph data.
//!
//! Records are stored under stable identities and linked by id, never by
//! pointer. Structured reads walk a selection AST and return a snapshot
//! plus the exact set of records it depends on; publishes stage server
//! payloads and optimistic updates into overlays that merge into the
//! base at a single linearization point; notifications reach only the
//! subscribers whose dependency set intersects the records that actually
//! changed; reference-counted retention feeds a mark-sweep collector
//! that reclaims unreachable records.
//!
//! # Determinism
//!
//! State that is iterated — sources, snapshots, seen-record sets — lives
//! in `BTreeMap`/`BTreeSet` so merge order, sweep order, and test output
//! are stable. Storage keys are canonical: argument names sorted,
//! values in canonical JSON. Client-synthesized ids are deterministic
//! compositions of parent id and storage key.
//!
//! # Concurrency model
//!
//! Single-threaded cooperative. Every mutation flows through `&mut`
//! methods on [`Environment`]/[`Store`]; subscriber callbacks receive
//! `&Snapshot` only, so reentrant publishes are impossible by
//! construction rather than by convention.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::use_self
)]

mod ast;
mod checker;
mod environment;
mod error;
mod handles;
mod ident;
mod normalizer;
mod observable;
mod proxy;
mod publish_queue;
mod reader;
mod record;
mod source;
mod storage_key;
mod store;
mod telemetry;

// Re-exports for stable public API
pub use ast::{
    Argument, ArgumentValue, ArgumentValues, Condition, FragmentDefinition, FragmentSpread,
    HandleField, InlineFragment, LinkedField, OperationDescriptor, ScalarField, Selection,
    Selector, SelectorNode, Variables,
};
pub use checker::{
    check_selector, Availability, LinkedHandleFn, MissingFieldHandler, PluralLinkedHandleFn,
    ScalarHandleFn,
};
pub use environment::{
    Environment, EnvironmentBuilder, GraphResponse, MutationConfig, Network,
};
pub use error::{
    MutationError, NetworkError, PayloadError, PublishError, ShapeError, StoreError,
};
pub use handles::{HandleFieldPayload, Handler};
pub use ident::{client_id, client_id_indexed, DataId, CLIENT_ID_PREFIX, ROOT_ID};
pub use normalizer::normalize_response;
pub use observable::{Observable, ObservableSubscription, Observer, Sink};
pub use proxy::{RecordProxy, RecordSourceProxy, SelectorRecordSourceProxy};
pub use publish_queue::{OptimisticUpdate, PublishQueue, ResponsePayload, UpdateToken};
pub use reader::{read_selector, Snapshot, SnapshotRecord, SnapshotValue};
pub use record::{JsonValue, Record, RecordValue};
pub use source::{
    InMemoryRecordSource, MutableRecordSource, OverlayedRecordSource, RecordLookup, RecordSource,
    RecordState,
};
pub use storage_key::{
    handle_field_key, resolve_arguments, storage_key, storage_key_of_values,
};
pub use store::{RetainToken, Store, StoreConfig, SubscriptionToken};
pub use telemetry::{NullStoreTelemetry, StoreTelemetry};
