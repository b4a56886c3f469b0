// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Error taxonomy for the cache core.
//!
//! Failure families are kept separate so callers can route them:
//!
//! - [`ShapeError`] — a payload's shape conflicts with its selection.
//!   Fails the enclosing normalize; no partial writes survive because
//!   normalization always targets a fresh source.
//! - [`StoreError`] — a programmer contract was violated (creating a
//!   record that already exists, looking up a root field the operation
//!   does not select, dispatching to an unregistered handler).
//! - [`NetworkError`] — transport failure, surfaced through the
//!   mutation observable's error channel.
//! - [`MutationError`] — composition of the above for the mutation
//!   entry point.
//!
//! Missing data is *not* an error: readers report it through
//! `is_missing_data` and the checker through `Availability`.

use thiserror::Error;

use crate::ident::DataId;

/// A payload's shape conflicts with the selection it was normalized
/// against.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    /// A linked field's response value was neither an object nor null.
    #[error("expected an object for linked field `{field}`")]
    ExpectedObject {
        /// Response key of the offending field.
        field: String,
    },
    /// A plural linked field's response value was not a list.
    #[error("expected a list for plural linked field `{field}`")]
    ExpectedList {
        /// Response key of the offending field.
        field: String,
    },
    /// A polymorphic linked field's response object carried no
    /// `__typename`, so the child record's type cannot be determined.
    #[error("missing `__typename` for polymorphic field `{field}`")]
    MissingTypename {
        /// Response key of the offending field.
        field: String,
    },
    /// A condition directive resolved to a non-boolean value.
    #[error("condition variable `{variable}` did not resolve to a boolean")]
    NonBooleanCondition {
        /// Name of the variable (or `<literal>` for literal conditions).
        variable: String,
    },
    /// The response root was not a JSON object.
    #[error("response root is not an object")]
    NonObjectRoot,
}

/// A programmer contract on the store surface was violated.
///
/// These surface synchronously and are never caught by the core.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// `create` was called for an id that already resolves to an
    /// existent record.
    #[error("record `{0}` already exists")]
    DuplicateRecord(DataId),
    /// A selector-bound proxy was asked for a root field the operation
    /// does not select.
    #[error("root field `{0}` is not part of the operation")]
    UnknownRootField(String),
    /// A handle payload named a handler that was never registered.
    #[error("no handler registered for handle `{0}`")]
    MissingHandler(String),
}

/// Transport-level failure reported by a [`crate::environment::Network`]
/// implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("network request failed: {message}")]
pub struct NetworkError {
    /// Human-readable transport failure description.
    pub message: String,
}

/// A field-level error reported by the server alongside (or instead of)
/// data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadError {
    /// Server-supplied error message.
    pub message: String,
    /// Response path the error applies to, when the server provided one.
    pub path: Option<Vec<String>>,
}

/// Failure of a publish-queue cycle.
///
/// A failed cycle discards its overlay; the base source is unchanged.
#[derive(Debug, Error)]
pub enum PublishError {
    /// A staged optimistic response did not match its selection.
    #[error(transparent)]
    Shape(#[from] ShapeError),
    /// A store contract was violated while running the cycle.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of the mutation entry point.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The transport failed; any optimistic update has been reverted.
    #[error(transparent)]
    Network(#[from] NetworkError),
    /// The server response did not match the mutation's selection.
    #[error(transparent)]
    Shape(#[from] ShapeError),
    /// Committing the response through the publish queue failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// The server answered with payload errors.
    #[error("server returned {} payload error(s)", .0.len())]
    Payload(Vec<PayloadError>),
}
