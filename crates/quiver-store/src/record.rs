// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record value types: typed field values and the record itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ident::DataId;

/// JSON value type used for scalars, arguments, and variables.
pub type JsonValue = serde_json::Value;

/// A single field slot in a [`Record`], keyed by storage key.
///
/// Field values form a closed sum: scalars (including explicit null and
/// scalar lists), singular and plural linked references, and the
/// "known missing" sentinel. References carry [`DataId`]s, never direct
/// pointers, so cyclic graphs are representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordValue {
    /// A scalar value: number, string, boolean, null, or a list of
    /// scalars.
    Scalar(JsonValue),
    /// A reference to another record by identity.
    Link(DataId),
    /// A plural reference; elements may be explicit nulls.
    LinkList(Vec<Option<DataId>>),
    /// The server was asked for this field and did not answer it.
    Undefined,
}

impl RecordValue {
    /// Returns the scalar payload, if this value is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&JsonValue> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the linked identity, if this value is a singular link.
    #[must_use]
    pub fn as_link(&self) -> Option<&DataId> {
        match self {
            Self::Link(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the linked identities, if this value is a plural link.
    #[must_use]
    pub fn as_link_list(&self) -> Option<&[Option<DataId>]> {
        match self {
            Self::LinkList(ids) => Some(ids),
            _ => None,
        }
    }
}

/// A normalized record: one entity's fields keyed by storage key.
///
/// Records are value types. Merging or updating produces a new value
/// rather than aliasing shared state, which is what lets publish
/// overlays be built against a base and discarded on failure.
///
/// Invariants
/// - `id` is the identity the containing source stores the record under.
/// - Field keys are storage keys (see [`crate::storage_key`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: DataId,
    typename: Option<String>,
    fields: BTreeMap<String, RecordValue>,
}

impl Record {
    /// Creates an empty record for `id`.
    pub fn new(id: DataId, typename: Option<String>) -> Self {
        Self {
            id,
            typename,
            fields: BTreeMap::new(),
        }
    }

    /// Returns the record's own identity.
    #[must_use]
    pub fn id(&self) -> &DataId {
        &self.id
    }

    /// Returns the record's type name, when known.
    #[must_use]
    pub fn typename(&self) -> Option<&str> {
        self.typename.as_deref()
    }

    /// Sets the record's type name.
    pub fn set_typename(&mut self, typename: impl Into<String>) {
        self.typename = Some(typename.into());
    }

    /// Returns the value stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RecordValue> {
        self.fields.get(key)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: RecordValue) {
        self.fields.insert(key.into(), value);
    }

    /// Iterates the record's fields in storage-key order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &RecordValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field-wise merge: every field of `other` overwrites the
    /// corresponding field of `self`. Scalars overwrite; singular and
    /// plural references overwrite wholesale. `other`'s type name wins
    /// when it has one.
    pub fn merge_from(&mut self, other: &Self) {
        if other.typename.is_some() {
            self.typename.clone_from(&other.typename);
        }
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Copies every field of `other` into `self`, leaving `self`'s
    /// identity untouched. Used by updater proxies.
    pub fn copy_fields_from(&mut self, other: &Self) {
        self.merge_from(other);
    }
}
