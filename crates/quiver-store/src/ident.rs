// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record identity.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Reserved identity of the synthetic root record.
pub const ROOT_ID: &str = "client:root";

/// Prefix shared by every locally created identity, including the root.
pub const CLIENT_ID_PREFIX: &str = "client:";

/// Opaque, stable identity of a record.
///
/// Ids are short strings: either server-issued global ids or
/// client-synthesized ids under the `client:` prefix. The wrapper is
/// cheap to clone (`Arc<str>` backed) because ids flow through seen-record
/// sets, updated-id sets, and snapshots in bulk.
///
/// Ids are compared byte-wise; the store never interprets their contents
/// beyond the reserved `client:` prefix.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DataId(Arc<str>);

impl DataId {
    /// Wraps a raw identity string.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the identity of the synthetic root record.
    #[must_use]
    pub fn root() -> Self {
        Self::new(ROOT_ID)
    }

    /// Returns the raw identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when this id was created locally rather than
    /// issued by the server.
    #[must_use]
    pub fn is_client_generated(&self) -> bool {
        self.0.starts_with(CLIENT_ID_PREFIX)
    }
}

/// Synthesizes the deterministic identity of a child record that carries
/// no global identity of its own: `parentId:storageKey`.
///
/// Re-normalizing the same parent and key always lands on the same id,
/// which is what makes merging writes idempotent.
pub fn client_id(parent: &DataId, storage_key: &str) -> DataId {
    DataId::new(format!("{}:{storage_key}", parent.as_str()))
}

/// Synthesizes the identity of the `index`-th element of a plural field
/// whose elements carry no global identity: `parentId:storageKey:index`.
pub fn client_id_indexed(parent: &DataId, storage_key: &str, index: usize) -> DataId {
    DataId::new(format!("{}:{storage_key}:{index}", parent.as_str()))
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataId({})", self.0)
    }
}

impl From<String> for DataId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<DataId> for String {
    fn from(value: DataId) -> Self {
        value.as_str().to_owned()
    }
}

impl From<&str> for DataId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
