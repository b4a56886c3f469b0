// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Handle fields: client-side field population.
//!
//! A handle field defers its stored value to a handler registered on the
//! environment. The normalizer records where the raw server value landed
//! ([`HandleFieldPayload`]); during publish the queue hands each payload
//! to its handler, which writes the cooked value — typically under the
//! handle's own storage key — through the same proxy layer updaters use.

use crate::ast::ArgumentValues;
use crate::ident::DataId;
use crate::proxy::RecordSourceProxy;

/// Everything a handler needs to cook one handle field occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleFieldPayload {
    /// Resolved field arguments.
    pub args: ArgumentValues,
    /// Record the field was normalized onto.
    pub data_id: DataId,
    /// Storage key the raw server value was written under.
    pub field_key: String,
    /// Name of the handler to invoke.
    pub handle: String,
    /// Storage key the handler is expected to populate.
    pub handle_key: String,
}

/// A registered handle-field handler.
///
/// Handlers run during publish, in payload order, against the same
/// overlay as client updaters; their writes are merged into the base in
/// the same cycle.
pub trait Handler {
    /// Populates the handle field described by `payload`.
    fn update(&self, store: &mut RecordSourceProxy<'_>, payload: &HandleFieldPayload);
}

impl<F> Handler for F
where
    F: Fn(&mut RecordSourceProxy<'_>, &HandleFieldPayload),
{
    fn update(&self, store: &mut RecordSourceProxy<'_>, payload: &HandleFieldPayload) {
        self(store, payload);
    }
}
