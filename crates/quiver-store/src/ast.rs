// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Selection AST consumed by the normalizer, reader, and checker.
//!
//! These types are the narrow contract with the compiler that produces
//! selection trees; the cache never parses query text itself. Selection
//! nodes form a closed sum, and fragment spreads carry their referenced
//! definition directly (`Arc`), so traversal never consults a
//! name→definition registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ident::DataId;
use crate::record::JsonValue;

/// Variable bindings for one selection traversal.
pub type Variables = BTreeMap<String, JsonValue>;

/// Concrete, already-resolved argument values, keyed by argument name.
pub type ArgumentValues = BTreeMap<String, JsonValue>;

/// An argument value as written in the selection: a literal or a
/// reference to a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    /// A literal JSON value.
    Literal(JsonValue),
    /// A reference to a variable, resolved against [`Variables`] at
    /// traversal time. An unbound variable resolves to undefined and the
    /// argument is dropped.
    Variable(String),
}

/// A named argument on a field or fragment spread.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    /// Argument name.
    pub name: String,
    /// Argument value AST.
    pub value: ArgumentValue,
}

impl Argument {
    /// Creates a literal argument.
    pub fn literal(name: impl Into<String>, value: JsonValue) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Literal(value),
        }
    }

    /// Creates a variable-referencing argument.
    pub fn variable(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Variable(variable.into()),
        }
    }
}

/// A leaf field selecting a scalar value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    /// Response-key alias, when the query renames the field.
    pub alias: Option<String>,
    /// Schema field name.
    pub name: String,
    /// Field arguments.
    pub args: Vec<Argument>,
}

impl ScalarField {
    /// Creates an argument-less scalar field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Key under which this field appears in response and snapshot
    /// objects.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A field selecting one linked record, or a list of them when `plural`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedField {
    /// Response-key alias, when the query renames the field.
    pub alias: Option<String>,
    /// Schema field name.
    pub name: String,
    /// Field arguments.
    pub args: Vec<Argument>,
    /// Concrete child type, when the schema pins one. Polymorphic
    /// fields leave this `None` and require `__typename` in responses.
    pub concrete_type: Option<String>,
    /// Whether the field's type participates in global identity. Only
    /// then is a response `id` scalar adopted as the child's [`DataId`];
    /// otherwise a client id is synthesized even when an `id` key is
    /// present (an embedded value object's local `id` must not alias
    /// into the global keyspace).
    pub uses_global_id: bool,
    /// Whether the field links a list of records.
    pub plural: bool,
    /// Child selections applied to each linked record.
    pub selections: Vec<Selection>,
}

impl LinkedField {
    /// Creates an argument-less linked field whose type uses global
    /// identity.
    pub fn new(name: impl Into<String>, plural: bool, selections: Vec<Selection>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            args: Vec::new(),
            concrete_type: None,
            uses_global_id: true,
            plural,
            selections,
        }
    }

    /// Key under which this field appears in response and snapshot
    /// objects.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A field whose stored value is populated by a registered client-side
/// handler rather than directly from the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleField {
    /// Response-key alias, when the query renames the field.
    pub alias: Option<String>,
    /// Schema field name the handle shadows.
    pub name: String,
    /// Field arguments.
    pub args: Vec<Argument>,
    /// Name of the registered handler to invoke.
    pub handle: String,
    /// Optional handle key distinguishing multiple handles on one field.
    pub key: Option<String>,
    /// Whether the handled field links a list of records.
    pub plural: bool,
    /// Child selections, present when the handled field is linked.
    pub selections: Option<Vec<Selection>>,
}

impl HandleField {
    /// Key under which the raw field appears in response objects.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A reusable named selection set with an optional type condition.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDefinition {
    /// Fragment name, used in fragment pointers.
    pub name: String,
    /// Type the fragment applies to; `None` means it matches any record.
    pub type_condition: Option<String>,
    /// The fragment's selections.
    pub selections: Vec<Selection>,
}

/// A use site of a fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentSpread {
    /// The referenced fragment definition.
    pub fragment: Arc<FragmentDefinition>,
    /// Argument bindings applied to the fragment's variables.
    pub args: Vec<Argument>,
    /// When `true`, readers emit a fragment pointer instead of inlining
    /// the fragment, so a downstream consumer re-reads it independently.
    pub masked: bool,
}

/// An anonymous type-conditioned selection set.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    /// Type name the enclosing record must carry for the subtree to
    /// apply.
    pub type_condition: String,
    /// Selections applied when the condition matches.
    pub selections: Vec<Selection>,
}

/// An `@include`/`@skip` directive subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// The boolean value the condition must resolve to for the subtree
    /// to apply (`true` for `@include`, `false` for `@skip`).
    pub passing_value: bool,
    /// The condition's boolean source: a literal or a variable.
    pub value: ArgumentValue,
    /// Selections guarded by the condition.
    pub selections: Vec<Selection>,
}

/// One node of a selection tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// A scalar leaf field.
    Scalar(ScalarField),
    /// A singular or plural linked field.
    Linked(LinkedField),
    /// A fragment use site.
    Spread(FragmentSpread),
    /// A type-conditioned inline selection set.
    Inline(InlineFragment),
    /// A directive-guarded selection set.
    Condition(Condition),
    /// A handler-populated field.
    Handle(HandleField),
}

/// A root operation (query or mutation) as compiled for the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    /// Operation name, recorded as the owner of fragment pointers read
    /// under it.
    pub name: String,
    /// Root selections, resolved against the root record.
    pub selections: Vec<Selection>,
}

/// The selection subtree a selector points at.
#[derive(Debug, Clone)]
pub enum SelectorNode {
    /// An operation root.
    Operation(Arc<OperationDescriptor>),
    /// A fragment.
    Fragment(Arc<FragmentDefinition>),
}

impl SelectorNode {
    /// The node's selections.
    #[must_use]
    pub fn selections(&self) -> &[Selection] {
        match self {
            Self::Operation(op) => &op.selections,
            Self::Fragment(fragment) => &fragment.selections,
        }
    }

    /// Operation name when the node is an operation root.
    #[must_use]
    pub fn operation_name(&self) -> Option<&str> {
        match self {
            Self::Operation(op) => Some(&op.name),
            Self::Fragment(_) => None,
        }
    }
}

impl PartialEq for SelectorNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Operation(a), Self::Operation(b)) => Arc::ptr_eq(a, b),
            (Self::Fragment(a), Self::Fragment(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for SelectorNode {}

/// A readable/writable region of the graph: a root identity, a selection
/// subtree, and the variables binding its free references.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    /// Identity of the record the selections start from.
    pub data_id: DataId,
    /// The selection subtree.
    pub node: SelectorNode,
    /// Variable bindings.
    pub variables: Variables,
}

impl Selector {
    /// Builds the selector that reads or writes `operation` at the root
    /// record with `variables`.
    pub fn operation_root(operation: &Arc<OperationDescriptor>, variables: Variables) -> Self {
        Self {
            data_id: DataId::root(),
            node: SelectorNode::Operation(Arc::clone(operation)),
            variables,
        }
    }

    /// Builds a fragment selector rooted at `data_id`.
    pub fn fragment(
        data_id: DataId,
        fragment: Arc<FragmentDefinition>,
        variables: Variables,
    ) -> Self {
        Self {
            data_id,
            node: SelectorNode::Fragment(fragment),
            variables,
        }
    }
}
