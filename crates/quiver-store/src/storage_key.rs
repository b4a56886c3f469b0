// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Deterministic storage-key encoding.
//!
//! A storage key is the canonical string a field's value is stored under
//! in a record: `fieldName(arg1:v1,arg2:v2,…)` with the arguments that
//! survive resolution, or bare `fieldName` when none do.
//!
//! Determinism contract
//! - Argument names are sorted lexicographically.
//! - Values are encoded as canonical JSON: object keys sorted
//!   recursively, no whitespace.
//! - Arguments whose value resolves to undefined (an unbound variable)
//!   are dropped before encoding.
//!
//! The canonical writer is implemented explicitly rather than trusting
//! the JSON library's map iteration order; two logically equivalent
//! argument sets must produce byte-identical keys.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::ast::{Argument, ArgumentValue, ArgumentValues, Variables};
use crate::record::JsonValue;

/// Resolves argument ASTs against `variables`, dropping arguments whose
/// value is undefined. The result is keyed — and therefore ordered — by
/// argument name.
pub fn resolve_arguments(args: &[Argument], variables: &Variables) -> ArgumentValues {
    let mut resolved = BTreeMap::new();
    for arg in args {
        match &arg.value {
            ArgumentValue::Literal(value) => {
                resolved.insert(arg.name.clone(), value.clone());
            }
            ArgumentValue::Variable(name) => {
                if let Some(value) = variables.get(name) {
                    resolved.insert(arg.name.clone(), value.clone());
                }
            }
        }
    }
    resolved
}

/// Computes the storage key for `(name, args)` under `variables`.
pub fn storage_key(name: &str, args: &[Argument], variables: &Variables) -> String {
    storage_key_of_values(name, &resolve_arguments(args, variables))
}

/// Computes the storage key for a field name and already-resolved
/// argument values. Updater proxies use this form directly.
pub fn storage_key_of_values(name: &str, args: &ArgumentValues) -> String {
    if args.is_empty() {
        return name.to_owned();
    }
    let mut key = String::with_capacity(name.len() + 16);
    key.push_str(name);
    key.push('(');
    let mut first = true;
    for (arg_name, value) in args {
        if !first {
            key.push(',');
        }
        first = false;
        key.push_str(arg_name);
        key.push(':');
        write_canonical_json(&mut key, value);
    }
    key.push(')');
    key
}

/// Storage key under which a handle field's cooked value lives:
/// the raw field name (or the handle key when one is given) prefixed so
/// handler output never collides with server fields.
pub fn handle_field_key(handle: &str, key: Option<&str>, field_name: &str) -> String {
    let base = key.unwrap_or(field_name);
    format!("__{base}_{handle}")
}

/// Writes `value` as canonical JSON: object keys sorted, no whitespace.
fn write_canonical_json(out: &mut String, value: &JsonValue) {
    match value {
        JsonValue::Null => out.push_str("null"),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Number(n) => {
            // serde_json renders numbers without padding; reuse it.
            let _ = write!(out, "{n}");
        }
        JsonValue::String(s) => {
            // serde_json's string escaping is already canonical.
            let _ = write!(out, "{}", JsonValue::String(s.clone()));
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(out, item);
            }
            out.push(']');
        }
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", JsonValue::String((*k).clone()));
                out.push(':');
                if let Some(v) = map.get(*k) {
                    write_canonical_json(out, v);
                }
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_arguments_yields_bare_name() {
        assert_eq!(storage_key("name", &[], &Variables::new()), "name");
    }

    #[test]
    fn argument_order_is_canonical() {
        let a = storage_key(
            "friends",
            &[
                Argument::literal("first", json!(10)),
                Argument::literal("orderby", json!("name")),
            ],
            &Variables::new(),
        );
        let b = storage_key(
            "friends",
            &[
                Argument::literal("orderby", json!("name")),
                Argument::literal("first", json!(10)),
            ],
            &Variables::new(),
        );
        assert_eq!(a, b);
        assert_eq!(a, "friends(first:10,orderby:\"name\")");
    }

    #[test]
    fn unbound_variables_are_dropped() {
        let args = [
            Argument::literal("id", json!("4")),
            Argument::variable("scale", "pictureScale"),
        ];
        assert_eq!(storage_key("profile", &args, &Variables::new()), "profile(id:\"4\")");

        let mut variables = Variables::new();
        variables.insert("pictureScale".into(), json!(2));
        assert_eq!(
            storage_key("profile", &args, &variables),
            "profile(id:\"4\",scale:2)"
        );
    }

    #[test]
    fn nested_objects_encode_with_sorted_keys() {
        let args = [Argument::literal(
            "input",
            json!({"z": 1, "a": {"y": [1, 2], "b": null}}),
        )];
        assert_eq!(
            storage_key("search", &args, &Variables::new()),
            "search(input:{\"a\":{\"b\":null,\"y\":[1,2]},\"z\":1})"
        );
    }

    #[test]
    fn handle_keys_are_prefixed() {
        assert_eq!(handle_field_key("viewer", None, "me"), "__me_viewer");
        assert_eq!(
            handle_field_key("connection", Some("Feed_stories"), "stories"),
            "__Feed_stories_connection"
        );
    }
}
