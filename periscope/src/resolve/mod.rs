// periscope/periscope/src/resolve/mod.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Path resolution and the read/mutate operations built on it.
//!
//! All functions here are synchronous and side-effect free except for the
//! explicit mutators (`set_value`, `call_path`); the server routes those
//! through the dispatch coordinator, everything else runs inline on the
//! connection task.

pub mod path;
pub mod serialize;

use serde_json::{json, Value as Json};

use periscope_proto::{InspectNode, ListNode};

use crate::config::Limits;
use crate::error::{EngineError, Result};
use crate::registry::Namespaces;
use crate::value::{obj, read, write, HostValue, ObjectRef};

use path::{parse_path, Accessor};

fn resolution_error(
    accessor: &Accessor,
    partial: &str,
    message: impl Into<String>,
) -> EngineError {
    EngineError::PathResolution {
        segment: accessor.to_string(),
        partial: partial.to_string(),
        message: message.into(),
    }
}

/// Applies one accessor to a value, failing fast with the exact segment.
fn apply(current: &ObjectRef, accessor: &Accessor, partial: &str) -> Result<ObjectRef> {
    let guard = read(current);
    match (accessor, &*guard) {
        (Accessor::Attr(name), HostValue::Object(object)) => {
            object.attrs.get(name).cloned().ok_or_else(|| {
                resolution_error(
                    accessor,
                    partial,
                    format!("`{}` has no attribute `{name}`", object.type_name),
                )
            })
        }
        // Dotted access on a mapping falls back to key lookup.
        (Accessor::Attr(name), HostValue::Map(entries)) => {
            entries.get(name).cloned().ok_or_else(|| {
                resolution_error(accessor, partial, format!("map has no key `{name}`"))
            })
        }
        (Accessor::Key(key), HostValue::Map(entries)) => {
            entries.get(key).cloned().ok_or_else(|| {
                resolution_error(accessor, partial, format!("map has no key `{key}`"))
            })
        }
        (Accessor::Index(index), HostValue::List(items)) => {
            let resolved = normalize_index(*index, items.len()).ok_or_else(|| {
                resolution_error(
                    accessor,
                    partial,
                    format!("index {index} out of range for list of length {}", items.len()),
                )
            })?;
            Ok(items[resolved].clone())
        }
        (Accessor::Index(_), other) => Err(resolution_error(
            accessor,
            partial,
            format!("`{}` is not indexable", other.type_name()),
        )),
        (Accessor::Key(_), other) => Err(resolution_error(
            accessor,
            partial,
            format!("`{}` is not subscriptable by key", other.type_name()),
        )),
        (Accessor::Attr(_), other) => Err(resolution_error(
            accessor,
            partial,
            format!("`{}` has no attributes", other.type_name()),
        )),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        Some(resolved as usize)
    } else {
        None
    }
}

/// Resolves a full path expression to the value it selects.
pub fn resolve_path(ns: &Namespaces, path_expr: &str) -> Result<ObjectRef> {
    let (root, accessors) = parse_path(path_expr)?;
    let mut current = ns.resolve_root(&root)?;
    let mut partial = root;
    for accessor in &accessors {
        current = apply(&current, accessor, &partial)?;
        partial.push_str(&accessor.to_string());
    }
    Ok(current)
}

/// Where a mutation lands: either a top-level namespace name, or the final
/// accessor applied to the container the rest of the path resolved to.
enum Target {
    Root(String),
    Slot {
        container: ObjectRef,
        accessor: Accessor,
        partial: String,
    },
}

fn resolve_target(ns: &Namespaces, path_expr: &str) -> Result<Target> {
    let (root, mut accessors) = parse_path(path_expr)?;
    let Some(last) = accessors.pop() else {
        return Ok(Target::Root(root));
    };
    let mut current = ns.resolve_root(&root)?;
    let mut partial = root;
    for accessor in &accessors {
        current = apply(&current, accessor, &partial)?;
        partial.push_str(&accessor.to_string());
    }
    Ok(Target::Slot {
        container: current,
        accessor: last,
        partial,
    })
}

// ---------------------------------------------------------------------------
// Read operations
// ---------------------------------------------------------------------------

/// Deep structured inspection of the value at a path.
pub fn inspect(ns: &Namespaces, path_expr: &str, limits: &Limits) -> Result<InspectNode> {
    let target = resolve_path(ns, path_expr)?;
    Ok(serialize::serialize_node(&target, limits))
}

/// Shallow enumeration at a path.
pub fn list_path(ns: &Namespaces, path_expr: &str, limits: &Limits) -> Result<ListNode> {
    let target = resolve_path(ns, path_expr)?;
    Ok(serialize::list_node(path_expr, &target, limits))
}

/// Quick type + repr at a path; the lowest-latency probe.
pub fn repr_path(ns: &Namespaces, path_expr: &str, limits: &Limits) -> Result<Json> {
    let target = resolve_path(ns, path_expr)?;
    let summary = serialize::summarize(&target, limits);
    Ok(json!({
        "path": path_expr,
        "type": summary.type_name,
        "repr": summary.repr,
    }))
}

/// Overview of all registered namespaces.
pub fn state_entries(ns: &Namespaces, limits: &Limits) -> Vec<Json> {
    let short = Limits {
        max_repr_len: 60.min(limits.max_repr_len),
        ..*limits
    };
    ns.snapshot()
        .iter()
        .map(|(name, root)| {
            let summary = serialize::summarize(root, &short);
            json!({
                "name": name,
                "type": summary.type_name,
                "repr": summary.repr,
            })
        })
        .collect()
}

/// Source location/text for the item at a path, when the host supplied one.
pub fn source(ns: &Namespaces, path_expr: &str) -> Result<Json> {
    let target = resolve_path(ns, path_expr)?;
    let info = match &*read(&target) {
        HostValue::Object(object) => object.source.clone(),
        HostValue::Func(func) => func.source.clone(),
        _ => None,
    };
    match info {
        Some(info) => Ok(json!({
            "path": path_expr,
            "file": info.file,
            "line": info.line,
            "source": info.text,
        })),
        None => Err(EngineError::NotFound(format!(
            "no source available for `{path_expr}`"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Mutating operations (routed through the dispatch coordinator by the server)
// ---------------------------------------------------------------------------

/// Assigns a JSON payload at a path. A bare top-level name assigns into the
/// namespace registry itself. Returns the new value's quick rendering.
pub fn set_value(ns: &Namespaces, path_expr: &str, value: &Json, limits: &Limits) -> Result<Json> {
    let new_node = HostValue::from_json(value);
    match resolve_target(ns, path_expr)? {
        Target::Root(name) => {
            ns.register(name, new_node.clone());
        }
        Target::Slot {
            container,
            accessor,
            partial,
        } => {
            let mut guard = write(&container);
            match (&accessor, &mut *guard) {
                (Accessor::Attr(name), HostValue::Object(object)) => {
                    object.attrs.insert(name.clone(), new_node.clone());
                }
                (Accessor::Attr(name), HostValue::Map(entries)) => {
                    entries.insert(name.clone(), new_node.clone());
                }
                (Accessor::Key(key), HostValue::Map(entries)) => {
                    entries.insert(key.clone(), new_node.clone());
                }
                (Accessor::Index(index), HostValue::List(items)) => {
                    let resolved = normalize_index(*index, items.len()).ok_or_else(|| {
                        resolution_error(
                            &accessor,
                            &partial,
                            format!(
                                "index {index} out of range for list of length {}",
                                items.len()
                            ),
                        )
                    })?;
                    items[resolved] = new_node.clone();
                }
                (_, other) => {
                    return Err(resolution_error(
                        &accessor,
                        &partial,
                        format!("cannot assign into `{}`", other.type_name()),
                    ));
                }
            }
        }
    }
    let summary = serialize::summarize(&new_node, limits);
    Ok(json!({
        "path": path_expr,
        "ok": true,
        "type": summary.type_name,
        "new_value": summary.repr,
    }))
}

/// Invokes the callable at a path with JSON-decoded arguments. Returns the
/// result's quick rendering; a fault inside the callable is a capability
/// error, never a connection fault.
pub fn call_path(ns: &Namespaces, path_expr: &str, args: &[Json], limits: &Limits) -> Result<Json> {
    let target = resolve_path(ns, path_expr)?;
    let func = match &*read(&target) {
        HostValue::Func(func) => func.clone(),
        other => {
            return Err(EngineError::Capability(format!(
                "`{path_expr}` is not callable (type `{}`)",
                other.type_name()
            )));
        }
    };
    let arg_nodes: Vec<ObjectRef> = args.iter().map(HostValue::from_json).collect();
    let result = (func.f)(&arg_nodes).map_err(EngineError::Capability)?;
    let summary = serialize::summarize(&result, limits);
    Ok(json!({
        "path": path_expr,
        "result_type": summary.type_name,
        "result_repr": summary.repr,
    }))
}

/// Length of the value at a path, for the built-in evaluator.
pub fn length_of(ns: &Namespaces, path_expr: &str) -> Result<usize> {
    let target = resolve_path(ns, path_expr)?;
    let guard = read(&target);
    match guard.length() {
        Some(len) => Ok(len),
        None => match &*guard {
            HostValue::Str(s) => Ok(s.chars().count()),
            HostValue::Object(object) => Ok(object.attrs.len()),
            other => Err(EngineError::Capability(format!(
                "`{}` has no length",
                other.type_name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{HostFunc, HostObject};

    fn sample_namespaces() -> Namespaces {
        let ns = Namespaces::new();
        let alice = HostObject::new("User")
            .attr("email", obj(HostValue::Str("alice@example.com".into())))
            .attr("age", obj(HostValue::Int(31)));
        let bob = HostObject::new("User")
            .attr("email", obj(HostValue::Str("bob@example.com".into())))
            .attr("age", obj(HostValue::Int(44)));
        let root = HostObject::new("App")
            .attr(
                "users",
                obj(HostValue::List(vec![
                    obj(HostValue::Object(alice)),
                    obj(HostValue::Object(bob)),
                ])),
            )
            .method(HostFunc::new("user_count", |_| Ok(obj(HostValue::Int(2)))));
        ns.register("app", obj(HostValue::Object(root)));
        ns
    }

    #[test]
    fn test_resolve_attr_index_chain() {
        let ns = sample_namespaces();
        let email = resolve_path(&ns, "app.users[0].email").unwrap();
        match &*read(&email) {
            HostValue::Str(s) => assert_eq!(s, "alice@example.com"),
            other => panic!("unexpected value {other:?}"),
        };
    }

    #[test]
    fn test_negative_index_counts_from_end() {
        let ns = sample_namespaces();
        let email = resolve_path(&ns, "app.users[-1].email").unwrap();
        match &*read(&email) {
            HostValue::Str(s) => assert_eq!(s, "bob@example.com"),
            other => panic!("unexpected value {other:?}"),
        };
    }

    #[test]
    fn test_missing_middle_segment_names_exact_segment() {
        let ns = sample_namespaces();
        let err = resolve_path(&ns, "app.ghosts[0].email").unwrap_err();
        match err {
            EngineError::PathResolution {
                segment, partial, ..
            } => {
                assert_eq!(segment, ".ghosts");
                assert_eq!(partial, "app");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_index_on_non_subscriptable_value() {
        let ns = sample_namespaces();
        let err = resolve_path(&ns, "app.users[0].age[1]").unwrap_err();
        match err {
            EngineError::PathResolution {
                segment, partial, ..
            } => {
                assert_eq!(segment, "[1]");
                assert_eq!(partial, "app.users[0].age");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_set_value_then_read_back() {
        let ns = sample_namespaces();
        let limits = Limits::default();
        let out = set_value(
            &ns,
            "app.users[0].email",
            &json!("x@y.com"),
            &limits,
        )
        .unwrap();
        assert_eq!(out["ok"], true);
        let reread = repr_path(&ns, "app.users[0].email", &limits).unwrap();
        assert_eq!(reread["repr"], "\"x@y.com\"");
    }

    #[test]
    fn test_set_value_top_level_registers_name() {
        let ns = sample_namespaces();
        set_value(&ns, "flag", &json!(true), &Limits::default()).unwrap();
        let out = repr_path(&ns, "flag", &Limits::default()).unwrap();
        assert_eq!(out["repr"], "true");
    }

    #[test]
    fn test_call_path_invokes_and_summarizes() {
        let ns = sample_namespaces();
        let out = call_path(&ns, "app.user_count", &[], &Limits::default()).unwrap();
        assert_eq!(out["result_type"], "int");
        assert_eq!(out["result_repr"], "2");
    }

    #[test]
    fn test_call_fault_is_capability_error() {
        let ns = Namespaces::new();
        ns.register(
            "svc",
            obj(HostValue::Object(HostObject::new("Svc").method(
                HostFunc::new("explode", |_| Err("kaboom".to_string())),
            ))),
        );
        let err = call_path(&ns, "svc.explode", &[], &Limits::default()).unwrap_err();
        match err {
            EngineError::Capability(message) => assert!(message.contains("kaboom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_source_lookup() {
        let ns = Namespaces::new();
        let func = HostFunc::new("tick", |_| Ok(obj(HostValue::Null))).with_source(
            crate::value::SourceInfo {
                file: "src/clock.rs".into(),
                line: 42,
                text: "fn tick() {}".into(),
            },
        );
        ns.register(
            "clock",
            obj(HostValue::Object(HostObject::new("Clock").method(func))),
        );
        let out = source(&ns, "clock.tick").unwrap();
        assert_eq!(out["file"], "src/clock.rs");
        assert_eq!(out["line"], 42);

        let err = source(&ns, "clock").unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_length_of() {
        let ns = sample_namespaces();
        assert_eq!(length_of(&ns, "app.users").unwrap(), 2);
        assert_eq!(length_of(&ns, "app.users[0].email").unwrap(), 17);
        assert!(length_of(&ns, "app.users[0].age").is_err());
    }
}
