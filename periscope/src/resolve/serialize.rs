// periscope/periscope/src/resolve/serialize.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Bounded serialization of the host value graph into wire nodes.
//!
//! The object graphs under inspection are host-controlled: they may be
//! cyclic, huge, or expensive to render. Everything produced here is
//! bounded — depth-gated recursion, per-container breadth caps, repr-length
//! cuts, and back-reference markers for values already on the current path
//! from the root.

use std::sync::RwLock;

use periscope_proto::{
    ContainerKind, EntryNode, InspectNode, ListNode, NamedNode, NamedSummary, Summary,
};

use crate::config::Limits;
use crate::value::{locked_repr, read, HostValue, ObjectRef};

/// Deep structured inspection: a bounded recursive walk.
pub fn serialize_node(node: &ObjectRef, limits: &Limits) -> InspectNode {
    let mut seen = Vec::new();
    walk(node, limits, 0, &mut seen)
}

/// Quick type + repr summary of a single value.
pub fn summarize(node: &ObjectRef, limits: &Limits) -> Summary {
    // One lock for both fields; a second acquisition on the same node can
    // wedge behind a writer queued in between.
    let guard = read(node);
    Summary {
        type_name: guard.type_name(),
        repr: locked_repr(&guard, std::sync::Arc::as_ptr(node), limits.max_repr_len),
    }
}

// Children extracted from a node while its lock was held. Recursion happens
// only after the guard is dropped, so a graph that reaches back into an
// ancestor never deadlocks.
enum Children {
    None,
    Items(Vec<ObjectRef>),
    Entries(Vec<(String, ObjectRef)>),
    Attrs(Vec<(String, ObjectRef)>),
}

fn walk(
    node: &ObjectRef,
    limits: &Limits,
    depth: usize,
    seen: &mut Vec<*const RwLock<HostValue>>,
) -> InspectNode {
    let ptr = std::sync::Arc::as_ptr(node);
    if seen.contains(&ptr) {
        return InspectNode {
            type_name: read(node).type_name(),
            repr: "<circular ref>".to_string(),
            circular: true,
            ..Default::default()
        };
    }

    let (mut out, children) = {
        let guard = read(node);
        let out = InspectNode {
            type_name: guard.type_name(),
            repr: locked_repr(&guard, ptr, limits.max_repr_len),
            length: guard.length(),
            ..Default::default()
        };
        let expandable = !matches!(
            &*guard,
            HostValue::Null
                | HostValue::Bool(_)
                | HostValue::Int(_)
                | HostValue::Float(_)
                | HostValue::Str(_)
                | HostValue::Func(_)
        );
        if !expandable {
            (out, Children::None)
        } else if depth >= limits.max_depth {
            // Deeper levels exist but are not expanded.
            let mut out = out;
            out.truncated = true;
            (out, Children::None)
        } else {
            let children = match &*guard {
                HostValue::List(items) => Children::Items(items.clone()),
                HostValue::Map(entries) => Children::Entries(
                    entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                ),
                HostValue::Object(object) => Children::Attrs(
                    object
                        .attrs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                ),
                _ => Children::None,
            };
            (out, children)
        }
    };

    seen.push(ptr);
    match children {
        Children::None => {}
        Children::Items(items) => {
            for (i, item) in items.iter().enumerate() {
                if i >= limits.max_items {
                    out.truncated = true;
                    break;
                }
                out.items.push(walk(item, limits, depth + 1, seen));
            }
        }
        Children::Entries(entries) => {
            for (i, (key, value)) in entries.iter().enumerate() {
                if i >= limits.max_items {
                    out.truncated = true;
                    break;
                }
                out.entries.push(EntryNode {
                    key: format!("{key:?}"),
                    value: walk(value, limits, depth + 1, seen),
                });
            }
        }
        Children::Attrs(attrs) => {
            for (i, (name, value)) in attrs.iter().enumerate() {
                if i >= limits.max_items {
                    out.truncated = true;
                    break;
                }
                out.attrs.push(NamedNode {
                    name: name.clone(),
                    value: walk(value, limits, depth + 1, seen),
                });
            }
        }
    }
    seen.pop();

    out
}

/// Shallow one-level enumeration: a table of contents with no recursion.
pub fn list_node(path: &str, node: &ObjectRef, limits: &Limits) -> ListNode {
    // Take what we need under the lock, then render without holding it.
    let (mut out, children) = {
        let guard = read(node);
        let out = ListNode {
            path: path.to_string(),
            type_name: guard.type_name(),
            kind: ContainerKind::Leaf,
            length: guard.length(),
            keys: Vec::new(),
            items: Vec::new(),
            attrs: Vec::new(),
            methods: Vec::new(),
            truncated: false,
        };
        let children = match &*guard {
            HostValue::Map(entries) => {
                Children::Entries(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            HostValue::List(items) => Children::Items(items.clone()),
            HostValue::Object(object) => Children::Attrs(
                object
                    .attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            _ => Children::None,
        };
        (out, children)
    };

    match children {
        Children::None => {}
        Children::Entries(entries) => {
            out.kind = ContainerKind::Mapping;
            for (i, (key, _)) in entries.iter().enumerate() {
                if i >= limits.max_items {
                    out.truncated = true;
                    break;
                }
                out.keys.push(format!("{key:?}"));
            }
        }
        Children::Items(items) => {
            out.kind = ContainerKind::Sequence;
            for (i, item) in items.iter().enumerate() {
                if i >= limits.max_items {
                    out.truncated = true;
                    break;
                }
                out.items.push(summarize(item, limits));
            }
        }
        Children::Attrs(attrs) => {
            out.kind = ContainerKind::Object;
            out.length = Some(attrs.len());
            if attrs.len() > limits.max_items {
                out.truncated = true;
            }
            for (name, value) in attrs {
                let is_callable = matches!(&*read(&value), HostValue::Func(_));
                if is_callable {
                    if out.methods.len() < limits.max_items {
                        out.methods.push(name);
                    }
                } else if out.attrs.len() < limits.max_items {
                    let summary = summarize(&value, limits);
                    out.attrs.push(NamedSummary {
                        name,
                        type_name: summary.type_name,
                        repr: summary.repr,
                    });
                }
            }
        }
    }

    out
}
