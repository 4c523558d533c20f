// periscope/periscope/src/value/mod.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The host value graph.
//!
//! Rust has no runtime reflection, so the embedding host materializes the
//! state it wants inspectable into this graph: a shared, mutable, possibly
//! cyclic structure of [`HostValue`] nodes behind [`ObjectRef`] handles.
//! The engine only ever references these nodes; it never owns host state.
//!
//! Callables are first-class ([`HostFunc`]) and back the Invoke capability.
//! Objects may carry a custom rendering hook and a source location, which
//! back the `repr` and `source` operations respectively.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde_json::Value as Json;

/// Shared handle to one node of the host value graph.
///
/// Identity (for cycle detection) is the allocation, i.e. two paths reaching
/// the same `ObjectRef` reach the same node.
pub type ObjectRef = Arc<RwLock<HostValue>>;

/// Wraps a value into a fresh graph node.
pub fn obj(value: HostValue) -> ObjectRef {
    Arc::new(RwLock::new(value))
}

/// Poison-tolerant read lock: a panic inside a host closure must not make
/// the graph permanently unreadable to the inspection server.
pub(crate) fn read(node: &ObjectRef) -> RwLockReadGuard<'_, HostValue> {
    match node.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn write(node: &ObjectRef) -> RwLockWriteGuard<'_, HostValue> {
    match node.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Source location/text for the `source` operation.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file: String,
    pub line: u32,
    pub text: String,
}

/// A host-supplied callable: the Invoke capability.
///
/// The closure receives already-resolved argument nodes and returns a new
/// node or an error message. Faults are reported to the controller as
/// structured errors, never propagated as panics.
#[derive(Clone)]
pub struct HostFunc {
    pub name: String,
    pub f: Arc<dyn Fn(&[ObjectRef]) -> Result<ObjectRef, String> + Send + Sync>,
    pub source: Option<SourceInfo>,
}

impl HostFunc {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&[ObjectRef]) -> Result<ObjectRef, String> + Send + Sync + 'static,
    ) -> Self {
        HostFunc {
            name: name.into(),
            f: Arc::new(f),
            source: None,
        }
    }

    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = Some(source);
        self
    }
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunc").field("name", &self.name).finish()
    }
}

/// Rendering hook for objects whose display is host-defined. An `Err` result
/// degrades to a placeholder carrying the error text.
pub type ReprFn = Arc<dyn Fn() -> Result<String, String> + Send + Sync>;

/// A structured object with a nominal type and named attributes.
pub struct HostObject {
    pub type_name: String,
    pub attrs: IndexMap<String, ObjectRef>,
    pub source: Option<SourceInfo>,
    pub repr_fn: Option<ReprFn>,
}

impl HostObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        HostObject {
            type_name: type_name.into(),
            attrs: IndexMap::new(),
            source: None,
            repr_fn: None,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: ObjectRef) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Attaches a callable attribute.
    pub fn method(mut self, func: HostFunc) -> Self {
        let name = func.name.clone();
        self.attrs.insert(name, obj(HostValue::Func(func)));
        self
    }

    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_repr(mut self, repr_fn: ReprFn) -> Self {
        self.repr_fn = Some(repr_fn);
        self
    }
}

impl std::fmt::Debug for HostObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostObject")
            .field("type_name", &self.type_name)
            .field("attrs", &self.attrs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One node of the host value graph.
#[derive(Debug)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ObjectRef>),
    Map(IndexMap<String, ObjectRef>),
    Object(HostObject),
    Func(HostFunc),
}

impl HostValue {
    /// Nominal type name shown to the controller.
    pub fn type_name(&self) -> String {
        match self {
            HostValue::Null => "null".to_string(),
            HostValue::Bool(_) => "bool".to_string(),
            HostValue::Int(_) => "int".to_string(),
            HostValue::Float(_) => "float".to_string(),
            HostValue::Str(_) => "str".to_string(),
            HostValue::List(_) => "list".to_string(),
            HostValue::Map(_) => "map".to_string(),
            HostValue::Object(o) => o.type_name.clone(),
            HostValue::Func(_) => "function".to_string(),
        }
    }

    /// Element count for sized containers.
    pub fn length(&self) -> Option<usize> {
        match self {
            HostValue::List(items) => Some(items.len()),
            HostValue::Map(entries) => Some(entries.len()),
            _ => None,
        }
    }

    /// Converts a JSON payload (wire `args` / `set_value` values) into a
    /// fresh subgraph.
    pub fn from_json(json: &Json) -> ObjectRef {
        let value = match json {
            Json::Null => HostValue::Null,
            Json::Bool(b) => HostValue::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    HostValue::Int(i)
                } else {
                    HostValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => HostValue::Str(s.clone()),
            Json::Array(items) => HostValue::List(items.iter().map(HostValue::from_json).collect()),
            Json::Object(map) => HostValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), HostValue::from_json(v)))
                    .collect(),
            ),
        };
        obj(value)
    }
}

// Depth at which nested container reprs collapse to `...`.
const REPR_NEST_DEPTH: usize = 2;

/// Renders a bounded one-line form of a node. Never panics, never recurses
/// into a cycle, and cuts oversized output with an explicit `...` marker.
pub fn safe_repr(node: &ObjectRef, max_len: usize) -> String {
    locked_repr(&read(node), Arc::as_ptr(node), max_len)
}

/// Same rendering, from a guard the caller already holds. Taking the node's
/// lock a second time while the first guard is live can block forever behind
/// a queued writer, so callers that hold a guard must pass the borrowed
/// value in rather than go through [`safe_repr`].
pub(crate) fn locked_repr(
    value: &HostValue,
    ptr: *const RwLock<HostValue>,
    max_len: usize,
) -> String {
    let mut seen = vec![ptr];
    let full = render_value(value, REPR_NEST_DEPTH, &mut seen);
    truncate_repr(full, max_len)
}

fn repr_inner(node: &ObjectRef, depth: usize, seen: &mut Vec<*const RwLock<HostValue>>) -> String {
    let ptr = Arc::as_ptr(node);
    if seen.contains(&ptr) {
        return "...".to_string();
    }
    seen.push(ptr);
    let rendered = render_value(&read(node), depth, seen);
    seen.pop();
    rendered
}

fn render_value(
    value: &HostValue,
    depth: usize,
    seen: &mut Vec<*const RwLock<HostValue>>,
) -> String {
    match value {
        HostValue::Null => "null".to_string(),
        HostValue::Bool(b) => b.to_string(),
        HostValue::Int(i) => i.to_string(),
        HostValue::Float(f) => f.to_string(),
        HostValue::Str(s) => format!("{s:?}"),
        HostValue::List(items) => {
            if depth == 0 {
                format!("[... {} items]", items.len())
            } else {
                let inner: Vec<String> = items
                    .iter()
                    .map(|item| repr_inner(item, depth - 1, seen))
                    .collect();
                format!("[{}]", inner.join(", "))
            }
        }
        HostValue::Map(entries) => {
            if depth == 0 {
                format!("{{... {} entries}}", entries.len())
            } else {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{k:?}: {}", repr_inner(v, depth - 1, seen)))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
        HostValue::Object(object) => match &object.repr_fn {
            Some(repr_fn) => match repr_fn() {
                Ok(text) => text,
                Err(message) => format!("<repr error: {message}>"),
            },
            None => format!("<{}>", object.type_name),
        },
        HostValue::Func(func) => format!("<fn {}>", func.name),
    }
}

/// Cuts `text` at `max_len` characters, marking the cut explicitly.
pub fn truncate_repr(text: String, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text;
    }
    let keep = max_len.saturating_sub(3);
    let mut cut: String = text.chars().take(keep).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_of_scalars() {
        assert_eq!(safe_repr(&obj(HostValue::Null), 200), "null");
        assert_eq!(safe_repr(&obj(HostValue::Int(-3)), 200), "-3");
        assert_eq!(safe_repr(&obj(HostValue::Bool(true)), 200), "true");
        assert_eq!(
            safe_repr(&obj(HostValue::Str("a\"b".to_string())), 200),
            "\"a\\\"b\""
        );
    }

    #[test]
    fn test_repr_of_containers_and_nesting_cap() {
        let inner = obj(HostValue::List(vec![obj(HostValue::Int(1))]));
        let mid = obj(HostValue::List(vec![inner]));
        let outer = obj(HostValue::List(vec![mid]));
        // Third nesting level collapses.
        assert_eq!(safe_repr(&outer, 200), "[[[... 1 items]]]");
    }

    #[test]
    fn test_repr_never_loops_on_cycles() {
        let node = obj(HostValue::List(vec![]));
        if let HostValue::List(items) = &mut *write(&node) {
            items.push(node.clone());
        }
        assert_eq!(safe_repr(&node, 200), "[...]");
    }

    #[test]
    fn test_repr_truncation_is_explicit() {
        let long = obj(HostValue::Str("x".repeat(500)));
        let rendered = safe_repr(&long, 20);
        assert_eq!(rendered.chars().count(), 20);
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn test_failing_repr_hook_degrades_to_placeholder() {
        let object = HostObject::new("Broken")
            .with_repr(Arc::new(|| Err("boom".to_string())));
        let node = obj(HostValue::Object(object));
        assert_eq!(safe_repr(&node, 200), "<repr error: boom>");
    }

    #[test]
    fn test_from_json_builds_graph() {
        let node = HostValue::from_json(&serde_json::json!({"a": [1, 2.5, "s", null]}));
        let guard = read(&node);
        match &*guard {
            HostValue::Map(entries) => {
                let list = entries.get("a").unwrap();
                assert_eq!(read(list).length(), Some(4));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }
}
