// periscope/periscope/src/registry/mod.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The namespace registry: a process-local mapping from logical name to a
//! root node of the host value graph.
//!
//! Mutation is rare and host-driven; lookups from connection tasks take the
//! lock only long enough to clone the `Arc` handle (snapshot-on-read), so
//! concurrent `register` calls never block an in-flight walk.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::error::{EngineError, Result};
use crate::value::ObjectRef;

/// Registered roots, shared between the embedding host and the server.
#[derive(Clone, Default)]
pub struct Namespaces {
    inner: Arc<RwLock<IndexMap<String, ObjectRef>>>,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the root registered under `name`.
    pub fn register(&self, name: impl Into<String>, root: ObjectRef) {
        let name = name.into();
        tracing::debug!(name = %name, "registered namespace root");
        self.guard().insert(name, root);
    }

    /// Removes a registered root; no-op if absent.
    pub fn unregister(&self, name: &str) {
        self.guard().shift_remove(name);
    }

    /// Resolves a root by name.
    pub fn resolve_root(&self, name: &str) -> Result<ObjectRef> {
        self.read_guard()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("unknown namespace `{name}`")))
    }

    /// Copy-on-read view of all entries, in registration order.
    pub fn snapshot(&self) -> Vec<(String, ObjectRef)> {
        self.read_guard()
            .iter()
            .map(|(name, root)| (name.clone(), root.clone()))
            .collect()
    }

    fn guard(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, ObjectRef>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, ObjectRef>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{obj, HostValue};

    #[test]
    fn test_register_replaces_existing_entry() {
        let ns = Namespaces::new();
        ns.register("app", obj(HostValue::Int(1)));
        ns.register("app", obj(HostValue::Int(2)));
        let root = ns.resolve_root("app").unwrap();
        match &*crate::value::read(&root) {
            HostValue::Int(2) => {}
            other => panic!("expected replaced root, got {other:?}"),
        }
        assert_eq!(ns.snapshot().len(), 1);
    }

    #[test]
    fn test_unregister_is_noop_when_absent() {
        let ns = Namespaces::new();
        ns.unregister("ghost");
        assert!(ns.snapshot().is_empty());
    }

    #[test]
    fn test_resolve_unknown_root_is_not_found() {
        let ns = Namespaces::new();
        let err = ns.resolve_root("nope").unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_snapshot_survives_concurrent_register() {
        let ns = Namespaces::new();
        ns.register("a", obj(HostValue::Int(1)));
        let snapshot = ns.snapshot();
        ns.register("b", obj(HostValue::Int(2)));
        // The earlier snapshot is unaffected by later registration.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ns.snapshot().len(), 2);
    }
}
