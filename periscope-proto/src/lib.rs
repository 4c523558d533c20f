// periscope/periscope-proto/src/lib.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Wire protocol types for the periscope runtime inspection server.
//!
//! The protocol is newline-delimited JSON over a loopback TCP socket.
//! Each line is exactly one [`Request`] or one [`Response`]:
//!
//! ```text
//! Request:  {"id": 1, "op": "repr", "params": {"path": "app.users[0].email"}}
//! Response: {"id": 1, "result": {"path": "...", "type": "str", "repr": "\"x@y.com\""}}
//! Error:    {"id": 1, "error": {"kind": "path_resolution", "message": "..."}}
//! ```
//!
//! The request `id` is controller-chosen, opaque to the server, and echoed
//! verbatim in the response; it is the correlation key for in-flight requests
//! on one connection. Responses on a connection are strictly ordered with
//! respect to that connection's requests.
//!
//! This crate also defines [`DiscoveryRecord`], the on-disk format of the
//! discovery registry shared between instances and controllers. That format
//! must remain stable across cooperating versions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operations accepted by the inspection server.
///
/// `run`, `call` and `set_value` mutate host state and are rejected on a
/// readonly server; everything else is informational and always available.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Evaluate an expression (or execute a statement) via the host's
    /// Evaluate capability.
    Run,
    /// Invoke a callable at a path.
    Call,
    /// Assign a value at a path.
    SetValue,
    /// Bounded recursive inspection of the value at a path.
    Inspect,
    /// Shallow one-level enumeration at a path.
    ListPath,
    /// Quick type name + one-line rendering at a path.
    Repr,
    /// Source location/text of the item at a path, when the host supplied it.
    Source,
    /// Overview of all registered namespaces plus server session info.
    State,
    /// Liveness check; answers `"pong"`.
    Ping,
    /// Enumerate live instances from the discovery registry, pruning stale
    /// records as a side effect.
    RunningApps,
}

impl Op {
    /// Whether the operation can mutate host state.
    pub fn is_mutation(self) -> bool {
        matches!(self, Op::Run | Op::Call | Op::SetValue)
    }
}

/// A single request line.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    /// Controller-chosen correlation token, echoed verbatim.
    #[serde(default)]
    pub id: Value,
    pub op: Op,
    /// Operation-specific arguments (e.g. `path`, `args`, limit overrides).
    #[serde(default)]
    pub params: Value,
}

/// Error classification carried on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PathResolution,
    ReadonlyMode,
    DispatchTimeout,
    CapabilityFault,
    ProtocolFrame,
    NotFound,
    Bind,
    Internal,
}

/// A structured error descriptor attached to a failed [`Response`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

/// A single response line. Exactly one of `result` / `error` is present.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, kind: ErrorKind, message: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(WireError {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Broad shape classification used by the shallow listing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Mapping,
    Sequence,
    Object,
    Leaf,
}

/// One node of a bounded deep-inspection tree.
///
/// The walk that produces this structure is depth-, breadth- and
/// repr-length-bounded; `truncated` marks every place a limit was hit, and
/// `circular` marks a back-reference to a value already on the current path
/// from the root (the cycle is never re-expanded).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InspectNode {
    #[serde(rename = "type")]
    pub type_name: String,
    pub repr: String,
    /// Element count for sized containers, present even when children were
    /// truncated away (so the omitted count is recoverable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub circular: bool,
    /// Named attributes of an object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<NamedNode>,
    /// Children of a sequence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<InspectNode>,
    /// Entries of a mapping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntryNode>,
}

/// An attribute of an object inside an [`InspectNode`] tree.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NamedNode {
    pub name: String,
    pub value: InspectNode,
}

/// A key/value entry of a mapping inside an [`InspectNode`] tree.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EntryNode {
    /// Rendered key (keys may be non-string on the host side).
    pub key: String,
    pub value: InspectNode,
}

/// Result of the shallow `list_path` operation: a table of contents for the
/// value at a path, with no recursion.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListNode {
    pub path: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub kind: ContainerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Rendered keys of a mapping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Type + repr summaries of sequence elements, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Summary>,
    /// Non-callable attributes of an object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<NamedSummary>,
    /// Names of callable attributes of an object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Type name + bounded one-line rendering of a value.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Summary {
    #[serde(rename = "type")]
    pub type_name: String,
    pub repr: String,
}

/// A [`Summary`] with the attribute name it lives under.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NamedSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub repr: String,
}

/// One record of the discovery registry: a live (or recently live) server
/// instance that controllers can resolve by `instance_id`.
///
/// Each record is written only by its owning process; readers tolerate a
/// record disappearing mid-read and prune records whose endpoint no longer
/// answers a ping probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    pub process_id: u32,
    /// Unix timestamp (seconds) of server start.
    pub started_at: i64,
}
