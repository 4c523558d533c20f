// periscope/periscope/src/server/commands.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Operation handlers for the inspection server.
//!
//! Read operations run inline on the connection task. Mutations (`run`,
//! `call`, `set_value`) are routed through the dispatch coordinator inside
//! `spawn_blocking`, because the rendezvous with the designated-thread hook
//! blocks the calling thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value as Json};

use periscope_proto::{ErrorKind, Op, Request, Response};

use crate::capability::EvalOutcome;
use crate::config::{LimitOverrides, Limits};
use crate::error::{EngineError, Result};
use crate::resolve::{self, serialize};
use crate::server::ServerState;

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Deserialize)]
struct CallParams {
    path: String,
    #[serde(default)]
    args: Vec<Json>,
}

#[derive(Deserialize)]
struct SetParams {
    path: String,
    value: Json,
}

#[derive(Deserialize)]
struct RunParams {
    code: String,
}

/// Routes one request to its handler and shapes the response line.
pub async fn dispatch_request(state: &Arc<ServerState>, request: Request) -> Response {
    let Request { id, op, params } = request;

    // The readonly gate comes before any resolution or parameter checks.
    if state.config.readonly && op.is_mutation() {
        return Response::error(
            id,
            ErrorKind::ReadonlyMode,
            EngineError::ReadonlyMode.to_string(),
        );
    }

    let limits = request_limits(state, &params);

    let result = match op {
        Op::Ping => Ok(json!("pong")),
        Op::State => Ok(state_overview(state, &limits)),
        Op::Inspect => with_path(&params, |path| {
            resolve::inspect(&state.namespaces, path, &limits).and_then(to_json)
        }),
        Op::ListPath => with_path(&params, |path| {
            resolve::list_path(&state.namespaces, path, &limits).and_then(to_json)
        }),
        Op::Repr => with_path(&params, |path| {
            resolve::repr_path(&state.namespaces, path, &limits)
        }),
        Op::Source => with_path(&params, |path| resolve::source(&state.namespaces, path)),
        Op::RunningApps => running_apps(state).await,
        Op::SetValue => set_value(state, params, limits).await,
        Op::Call => call(state, params, limits).await,
        Op::Run => run(state, params, limits).await,
    };

    match result {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::error(id, e.kind(), e.to_string()),
    }
}

/// Configured limits merged with any per-request overrides in the params.
fn request_limits(state: &ServerState, params: &Json) -> Limits {
    let overrides: LimitOverrides =
        serde_json::from_value(params.clone()).unwrap_or_default();
    state.config.limits.with_overrides(&overrides)
}

fn with_path<F>(params: &Json, f: F) -> Result<Json>
where
    F: FnOnce(&str) -> Result<Json>,
{
    let params: PathParams = parse_params(params)?;
    f(&params.path)
}

fn parse_params<'a, T: Deserialize<'a>>(params: &'a Json) -> Result<T> {
    T::deserialize(params)
        .map_err(|e| EngineError::ProtocolFrame(format!("invalid params: {e}")))
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Json> {
    Ok(serde_json::to_value(value)?)
}

/// Namespace overview plus a server session block, like the original's
/// `state` and the runtime daemon's `status` before it.
fn state_overview(state: &ServerState, limits: &Limits) -> Json {
    let last = state.stats.last_command_at.load(Ordering::Relaxed);
    json!({
        "namespaces": resolve::state_entries(&state.namespaces, limits),
        "server": {
            "version": env!("CARGO_PKG_VERSION"),
            "pid": std::process::id(),
            "readonly": state.config.readonly,
            "instance_id": state.config.instance_id,
            "started_at": state.stats.started_at.load(Ordering::Relaxed),
            "client_count": state.stats.client_count.load(Ordering::Relaxed),
            "command_count": state.stats.command_count.load(Ordering::Relaxed),
            "last_command_at": if last == 0 { Json::Null } else { json!(last) },
        },
    })
}

async fn running_apps(state: &Arc<ServerState>) -> Result<Json> {
    let discovery = state
        .discovery
        .as_ref()
        .ok_or_else(|| EngineError::Internal("discovery registry unavailable".to_string()))?;
    let live = discovery.list_live(state.config.probe_timeout).await;
    to_json(live)
}

/// Runs mutation work through the dispatch coordinator without stalling the
/// async runtime: the rendezvous blocks, so it lives on a blocking thread.
async fn dispatched<T, F>(state: &Arc<ServerState>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let dispatcher = state.dispatcher.clone();
    let joined = tokio::task::spawn_blocking(move || dispatcher.execute(work))
        .await
        .map_err(|e| EngineError::Internal(format!("mutation task join failed: {e}")))?;
    joined?
}

async fn set_value(state: &Arc<ServerState>, params: Json, limits: Limits) -> Result<Json> {
    let params: SetParams = parse_params(&params)?;
    let ns = state.namespaces.clone();
    dispatched(state, move || {
        resolve::set_value(&ns, &params.path, &params.value, &limits)
    })
    .await
}

async fn call(state: &Arc<ServerState>, params: Json, limits: Limits) -> Result<Json> {
    let params: CallParams = parse_params(&params)?;
    let ns = state.namespaces.clone();
    dispatched(state, move || {
        resolve::call_path(&ns, &params.path, &params.args, &limits)
    })
    .await
}

async fn run(state: &Arc<ServerState>, params: Json, limits: Limits) -> Result<Json> {
    let params: RunParams = parse_params(&params)?;
    let ns = state.namespaces.clone();
    let evaluator = state.current_evaluator();
    let outcome = dispatched(state, move || {
        evaluator
            .eval(&params.code, &ns)
            .map_err(EngineError::Capability)
    })
    .await?;
    match outcome {
        EvalOutcome::Value(value) => {
            let summary = serialize::summarize(&value, &limits);
            Ok(json!({
                "mode": "eval",
                "type": summary.type_name,
                "repr": summary.repr,
            }))
        }
        EvalOutcome::NoValue => Ok(json!({ "mode": "exec", "repr": "OK" })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::value::{obj, HostValue};

    fn test_state(readonly: bool) -> Arc<ServerState> {
        let state = ServerState::new(EngineConfig {
            readonly,
            ..Default::default()
        });
        state
            .namespaces
            .register("answer", obj(HostValue::Int(42)));
        Arc::new(state)
    }

    fn request(id: i64, op: Op, params: Json) -> Request {
        Request {
            id: json!(id),
            op,
            params,
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let state = test_state(false);
        let resp = dispatch_request(&state, request(1, Op::Ping, Json::Null)).await;
        assert_eq!(resp.result, Some(json!("pong")));
        assert_eq!(resp.id, json!(1));
    }

    #[tokio::test]
    async fn test_readonly_gate_precedes_resolution() {
        let state = test_state(true);
        // Even a nonsense path is rejected by the gate, not by resolution.
        let resp = dispatch_request(
            &state,
            request(2, Op::SetValue, json!({"path": "no.such.thing", "value": 1})),
        )
        .await;
        let error = resp.error.unwrap();
        assert_eq!(error.kind, ErrorKind::ReadonlyMode);
    }

    #[tokio::test]
    async fn test_readonly_still_allows_reads() {
        let state = test_state(true);
        let resp = dispatch_request(
            &state,
            request(3, Op::Repr, json!({"path": "answer"})),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["repr"], "42");
    }

    #[tokio::test]
    async fn test_missing_params_is_protocol_error() {
        let state = test_state(false);
        let resp = dispatch_request(&state, request(4, Op::Inspect, Json::Null)).await;
        assert_eq!(resp.error.unwrap().kind, ErrorKind::ProtocolFrame);
    }

    #[tokio::test]
    async fn test_run_eval_mode() {
        let state = test_state(false);
        let resp = dispatch_request(
            &state,
            request(5, Op::Run, json!({"code": "answer"})),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["mode"], "eval");
        assert_eq!(result["type"], "int");
        assert_eq!(result["repr"], "42");
    }

    #[tokio::test]
    async fn test_state_includes_server_block() {
        let state = test_state(false);
        let resp = dispatch_request(&state, request(6, Op::State, Json::Null)).await;
        let result = resp.result.unwrap();
        assert_eq!(result["server"]["pid"], std::process::id());
        assert_eq!(result["server"]["readonly"], false);
        assert!(result["namespaces"].as_array().unwrap().len() == 1);
    }
}
