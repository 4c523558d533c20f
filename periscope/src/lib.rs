// periscope/periscope/src/lib.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Periscope: a runtime inspection protocol engine.
//!
//! A host process embeds an [`Engine`], registers the roots of the object
//! graphs it wants to expose, and starts a loopback TCP server speaking a
//! newline-delimited JSON protocol (see `periscope-proto`). Controllers can
//! then inspect live state while the host keeps running, and mutate it
//! unless the engine is readonly.
//!
//! ```no_run
//! use periscope::{obj, Engine, EngineConfig, HostObject, HostValue};
//!
//! let mut engine = Engine::new(EngineConfig {
//!     instance_id: Some("worker-1".to_string()),
//!     ..Default::default()
//! });
//! let app = HostObject::new("App")
//!     .attr("ticks", obj(HostValue::Int(0)));
//! engine.register("app", obj(HostValue::Object(app)));
//! let addr = engine.start().unwrap();
//! println!("inspection server on {addr}");
//! ```
//!
//! The engine owns a small background tokio runtime; [`Engine::start`] and
//! [`Engine::stop`] are synchronous and must be called from outside any
//! async context. Hosts with a thread-confined world (GUI main loops, game
//! loops) route mutations onto it with
//! [`Engine::set_main_thread_invoker`].

pub mod capability;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod resolve;
pub mod server;
pub mod value;

pub use capability::{EvalOutcome, Evaluator, PathEvaluator};
pub use config::{EngineConfig, Limits};
pub use dispatch::{Job, MainThreadInvoker};
pub use error::{EngineError, Result};
pub use registry::Namespaces;
pub use value::{obj, HostFunc, HostObject, HostValue, ObjectRef, SourceInfo};

pub use periscope_proto as proto;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use proto::DiscoveryRecord;
use server::{spawn_server, ServerHandle, ServerState};

/// One embedded inspection engine instance.
///
/// There is no ambient singleton: each `Engine` value owns its namespaces,
/// its server and its runtime, so tests (and hosts that want several
/// endpoints) can hold as many as they like.
pub struct Engine {
    state: Arc<ServerState>,
    runtime: Option<tokio::runtime::Runtime>,
    handle: Option<ServerHandle>,
    bound_addr: Option<SocketAddr>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            state: Arc::new(ServerState::new(config)),
            runtime: None,
            handle: None,
            bound_addr: None,
        }
    }

    /// Registers (or replaces) a top-level namespace root.
    pub fn register(&self, name: impl Into<String>, root: ObjectRef) {
        self.state.namespaces.register(name, root);
    }

    /// Removes a namespace root; no-op if absent.
    pub fn unregister(&self, name: &str) {
        self.state.namespaces.unregister(name);
    }

    /// Installs (or clears) the hook that schedules mutation jobs onto the
    /// host's designated thread. Takes effect for subsequent requests.
    pub fn set_main_thread_invoker(&self, invoker: Option<Arc<dyn MainThreadInvoker>>) {
        self.state.dispatcher.set_invoker(invoker);
    }

    /// Replaces the evaluator behind the `run` operation. The default only
    /// understands path expressions and `len(<path>)`.
    pub fn set_evaluator(&self, evaluator: Arc<dyn Evaluator>) {
        let mut guard = match self.state.evaluator.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = evaluator;
    }

    /// Binds the configured endpoint and starts serving in the background.
    ///
    /// Returns the bound address (configured port 0 auto-assigns one).
    /// Calling `start` on an already-running engine warns and returns the
    /// existing address. When `instance_id` is configured, a discovery
    /// record is published; a failure to publish is logged but does not
    /// fail the start.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.bound_addr {
            tracing::warn!(addr = %addr, "engine already running");
            return Ok(addr);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("periscope-server")
            .enable_all()
            .build()?;

        let started_at = server::unix_now();
        self.state.stats.started_at.store(started_at, Ordering::Relaxed);

        let (addr, handle) = runtime.block_on(spawn_server(self.state.clone()))?;

        if let Some(instance_id) = &self.state.config.instance_id {
            match &self.state.discovery {
                Some(discovery) => {
                    let record = DiscoveryRecord {
                        instance_id: instance_id.clone(),
                        host: self.state.config.host.clone(),
                        port: addr.port(),
                        process_id: std::process::id(),
                        started_at,
                    };
                    if let Err(e) = discovery.publish(&record) {
                        tracing::warn!(instance_id, error = %e, "failed to publish discovery record");
                    }
                }
                None => {
                    tracing::warn!(instance_id, "discovery registry unavailable, record not published");
                }
            }
        }

        tracing::info!(addr = %addr, "inspection engine started");
        self.runtime = Some(runtime);
        self.handle = Some(handle);
        self.bound_addr = Some(addr);
        Ok(addr)
    }

    /// Stops the server, deregisters from discovery and releases the
    /// runtime. Idempotent; a never-started engine stops cleanly.
    pub fn stop(&mut self) {
        if let (Some(handle), Some(runtime)) = (self.handle.take(), self.runtime.as_ref()) {
            if let Err(e) = runtime.block_on(handle.shutdown()) {
                tracing::warn!(error = %e, "server shutdown reported an error");
            }
        }
        if self.bound_addr.take().is_some() {
            if let (Some(instance_id), Some(discovery)) =
                (&self.state.config.instance_id, &self.state.discovery)
            {
                discovery.remove(instance_id);
            }
            tracing::info!("inspection engine stopped");
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }

    /// Whether the server is currently accepting connections.
    pub fn listening(&self) -> bool {
        self.bound_addr.is_some()
    }

    /// The address the server is bound to, once started.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    /// Number of currently connected controllers.
    pub fn client_count(&self) -> u64 {
        self.state.stats.client_count.load(Ordering::Relaxed)
    }

    /// Total well-formed requests dispatched since start.
    pub fn command_count(&self) -> u64 {
        self.state.stats.command_count.load(Ordering::Relaxed)
    }

    /// Unix timestamp of the most recent request, if any yet.
    pub fn last_command_at(&self) -> Option<i64> {
        match self.state.stats.last_command_at.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
