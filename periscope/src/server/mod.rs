// periscope/periscope/src/server/mod.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The inspection protocol server: loopback TCP, newline-delimited JSON.
//!
//! The server:
//! - Binds a loopback interface only; any other bind address is refused
//! - Accepts line-oriented JSON requests (one operation per line)
//! - Dispatches operations to handlers in [`commands`]
//! - Returns exactly one structured JSON response per request, in order
//! - Supports graceful shutdown via a broadcast channel
//! - Enforces a frame-length cap on incoming lines
//!
//! The protocol is synchronous and connection-scoped: each controller may
//! send multiple requests over a single connection, and the server answers
//! each in order. A slow designated-thread hook stalls only the connection
//! that issued the mutation; other connections proceed on their own tasks.

pub mod commands;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use periscope_proto::{ErrorKind, Request, Response};

use crate::capability::{Evaluator, PathEvaluator};
use crate::config::EngineConfig;
use crate::discovery::DiscoveryRegistry;
use crate::dispatch::Dispatcher;
use crate::error::{EngineError, Result};
use crate::registry::Namespaces;

/// Session counters exposed through the `state` operation.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Currently connected controllers; incremented on accept, decremented
    /// when the connection handler returns.
    pub client_count: AtomicU64,
    /// Total well-formed requests dispatched since start.
    pub command_count: AtomicU64,
    /// Unix timestamp of the most recent request; 0 means none yet.
    pub last_command_at: AtomicI64,
    /// Unix timestamp of server start; 0 means not started.
    pub started_at: AtomicI64,
}

/// Everything a connection task needs, shared across all connections.
pub struct ServerState {
    pub config: EngineConfig,
    pub namespaces: Namespaces,
    pub dispatcher: Arc<Dispatcher>,
    pub evaluator: RwLock<Arc<dyn Evaluator>>,
    pub discovery: Option<DiscoveryRegistry>,
    pub stats: SessionStats,
}

impl ServerState {
    pub fn new(config: EngineConfig) -> Self {
        let discovery = match &config.registry_dir {
            Some(dir) => Some(DiscoveryRegistry::new(dir.clone())),
            None => DiscoveryRegistry::default_dir().ok().map(DiscoveryRegistry::new),
        };
        let dispatcher = Arc::new(Dispatcher::new(config.dispatch_timeout));
        ServerState {
            config,
            namespaces: Namespaces::new(),
            dispatcher,
            evaluator: RwLock::new(Arc::new(PathEvaluator)),
            discovery,
            stats: SessionStats::default(),
        }
    }

    pub(crate) fn current_evaluator(&self) -> Arc<dyn Evaluator> {
        let guard = match self.evaluator.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }
}

/// Handle for shutting down a running server.
#[derive(Debug)]
pub struct ServerHandle {
    shutdown_tx: Option<broadcast::Sender<()>>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl ServerHandle {
    /// Gracefully shuts down the server and waits for the accept loop to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::debug!("sending shutdown signal to inspection server");
        }
        if let Some(handle) = self.join_handle.take() {
            handle
                .await
                .map_err(|e| EngineError::Internal(format!("server task join failed: {e}")))??;
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::debug!("sending shutdown signal to inspection server on drop");
        }
    }
}

/// Binds the configured loopback endpoint and spawns the accept loop.
///
/// Returns the actually bound address (port 0 in the config auto-assigns)
/// together with the shutdown handle.
pub async fn spawn_server(state: Arc<ServerState>) -> Result<(SocketAddr, ServerHandle)> {
    let host = state.config.host.clone();
    let ip: IpAddr = host
        .parse()
        .map_err(|_| EngineError::NonLoopbackBind(host.clone()))?;
    if !ip.is_loopback() {
        return Err(EngineError::NonLoopbackBind(host));
    }

    let listener = TcpListener::bind((ip, state.config.port))
        .await
        .map_err(|source| EngineError::Bind {
            host,
            port: state.config.port,
            source,
        })?;
    let local_addr = listener.local_addr()?;
    tracing::debug!(addr = %local_addr, "bound inspection server");

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let join_handle = tokio::spawn(run_server_loop(listener, state, shutdown_rx));

    Ok((
        local_addr,
        ServerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(join_handle),
        },
    ))
}

/// Accept loop: one spawned task per connection, until shutdown.
async fn run_server_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    tracing::info!("starting inspection server listener");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        // The bind is loopback-only, but re-check the peer
                        // anyway; the original server did the same.
                        if !peer.ip().is_loopback() {
                            tracing::warn!(peer = %peer, "rejecting non-loopback peer");
                            continue;
                        }
                        tracing::debug!(peer = %peer, "new controller connection");
                        state.stats.client_count.fetch_add(1, Ordering::Relaxed);
                        let state = state.clone();
                        let shutdown_rx = shutdown_rx.resubscribe();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, state.clone(), shutdown_rx).await
                            {
                                tracing::error!("connection handler error: {e}");
                            }
                            // Every handler exit path is a disconnect.
                            state.stats.client_count.fetch_sub(1, Ordering::Relaxed);
                        });
                    },
                    Err(e) => {
                        tracing::error!("listener accept error: {e}");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!("listener received shutdown signal");
                break;
            }
        }
    }

    Ok(())
}

/// Handles one controller connection for its entire lifetime.
///
/// Requests are processed strictly in order; the next line is not read until
/// the previous response has been written. Empty lines are skipped. A
/// malformed line gets a `protocol_frame` error response when its `id` can
/// be recovered, and is dropped silently otherwise.
async fn handle_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buffer = String::new();

    loop {
        buffer.clear();

        let line = tokio::select! {
            read_result = read_frame(&mut reader, state.config.max_frame_len, &mut buffer) => {
                match read_result {
                    Ok(0) => {
                        tracing::trace!("controller closed connection");
                        break Ok(());
                    }
                    Ok(n) if n > state.config.max_frame_len => {
                        // The cap bounds buffering, so the rest of the frame
                        // was never read and the stream cannot be re-synced.
                        // Best-effort error, then drop the connection.
                        let message = format!(
                            "frame exceeds limit of {} bytes",
                            state.config.max_frame_len
                        );
                        tracing::warn!("{message}");
                        let id = recover_id(&buffer).unwrap_or(serde_json::Value::Null);
                        let resp = Response::error(id, ErrorKind::ProtocolFrame, message);
                        let _ = send_response(&mut writer, &resp).await;
                        let _ = writer.shutdown().await;
                        return Ok(());
                    }
                    Ok(_) => {
                        let trimmed = buffer.trim_end_matches(['\r', '\n']).trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trimmed.to_string()
                    }
                    Err(e) => {
                        tracing::error!("read error: {e}");
                        return Err(EngineError::Io(e));
                    }
                }
            },
            _ = shutdown_rx.recv() => {
                tracing::debug!("connection handler received shutdown signal");
                let _ = writer.shutdown().await;
                return Ok(());
            },
        };

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                match recover_id(&line) {
                    Some(id) => {
                        let resp = Response::error(
                            id,
                            ErrorKind::ProtocolFrame,
                            format!("invalid request: {e}"),
                        );
                        send_response(&mut writer, &resp).await?;
                    }
                    // No correlation token to answer on; drop the line.
                    None => tracing::debug!("dropping malformed frame without id: {e}"),
                }
                continue;
            }
        };
        tracing::trace!(?request, "dispatching request");

        state.stats.command_count.fetch_add(1, Ordering::Relaxed);
        state
            .stats
            .last_command_at
            .store(unix_now(), Ordering::Relaxed);

        let response = commands::dispatch_request(&state, request).await;
        send_response(&mut writer, &response).await?;
    }
}

/// Reads one newline-delimited frame, buffering at most one byte past the
/// cap. A returned count above `max_frame_len` means the frame blew the cap
/// and its remainder is still sitting unread in the stream.
async fn read_frame<R>(
    reader: &mut R,
    max_frame_len: usize,
    buffer: &mut String,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = reader.take(max_frame_len as u64 + 1);
    limited.read_line(buffer).await
}

/// Pulls the `id` field out of a line that failed full request parsing, so
/// the error response can still be correlated.
fn recover_id(line: &str) -> Option<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    value.as_object()?.get("id").cloned()
}

async fn send_response(
    stream: &mut WriteHalf<TcpStream>,
    response: &Response,
) -> Result<()> {
    tracing::trace!("sending response");
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    if let Err(e) = stream.write_all(&json).await {
        tracing::error!("failed to send response: {e}");
        return Err(EngineError::Io(e));
    }
    Ok(())
}

pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_loopback_bind_is_refused() {
        let state = Arc::new(ServerState::new(EngineConfig {
            host: "0.0.0.0".to_string(),
            ..Default::default()
        }));
        let err = spawn_server(state).await.unwrap_err();
        assert!(matches!(err, EngineError::NonLoopbackBind(_)));
    }

    #[tokio::test]
    async fn test_unparsable_host_is_refused() {
        let state = Arc::new(ServerState::new(EngineConfig {
            host: "example.com".to_string(),
            ..Default::default()
        }));
        let err = spawn_server(state).await.unwrap_err();
        assert!(matches!(err, EngineError::NonLoopbackBind(_)));
    }

    #[tokio::test]
    async fn test_read_frame_bounds_buffering() {
        let oversized = format!("{}\n", "x".repeat(100));
        let mut reader = BufReader::new(oversized.as_bytes());
        let mut buffer = String::new();
        let n = read_frame(&mut reader, 10, &mut buffer).await.unwrap();
        assert_eq!(n, 11);
        // Only cap + 1 bytes ever reached memory.
        assert_eq!(buffer.len(), 11);
    }

    #[tokio::test]
    async fn test_read_frame_cap_resets_per_frame() {
        let mut reader = BufReader::new(&b"ok\nlonger\n"[..]);
        let mut buffer = String::new();
        let n = read_frame(&mut reader, 10, &mut buffer).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(buffer, "ok\n");

        buffer.clear();
        let n = read_frame(&mut reader, 10, &mut buffer).await.unwrap();
        assert_eq!(n, 7);
        assert_eq!(buffer, "longer\n");
    }

    #[test]
    fn test_recover_id_from_object() {
        assert_eq!(
            recover_id(r#"{"id": 9, "op": "definitely_not_an_op"}"#),
            Some(serde_json::json!(9))
        );
        assert_eq!(recover_id("not json at all"), None);
        assert_eq!(recover_id(r#"{"op": "ping"}"#), None);
        assert_eq!(recover_id("[1, 2, 3]"), None);
    }
}
