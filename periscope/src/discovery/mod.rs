// periscope/periscope/src/discovery/mod.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The discovery registry: a shared, file-backed directory of live server
//! instances keyed by `instance_id`.
//!
//! Each record is written only by its owning process (temp file + atomic
//! rename, no cross-process locking); correctness comes from
//! liveness-probe-and-prune on the reader side. A record whose endpoint no
//! longer answers a ping is deleted by whichever reader notices first, so
//! the directory self-heals after a process dies without deregistering.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use periscope_proto::{DiscoveryRecord, Op, Request, Response};

use crate::error::{EngineError, Result};

/// Handle to one registry directory.
#[derive(Debug, Clone)]
pub struct DiscoveryRegistry {
    dir: PathBuf,
}

impl DiscoveryRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DiscoveryRegistry { dir: dir.into() }
    }

    /// The well-known shared directory under the user cache.
    pub fn default_dir() -> Result<PathBuf> {
        let cache = dirs::cache_dir()
            .ok_or_else(|| EngineError::Internal("cache directory not found".to_string()))?;
        Ok(cache.join("periscope").join("registry"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, instance_id: &str) -> PathBuf {
        self.dir.join(format!("{instance_id}.json"))
    }

    /// Writes (or overwrites) the record for `record.instance_id`.
    pub fn publish(&self, record: &DiscoveryRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.record_path(&record.instance_id);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&serde_json::to_vec(record)?)?;
        tmp.persist(&path)
            .map_err(|e| EngineError::Io(e.error))?;
        tracing::debug!(instance_id = %record.instance_id, path = ?path, "published discovery record");
        Ok(path)
    }

    /// Removes the record for `instance_id`; no-op if already gone.
    pub fn remove(&self, instance_id: &str) {
        let path = self.record_path(instance_id);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(instance_id, "removed discovery record"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(instance_id, error = %e, "failed to remove discovery record"),
        }
    }

    /// All syntactically valid records currently on disk, live or not.
    pub fn load_all(&self) -> Vec<DiscoveryRecord> {
        let mut records = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return records,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Tolerate records vanishing mid-read or being half-written.
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            match serde_json::from_slice::<DiscoveryRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::debug!(path = ?path, error = %e, "skipping unparsable discovery record");
                }
            }
        }
        records
    }

    /// Resolves an `instance_id` to a live record.
    ///
    /// A record whose endpoint fails the liveness probe is pruned and
    /// reported as unknown.
    pub async fn resolve(
        &self,
        instance_id: &str,
        probe_timeout: Duration,
    ) -> Result<DiscoveryRecord> {
        let path = self.record_path(instance_id);
        let bytes = std::fs::read(&path)
            .map_err(|_| EngineError::NotFound(format!("unknown instance `{instance_id}`")))?;
        let record: DiscoveryRecord = serde_json::from_slice(&bytes).map_err(|_| {
            EngineError::NotFound(format!("unknown instance `{instance_id}`"))
        })?;

        if probe(&record.host, record.port, probe_timeout).await {
            Ok(record)
        } else {
            tracing::info!(instance_id, "pruning stale discovery record");
            self.remove(instance_id);
            Err(EngineError::NotFound(format!(
                "unknown instance `{instance_id}` (stale record pruned)"
            )))
        }
    }

    /// Enumerates all live instances, pruning stale records as a side effect.
    pub async fn list_live(&self, probe_timeout: Duration) -> Vec<DiscoveryRecord> {
        let mut live = Vec::new();
        for record in self.load_all() {
            if probe(&record.host, record.port, probe_timeout).await {
                live.push(record);
            } else {
                tracing::info!(instance_id = %record.instance_id, "pruning stale discovery record");
                self.remove(&record.instance_id);
            }
        }
        live
    }
}

/// Lightweight liveness probe: connect, send one `ping`, expect one `pong`.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    let attempt = async {
        let stream = TcpStream::connect((host, port)).await.ok()?;
        let (reader, mut writer) = stream.into_split();
        let request = Request {
            id: serde_json::json!(0),
            op: Op::Ping,
            params: serde_json::Value::Null,
        };
        let mut line = serde_json::to_vec(&request).ok()?;
        line.push(b'\n');
        writer.write_all(&line).await.ok()?;

        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.ok()?;
        let response: Response = serde_json::from_str(&response_line).ok()?;
        response.is_ok().then_some(())
    };
    matches!(tokio::time::timeout(timeout, attempt).await, Ok(Some(())))
}
