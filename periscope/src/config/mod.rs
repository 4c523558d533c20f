// periscope/periscope/src/config/mod.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Engine configuration.
//!
//! The truncation limits and timeouts the protocol depends on are policy,
//! not contract, so they all live here with defaults rather than being
//! hardcoded at call sites. Limits can additionally be overridden per
//! request (`max_depth` / `max_items` / `max_repr_len` in the params).

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Bounds applied by the path serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Recursion depth of the deep-inspection walk.
    pub max_depth: usize,
    /// Children enumerated per container before truncation.
    pub max_items: usize,
    /// Maximum rendered-form length before an explicit cut.
    pub max_repr_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_depth: 2,
            max_items: 50,
            max_repr_len: 200,
        }
    }
}

/// Per-request limit overrides, deserialized straight out of request params.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LimitOverrides {
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub max_repr_len: Option<usize>,
}

impl Limits {
    /// Applies request-level overrides on top of the configured limits.
    pub fn with_overrides(self, ov: &LimitOverrides) -> Limits {
        Limits {
            max_depth: ov.max_depth.unwrap_or(self.max_depth),
            max_items: ov.max_items.unwrap_or(self.max_items),
            max_repr_len: ov.max_repr_len.unwrap_or(self.max_repr_len),
        }
    }
}

/// Configuration of one embedded engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interface to bind. Must be loopback; anything else is refused.
    pub host: String,
    /// TCP port; 0 auto-assigns.
    pub port: u16,
    /// Server-lifetime flag disabling all mutating operation kinds.
    pub readonly: bool,
    /// Stable identifier published to the discovery registry. `None` skips
    /// discovery entirely.
    pub instance_id: Option<String>,
    /// Serializer bounds.
    pub limits: Limits,
    /// Maximum incoming frame length before the line is rejected.
    pub max_frame_len: usize,
    /// Bounded wait for the designated-thread hook.
    pub dispatch_timeout: Duration,
    /// Connect+ping budget for discovery liveness probes.
    pub probe_timeout: Duration,
    /// Discovery registry directory; `None` uses the well-known default
    /// under the user cache directory.
    pub registry_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            readonly: false,
            instance_id: None,
            limits: Limits::default(),
            max_frame_len: 1_000_000,
            dispatch_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(1),
            registry_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_only_given_fields() {
        let limits = Limits::default();
        let ov: LimitOverrides =
            serde_json::from_str(r#"{"path": "app", "max_depth": 4}"#).unwrap();
        let merged = limits.with_overrides(&ov);
        assert_eq!(merged.max_depth, 4);
        assert_eq!(merged.max_items, limits.max_items);
        assert_eq!(merged.max_repr_len, limits.max_repr_len);
    }
}
