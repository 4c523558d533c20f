// periscope/periscope/src/error/mod.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Centralized error handling for periscope.
//!
//! Uses `thiserror` to define structured errors. Every error that can be
//! attributed to a specific request is returned as that request's error
//! response via [`EngineError::kind`]; it never terminates the connection.
//! Only transport-level faults close a connection.

use std::time::Duration;

use thiserror::Error;

use periscope_proto::ErrorKind;

/// The root error type for all periscope-specific failures.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A path segment could not be applied to the value it was reached on.
    /// `partial` is the part of the path that resolved successfully.
    #[error("cannot resolve `{segment}` (after `{partial}`): {message}")]
    PathResolution {
        segment: String,
        partial: String,
        message: String,
    },

    /// Mutation attempted against a server started in readonly mode.
    #[error("readonly mode - mutation operations are disabled")]
    ReadonlyMode,

    /// The designated-thread hook did not complete the job in time.
    #[error("designated-thread dispatch timed out after {0:?}")]
    DispatchTimeout(Duration),

    /// A host-supplied capability (evaluator, callable, repr hook) raised.
    #[error("capability fault: {0}")]
    Capability(String),

    /// Malformed request line.
    #[error("malformed request frame: {0}")]
    ProtocolFrame(String),

    /// Unknown namespace name or unknown discovery `instance_id`.
    #[error("not found: {0}")]
    NotFound(String),

    /// Refusal to bind anything but a loopback interface.
    #[error("refusing to bind non-loopback address {0}")]
    NonLoopbackBind(String),

    /// Loopback bind failed (e.g. port in use).
    #[error("bind failed on {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// I/O error (socket reset, registry file access, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General-purpose error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Maps the error onto its wire classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::PathResolution { .. } => ErrorKind::PathResolution,
            EngineError::ReadonlyMode => ErrorKind::ReadonlyMode,
            EngineError::DispatchTimeout(_) => ErrorKind::DispatchTimeout,
            EngineError::Capability(_) => ErrorKind::CapabilityFault,
            EngineError::ProtocolFrame(_) => ErrorKind::ProtocolFrame,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::NonLoopbackBind(_) | EngineError::Bind { .. } => ErrorKind::Bind,
            EngineError::Io(_) | EngineError::Json(_) | EngineError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Convenient alias for `Result<T, EngineError>`.
pub type Result<T> = std::result::Result<T, EngineError>;
