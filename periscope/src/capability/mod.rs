// periscope/periscope/src/capability/mod.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The Evaluate capability boundary.
//!
//! Free-form evaluation is host-supplied: Rust has no `eval`, so the engine
//! only defines how evaluation requests are dispatched and how results are
//! bounded. The built-in [`PathEvaluator`] understands bare path expressions
//! and `len(<path>)`; hosts embedding a scripting engine install their own
//! implementation through [`crate::Engine::set_evaluator`].

use crate::registry::Namespaces;
use crate::resolve;
use crate::value::{obj, HostValue, ObjectRef};

/// Result of evaluating a payload: an expression's value, or a bare
/// acknowledgement for a statement that produced none.
#[derive(Debug)]
pub enum EvalOutcome {
    Value(ObjectRef),
    NoValue,
}

/// Host-supplied evaluation of a free-form text payload against the
/// registered namespaces. Any fault must be returned as an error string;
/// it is reported to the controller as a structured capability fault.
pub trait Evaluator: Send + Sync {
    fn eval(&self, code: &str, ns: &Namespaces) -> Result<EvalOutcome, String>;
}

/// Default evaluator: path expressions and `len(<path>)` only.
pub struct PathEvaluator;

impl Evaluator for PathEvaluator {
    fn eval(&self, code: &str, ns: &Namespaces) -> Result<EvalOutcome, String> {
        let code = code.trim();
        if let Some(inner) = code
            .strip_prefix("len(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let len = resolve::length_of(ns, inner.trim()).map_err(|e| e.to_string())?;
            return Ok(EvalOutcome::Value(obj(HostValue::Int(len as i64))));
        }
        let target = resolve::resolve_path(ns, code).map_err(|e| e.to_string())?;
        Ok(EvalOutcome::Value(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::read;

    fn sample_namespaces() -> Namespaces {
        let ns = Namespaces::new();
        ns.register(
            "app",
            obj(HostValue::List(vec![
                obj(HostValue::Int(10)),
                obj(HostValue::Int(20)),
            ])),
        );
        ns
    }

    #[test]
    fn test_len_of_path() {
        let ns = sample_namespaces();
        match PathEvaluator.eval("len(app)", &ns).unwrap() {
            EvalOutcome::Value(v) => match &*read(&v) {
                HostValue::Int(2) => {}
                other => panic!("unexpected value {other:?}"),
            },
            EvalOutcome::NoValue => panic!("expected a value"),
        }
    }

    #[test]
    fn test_bare_path_expression() {
        let ns = sample_namespaces();
        match PathEvaluator.eval(" app[1] ", &ns).unwrap() {
            EvalOutcome::Value(v) => match &*read(&v) {
                HostValue::Int(20) => {}
                other => panic!("unexpected value {other:?}"),
            },
            EvalOutcome::NoValue => panic!("expected a value"),
        }
    }

    #[test]
    fn test_fault_is_error_string() {
        let ns = sample_namespaces();
        let err = PathEvaluator.eval("missing.thing", &ns).unwrap_err();
        assert!(err.contains("missing"));
    }
}
