// periscope/periscope/src/dispatch/mod.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The dispatch coordinator: decides which thread executes mutating work.
//!
//! Hosts with a main-thread constraint (GUI frameworks, game loops) register
//! a [`MainThreadInvoker`]; mutation jobs are then handed to the hook and
//! awaited through a rendezvous channel with a bounded timeout. Without a
//! hook, jobs run inline on the connection's own thread of control, with a
//! one-shot advisory logged on first use.
//!
//! Read-only operations never pass through here; they must stay responsive
//! even when the host's designated thread is contended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{EngineError, Result};

/// A unit of work scheduled onto the host's designated thread.
pub type Job = Box<dyn FnOnce() + Send>;

/// Host-registered hook that schedules a job onto its designated thread.
///
/// The hook must eventually run the job (e.g. push it onto a frame-synced
/// queue its main loop drains); dropping it unrun surfaces to the controller
/// as a capability fault.
pub trait MainThreadInvoker: Send + Sync {
    fn invoke(&self, job: Job);
}

impl<F> MainThreadInvoker for F
where
    F: Fn(Job) + Send + Sync,
{
    fn invoke(&self, job: Job) {
        self(job)
    }
}

/// Execution-context coordinator shared by all connection tasks.
pub struct Dispatcher {
    invoker: RwLock<Option<Arc<dyn MainThreadInvoker>>>,
    warned_inline: AtomicBool,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        Dispatcher {
            invoker: RwLock::new(None),
            warned_inline: AtomicBool::new(false),
            timeout,
        }
    }

    pub fn set_invoker(&self, invoker: Option<Arc<dyn MainThreadInvoker>>) {
        let mut guard = match self.invoker.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = invoker;
    }

    pub fn has_invoker(&self) -> bool {
        let guard = match self.invoker.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.is_some()
    }

    /// Runs `work` under the execution-context policy and returns its result.
    ///
    /// With a hook registered, the calling thread blocks on the rendezvous
    /// until the hook completes the job or the timeout elapses. The server
    /// wraps this call in a blocking task so the async runtime stays live.
    pub fn execute<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let hook = {
            let guard = match self.invoker.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };

        match hook {
            Some(hook) => {
                let (tx, rx) = mpsc::sync_channel(1);
                hook.invoke(Box::new(move || {
                    let _ = tx.send(work());
                }));
                match rx.recv_timeout(self.timeout) {
                    Ok(result) => Ok(result),
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        Err(EngineError::DispatchTimeout(self.timeout))
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => Err(EngineError::Capability(
                        "designated-thread hook dropped the job without running it".to_string(),
                    )),
                }
            }
            None => {
                if !self.warned_inline.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "no main-thread invoker set - running mutations inline on the \
                         connection thread; register one for thread-safe access to host state"
                    );
                }
                Ok(work())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_execution_without_hook() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        assert!(!dispatcher.has_invoker());
        let out = dispatcher.execute(|| 41 + 1).unwrap();
        assert_eq!(out, 42);
        // Advisory latch flips exactly once.
        assert!(dispatcher.warned_inline.load(Ordering::Relaxed));
    }

    #[test]
    fn test_hook_runs_job_and_returns_result() {
        let dispatcher = Dispatcher::new(Duration::from_secs(5));
        // A hook that services jobs on a separate consumer thread.
        dispatcher.set_invoker(Some(Arc::new(|job: Job| {
            std::thread::spawn(job);
        })));
        let out = dispatcher.execute(|| "done").unwrap();
        assert_eq!(out, "done");
    }

    #[test]
    fn test_hook_timeout() {
        let dispatcher = Dispatcher::new(Duration::from_millis(50));
        // A hook that sits on the job far longer than the timeout.
        dispatcher.set_invoker(Some(Arc::new(|job: Job| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_secs(5));
                job();
            });
        })));
        let err = dispatcher.execute(|| ()).unwrap_err();
        assert!(matches!(err, EngineError::DispatchTimeout(_)));
    }

    #[test]
    fn test_hook_dropping_job_is_a_capability_fault() {
        let dispatcher = Dispatcher::new(Duration::from_secs(5));
        dispatcher.set_invoker(Some(Arc::new(|job: Job| {
            drop(job);
        })));
        let err = dispatcher.execute(|| ()).unwrap_err();
        assert!(matches!(err, EngineError::Capability(_)));
    }
}
