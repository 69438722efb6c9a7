// CLASSIFICATION: COMMUNITY
// Filename: exec.rs v0.5
// Author: Lukas Bower
// Date Modified: 2027-08-26

//! World execution contexts and the shutdown wait-group.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{info, warn};

struct WorldState {
    name: &'static str,
    secure: bool,
    stopped: AtomicBool,
}

/// Handle to one schedulable execution context.
///
/// Stopping is cooperative: the flag is raised by the monitor and the
/// world's loop observes it at its next blocking point.
#[derive(Clone)]
pub struct WorldHandle {
    state: Arc<WorldState>,
}

impl WorldHandle {
    /// Create a handle for a world in the given security state.
    #[must_use]
    pub fn new(name: &'static str, secure: bool) -> Self {
        Self {
            state: Arc::new(WorldState {
                name,
                secure,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// World name used in logs and thread names.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.state.name
    }

    /// Whether the world runs in the secure security state.
    #[must_use]
    pub fn secure(&self) -> bool {
        self.state.secure
    }

    /// Stop scheduling this world. Siblings are unaffected.
    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether the world has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }
}

/// Running worlds awaiting the shutdown join.
#[derive(Default)]
pub struct WorldSet {
    workers: Vec<(WorldHandle, JoinHandle<()>)>,
}

impl WorldSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `body` as the world's thread of execution.
    pub fn spawn(&mut self, handle: WorldHandle, body: impl FnOnce() + Send + 'static) {
        let name = handle.name();
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .expect("spawn world thread");
        info!("SM scheduled {name}");
        self.workers.push((handle, worker));
    }

    /// Join every world; called once shutdown has been broadcast.
    pub fn join_all(self) {
        for (handle, worker) in self.workers {
            if worker.join().is_err() {
                warn!("SM world {} terminated abnormally", handle.name());
            }
        }
        info!("SM all worlds finished");
    }
}
