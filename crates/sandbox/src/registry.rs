//! Process-wide record of live sandbox children.
//!
//! Sandboxes are owned by individual processing workers, but the error
//! kill switch terminates the whole process from an arbitrary thread
//! without running destructors. The registry keeps a weak handle to
//! every child so a shutdown hook can kill them synchronously and no
//! GPU process outlives the worker.

use std::sync::{Arc, Mutex, Weak};

use tokio::process::Child;

/// Shared slot holding a child until it is terminated.
pub(crate) type ChildSlot = Arc<Mutex<Option<Child>>>;

#[derive(Clone, Default)]
pub struct ProcessRegistry {
    children: Arc<Mutex<Vec<Weak<Mutex<Option<Child>>>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, slot: &ChildSlot) {
        if let Ok(mut children) = self.children.lock() {
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(slot));
        }
    }

    /// Number of registered children that are still owned by a sandbox.
    pub fn live_count(&self) -> usize {
        self.children
            .lock()
            .map(|children| {
                children
                    .iter()
                    .filter_map(Weak::upgrade)
                    .filter(|slot| slot.lock().map(|c| c.is_some()).unwrap_or(false))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Send a kill signal to every live child. Synchronous; safe to call
    /// from a shutdown hook on any thread.
    pub fn kill_all(&self) -> usize {
        let Ok(children) = self.children.lock() else {
            return 0;
        };
        let mut killed = 0;
        for slot in children.iter().filter_map(Weak::upgrade) {
            let Ok(mut guard) = slot.lock() else {
                continue;
            };
            if let Some(child) = guard.as_mut() {
                match child.start_kill() {
                    Ok(()) => killed += 1,
                    Err(e) => tracing::warn!(error = %e, "Failed to kill sandbox child"),
                }
            }
        }
        killed
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("live", &self.live_count())
            .finish()
    }
}
