//! Ephemeral per-deployment work directories
//!
//! Each deploy attempt owns exactly one uniquely named `WorkArea` holding the
//! downloaded asset, the extracted script tree, and the rebuilt asset. The
//! area is removed when the owning attempt ends, whatever the outcome; the
//! registry additionally force-removes anything still live when the process
//! is interrupted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::SwfPatchResult;

/// Process-scoped set of active work areas
///
/// Passed explicitly to whoever creates work areas rather than living in a
/// global, so the orchestrator stays testable in isolation. `cleanup_all` is
/// idempotent and safe to call once per shutdown signal.
#[derive(Debug, Clone, Default)]
pub struct WorkAreaRegistry {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl WorkAreaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, path: PathBuf) {
        self.active.lock().expect("workarea registry poisoned").insert(path);
    }

    fn deregister(&self, path: &Path) {
        self.active.lock().expect("workarea registry poisoned").remove(path);
    }

    /// Force-remove every still-active work area
    ///
    /// Runs from the shutdown path. There is no cancellation of an in-flight
    /// tool subprocess; this removes directories out from under one if it is
    /// still running, which is acceptable on the way out of the process.
    pub fn cleanup_all(&self) {
        let drained: Vec<PathBuf> = {
            let mut active = self.active.lock().expect("workarea registry poisoned");
            active.drain().collect()
        };
        for path in drained {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => tracing::info!(path = %path.display(), "removed leftover work area"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove work area")
                }
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("workarea registry poisoned").len()
    }
}

/// One deploy attempt's scratch directory
#[derive(Debug)]
pub struct WorkArea {
    path: PathBuf,
    registry: WorkAreaRegistry,
}

impl WorkArea {
    /// Create a fresh uniquely named directory under `work_root` and register
    /// it as active
    pub fn create(work_root: &Path, registry: &WorkAreaRegistry) -> SwfPatchResult<Self> {
        std::fs::create_dir_all(work_root)?;
        let path = work_root.join(Uuid::new_v4().to_string());
        std::fs::create_dir(&path)?;
        registry.register(path.clone());
        tracing::debug!(path = %path.display(), "created work area");
        Ok(Self {
            path,
            registry: registry.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkArea {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove work area");
            }
        }
        self.registry.deregister(&self.path);
    }
}
