//! Cluster Context Registry
//!
//! Holds every participating cluster plus the index of the "current" one.
//! The current index only ever changes through [`ContextGuard`], which puts
//! the previous index back when it is dropped, whether the scope ends
//! normally, through `?`, or by unwinding.

use super::context::{ClusterHandle, ClusterRole};
use crate::error::{Error, Result};
use futures::future::try_join_all;
use parking_lot::Mutex;
use std::future::Future;
use tracing::{debug, info};

// =============================================================================
// Registry
// =============================================================================

pub struct ClusterRegistry {
    handles: Vec<ClusterHandle>,
    default_index: usize,
    current: Mutex<usize>,
    /// Indices to return to, innermost scope last
    scopes: Mutex<Vec<usize>>,
}

impl ClusterRegistry {
    /// Build a registry; the handles' indices must be `0..n` in order
    pub fn new(handles: Vec<ClusterHandle>) -> Result<Self> {
        if handles.is_empty() {
            return Err(Error::Configuration("no clusters configured".into()));
        }
        if let Some((pos, h)) = handles.iter().enumerate().find(|(i, h)| h.index() != *i) {
            return Err(Error::Configuration(format!(
                "cluster {} has index {} but sits at position {}",
                h.name(),
                h.index(),
                pos
            )));
        }
        // Single-cluster runs and runs without a hub start on cluster 0;
        // multi-cluster runs start on the first non-hub cluster.
        let default_index = handles
            .iter()
            .find(|h| h.role() != ClusterRole::AcmHub)
            .map(|h| h.index())
            .unwrap_or(0);

        Ok(Self {
            handles,
            default_index,
            current: Mutex::new(default_index),
            scopes: Mutex::new(Vec::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn is_multicluster(&self) -> bool {
        self.handles.len() > 1
    }

    pub fn get(&self, index: usize) -> Result<ClusterHandle> {
        self.handles.get(index).cloned().ok_or_else(|| {
            Error::Configuration(format!(
                "cluster index {} out of range (have {})",
                index,
                self.handles.len()
            ))
        })
    }

    /// Point the registry at another cluster.
    ///
    /// Prefer [`ClusterRegistry::enter`], which restores the previous index.
    pub fn switch_to(&self, index: usize) -> Result<()> {
        let handle = self.get(index)?;
        debug!("Switching cluster context to {} ({})", handle.name(), index);
        *self.current.lock() = index;
        Ok(())
    }

    pub fn current_index(&self) -> usize {
        *self.current.lock()
    }

    pub fn current(&self) -> ClusterHandle {
        let index = self.current_index();
        self.handles[index].clone()
    }

    /// Go back to the index recorded by the innermost active scope, or to
    /// the default cluster when no scope is active
    pub fn reset(&self) {
        let target = self
            .scopes
            .lock()
            .last()
            .copied()
            .unwrap_or(self.default_index);
        *self.current.lock() = target;
    }

    /// Switch to `index` until the returned guard is dropped
    pub fn enter(&self, index: usize) -> Result<ContextGuard<'_>> {
        self.get(index)?;
        let previous = {
            let mut current = self.current.lock();
            let previous = *current;
            *current = index;
            previous
        };
        self.scopes.lock().push(previous);
        Ok(ContextGuard {
            registry: self,
            previous,
        })
    }

    // =========================================================================
    // Role Lookups
    // =========================================================================

    pub fn all(&self) -> Vec<ClusterHandle> {
        self.handles.clone()
    }

    pub fn acm_index(&self) -> Option<usize> {
        self.handles
            .iter()
            .find(|h| h.role() == ClusterRole::AcmHub)
            .map(|h| h.index())
    }

    pub fn hub(&self) -> Result<ClusterHandle> {
        self.handles
            .iter()
            .find(|h| h.role() == ClusterRole::AcmHub)
            .cloned()
            .ok_or_else(|| Error::UnavailableResource("no acm-hub cluster configured".into()))
    }

    /// Every cluster except the ACM hub, in configuration order
    pub fn non_hub(&self) -> Vec<ClusterHandle> {
        self.handles
            .iter()
            .filter(|h| h.role() != ClusterRole::AcmHub)
            .cloned()
            .collect()
    }

    pub fn primary(&self) -> Result<ClusterHandle> {
        self.handles
            .iter()
            .find(|h| h.role() == ClusterRole::Primary)
            .cloned()
            .ok_or_else(|| Error::UnavailableResource("no primary cluster configured".into()))
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Run `op` on each target in order, each under its own context scope.
    ///
    /// Stops at the first error. The current index after the call equals the
    /// index before it on every exit path.
    pub async fn for_each<T, F, Fut>(&self, targets: Vec<ClusterHandle>, mut op: F) -> Result<Vec<T>>
    where
        F: FnMut(ClusterHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut results = Vec::with_capacity(targets.len());
        for handle in targets {
            let _scope = self.enter(handle.index())?;
            info!("[{}] running on cluster {}", handle.role(), handle.name());
            results.push(op(handle).await?);
        }
        Ok(results)
    }

    /// Run `op` on every target concurrently.
    ///
    /// Each unit gets its own handle; the shared current index is not touched.
    pub async fn for_each_parallel<T, F, Fut>(&self, targets: Vec<ClusterHandle>, op: F) -> Result<Vec<T>>
    where
        F: Fn(ClusterHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        try_join_all(targets.into_iter().map(op)).await
    }
}

// =============================================================================
// Context Guard
// =============================================================================

/// Restores the previous current index on drop
#[must_use = "the context is restored as soon as the guard is dropped"]
pub struct ContextGuard<'a> {
    registry: &'a ClusterRegistry,
    previous: usize,
}

impl ContextGuard<'_> {
    pub fn handle(&self) -> ClusterHandle {
        self.registry.current()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        *self.registry.current.lock() = self.previous;
        self.registry.scopes.lock().pop();
    }
}
