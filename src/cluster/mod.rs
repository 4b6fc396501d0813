//! Participating clusters
//!
//! - [`ClusterRegistry`]: ordered clusters plus a scoped "current" pointer
//! - [`KubeControlPlane`]: the Kubernetes-backed control-plane client
//! - [`SshShell`] / [`ProcessRunner`]: remote and local command adapters

pub mod context;
pub mod kube_client;
pub mod process;
pub mod registry;

pub use context::{ClusterContext, ClusterHandle, ClusterRole};
pub use kube_client::KubeControlPlane;
pub use process::{ProcessRunner, SshShell};
pub use registry::{ClusterRegistry, ContextGuard};

use crate::artifacts::ManifestStore;
use crate::config::RunConfig;
use crate::domain::ports::ControlPlaneClient;
use crate::error::Result;
use crate::olm::OperatorInstaller;
use crate::poll::Poller;
use std::sync::Arc;
use tracing::info;

/// Build the registry with one lazily connecting client per configured cluster
pub fn connect_all(config: &RunConfig) -> Result<ClusterRegistry> {
    let mut handles = Vec::new();
    for (index, entry) in config.cluster_entries().into_iter().enumerate() {
        info!("Registering cluster {} ({}) via {}", entry.name, entry.role, entry.kubeconfig.display());
        let client = KubeControlPlane::new(&entry.name, &entry.kubeconfig);
        handles.push(ClusterHandle::new(
            ClusterContext {
                index,
                name: entry.name,
                kubeconfig: entry.kubeconfig,
                role: entry.role,
            },
            Arc::new(client),
        ));
    }
    ClusterRegistry::new(handles)
}

// =============================================================================
// Per-Cluster Operations
// =============================================================================

/// Collaborators every per-cluster deployment step works with
#[derive(Clone, Copy)]
pub struct ClusterOps<'a> {
    pub cluster: &'a str,
    pub client: &'a dyn ControlPlaneClient,
    pub poller: &'a Poller,
    pub artifacts: &'a ManifestStore,
}

impl<'a> ClusterOps<'a> {
    pub fn new(handle: &'a ClusterHandle, poller: &'a Poller, artifacts: &'a ManifestStore) -> Self {
        Self {
            cluster: handle.name(),
            client: handle.client(),
            poller,
            artifacts,
        }
    }

    pub fn installer(&self) -> OperatorInstaller<'a> {
        OperatorInstaller::new(self.client, self.poller, self.artifacts)
    }
}
