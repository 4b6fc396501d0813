//! Cluster identities and handles

use crate::domain::ports::{ControlPlaneClient, ControlPlaneRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Role a cluster plays in the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterRole {
    AcmHub,
    Primary,
    Secondary,
    Consumer,
    Provider,
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterRole::AcmHub => "acm-hub",
            ClusterRole::Primary => "primary",
            ClusterRole::Secondary => "secondary",
            ClusterRole::Consumer => "consumer",
            ClusterRole::Provider => "provider",
        };
        write!(f, "{}", name)
    }
}

/// Identity of one target cluster; never changes after start-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterContext {
    pub index: usize,
    pub name: String,
    pub kubeconfig: PathBuf,
    pub role: ClusterRole,
}

impl ClusterContext {
    pub fn is_hub(&self) -> bool {
        self.role == ClusterRole::AcmHub
    }
}

/// A cluster context bundled with the client that talks to it.
///
/// Multi-cluster operations receive handles explicitly instead of reading a
/// shared "current cluster", so two handles can be driven concurrently.
#[derive(Clone)]
pub struct ClusterHandle {
    context: Arc<ClusterContext>,
    client: ControlPlaneRef,
}

impl ClusterHandle {
    pub fn new(context: ClusterContext, client: ControlPlaneRef) -> Self {
        Self {
            context: Arc::new(context),
            client,
        }
    }

    pub fn context(&self) -> &ClusterContext {
        &self.context
    }

    pub fn index(&self) -> usize {
        self.context.index
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn role(&self) -> ClusterRole {
        self.context.role
    }

    pub fn client(&self) -> &dyn ControlPlaneClient {
        self.client.as_ref()
    }

    pub fn client_ref(&self) -> ControlPlaneRef {
        self.client.clone()
    }
}

impl fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("index", &self.context.index)
            .field("name", &self.context.name)
            .field("role", &self.context.role)
            .finish()
    }
}
