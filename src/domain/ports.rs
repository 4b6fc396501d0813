//! Domain Ports - Core trait definitions for the deployment orchestrator
//!
//! These traits define the boundaries between the orchestration logic and the
//! systems it drives: the cluster control plane, remote hosts reached over
//! SSH, local tooling, the image registry and the wall clock. Adapters
//! implement these traits to provide concrete functionality.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Resource Kinds
// =============================================================================

/// Static description of a Kubernetes resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMeta {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl KindMeta {
    /// `apiVersion` string as it appears in manifests
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Resource types the orchestrator reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Pod,
    Node,
    Namespace,
    ConfigMap,
    Secret,
    PersistentVolume,
    PersistentVolumeClaim,
    StorageClass,
    Deployment,
    ClusterVersion,
    PackageManifest,
    Subscription,
    ClusterServiceVersion,
    InstallPlan,
    CatalogSource,
    OperatorGroup,
    OperatorHub,
    ImageConfig,
    ImageContentSourcePolicy,
    MachineConfigPool,
    MachineConfig,
    ImageRegistryConfig,
    Console,
    NetworkAttachmentDefinition,
    StorageCluster,
    StorageSystem,
    OcsInitialization,
    CephCluster,
    CephBlockPool,
    CephFilesystem,
    MirrorPeer,
    DrPolicy,
    MultiClusterHub,
    LvmCluster,
    LocalVolumeSet,
}

impl ResourceKind {
    const ALL: [ResourceKind; 35] = [
        ResourceKind::Pod,
        ResourceKind::Node,
        ResourceKind::Namespace,
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::PersistentVolume,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::StorageClass,
        ResourceKind::Deployment,
        ResourceKind::ClusterVersion,
        ResourceKind::PackageManifest,
        ResourceKind::Subscription,
        ResourceKind::ClusterServiceVersion,
        ResourceKind::InstallPlan,
        ResourceKind::CatalogSource,
        ResourceKind::OperatorGroup,
        ResourceKind::OperatorHub,
        ResourceKind::ImageConfig,
        ResourceKind::ImageContentSourcePolicy,
        ResourceKind::MachineConfigPool,
        ResourceKind::MachineConfig,
        ResourceKind::ImageRegistryConfig,
        ResourceKind::Console,
        ResourceKind::NetworkAttachmentDefinition,
        ResourceKind::StorageCluster,
        ResourceKind::StorageSystem,
        ResourceKind::OcsInitialization,
        ResourceKind::CephCluster,
        ResourceKind::CephBlockPool,
        ResourceKind::CephFilesystem,
        ResourceKind::MirrorPeer,
        ResourceKind::DrPolicy,
        ResourceKind::MultiClusterHub,
        ResourceKind::LvmCluster,
        ResourceKind::LocalVolumeSet,
    ];

    pub fn meta(&self) -> KindMeta {
        let (group, version, kind, plural, namespaced) = match self {
            ResourceKind::Pod => ("", "v1", "Pod", "pods", true),
            ResourceKind::Node => ("", "v1", "Node", "nodes", false),
            ResourceKind::Namespace => ("", "v1", "Namespace", "namespaces", false),
            ResourceKind::ConfigMap => ("", "v1", "ConfigMap", "configmaps", true),
            ResourceKind::Secret => ("", "v1", "Secret", "secrets", true),
            ResourceKind::PersistentVolume => {
                ("", "v1", "PersistentVolume", "persistentvolumes", false)
            }
            ResourceKind::PersistentVolumeClaim => (
                "",
                "v1",
                "PersistentVolumeClaim",
                "persistentvolumeclaims",
                true,
            ),
            ResourceKind::StorageClass => {
                ("storage.k8s.io", "v1", "StorageClass", "storageclasses", false)
            }
            ResourceKind::Deployment => ("apps", "v1", "Deployment", "deployments", true),
            ResourceKind::ClusterVersion => {
                ("config.openshift.io", "v1", "ClusterVersion", "clusterversions", false)
            }
            ResourceKind::PackageManifest => (
                "packages.operators.coreos.com",
                "v1",
                "PackageManifest",
                "packagemanifests",
                true,
            ),
            ResourceKind::Subscription => {
                ("operators.coreos.com", "v1alpha1", "Subscription", "subscriptions", true)
            }
            ResourceKind::ClusterServiceVersion => (
                "operators.coreos.com",
                "v1alpha1",
                "ClusterServiceVersion",
                "clusterserviceversions",
                true,
            ),
            ResourceKind::InstallPlan => {
                ("operators.coreos.com", "v1alpha1", "InstallPlan", "installplans", true)
            }
            ResourceKind::CatalogSource => {
                ("operators.coreos.com", "v1alpha1", "CatalogSource", "catalogsources", true)
            }
            ResourceKind::OperatorGroup => {
                ("operators.coreos.com", "v1", "OperatorGroup", "operatorgroups", true)
            }
            ResourceKind::OperatorHub => {
                ("config.openshift.io", "v1", "OperatorHub", "operatorhubs", false)
            }
            ResourceKind::ImageConfig => ("config.openshift.io", "v1", "Image", "images", false),
            ResourceKind::ImageContentSourcePolicy => (
                "operator.openshift.io",
                "v1alpha1",
                "ImageContentSourcePolicy",
                "imagecontentsourcepolicies",
                false,
            ),
            ResourceKind::MachineConfigPool => (
                "machineconfiguration.openshift.io",
                "v1",
                "MachineConfigPool",
                "machineconfigpools",
                false,
            ),
            ResourceKind::MachineConfig => (
                "machineconfiguration.openshift.io",
                "v1",
                "MachineConfig",
                "machineconfigs",
                false,
            ),
            ResourceKind::ImageRegistryConfig => {
                ("imageregistry.operator.openshift.io", "v1", "Config", "configs", false)
            }
            ResourceKind::Console => ("operator.openshift.io", "v1", "Console", "consoles", false),
            ResourceKind::NetworkAttachmentDefinition => (
                "k8s.cni.cncf.io",
                "v1",
                "NetworkAttachmentDefinition",
                "network-attachment-definitions",
                true,
            ),
            ResourceKind::StorageCluster => {
                ("ocs.openshift.io", "v1", "StorageCluster", "storageclusters", true)
            }
            ResourceKind::StorageSystem => {
                ("odf.openshift.io", "v1alpha1", "StorageSystem", "storagesystems", true)
            }
            ResourceKind::OcsInitialization => {
                ("ocs.openshift.io", "v1", "OCSInitialization", "ocsinitializations", true)
            }
            ResourceKind::CephCluster => ("ceph.rook.io", "v1", "CephCluster", "cephclusters", true),
            ResourceKind::CephBlockPool => {
                ("ceph.rook.io", "v1", "CephBlockPool", "cephblockpools", true)
            }
            ResourceKind::CephFilesystem => {
                ("ceph.rook.io", "v1", "CephFilesystem", "cephfilesystems", true)
            }
            ResourceKind::MirrorPeer => (
                "multicluster.odf.openshift.io",
                "v1alpha1",
                "MirrorPeer",
                "mirrorpeers",
                false,
            ),
            ResourceKind::DrPolicy => {
                ("ramendr.openshift.io", "v1alpha1", "DRPolicy", "drpolicies", false)
            }
            ResourceKind::MultiClusterHub => (
                "operator.open-cluster-management.io",
                "v1",
                "MultiClusterHub",
                "multiclusterhubs",
                true,
            ),
            ResourceKind::LvmCluster => {
                ("lvm.topolvm.io", "v1alpha1", "LVMCluster", "lvmclusters", true)
            }
            ResourceKind::LocalVolumeSet => (
                "local.storage.openshift.io",
                "v1alpha1",
                "LocalVolumeSet",
                "localvolumesets",
                true,
            ),
        };
        KindMeta {
            group,
            version,
            kind,
            plural,
            namespaced,
        }
    }

    /// Resolve the kind of a manifest from its `apiVersion` and `kind`
    pub fn from_manifest(manifest: &Value) -> Result<Self> {
        let api_version = manifest
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Configuration("manifest has no apiVersion".into()))?;
        let kind = manifest
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Configuration("manifest has no kind".into()))?;

        Self::ALL
            .iter()
            .copied()
            .find(|k| {
                let meta = k.meta();
                meta.kind == kind && meta.api_version() == api_version
            })
            .ok_or_else(|| {
                Error::Configuration(format!("unsupported resource type {}/{}", api_version, kind))
            })
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.meta().kind)
    }
}

// =============================================================================
// Exec Types
// =============================================================================

/// Reference to a container to exec into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    pub container: Option<String>,
}

impl PodRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            container: None,
        }
    }
}

/// Output of a remote or local command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `Error::CommandFailed`
    pub fn into_result(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::command_failed(command, self.stderr))
        }
    }
}

// =============================================================================
// Control-Plane Client Port
// =============================================================================

/// Port for reading and writing cluster resources
///
/// All calls target the single cluster the client was built for. Missing
/// objects are reported as `Error::ResourceNotFound`.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Fetch one object
    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<Value>;

    /// List objects, optionally filtered by a label selector
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<Value>>;

    /// Create an object; fails if it already exists
    async fn create(&self, manifest: &Value) -> Result<Value>;

    /// Create or update an object
    async fn apply(&self, manifest: &Value) -> Result<Value>;

    /// Apply a JSON merge patch
    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        merge_patch: &Value,
    ) -> Result<Value>;

    /// Delete an object
    async fn delete(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<()>;

    /// Run a command inside a container
    async fn exec(&self, pod: &PodRef, command: &[String]) -> Result<ExecOutput>;

    /// Whether the API server answers at all
    async fn is_reachable(&self) -> bool;

    /// Create an object unless it already exists; returns whether it was created
    async fn create_if_absent(&self, manifest: &Value) -> Result<bool> {
        match self.create(manifest).await {
            Ok(_) => Ok(true),
            Err(Error::ResourceExists { kind, name }) => {
                tracing::info!("{}/{} already exists, keeping it", kind, name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Remote Shell Port
// =============================================================================

/// Port for commands on hosts outside the cluster (external Ceph nodes)
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, host: &str, command: &str) -> Result<ExecOutput>;

    async fn upload(&self, host: &str, local: &Path, remote: &str) -> Result<()>;
}

// =============================================================================
// Local Command Port
// =============================================================================

/// A local tool invocation
#[derive(Debug, Clone, Default)]
pub struct LocalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl LocalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Port for running installer tooling on the local host
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &LocalCommand) -> Result<ExecOutput>;
}

// =============================================================================
// Registry Tag Port
// =============================================================================

/// Port for looking up the newest downstream OLM index tag
#[async_trait]
pub trait TagResolver: Send + Sync {
    async fn latest_tag(&self, upgrade: bool, latest_tag: &str) -> Result<String>;
}

// =============================================================================
// Clock Port
// =============================================================================

/// Time source for every wait in the orchestrator
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ControlPlaneRef = Arc<dyn ControlPlaneClient>;
pub type RemoteShellRef = Arc<dyn RemoteShell>;
pub type CommandRunnerRef = Arc<dyn CommandRunner>;
pub type TagResolverRef = Arc<dyn TagResolver>;
pub type ClockRef = Arc<dyn Clock>;
