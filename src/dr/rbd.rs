//! RBD mirroring for Regional DR
//!
//! A MirrorPeer on the hub pairs the managed storage clusters. Once the
//! hub has exchanged their secrets, each managed cluster must run the token
//! exchange agent, flip mirroring on for the default block pool, start an
//! rbd-mirror daemon and grow the CSI provisioner by its replication
//! sidecars.

use super::{DrConfiguration, DrScope};
use crate::cluster::ClusterOps;
use crate::crd::dr::{MirrorPeer, MirrorPeerSpec, PeerRef, StorageClusterRef};
use crate::crd::to_manifest;
use crate::deploy::pods::{wait_for_pods, PodCount};
use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use crate::poll::{PollTarget, Probe};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

pub const TOKEN_EXCHANGE_SELECTOR: &str = "app=token-exchange-agent";
pub const RBD_MIRROR_SELECTOR: &str = "app=rook-ceph-rbd-mirror";
pub const CSI_PROVISIONER_SELECTOR: &str = "app=csi-rbdplugin-provisioner";

/// Containers across the RBD provisioner pods once the replication
/// sidecars are injected
pub const EXPECTED_SIDECAR_CONTAINERS: usize = 16;

const MIRROR_PEER_TIMEOUT: Duration = Duration::from_secs(1200);
const MIRROR_PEER_INTERVAL: Duration = Duration::from_secs(10);
const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(300);
const MIRRORING_TIMEOUT: Duration = Duration::from_secs(300);
const MIRRORING_INTERVAL: Duration = Duration::from_secs(5);
const RBD_MIRROR_TIMEOUT: Duration = Duration::from_secs(300);
const SIDECAR_ATTEMPTS: u32 = 10;
const SIDECAR_INTERVAL: Duration = Duration::from_secs(2);

pub struct RbdDrOps<'a> {
    config: &'a DrConfiguration,
    scope: DrScope<'a>,
    namespace: &'a str,
    storage_cluster: &'a str,
    expected_sidecars: usize,
}

impl<'a> RbdDrOps<'a> {
    pub fn new(
        config: &'a DrConfiguration,
        scope: DrScope<'a>,
        namespace: &'a str,
        storage_cluster: &'a str,
    ) -> Self {
        Self {
            config,
            scope,
            namespace,
            storage_cluster,
            expected_sidecars: EXPECTED_SIDECAR_CONTAINERS,
        }
    }

    pub fn expected_sidecars(mut self, count: usize) -> Self {
        self.expected_sidecars = count;
        self
    }

    /// Name of the default block pool the StorageCluster owns
    pub fn block_pool(&self) -> String {
        format!("{}-cephblockpool", self.storage_cluster)
    }

    /// Peer the managed clusters and validate mirroring on each of them.
    ///
    /// Returns the MirrorPeer name.
    pub async fn deploy(&self, hub: &ClusterOps<'_>) -> Result<String> {
        let peer = self.create_mirror_peer(hub).await?;
        self.wait_for_exchanged_secret(hub, &peer).await?;
        self.wait_for_token_exchange().await?;

        let scope = self.scope;
        scope
            .registry
            .for_each(scope.registry.non_hub(), move |handle| async move {
                let ops = ClusterOps::new(&handle, scope.poller, scope.artifacts);
                self.wait_for_pool_mirroring(&ops).await?;
                self.wait_for_rbd_mirror(&ops).await?;
                self.validate_csi_sidecars(&ops).await
            })
            .await?;
        info!("RBD mirroring configured for {}", self.config.clusters.join(", "));
        Ok(peer)
    }

    /// MirrorPeer listing the managed clusters, primary first
    pub fn mirror_peer(&self) -> Result<Value> {
        let items = self
            .config
            .clusters
            .iter()
            .map(|name| PeerRef {
                cluster_name: name.clone(),
                storage_cluster_ref: StorageClusterRef {
                    name: self.storage_cluster.to_string(),
                    namespace: self.namespace.to_string(),
                },
            })
            .collect();
        let name = format!("mirrorpeer-{}", self.config.clusters.join("-"));
        to_manifest(
            MirrorPeer::new(
                &name,
                MirrorPeerSpec {
                    items,
                    manage_s3: true,
                    replication_type: "async".into(),
                },
            ),
            None,
        )
    }

    async fn create_mirror_peer(&self, hub: &ClusterOps<'_>) -> Result<String> {
        let peer = self.mirror_peer()?;
        let name = crate::document::name_of(&peer).to_string();
        info!("Creating MirrorPeer {} on {}", name, hub.cluster);
        hub.artifacts.record("mirror_peer_manifest", &peer)?;
        hub.client.create_if_absent(&peer).await?;
        Ok(name)
    }

    async fn wait_for_exchanged_secret(&self, hub: &ClusterOps<'_>, peer: &str) -> Result<()> {
        let client = hub.client;
        let target = PollTarget::new("MirrorPeer", peer, "ExchangedSecret");
        hub.poller
            .until(&target, MIRROR_PEER_INTERVAL, MIRROR_PEER_TIMEOUT, || async move {
                let doc = client.get(ResourceKind::MirrorPeer, None, peer).await?;
                let mirror: MirrorPeer = serde_json::from_value(doc)?;
                let phase = mirror.status.map(|s| s.phase).unwrap_or_default();
                Ok(Probe::check(phase == "ExchangedSecret", phase))
            })
            .await?;
        info!("MirrorPeer {} exchanged secrets", peer);
        Ok(())
    }

    async fn wait_for_token_exchange(&self) -> Result<()> {
        let scope = self.scope;
        let namespace = self.namespace;
        scope
            .registry
            .for_each(scope.registry.non_hub(), move |handle| async move {
                let ops = ClusterOps::new(&handle, scope.poller, scope.artifacts);
                wait_for_pods(&ops, namespace, TOKEN_EXCHANGE_SELECTOR, PodCount::AtLeast(1), TOKEN_EXCHANGE_TIMEOUT)
                    .await
            })
            .await?;
        Ok(())
    }

    /// Wait until the default block pool reports mirroring enabled
    pub async fn wait_for_pool_mirroring(&self, ops: &ClusterOps<'_>) -> Result<()> {
        let client = ops.client;
        let namespace = self.namespace;
        let pool = self.block_pool();
        let pool = pool.as_str();
        let target = PollTarget::new("CephBlockPool", pool, "mirroring enabled");
        ops.poller
            .until(&target, MIRRORING_INTERVAL, MIRRORING_TIMEOUT, || async move {
                let doc = client.get(ResourceKind::CephBlockPool, Some(namespace), pool).await?;
                let enabled = mirroring_enabled(&doc);
                Ok(Probe::check(enabled, format!("mirroring.enabled={}", enabled)))
            })
            .await?;
        info!("CephBlockPool {} mirroring enabled on {}", pool, ops.cluster);
        Ok(())
    }

    /// An rbd-mirror daemon must be running
    pub async fn wait_for_rbd_mirror(&self, ops: &ClusterOps<'_>) -> Result<()> {
        match wait_for_pods(ops, self.namespace, RBD_MIRROR_SELECTOR, PodCount::AtLeast(1), RBD_MIRROR_TIMEOUT)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::ResourceWrongStatus { .. }) => Err(Error::PodNotCreated {
                selector: RBD_MIRROR_SELECTOR.to_string(),
                cluster: ops.cluster.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Count containers across the provisioner pods until the replication
    /// sidecars show up
    pub async fn validate_csi_sidecars(&self, ops: &ClusterOps<'_>) -> Result<()> {
        let client = ops.client;
        let namespace = self.namespace;
        let expected = self.expected_sidecars;
        let observed = AtomicUsize::new(0);
        let observed_ref = &observed;
        let target = PollTarget::new("Pod", CSI_PROVISIONER_SELECTOR, format!("{} containers", expected));

        let outcome = ops
            .poller
            .attempts(&target, SIDECAR_ATTEMPTS, SIDECAR_INTERVAL, || async move {
                let pods = client
                    .list(ResourceKind::Pod, Some(namespace), Some(CSI_PROVISIONER_SELECTOR))
                    .await?;
                let count = container_count(&pods);
                observed_ref.store(count, Ordering::SeqCst);
                Ok(Probe::check(count == expected, format!("{} containers", count)))
            })
            .await;

        match outcome {
            Ok(()) => {
                info!("CSI provisioner on {} runs {} containers", ops.cluster, expected);
                Ok(())
            }
            Err(Error::ResourceWrongStatus { .. }) => {
                let observed = observed.load(Ordering::SeqCst);
                warn!(
                    "CSI provisioner on {} has {} containers, expected {}",
                    ops.cluster, observed, expected
                );
                Err(Error::RbdSidecarMismatch { expected, observed })
            }
            Err(e) => Err(e),
        }
    }
}

/// `spec.mirroring.enabled`, given as a bool or the string `"true"`
pub fn mirroring_enabled(pool: &Value) -> bool {
    match pool.pointer("/spec/mirroring/enabled") {
        Some(Value::Bool(enabled)) => *enabled,
        Some(Value::String(enabled)) => enabled.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn container_count(pods: &[Value]) -> usize {
    pods.iter()
        .filter_map(|p| p.pointer("/spec/containers").and_then(Value::as_array))
        .map(Vec::len)
        .sum()
}
