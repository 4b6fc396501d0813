//! Pod count waits used by every deployment phase

use crate::cluster::ClusterOps;
use crate::document::{name_of, phase_of};
use crate::domain::ports::{PodRef, ResourceKind};
use crate::error::{Error, Result};
use crate::poll::{PollTarget, Probe};
use std::time::Duration;
use tracing::info;

const POD_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How many Running pods a selector must match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodCount {
    AtLeast(usize),
    Exactly(usize),
}

impl PodCount {
    fn satisfied_by(&self, running: usize) -> bool {
        match *self {
            PodCount::AtLeast(n) => running >= n,
            PodCount::Exactly(n) => running == n,
        }
    }
}

impl std::fmt::Display for PodCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodCount::AtLeast(n) => write!(f, ">= {} Running", n),
            PodCount::Exactly(n) => write!(f, "{} Running", n),
        }
    }
}

/// Wait until the Running pods matching `selector` satisfy `count`
pub async fn wait_for_pods(
    ops: &ClusterOps<'_>,
    namespace: &str,
    selector: &str,
    count: PodCount,
    timeout: Duration,
) -> Result<usize> {
    let client = ops.client;
    let target = PollTarget::new("Pod", selector, count.to_string());
    let running = ops
        .poller
        .until(&target, POD_POLL_INTERVAL, timeout, || async move {
            let pods = client.list(ResourceKind::Pod, Some(namespace), Some(selector)).await?;
            let running = pods.iter().filter(|p| phase_of(p) == "Running").count();
            Ok(if count.satisfied_by(running) {
                Probe::Ready(running)
            } else {
                Probe::Pending(format!("{} of {} pods Running", running, pods.len()))
            })
        })
        .await?;
    info!("{} pod(s) {} Running on {}", running, selector, ops.cluster);
    Ok(running)
}

/// First Running pod matching `selector`
pub async fn running_pod(ops: &ClusterOps<'_>, namespace: &str, selector: &str) -> Result<PodRef> {
    let pods = ops
        .client
        .list(ResourceKind::Pod, Some(namespace), Some(selector))
        .await?;
    pods.iter()
        .find(|p| phase_of(p) == "Running")
        .map(|p| PodRef::new(namespace, name_of(p)))
        .ok_or_else(|| Error::PodNotCreated {
            selector: selector.to_string(),
            cluster: ops.cluster.to_string(),
        })
}

/// Wait until a Deployment reports at least one available replica
pub async fn wait_for_deployment(
    ops: &ClusterOps<'_>,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<()> {
    let client = ops.client;
    let target = PollTarget::new("Deployment", name, "available");
    ops.poller
        .until(&target, POD_POLL_INTERVAL, timeout, || async move {
            let deployment = client.get(ResourceKind::Deployment, Some(namespace), name).await?;
            let available = deployment
                .pointer("/status/availableReplicas")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
            Ok(Probe::check(available >= 1, format!("{} available", available)))
        })
        .await?;
    info!("Deployment {}/{} available on {}", namespace, name, ops.cluster);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ManifestStore;
    use crate::poll::Poller;
    use crate::testing::{pod, running_pods, FakeClock, FakeControlPlane};
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_exact_count_rejects_extra_pods() {
        let client = FakeControlPlane::new();
        running_pods(&client, "openshift-storage", "rook-ceph-tools", 2);
        let clock = Arc::new(FakeClock::new());
        let poller = Poller::new(clock.clone());
        let artifacts = ManifestStore::temporary().unwrap();
        let ops = ClusterOps {
            cluster: "c1",
            client: &client,
            poller: &poller,
            artifacts: &artifacts,
        };

        let err = wait_for_pods(
            &ops,
            "openshift-storage",
            "app=rook-ceph-tools",
            PodCount::Exactly(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::ResourceWrongStatus { ref observed, .. } if observed.starts_with("2 of 2"));

        let running = wait_for_pods(
            &ops,
            "openshift-storage",
            "app=rook-ceph-tools",
            PodCount::AtLeast(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert_eq!(running, 2);
    }

    #[tokio::test]
    async fn test_running_pod_skips_pending() {
        let client = FakeControlPlane::new();
        client.insert(pod("ns", "tools-a", json!({"app": "tools"}), "Pending"));
        client.insert(pod("ns", "tools-b", json!({"app": "tools"}), "Running"));
        let poller = Poller::new(Arc::new(FakeClock::new()));
        let artifacts = ManifestStore::temporary().unwrap();
        let ops = ClusterOps {
            cluster: "c1",
            client: &client,
            poller: &poller,
            artifacts: &artifacts,
        };

        assert_eq!(running_pod(&ops, "ns", "app=tools").await.unwrap().name, "tools-b");
        assert_matches!(
            running_pod(&ops, "ns", "app=other").await,
            Err(Error::PodNotCreated { .. })
        );
    }

    #[tokio::test]
    async fn test_deployment_becomes_available() {
        let client = FakeControlPlane::new();
        client.insert(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "odfmo-controller-manager", "namespace": "openshift-operators"},
            "status": {"availableReplicas": 0}
        }));
        client.on_call(|call, store| {
            if let crate::testing::Call::Get { kind: ResourceKind::Deployment, .. } = call {
                for (key, doc) in store.iter_mut() {
                    if key.0 == ResourceKind::Deployment {
                        doc["status"]["availableReplicas"] = json!(1);
                    }
                }
            }
        });
        let poller = Poller::new(Arc::new(FakeClock::new()));
        let artifacts = ManifestStore::temporary().unwrap();
        let ops = ClusterOps {
            cluster: "c1",
            client: &client,
            poller: &poller,
            artifacts: &artifacts,
        };

        wait_for_deployment(&ops, "openshift-operators", "odfmo-controller-manager", Duration::from_secs(600))
            .await
            .unwrap();
    }
}
