//! ACM hub installation
//!
//! Released ACM is installed from the default Red Hat catalog into
//! `open-cluster-management`, then a MultiClusterHub is created and
//! watched until it reports `Running`.

use crate::cluster::ClusterOps;
use crate::document::phase_of;
use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use crate::olm::{OperatorRequest, OPERATOR_CATALOG_SOURCE};
use crate::plan::AcmHubPlan;
use crate::poll::{PollTarget, Probe};
use serde_json::json;
use std::time::Duration;
use tracing::info;

pub const ACM_NAMESPACE: &str = "open-cluster-management";
pub const ACM_OPERATOR: &str = "advanced-cluster-management";
pub const ACM_OPERATOR_GROUP: &str = "open-cluster-management-group";
pub const MULTICLUSTER_HUB: &str = "multiclusterhub";
const HUB_RUNNING_TIMEOUT: Duration = Duration::from_secs(720);
const HUB_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub async fn deploy_acm_hub(ops: &ClusterOps<'_>, plan: &AcmHubPlan) -> Result<()> {
    if plan.unreleased {
        return Err(Error::UnsupportedFeature(
            "unreleased ACM hub builds are installed by the open-cluster-management deploy repository".into(),
        ));
    }
    info!("Deploying ACM hub on {} from channel {}", ops.cluster, plan.channel);

    let installer = ops.installer();
    installer.ensure_namespace(ACM_NAMESPACE, json!({})).await?;
    installer
        .ensure_operator_group(ACM_NAMESPACE, ACM_OPERATOR_GROUP, vec![ACM_NAMESPACE.to_string()])
        .await?;
    let request = OperatorRequest::new(ACM_OPERATOR, ACM_NAMESPACE, OPERATOR_CATALOG_SOURCE)
        .channel(Some(plan.channel.clone()))
        .starting_csv(ACM_OPERATOR);
    let report = installer.install(&request).await?;
    info!("ACM hub operator {} Succeeded", report.csv);

    let hub = json!({
        "apiVersion": "operator.open-cluster-management.io/v1",
        "kind": "MultiClusterHub",
        "metadata": {"name": MULTICLUSTER_HUB, "namespace": ACM_NAMESPACE},
        "spec": {}
    });
    ops.artifacts.record("multiclusterhub_manifest", &hub)?;
    ops.client.create_if_absent(&hub).await?;
    validate_acm_hub(ops).await
}

/// Wait for the MultiClusterHub to report `Running`
pub async fn validate_acm_hub(ops: &ClusterOps<'_>) -> Result<()> {
    let client = ops.client;
    let target = PollTarget::new("MultiClusterHub", MULTICLUSTER_HUB, "Running");
    ops.poller
        .until(&target, HUB_POLL_INTERVAL, HUB_RUNNING_TIMEOUT, || async move {
            let hub = client
                .get(ResourceKind::MultiClusterHub, Some(ACM_NAMESPACE), MULTICLUSTER_HUB)
                .await?;
            let phase = phase_of(&hub);
            Ok(Probe::check(phase == "Running", phase))
        })
        .await?;
    info!("MultiClusterHub on {} is Running", ops.cluster);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::harness::Harness;
    use crate::olm::installer::fixtures::simulate_olm;
    use crate::olm::package_manifest::manifest_fixture;
    use crate::testing::Call;
    use assert_matches::assert_matches;

    fn plan(unreleased: bool) -> AcmHubPlan {
        AcmHubPlan {
            unreleased,
            channel: "release-2.6".into(),
        }
    }

    #[tokio::test]
    async fn test_released_hub_installs_and_waits_for_running() {
        let h = Harness::new("env_data: {}\n");
        h.client.insert(manifest_fixture(
            ACM_OPERATOR,
            OPERATOR_CATALOG_SOURCE,
            &[("release-2.6", "advanced-cluster-management.v2.6.2")],
        ));
        simulate_olm(&h.client, ACM_NAMESPACE, "advanced-cluster-management.v2.6.2");
        h.client.on_call(|call, store| {
            if let Call::Create { kind: ResourceKind::MultiClusterHub, .. } = call {
                if let Some(hub) = store.get_mut(&(ResourceKind::MultiClusterHub, ACM_NAMESPACE.to_string(), MULTICLUSTER_HUB.to_string())) {
                    hub["status"] = json!({"phase": "Running"});
                }
            }
        });

        deploy_acm_hub(&h.ops(), &plan(false)).await.unwrap();

        let subscription = h
            .client
            .object(ResourceKind::Subscription, Some(ACM_NAMESPACE), ACM_OPERATOR)
            .unwrap();
        assert_eq!(subscription["spec"]["channel"], "release-2.6");
        assert_eq!(subscription["spec"]["startingCSV"], "advanced-cluster-management.v2.6.2");
        assert_eq!(h.client.created(ResourceKind::MultiClusterHub), vec![MULTICLUSTER_HUB.to_string()]);
    }

    #[tokio::test]
    async fn test_unreleased_hub_is_unsupported() {
        let h = Harness::new("env_data: {}\n");
        assert_matches!(
            deploy_acm_hub(&h.ops(), &plan(true)).await,
            Err(Error::UnsupportedFeature(_))
        );
        assert!(h.client.calls().is_empty());
    }
}
