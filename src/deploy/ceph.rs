//! Ceph level checks run once the StorageCluster exists
//!
//! Health is read through the toolbox pod, which the OCSInitialization
//! resource switches on. Clock skew is reported separately from other
//! degradations so the caller can resync NTP and try again.

use super::pods::{running_pod, wait_for_pods, PodCount};
use crate::cluster::ClusterOps;
use crate::document::{name_of, str_at};
use crate::domain::ports::ResourceKind;
use crate::error::{Error, HealthIssue, Result};
use crate::poll::{retry, PollTarget, Probe};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

pub const TOOLS_SELECTOR: &str = "app=rook-ceph-tools";
pub const OCS_INITIALIZATION: &str = "ocsinit";
pub const ROOK_OPERATOR_CONFIG: &str = "rook-ceph-operator-config";
pub const HEALTH_OK: &str = "HEALTH_OK";
const TOOLBOX_TIMEOUT: Duration = Duration::from_secs(600);
const EXTERNAL_HEALTH_TIMEOUT: Duration = Duration::from_secs(300);

/// Run a ceph command in the toolbox and return its stdout
pub async fn ceph_command(ops: &ClusterOps<'_>, namespace: &str, args: &[&str]) -> Result<String> {
    let tools = running_pod(ops, namespace, TOOLS_SELECTOR).await?;
    let command: Vec<String> = std::iter::once("ceph")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect();
    let joined = command.join(" ");
    let output = ops.client.exec(&tools, &command).await?.into_result(&joined)?;
    Ok(output.stdout)
}

/// Turn `ceph health detail` output into a result
pub fn parse_health(output: &str) -> Result<()> {
    let output = output.trim();
    let status = output.split_whitespace().next().unwrap_or_default();
    if status == HEALTH_OK {
        return Ok(());
    }
    let issue = if output.contains("MON_CLOCK_SKEW") || output.to_lowercase().contains("clock skew") {
        HealthIssue::ClockSkew
    } else if status.is_empty() {
        HealthIssue::Degraded("no health output".into())
    } else {
        HealthIssue::Degraded(status.to_string())
    };
    Err(Error::CephHealth {
        issue,
        detail: output.to_string(),
    })
}

/// One health probe through the toolbox
pub async fn check_health(ops: &ClusterOps<'_>, namespace: &str) -> Result<()> {
    let output = ceph_command(ops, namespace, &["health", "detail"]).await?;
    parse_health(&output)
}

/// Probe health up to `tries` times, `delay` apart
pub async fn health_check(ops: &ClusterOps<'_>, namespace: &str, tries: u32, delay: Duration) -> Result<()> {
    retry(ops.poller.clock(), "ceph_health_check", tries, delay, || async move {
        check_health(ops, namespace).await
    })
    .await?;
    info!("Ceph cluster on {} is {}", ops.cluster, HEALTH_OK);
    Ok(())
}

/// Switch the toolbox on and wait for exactly one tools pod
pub async fn enable_toolbox(ops: &ClusterOps<'_>, namespace: &str) -> Result<()> {
    info!("Enabling the Ceph toolbox on {}", ops.cluster);
    ops.client
        .patch(
            ResourceKind::OcsInitialization,
            Some(namespace),
            OCS_INITIALIZATION,
            &json!({"spec": {"enableCephTools": true}}),
        )
        .await?;
    wait_for_pods(ops, namespace, TOOLS_SELECTOR, PodCount::Exactly(1), TOOLBOX_TIMEOUT).await?;
    Ok(())
}

/// Set `ROOK_LOG_LEVEL` in the rook operator config map
pub async fn set_rook_log_level(ops: &ClusterOps<'_>, namespace: &str, level: &str) -> Result<()> {
    info!("Setting ROOK_LOG_LEVEL to {}", level);
    ops.client
        .patch(
            ResourceKind::ConfigMap,
            Some(namespace),
            ROOK_OPERATOR_CONFIG,
            &json!({"data": {"ROOK_LOG_LEVEL": level}}),
        )
        .await?;
    Ok(())
}

/// Check the CephFilesystem resource against `ceph fs ls`.
///
/// Failures are logged, never returned.
pub async fn validate_cephfs(ops: &ClusterOps<'_>, namespace: &str) -> bool {
    match cephfs_matches(ops, namespace).await {
        Ok(name) => {
            info!("CephFileSystem {} is present in ceph fs ls", name);
            true
        }
        Err(e) => {
            error!("CephFileSystem validation failed on {}: {}", ops.cluster, e);
            false
        }
    }
}

async fn cephfs_matches(ops: &ClusterOps<'_>, namespace: &str) -> Result<String> {
    let filesystems = ops
        .client
        .list(ResourceKind::CephFilesystem, Some(namespace), None)
        .await?;
    let name = filesystems
        .first()
        .map(|fs| name_of(fs).to_string())
        .ok_or(Error::CephfsMissing)?;
    let listed: Vec<Value> = serde_json::from_str(&ceph_command(ops, namespace, &["fs", "ls", "--format", "json"]).await?)?;
    if listed.iter().any(|fs| fs["name"] == name.as_str()) {
        Ok(name)
    } else {
        Err(Error::not_found("ceph filesystem", name))
    }
}

/// Wait for the external CephCluster to report `HEALTH_OK`
pub async fn wait_for_external_health(ops: &ClusterOps<'_>, namespace: &str) -> Result<()> {
    let client = ops.client;
    let target = PollTarget::new("CephCluster", namespace, HEALTH_OK);
    ops.poller
        .until(&target, Duration::from_secs(10), EXTERNAL_HEALTH_TIMEOUT, || async move {
            let clusters = client.list(ResourceKind::CephCluster, Some(namespace), None).await?;
            let health = clusters
                .first()
                .and_then(|c| str_at(c, "/status/ceph/health"))
                .unwrap_or("<none>");
            Ok(Probe::check(health == HEALTH_OK, health))
        })
        .await?;
    info!("External CephCluster on {} is {}", ops.cluster, HEALTH_OK);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ManifestStore;
    use crate::domain::ports::ExecOutput;
    use crate::poll::Poller;
    use crate::testing::{running_pods, FakeClock, FakeControlPlane};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const NS: &str = "openshift-storage";

    #[test]
    fn test_parse_health() {
        assert!(parse_health("HEALTH_OK\n").is_ok());
        let skew = parse_health("HEALTH_WARN clock skew detected on mon.b\n[WRN] MON_CLOCK_SKEW").unwrap_err();
        assert!(skew.is_clock_skew());
        let degraded = parse_health("HEALTH_ERR 1 osds down").unwrap_err();
        assert_matches!(
            degraded,
            Error::CephHealth { issue: HealthIssue::Degraded(ref s), .. } if s == "HEALTH_ERR"
        );
    }

    #[tokio::test]
    async fn test_health_check_retries_until_ok() {
        let client = FakeControlPlane::new();
        running_pods(&client, NS, "rook-ceph-tools", 1);
        client.script_exec(
            "ceph health",
            vec![
                ExecOutput::ok("HEALTH_WARN 1 pg peering"),
                ExecOutput::ok("HEALTH_WARN 1 pg peering"),
                ExecOutput::ok("HEALTH_OK"),
            ],
        );
        let clock = Arc::new(FakeClock::new());
        let poller = Poller::new(clock.clone());
        let artifacts = ManifestStore::temporary().unwrap();
        let ops = ClusterOps {
            cluster: "c1",
            client: &client,
            poller: &poller,
            artifacts: &artifacts,
        };

        health_check(&ops, NS, 30, Duration::from_secs(10)).await.unwrap();
        assert_eq!(clock.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_cephfs_validation_is_soft() {
        let client = FakeControlPlane::new();
        running_pods(&client, NS, "rook-ceph-tools", 1);
        client.insert(json!({
            "apiVersion": "ceph.rook.io/v1",
            "kind": "CephFilesystem",
            "metadata": {"name": "ocs-storagecluster-cephfilesystem", "namespace": NS}
        }));
        let poller = Poller::new(Arc::new(FakeClock::new()));
        let artifacts = ManifestStore::temporary().unwrap();
        let ops = ClusterOps {
            cluster: "c1",
            client: &client,
            poller: &poller,
            artifacts: &artifacts,
        };

        client.script_exec("fs ls", vec![ExecOutput::ok("[]")]);
        assert!(!validate_cephfs(&ops, NS).await);

        let client = FakeControlPlane::new();
        running_pods(&client, NS, "rook-ceph-tools", 1);
        client.insert(json!({
            "apiVersion": "ceph.rook.io/v1",
            "kind": "CephFilesystem",
            "metadata": {"name": "ocs-storagecluster-cephfilesystem", "namespace": NS}
        }));
        client.script_exec(
            "fs ls",
            vec![ExecOutput::ok(r#"[{"name": "ocs-storagecluster-cephfilesystem"}]"#)],
        );
        let ops = ClusterOps { client: &client, ..ops };
        assert!(validate_cephfs(&ops, NS).await);
    }
}
