//! MachineConfig rendering and rollout waits
//!
//! Node level changes (chrony, network split scripts, registry mirrors,
//! kernel arguments) reach the hosts through the machine config operator.
//! Every change rolls the affected pool, so callers wait for all pools to
//! report `Updated` before moving on.

use crate::cluster::ClusterOps;
use crate::document::name_of;
use crate::domain::ports::ResourceKind;
use crate::error::Result;
use crate::poll::{PollTarget, Probe};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

pub const ROLE_LABEL: &str = "machineconfiguration.openshift.io/role";
pub const POOL_UPDATE_TIMEOUT: Duration = Duration::from_secs(1800);
const IGNITION_VERSION: &str = "3.2.0";

/// A file written onto every node of a pool
#[derive(Debug, Clone)]
pub struct NodeFile {
    pub path: String,
    pub mode: u32,
    pub contents: String,
}

impl NodeFile {
    pub fn new(path: impl Into<String>, mode: u32, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode,
            contents: contents.into(),
        }
    }

    fn to_ignition(&self) -> Value {
        json!({
            "path": self.path,
            "mode": self.mode,
            "overwrite": true,
            "contents": {
                "source": format!("data:text/plain;charset=utf-8;base64,{}", STANDARD.encode(&self.contents))
            }
        })
    }
}

/// Builder for a MachineConfig targeting one role
#[derive(Debug, Clone)]
pub struct MachineConfigBuilder {
    name: String,
    role: String,
    files: Vec<NodeFile>,
    units: Vec<Value>,
    kernel_arguments: Vec<String>,
}

impl MachineConfigBuilder {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            files: Vec::new(),
            units: Vec::new(),
            kernel_arguments: Vec::new(),
        }
    }

    pub fn file(mut self, file: NodeFile) -> Self {
        self.files.push(file);
        self
    }

    /// Enabled oneshot unit running `exec` after the network is up
    pub fn oneshot_unit(mut self, name: &str, exec: &str) -> Self {
        let contents = format!(
            "[Unit]\nAfter=network-online.target\nWants=network-online.target\n\n\
             [Service]\nType=oneshot\nExecStart={}\nRemainAfterExit=yes\n\n\
             [Install]\nWantedBy=multi-user.target\n",
            exec
        );
        self.units.push(json!({"name": name, "enabled": true, "contents": contents}));
        self
    }

    pub fn kernel_argument(mut self, argument: impl Into<String>) -> Self {
        self.kernel_arguments.push(argument.into());
        self
    }

    pub fn build(self) -> Value {
        let mut config = json!({
            "ignition": {"version": IGNITION_VERSION},
            "storage": {"files": self.files.iter().map(NodeFile::to_ignition).collect::<Vec<_>>()}
        });
        if !self.units.is_empty() {
            config["systemd"] = json!({"units": self.units});
        }
        let mut spec = json!({"config": config});
        if !self.kernel_arguments.is_empty() {
            spec["kernelArguments"] = json!(self.kernel_arguments);
        }
        json!({
            "apiVersion": "machineconfiguration.openshift.io/v1",
            "kind": "MachineConfig",
            "metadata": {"name": self.name, "labels": {ROLE_LABEL: self.role}},
            "spec": spec
        })
    }
}

fn pool_updated(pool: &Value) -> bool {
    pool.pointer("/status/conditions")
        .and_then(Value::as_array)
        .map_or(false, |conditions| {
            conditions
                .iter()
                .any(|c| c["type"] == "Updated" && c["status"] == "True")
        })
}

/// Wait until every MachineConfigPool reports `Updated=True`
pub async fn wait_for_pools_updated(ops: &ClusterOps<'_>, timeout: Duration) -> Result<()> {
    let client = ops.client;
    let target = PollTarget::new("MachineConfigPool", "all", "Updated");
    ops.poller
        .until(&target, Duration::from_secs(30), timeout, || async move {
            let pools = client.list(ResourceKind::MachineConfigPool, None, None).await?;
            let updating: Vec<&str> = pools
                .iter()
                .filter(|pool| !pool_updated(pool))
                .map(name_of)
                .collect();
            Ok(Probe::check(
                !pools.is_empty() && updating.is_empty(),
                format!("updating: {:?}", updating),
            ))
        })
        .await?;
    info!("All MachineConfigPools on {} are updated", ops.cluster);
    Ok(())
}

/// Apply `manifests` and wait for the resulting rollout
pub async fn apply_and_roll_out(ops: &ClusterOps<'_>, prefix: &str, manifests: &[Value]) -> Result<()> {
    for manifest in manifests {
        ops.artifacts.record(prefix, manifest)?;
        ops.client.apply(manifest).await?;
        info!("Applied MachineConfig {}", name_of(manifest));
    }
    wait_for_pools_updated(ops, POOL_UPDATE_TIMEOUT).await
}

#[cfg(test)]
pub(crate) fn pool(name: &str, updated: bool) -> Value {
    json!({
        "apiVersion": "machineconfiguration.openshift.io/v1",
        "kind": "MachineConfigPool",
        "metadata": {"name": name},
        "status": {"conditions": [{"type": "Updated", "status": if updated { "True" } else { "False" }}]}
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ManifestStore;
    use crate::poll::Poller;
    use crate::testing::{FakeClock, FakeControlPlane};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[test]
    fn test_builder_encodes_files() {
        let mc = MachineConfigBuilder::new("99-worker-chrony", "worker")
            .file(NodeFile::new("/etc/chrony.conf", 0o644, "server a iburst\n"))
            .build();
        assert_eq!(mc["metadata"]["labels"][ROLE_LABEL], "worker");
        let file = &mc["spec"]["config"]["storage"]["files"][0];
        assert_eq!(file["mode"], 420);
        assert_eq!(
            file["contents"]["source"],
            "data:text/plain;charset=utf-8;base64,c2VydmVyIGEgaWJ1cnN0Cg=="
        );
        assert!(mc["spec"].get("kernelArguments").is_none());
        assert!(mc["spec"]["config"].get("systemd").is_none());
    }

    #[test]
    fn test_builder_units_and_kernel_arguments() {
        let mc = MachineConfigBuilder::new("99-worker-hugepages", "worker")
            .kernel_argument("hugepagesz=2M")
            .oneshot_unit("split.service", "/usr/local/bin/split.sh")
            .build();
        assert_eq!(mc["spec"]["kernelArguments"][0], "hugepagesz=2M");
        assert_eq!(mc["spec"]["config"]["systemd"]["units"][0]["enabled"], true);
    }

    #[tokio::test]
    async fn test_wait_times_out_on_stuck_pool() {
        let client = FakeControlPlane::new();
        client.insert(pool("master", true));
        client.insert(pool("worker", false));
        let clock = Arc::new(FakeClock::new());
        let poller = Poller::new(clock.clone());
        let artifacts = ManifestStore::temporary().unwrap();
        let ops = ClusterOps {
            cluster: "c1",
            client: &client,
            poller: &poller,
            artifacts: &artifacts,
        };

        let err = wait_for_pools_updated(&ops, Duration::from_secs(120)).await.unwrap_err();
        assert_matches!(err, crate::error::Error::ResourceWrongStatus { ref observed, .. } if observed.contains("worker"));
        assert_eq!(clock.elapsed(), Duration::from_secs(120));
    }
}
