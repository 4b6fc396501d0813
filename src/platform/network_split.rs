//! Network split between availability zones
//!
//! Installs a firewall script on every node together with an environment
//! file listing the node addresses of each zone. Zone `a` is the arbiter
//! zone when there is one; `b` and `c` are the data zones and `x` is an
//! optional list of external addresses. Tests later block traffic between
//! zones by running `network-split.sh block <zones>` on the nodes.

use super::machine_config::{apply_and_roll_out, MachineConfigBuilder, NodeFile};
use super::ZONE_LABEL;
use crate::cluster::ClusterOps;
use crate::document::str_at;
use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use crate::plan::NetworkSplitPlan;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

pub const ENV_FILE: &str = "/etc/network-split.env";
pub const SCRIPT_FILE: &str = "/usr/local/bin/network-split.sh";
const ZONE_NAMES: [char; 3] = ['a', 'b', 'c'];

const SCRIPT: &str = r#"#!/bin/bash
set -e
source /etc/network-split.env

case "$1" in
  setup)
    iptables -N NETSPLIT 2>/dev/null || true
    iptables -C INPUT -j NETSPLIT 2>/dev/null || iptables -I INPUT -j NETSPLIT
    ;;
  block)
    for zone in $(echo "$2" | fold -w1); do
      var="ZONE_${zone^^}"
      for addr in ${!var}; do
        iptables -A NETSPLIT -s "$addr" -j DROP
      done
    done
    ;;
  unblock)
    iptables -F NETSPLIT
    ;;
  *)
    echo "usage: $0 setup|block <zones>|unblock" >&2
    exit 1
    ;;
esac
"#;

/// Zone order: the arbiter zone first, then the remaining zones sorted
pub fn zone_order(plan: &NetworkSplitPlan, arbiter_zone: Option<&str>) -> Vec<String> {
    let mut others: Vec<String> = plan
        .master_zones
        .iter()
        .chain(plan.worker_zones.iter())
        .filter(|z| Some(z.as_str()) != arbiter_zone)
        .cloned()
        .collect();
    others.sort();
    others.dedup();
    arbiter_zone.map(str::to_string).into_iter().chain(others).collect()
}

fn internal_ip(node: &Value) -> Option<&str> {
    node.pointer("/status/addresses")
        .and_then(Value::as_array)?
        .iter()
        .find(|a| a["type"] == "InternalIP")
        .and_then(|a| a["address"].as_str())
}

/// Render the environment file from the nodes and the zone order
pub fn render_env(nodes: &[Value], zones: &[String], zone_x: Option<&[String]>) -> Result<String> {
    let mut addresses: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for node in nodes {
        let zone = str_at(node, &format!("/metadata/labels/{}", ZONE_LABEL.replace('/', "~1")));
        if let (Some(zone), Some(ip)) = (zone, internal_ip(node)) {
            addresses.entry(zone).or_default().push(ip);
        }
    }

    let mut env = String::new();
    for (name, zone) in ZONE_NAMES.iter().zip(zones) {
        let ips = addresses.get(zone.as_str()).filter(|ips| !ips.is_empty()).ok_or_else(|| {
            Error::UnavailableResource(format!("no nodes with an address in zone {}", zone))
        })?;
        env.push_str(&format!("ZONE_{}=\"{}\"\n", name.to_ascii_uppercase(), ips.join(" ")));
    }
    if let Some(addrs) = zone_x {
        env.push_str(&format!("ZONE_X=\"{}\"\n", addrs.join(" ")));
    }
    Ok(env)
}

pub async fn setup(ops: &ClusterOps<'_>, plan: &NetworkSplitPlan, arbiter_zone: Option<&str>) -> Result<()> {
    let zones = zone_order(plan, arbiter_zone);
    info!("Setting up network split on {} for zones {:?}", ops.cluster, zones);
    let nodes = ops.client.list(ResourceKind::Node, None, None).await?;
    let env = render_env(&nodes, &zones, plan.zone_x_addrs.as_deref())?;

    let configs: Vec<Value> = ["master", "worker"]
        .iter()
        .map(|role| {
            MachineConfigBuilder::new(format!("99-{}-network-split", role), *role)
                .file(NodeFile::new(ENV_FILE, 0o644, env.clone()))
                .file(NodeFile::new(SCRIPT_FILE, 0o755, SCRIPT))
                .oneshot_unit("network-split-setup.service", &format!("{} setup", SCRIPT_FILE))
                .build()
        })
        .collect();
    apply_and_roll_out(ops, "network_split_manifest", &configs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ManifestStore;
    use crate::platform::fixtures::node;
    use crate::platform::machine_config::pool;
    use crate::poll::Poller;
    use crate::testing::{FakeClock, FakeControlPlane};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn split_plan(zone_x: Option<Vec<String>>) -> NetworkSplitPlan {
        NetworkSplitPlan {
            master_zones: vec!["us-east-2a".into(), "us-east-2b".into(), "us-east-2c".into()],
            worker_zones: vec!["us-east-2b".into(), "us-east-2c".into()],
            zone_x_addrs: zone_x,
        }
    }

    fn nodes() -> Vec<Value> {
        vec![
            node("master-0", "master", Some("us-east-2a"), "10.0.1.10", true),
            node("worker-0", "worker", Some("us-east-2b"), "10.0.2.10", true),
            node("worker-1", "worker", Some("us-east-2b"), "10.0.2.11", true),
            node("worker-2", "worker", Some("us-east-2c"), "10.0.3.10", true),
        ]
    }

    #[test]
    fn test_arbiter_zone_is_zone_a() {
        assert_eq!(
            zone_order(&split_plan(None), Some("us-east-2c")),
            vec!["us-east-2c", "us-east-2a", "us-east-2b"]
        );
        assert_eq!(
            zone_order(&split_plan(None), None),
            vec!["us-east-2a", "us-east-2b", "us-east-2c"]
        );
    }

    #[test]
    fn test_render_env() {
        let zones = zone_order(&split_plan(None), None);
        let zone_x = vec!["192.168.1.1".to_string(), "192.168.1.2".to_string()];
        let env = render_env(&nodes(), &zones, Some(&zone_x)).unwrap();
        assert_eq!(
            env,
            "ZONE_A=\"10.0.1.10\"\nZONE_B=\"10.0.2.10 10.0.2.11\"\nZONE_C=\"10.0.3.10\"\nZONE_X=\"192.168.1.1 192.168.1.2\"\n"
        );
    }

    #[test]
    fn test_empty_zone_is_reported() {
        let zones = vec!["us-east-2a".to_string(), "us-east-2d".to_string()];
        let err = render_env(&nodes(), &zones, None).unwrap_err();
        assert_matches!(err, Error::UnavailableResource(ref msg) if msg.contains("us-east-2d"));
    }

    #[tokio::test]
    async fn test_setup_rolls_out_both_roles() {
        let client = FakeControlPlane::new();
        for n in nodes() {
            client.insert(n);
        }
        client.insert(pool("master", true));
        client.insert(pool("worker", true));
        let poller = Poller::new(Arc::new(FakeClock::new()));
        let artifacts = ManifestStore::temporary().unwrap();
        let ops = ClusterOps {
            cluster: "c1",
            client: &client,
            poller: &poller,
            artifacts: &artifacts,
        };

        setup(&ops, &split_plan(None), None).await.unwrap();

        assert_eq!(
            client.created(ResourceKind::MachineConfig),
            vec!["99-master-network-split", "99-worker-network-split"]
        );
    }
}
