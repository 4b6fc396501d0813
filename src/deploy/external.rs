//! External mode: consume a Ceph cluster that runs outside OpenShift
//!
//! The storage operator ships an exporter script as a CSV annotation. It is
//! copied to a client node of the external cluster and run there; its JSON
//! output becomes the `rook-ceph-external-cluster-details` secret that the
//! external StorageCluster reads.
//!
//! # Flow
//!
//! ```text
//! namespace + operator group → catalog → subscribe → rgw port + endpoint
//!     → cephfs / rbd names → exporter run → secret → StorageCluster → health
//! ```

use super::ceph;
use super::storage::{ensure_storage_namespace, operator_source, subscribe};
use super::DeployDeps;
use crate::cluster::ClusterOps;
use crate::config::{ExternalNode, RunConfig};
use crate::error::{Error, Result};
use crate::olm::installer::{OCS_OPERATOR, ODF_OPERATOR, PACKAGE_MANIFEST_TIMEOUT};
use crate::olm::{catalog_selector, PackageManifest};
use crate::plan::{DeploymentPlan, Version};
use crate::templates;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const EXPORT_SCRIPT_ANNOTATION: &str = "external.features.ocs.openshift.io/export-script";
pub const EXTERNAL_DETAILS_SECRET: &str = "rook-ceph-external-cluster-details";
pub const EXPORTER_REMOTE_PATH: &str = "/tmp/external-cluster-details-exporter.py";
/// Secret key holding the external cluster's `client.admin` key
pub const ADMIN_KEYRING_KEY: &str = "admin_keyring";
const DEFAULT_RBD_POOL: &str = "rbd";
const FALLBACK_CLIENT_NODE: &str = "node1";

// =============================================================================
// Settings
// =============================================================================

/// External cluster topology and exporter options
#[derive(Debug, Clone, Default)]
pub struct ExternalSettings {
    pub nodes: BTreeMap<String, ExternalNode>,
    pub use_fqdn_rgw_endpoint: bool,
    pub use_ipv6_rgw_endpoint: bool,
    pub cephfs_name: Option<String>,
    pub rbd_name: Option<String>,
    pub restricted_auth: bool,
    pub cluster_name: String,
}

impl ExternalSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        let external = &config.external_mode;
        Self {
            nodes: external.external_cluster_node_roles.clone(),
            use_fqdn_rgw_endpoint: external.use_fqdn_rgw_endpoint,
            use_ipv6_rgw_endpoint: external.use_ipv6_rgw_endpoint,
            cephfs_name: config.env_data.cephfs_name.clone(),
            rbd_name: config.env_data.rbd_name.clone(),
            restricted_auth: config.env_data.restricted_auth_permission,
            cluster_name: config.env_data.cluster_name.clone(),
        }
    }

    /// Host the exporter runs on: the `client` node, else `node1`
    pub fn client_host(&self) -> Result<String> {
        if let Some(node) = self.nodes.values().find(|n| n.has_role("client")) {
            return Ok(node.ip_address.clone());
        }
        warn!("No client role defined for the external cluster, using {}", FALLBACK_CLIENT_NODE);
        self.nodes
            .get(FALLBACK_CLIENT_NODE)
            .map(|n| n.ip_address.clone())
            .ok_or_else(|| Error::UnavailableResource("external cluster has no client node".into()))
    }

    fn rgw_node(&self) -> Option<&ExternalNode> {
        self.nodes.values().find(|n| n.has_role("rgw"))
    }

    /// RGW host as the exporter should advertise it
    pub fn rgw_endpoint(&self) -> Result<String> {
        let node = self.rgw_node().ok_or(Error::RgwEndpointMissing)?;
        let endpoint = if self.use_fqdn_rgw_endpoint {
            node.hostname.clone()
        } else if self.use_ipv6_rgw_endpoint {
            node.ipv6_address.clone().ok_or(Error::RgwEndpointMissing)?
        } else {
            node.ip_address.clone()
        };
        if endpoint.is_empty() {
            return Err(Error::RgwEndpointMissing);
        }
        Ok(endpoint)
    }
}

/// Exporter command line flags
pub fn exporter_params(settings: &ExternalSettings, rbd_pool: &str, rgw_endpoint: &str, cephfs: &str) -> Vec<String> {
    let mut params = vec![
        "--rbd-data-pool-name".to_string(),
        rbd_pool.to_string(),
        "--rgw-endpoint".to_string(),
        rgw_endpoint.to_string(),
    ];
    if settings.restricted_auth {
        params.extend([
            "--cluster-name".to_string(),
            settings.cluster_name.clone(),
            "--cephfs-filesystem-name".to_string(),
            cephfs.to_string(),
            "--restricted-auth-permission".to_string(),
            "true".to_string(),
        ]);
    }
    params
}

// =============================================================================
// Output Parsing
// =============================================================================

/// Port of the `rgw_frontends` entry in `ceph config dump -f json`
pub fn rgw_port_from_config_dump(dump: &str) -> Option<String> {
    let entries: Vec<Value> = serde_json::from_str(dump).ok()?;
    entries
        .iter()
        .find(|e| e["name"] == "rgw_frontends")
        .and_then(|e| e["value"].as_str())
        .and_then(|value| value.rsplit('=').next())
        .map(|port| port.trim().to_string())
        .filter(|port| !port.is_empty())
}

/// Port of an `rgw frontends = ...:<port>` line from ceph.conf
pub fn rgw_port_from_conf(line: &str) -> Option<String> {
    line.trim()
        .rsplit(':')
        .next()
        .map(|port| port.trim().to_string())
        .filter(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
}

/// `(major, minor)` from `/etc/redhat-release`
pub fn rhel_version(release: &str) -> Option<(u32, u32)> {
    release.split_whitespace().find_map(|token| {
        let (major, minor) = token.split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    })
}

/// Secret of `client.admin` from `ceph auth get client.admin`
pub fn admin_key(keyring: &str) -> Option<String> {
    let mut tokens = keyring.split_whitespace();
    tokens.find(|t| *t == "key")?;
    tokens.find(|t| *t != "=").map(str::to_string)
}

// =============================================================================
// Deployer
// =============================================================================

/// What the exporter produced for one run
#[derive(Debug, Clone)]
pub struct ExternalClusterDetails {
    /// Base64 of the exporter's JSON output
    pub encoded: String,
    pub params: Vec<String>,
    pub admin_key: Option<String>,
}

/// Operators that must succeed in external mode
pub fn external_operators(plan: &DeploymentPlan) -> Vec<&'static str> {
    if plan.ocs_version >= Version::V4_9 {
        vec![ODF_OPERATOR, OCS_OPERATOR]
    } else {
        vec![OCS_OPERATOR]
    }
}

pub struct ExternalModeDeployer<'a> {
    ops: ClusterOps<'a>,
    deps: DeployDeps<'a>,
}

impl<'a> ExternalModeDeployer<'a> {
    pub fn new(ops: ClusterOps<'a>, deps: DeployDeps<'a>) -> Self {
        Self { ops, deps }
    }

    pub async fn deploy(&self) -> Result<ExternalClusterDetails> {
        let plan = self.deps.plan;
        info!("Deploying OCS in external mode on {}", self.ops.cluster);
        ensure_storage_namespace(&self.ops, plan).await?;
        let source = operator_source(&self.ops, &self.deps).await?;
        subscribe(&self.ops, plan, &source, &external_operators(plan)).await?;
        if let Some(level) = &plan.rook_log_level {
            ceph::set_rook_log_level(&self.ops, &plan.namespace, level).await?;
        }

        let details = self.collect_details(&source).await?;
        self.apply_details(&details).await?;
        ceph::enable_toolbox(&self.ops, &plan.namespace).await?;
        Ok(details)
    }

    /// Gather the external cluster parameters and run the exporter
    pub async fn collect_details(&self, source: &str) -> Result<ExternalClusterDetails> {
        let settings = self.deps.external;
        let host = settings.client_host()?;

        let port = self.rgw_port(&host).await?;
        let endpoint = format!("{}:{}", settings.rgw_endpoint()?, port);
        let cephfs = match &settings.cephfs_name {
            Some(name) => name.clone(),
            None => self.cephfs_name(&host).await?,
        };
        let rbd = settings
            .rbd_name
            .clone()
            .unwrap_or_else(|| DEFAULT_RBD_POOL.to_string());
        let params = exporter_params(settings, &rbd, &endpoint, &cephfs);
        info!("External cluster exporter parameters: {}", params.join(" "));

        let script = self.exporter_script(source).await?;
        let output = self.run_exporter(&host, &script, &params).await?;
        let admin_key = admin_key(&self.deps.shell.exec(&host, "ceph auth get client.admin").await?.stdout);
        if admin_key.is_none() {
            warn!("Could not read the client.admin key from {}", host);
        }

        Ok(ExternalClusterDetails {
            encoded: STANDARD.encode(output.trim()),
            params,
            admin_key,
        })
    }

    async fn rgw_port(&self, host: &str) -> Result<String> {
        let shell = self.deps.shell;
        match shell.exec(host, "ceph config dump -f json").await {
            Ok(dump) if dump.success() => {
                if let Some(port) = rgw_port_from_config_dump(&dump.stdout) {
                    return Ok(port);
                }
            }
            Ok(dump) => debug!("ceph config dump failed: {}", dump.stderr),
            Err(e) => debug!("ceph config dump failed: {}", e),
        }

        warn!("rgw_frontends is not in the config database, reading ceph.conf");
        let rgw_host = self
            .deps
            .external
            .rgw_node()
            .map(|n| n.ip_address.clone())
            .ok_or(Error::RgwEndpointMissing)?;
        let line = shell
            .exec(&rgw_host, "grep -e '^rgw frontends' /etc/ceph/ceph.conf")
            .await?;
        rgw_port_from_conf(&line.stdout).ok_or(Error::RgwEndpointPortMissing)
    }

    async fn cephfs_name(&self, host: &str) -> Result<String> {
        let out = self
            .deps
            .shell
            .exec(host, "ceph fs ls --format json")
            .await?
            .into_result("ceph fs ls")?;
        let filesystems: Vec<Value> = serde_json::from_str(&out.stdout)?;
        filesystems
            .first()
            .and_then(|fs| fs["name"].as_str())
            .map(str::to_string)
            .ok_or(Error::CephfsMissing)
    }

    /// Exporter script from the storage operator's package manifest
    async fn exporter_script(&self, source: &str) -> Result<String> {
        let manifest = PackageManifest::wait_for(
            self.ops.client,
            self.ops.poller,
            OCS_OPERATOR,
            &catalog_selector(source),
            PACKAGE_MANIFEST_TIMEOUT,
        )
        .await?;
        let encoded = manifest.csv_annotation(
            self.deps.plan.subscription.channel.as_deref(),
            EXPORT_SCRIPT_ANNOTATION,
        )?;
        let bytes = STANDARD.decode(encoded.trim())?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Configuration(format!("exporter script is not UTF-8: {}", e)))
    }

    async fn run_exporter(&self, host: &str, script: &str, params: &[String]) -> Result<String> {
        let shell = self.deps.shell;
        let local = self
            .ops
            .artifacts
            .write_text("external-cluster-details-exporter", "py", script)?;
        shell.upload(host, &local, EXPORTER_REMOTE_PATH).await?;

        let release = shell.exec(host, "cat /etc/redhat-release").await?;
        let python = match rhel_version(&release.stdout) {
            Some((major, _)) if major < 8 => "python",
            _ => "python3",
        };
        let command = format!("{} {} {}", python, EXPORTER_REMOTE_PATH, params.join(" "));
        let out = shell.exec(host, &command).await?;
        if !out.success() {
            return Err(Error::ExporterRunFailed { stderr: out.stderr });
        }
        Ok(out.stdout)
    }

    /// Create the details secret and the external StorageCluster
    pub async fn apply_details(&self, details: &ExternalClusterDetails) -> Result<()> {
        let plan = self.deps.plan;
        let mut secret = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": EXTERNAL_DETAILS_SECRET, "namespace": plan.namespace},
            "type": "Opaque",
            "data": {"external_cluster_details": details.encoded}
        });
        if let Some(key) = &details.admin_key {
            secret["data"][ADMIN_KEYRING_KEY] = json!(STANDARD.encode(key));
        }
        self.ops.artifacts.record("external_cluster_secret", &secret)?;
        self.ops.client.create_if_absent(&secret).await?;

        let mut cluster = templates::external_storage_cluster()?;
        cluster["metadata"]["name"] = json!(plan.storage_cluster_name);
        cluster["metadata"]["namespace"] = json!(plan.namespace);
        self.ops.artifacts.record("external_storage_cluster", &cluster)?;
        self.ops.client.create_if_absent(&cluster).await?;
        info!("External StorageCluster {} created", plan.storage_cluster_name);

        ceph::wait_for_external_health(&self.ops, &plan.namespace).await?;
        Ok(())
    }
}
