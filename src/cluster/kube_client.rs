//! Control-plane client backed by the Kubernetes API
//!
//! Every resource is handled as a `DynamicObject`; the group, version and
//! plural come from [`ResourceKind::meta`], so no per-kind API plumbing is
//! needed. The kubeconfig is only read on first use: before OCP bring-up it
//! does not exist yet and the client simply reports the cluster unreachable.

use crate::domain::ports::{ControlPlaneClient, ExecOutput, PodRef, ResourceKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, AttachParams, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

const FIELD_MANAGER: &str = "ocs-deployer";

pub struct KubeControlPlane {
    cluster: String,
    kubeconfig: PathBuf,
    client: OnceCell<Client>,
}

impl KubeControlPlane {
    /// Client for the kubeconfig at `path`; nothing is read until first use
    pub fn new(cluster: &str, path: &Path) -> Self {
        Self {
            cluster: cluster.to_string(),
            kubeconfig: path.to_path_buf(),
            client: OnceCell::new(),
        }
    }

    async fn connect(&self) -> Result<Client> {
        debug!("Connecting to {} via {}", self.cluster, self.kubeconfig.display());
        let kubeconfig = Kubeconfig::read_from(&self.kubeconfig)?;
        let mut config =
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        config.connect_timeout = Some(Duration::from_secs(10));
        config.read_timeout = Some(Duration::from_secs(120));
        Ok(Client::try_from(config)?)
    }

    async fn client(&self) -> Result<Client> {
        self.client.get_or_try_init(|| self.connect()).await.cloned()
    }

    async fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let client = self.client().await?;
        let meta = kind.meta();
        let resource = ApiResource {
            group: meta.group.to_string(),
            version: meta.version.to_string(),
            api_version: meta.api_version(),
            kind: meta.kind.to_string(),
            plural: meta.plural.to_string(),
        };
        Ok(match (meta.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(client, ns, &resource),
            _ => Api::all_with(client, &resource),
        })
    }

    fn manifest_target(manifest: &Value) -> Result<(ResourceKind, Option<String>, String)> {
        let kind = ResourceKind::from_manifest(manifest)?;
        let name = manifest
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Configuration(format!("{} manifest has no name", kind)))?;
        let namespace = manifest
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok((kind, namespace, name.to_string()))
    }
}

/// Translate API status codes into the orchestrator's precondition errors
fn classify(err: kube::Error, kind: ResourceKind, name: &str) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::not_found(kind.to_string(), name),
        kube::Error::Api(resp) if resp.code == 409 => Error::ResourceExists {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        _ => Error::Kube(err),
    }
}

async fn drain<R>(reader: Option<R>) -> Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut out).await?;
    }
    Ok(out)
}

#[async_trait]
impl ControlPlaneClient for KubeControlPlane {
    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<Value> {
        let obj = self
            .api(kind, namespace)
            .await?
            .get(name)
            .await
            .map_err(|e| classify(e, kind, name))?;
        Ok(serde_json::to_value(obj)?)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        let list = self
            .api(kind, namespace)
            .await?
            .list(&params)
            .await
            .map_err(|e| classify(e, kind, selector.unwrap_or("*")))?;
        list.items
            .into_iter()
            .map(|obj| serde_json::to_value(obj).map_err(Error::from))
            .collect()
    }

    #[instrument(skip(self, manifest), fields(cluster = %self.cluster))]
    async fn create(&self, manifest: &Value) -> Result<Value> {
        let (kind, namespace, name) = Self::manifest_target(manifest)?;
        debug!("Creating {}/{}", kind, name);
        let obj: DynamicObject = serde_json::from_value(manifest.clone())?;
        let created = self
            .api(kind, namespace.as_deref())
            .await?
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| classify(e, kind, &name))?;
        Ok(serde_json::to_value(created)?)
    }

    #[instrument(skip(self, manifest), fields(cluster = %self.cluster))]
    async fn apply(&self, manifest: &Value) -> Result<Value> {
        let (kind, namespace, name) = Self::manifest_target(manifest)?;
        debug!("Applying {}/{}", kind, name);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let applied = self
            .api(kind, namespace.as_deref())
            .await?
            .patch(&name, &params, &Patch::Apply(manifest))
            .await
            .map_err(|e| classify(e, kind, &name))?;
        Ok(serde_json::to_value(applied)?)
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        merge_patch: &Value,
    ) -> Result<Value> {
        debug!("Patching {}/{} with {}", kind, name, merge_patch);
        let patched = self
            .api(kind, namespace)
            .await?
            .patch(name, &PatchParams::default(), &Patch::Merge(merge_patch))
            .await
            .map_err(|e| classify(e, kind, name))?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn delete(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<()> {
        debug!("Deleting {}/{}", kind, name);
        self.api(kind, namespace)
            .await?
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, kind, name))?;
        Ok(())
    }

    #[instrument(skip(self), fields(cluster = %self.cluster))]
    async fn exec(&self, pod: &PodRef, command: &[String]) -> Result<ExecOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client().await?, &pod.namespace);
        let mut params = AttachParams::default().stdin(false).stdout(true).stderr(true);
        if let Some(container) = &pod.container {
            params = params.container(container.clone());
        }

        let mut attached = pods
            .exec(&pod.name, command.to_vec(), &params)
            .await
            .map_err(|e| classify(e, ResourceKind::Pod, &pod.name))?;

        let (stdout_reader, stderr_reader) = (attached.stdout(), attached.stderr());
        let (stdout, stderr) = tokio::try_join!(drain(stdout_reader), drain(stderr_reader))?;

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        let exit_code = match status {
            Some(s) if s.status.as_deref() == Some("Success") => 0,
            Some(s) => s
                .details
                .and_then(|d| d.causes)
                .and_then(|causes| {
                    causes
                        .into_iter()
                        .find(|c| c.reason.as_deref() == Some("ExitCode"))
                        .and_then(|c| c.message)
                })
                .and_then(|code| code.parse().ok())
                .unwrap_or(1),
            None => 0,
        };

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn is_reachable(&self) -> bool {
        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => {
                debug!("{} has no usable kubeconfig: {}", self.cluster, e);
                return false;
            }
        };
        match client.apiserver_version().await {
            Ok(info) => {
                debug!("{} answers, server {}", self.cluster, info.git_version);
                true
            }
            Err(e) => {
                debug!("{} unreachable: {}", self.cluster, e);
                false
            }
        }
    }
}
