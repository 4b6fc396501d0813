//! Catalog Source Manager
//!
//! Replaces the default `redhat-operators` catalog with one serving the
//! requested OCS registry image and waits for OLM to report it `READY`.
//! Stage builds need registry mirrors first, which roll out through the
//! machine config pools; the catalog is only applied once they settle.

use super::package_manifest::MARKETPLACE_NAMESPACE;
use crate::cluster::ClusterOps;
use crate::crd::{
    to_manifest, CatalogSource, CatalogSourceSpec, ImageContentSourcePolicy,
    ImageContentSourcePolicySpec, RepositoryDigestMirror,
};
use crate::domain::ports::{ResourceKind, TagResolver};
use crate::error::Result;
use crate::plan::{CatalogPlan, Version};
use crate::platform::machine_config::{wait_for_pools_updated, POOL_UPDATE_TIMEOUT};
use crate::poll::{PollTarget, Probe};
use serde_json::json;
use std::time::Duration;
use tracing::info;

pub const OPERATOR_CATALOG_SOURCE: &str = "redhat-operators";
pub const OSBS_BUNDLE_IMAGE: &str = "registry-proxy.engineering.redhat.com/rh-osbs/iib-pub-pending";
const STAGE_ICSP_NAME: &str = "stage-registry";
const INSECURE_REGISTRIES: [&str; 2] = ["registry-proxy.engineering.redhat.com", "registry.stage.redhat.io"];

pub const CATALOG_READY_TIMEOUT: Duration = Duration::from_secs(480);

/// Image repository plus optional tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogImage {
    pub repository: String,
    pub tag: Option<String>,
}

impl CatalogImage {
    /// Split `repo[:tag]`; a colon inside the registry host is not a tag
    pub fn parse(image: &str) -> Self {
        match image.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') && !tag.is_empty() => Self {
                repository: repo.to_string(),
                tag: Some(tag.to_string()),
            },
            _ => Self {
                repository: image.to_string(),
                tag: None,
            },
        }
    }

    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag.as_deref().unwrap_or("latest"))
    }
}

/// Choose the catalog image: explicit argument, then the configured
/// registry image, then the stage index image, then the default image
pub fn select_image(plan: &CatalogPlan, ocp: Version, explicit: Option<&str>) -> CatalogImage {
    if let Some(image) = explicit.or(plan.registry_image.as_deref()).filter(|i| !i.is_empty()) {
        return CatalogImage::parse(image);
    }
    if plan.stage_rh_osbs {
        let repository = plan
            .stage_index_image
            .clone()
            .unwrap_or_else(|| OSBS_BUNDLE_IMAGE.to_string());
        let tag = plan
            .stage_index_image_tag
            .clone()
            .unwrap_or_else(|| format!("v{}", ocp));
        return CatalogImage {
            repository,
            tag: Some(tag),
        };
    }
    CatalogImage {
        repository: CatalogImage::parse(&plan.default_registry_image).repository,
        tag: None,
    }
}

pub struct CatalogSourceManager<'a> {
    ops: ClusterOps<'a>,
    tags: &'a dyn TagResolver,
}

impl<'a> CatalogSourceManager<'a> {
    pub fn new(ops: ClusterOps<'a>, tags: &'a dyn TagResolver) -> Self {
        Self { ops, tags }
    }

    /// Prepare and apply the custom catalog; returns the image reference used
    pub async fn create(&self, plan: &CatalogPlan, ocp: Version, explicit: Option<&str>) -> Result<String> {
        self.disable_default_source(OPERATOR_CATALOG_SOURCE).await?;
        info!("Adding CatalogSource");

        let mut image = select_image(plan, ocp, explicit);
        if plan.stage_rh_osbs && explicit.is_none() && plan.registry_image.is_none() {
            self.prepare_stage_registry().await?;
        }
        if image.tag.is_none() && plan.downstream {
            let tag = self
                .tags
                .latest_tag(plan.upgrade, &plan.default_latest_tag)
                .await?;
            image.tag = Some(tag);
        }
        let reference = image.reference();

        let catalog = to_manifest(
            CatalogSource::new(
                OPERATOR_CATALOG_SOURCE,
                CatalogSourceSpec {
                    source_type: "grpc".into(),
                    image: reference.clone(),
                    display_name: "Openshift Container Storage".into(),
                    publisher: "Red Hat".into(),
                    secrets: Vec::new(),
                },
            ),
            Some(MARKETPLACE_NAMESPACE),
        )?;
        self.ops.artifacts.record("catalog_source_manifest", &catalog)?;
        self.ops.client.apply(&catalog).await?;
        self.wait_for_ready(OPERATOR_CATALOG_SOURCE).await?;
        Ok(reference)
    }

    /// Disable one of the default OperatorHub sources
    pub async fn disable_default_source(&self, name: &str) -> Result<()> {
        info!("Disabling default source: {}", name);
        self.ops.client
            .patch(
                ResourceKind::OperatorHub,
                None,
                "cluster",
                &json!({"spec": {"sources": [{"disabled": true, "name": name}]}}),
            )
            .await?;
        Ok(())
    }

    /// Insecure registries, mirror policy, then wait for the rollout
    async fn prepare_stage_registry(&self) -> Result<()> {
        self.ops.client
            .patch(
                ResourceKind::ImageConfig,
                None,
                "cluster",
                &json!({"spec": {"registrySources": {"insecureRegistries": INSECURE_REGISTRIES}}}),
            )
            .await?;

        let icsp = to_manifest(
            ImageContentSourcePolicy::new(
                STAGE_ICSP_NAME,
                ImageContentSourcePolicySpec {
                    repository_digest_mirrors: vec![RepositoryDigestMirror {
                        source: "registry.redhat.io".into(),
                        mirrors: vec!["registry.stage.redhat.io".into()],
                    }],
                },
            ),
            None,
        )?;
        self.ops.artifacts.record("stage_icsp_manifest", &icsp)?;
        self.ops.client.apply(&icsp).await?;
        wait_for_pools_updated(&self.ops, POOL_UPDATE_TIMEOUT).await
    }

    /// Poll `status.connectionState.lastObservedState` until `READY`
    pub async fn wait_for_ready(&self, name: &str) -> Result<()> {
        let client = self.ops.client;
        let target = PollTarget::new("CatalogSource", name, "READY");
        self.ops
            .poller
            .until(&target, Duration::from_secs(5), CATALOG_READY_TIMEOUT, || async move {
                let raw = client
                    .get(ResourceKind::CatalogSource, Some(MARKETPLACE_NAMESPACE), name)
                    .await?;
                let catalog: CatalogSource = serde_json::from_value(raw)?;
                let state = catalog.observed_state();
                Ok(Probe::check(state == "READY", state))
            })
            .await?;
        info!("CatalogSource {} is READY", name);
        Ok(())
    }
}
