//! DR metadata object store
//!
//! Ramen keeps protected-application metadata in an object store that
//! every managed cluster can reach. Only S3 is wired up: the bucket
//! credentials the hub's Ramen config points at are copied to each managed
//! cluster.

use super::ramen::{s3_profiles, RAMEN_HUB_CONFIG};
use super::{DrScope, DR_NAMESPACE};
use crate::cluster::ClusterOps;
use crate::document::strip_server_fields;
use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataStoreKind {
    S3,
    Mcg,
}

impl FromStr for MetadataStoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "awss3" | "s3" => Ok(MetadataStoreKind::S3),
            "mcg" => Ok(MetadataStoreKind::Mcg),
            other => Err(Error::Configuration(format!("unknown DR metadata store '{}'", other))),
        }
    }
}

impl fmt::Display for MetadataStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataStoreKind::S3 => write!(f, "s3"),
            MetadataStoreKind::Mcg => write!(f, "mcg"),
        }
    }
}

/// A configured metadata store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataStore {
    S3,
}

impl MetadataStore {
    /// Fails at once for backends that cannot be deployed
    pub fn new(kind: MetadataStoreKind) -> Result<Self> {
        match kind {
            MetadataStoreKind::S3 => Ok(MetadataStore::S3),
            MetadataStoreKind::Mcg => Err(Error::NotImplemented(
                "MCG as the Regional DR metadata store".into(),
            )),
        }
    }

    /// Make the store usable from every managed cluster; returns the names
    /// of the distributed secrets
    pub async fn configure(&self, scope: &DrScope<'_>, hub: &ClusterOps<'_>) -> Result<Vec<String>> {
        match self {
            MetadataStore::S3 => distribute_s3_secrets(scope, hub).await,
        }
    }
}

async fn distribute_s3_secrets(scope: &DrScope<'_>, hub: &ClusterOps<'_>) -> Result<Vec<String>> {
    let config_map = hub
        .client
        .get(ResourceKind::ConfigMap, Some(DR_NAMESPACE), RAMEN_HUB_CONFIG)
        .await?;
    let mut names: Vec<String> = s3_profiles(&config_map)?.into_iter().map(|p| p.secret).collect();
    names.sort_unstable();
    names.dedup();

    let mut secrets = Vec::with_capacity(names.len());
    for name in &names {
        let mut secret = hub.client.get(ResourceKind::Secret, Some(DR_NAMESPACE), name).await?;
        strip_server_fields(&mut secret);
        secrets.push(secret);
    }

    let (poller, artifacts) = (scope.poller, scope.artifacts);
    let secrets = &secrets;
    scope
        .registry
        .for_each(scope.registry.non_hub(), move |handle| async move {
            let ops = ClusterOps::new(&handle, poller, artifacts);
            for secret in secrets {
                ops.artifacts.record("ramen_s3_secret", secret)?;
                ops.client.create_if_absent(secret).await?;
            }
            info!("S3 secrets copied to {}", ops.cluster);
            Ok(())
        })
        .await?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ControlPlaneClient;
    use crate::dr::fixtures::{ramen_config_map, DrFixture};
    use crate::dr::ramen::RAMEN_CONFIG_KEY;
    use crate::testing::Call;
    use assert_matches::assert_matches;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("awss3".parse::<MetadataStoreKind>().unwrap(), MetadataStoreKind::S3);
        assert_eq!("MCG".parse::<MetadataStoreKind>().unwrap(), MetadataStoreKind::Mcg);
        assert_matches!("gcs".parse::<MetadataStoreKind>(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_mcg_fails_at_construction() {
        assert_matches!(MetadataStore::new(MetadataStoreKind::Mcg), Err(Error::NotImplemented(_)));
    }

    #[tokio::test]
    async fn test_s3_secrets_copied_to_managed_clusters() {
        let fx = DrFixture::new();
        let registry = fx.registry();
        let hub_handle = registry.hub().unwrap();
        let hub = ClusterOps::new(&hub_handle, &fx.poller, &fx.artifacts);

        let names = MetadataStore::S3.configure(&fx.scope(&registry), &hub).await.unwrap();

        assert_eq!(names, vec!["ramen-s3-secret-east", "ramen-s3-secret-west"]);
        for member in [&fx.east, &fx.west] {
            let copied = member
                .object(ResourceKind::Secret, Some(DR_NAMESPACE), "ramen-s3-secret-east")
                .unwrap();
            assert_eq!(copied["data"]["AWS_ACCESS_KEY_ID"], "a2V5");
            assert!(copied["metadata"].get("uid").is_none());
            assert!(member
                .object(ResourceKind::Secret, Some(DR_NAMESPACE), "ramen-s3-secret-west")
                .is_some());
        }
        assert!(fx.hub.created(ResourceKind::Secret).is_empty());
    }

    #[tokio::test]
    async fn test_missing_hub_secret_stops_before_copy() {
        let fx = DrFixture::new();
        fx.hub
            .delete(ResourceKind::Secret, Some(DR_NAMESPACE), "ramen-s3-secret-west")
            .await
            .unwrap();
        let registry = fx.registry();
        let hub_handle = registry.hub().unwrap();
        let hub = ClusterOps::new(&hub_handle, &fx.poller, &fx.artifacts);

        let err = MetadataStore::S3.configure(&fx.scope(&registry), &hub).await.unwrap_err();

        assert!(err.is_not_found());
        assert!(fx.east.created(ResourceKind::Secret).is_empty());
    }

    #[tokio::test]
    async fn test_shared_secret_fetched_once() {
        let fx = DrFixture::new();
        let mut config_map = ramen_config_map();
        let text = config_map["data"][RAMEN_CONFIG_KEY].as_str().unwrap().to_string();
        let shared = format!(
            "{}- s3ProfileName: s3profile-east-backup\n  s3Bucket: ramen-east-backup\n  s3SecretRef:\n    name: ramen-s3-secret-east\n    namespace: openshift-dr-system\n",
            text
        );
        config_map["data"][RAMEN_CONFIG_KEY] = serde_json::json!(shared);
        fx.hub.insert(config_map);
        let registry = fx.registry();
        let hub_handle = registry.hub().unwrap();
        let hub = ClusterOps::new(&hub_handle, &fx.poller, &fx.artifacts);

        let names = MetadataStore::S3.configure(&fx.scope(&registry), &hub).await.unwrap();

        assert_eq!(names, vec!["ramen-s3-secret-east", "ramen-s3-secret-west"]);
        let secret_reads = fx
            .hub
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Get { kind: ResourceKind::Secret, .. }))
            .count();
        assert_eq!(secret_reads, 2);
    }
}
