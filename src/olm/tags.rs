//! Downstream OLM index tag lookup
//!
//! Nightly downstream builds are pushed to quay with a moving `latest`-style
//! tag plus an immutable build tag. The catalog must reference the immutable
//! tag, so the resolver looks up the digest behind the moving tag and picks
//! the build tag that shares it.

use crate::domain::ports::TagResolver;
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const QUAY_API: &str = "https://quay.io/api/v1";
const DEFAULT_REPOSITORY: &str = "rhceph-dev/ocs-registry";
const MAX_PAGES: u32 = 10;

/// Tag names that move between builds and must never be pinned
const MOVING_TAGS: [&str; 3] = ["latest", "latest-stable", "-rc"];

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QuayTag {
    pub name: String,
    pub manifest_digest: String,
}

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    tags: Vec<QuayTag>,
    #[serde(default)]
    has_additional: bool,
}

fn is_moving(name: &str) -> bool {
    MOVING_TAGS.iter().any(|t| name.contains(t))
}

/// Pick the immutable tag for `latest_tag` from a newest-first tag list.
///
/// For upgrades the result is the newest build of `ocs_version` published
/// before `latest_tag` with a different digest, i.e. the build to upgrade
/// from.
pub fn pick_tag(tags: &[QuayTag], latest_tag: &str, upgrade: bool, ocs_version: &str) -> Result<String> {
    let latest_digest = tags
        .iter()
        .find(|t| t.name == latest_tag)
        .map(|t| t.manifest_digest.as_str())
        .ok_or_else(|| Error::UnavailableResource(format!("tag '{}' not found on quay", latest_tag)))?;

    let found = if upgrade {
        tags.iter()
            .skip_while(|t| t.name != latest_tag)
            .skip(1)
            .find(|t| {
                !is_moving(&t.name) && t.manifest_digest != latest_digest && t.name.contains(ocs_version)
            })
    } else {
        tags.iter()
            .find(|t| !is_moving(&t.name) && t.manifest_digest == latest_digest)
    };

    found
        .map(|t| t.name.clone())
        .ok_or_else(|| Error::UnavailableResource(format!("no build tag matches '{}'", latest_tag)))
}

// =============================================================================
// Quay Resolver
// =============================================================================

pub struct QuayTagResolver {
    http: reqwest::Client,
    api: String,
    repository: String,
    token: Option<String>,
    ocs_version: String,
    max_elapsed: Duration,
}

impl QuayTagResolver {
    pub fn new(ocs_version: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api: QUAY_API.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
            token,
            ocs_version: ocs_version.into(),
            max_elapsed: Duration::from_secs(120),
        })
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    fn page_url(&self, page: u32) -> String {
        let repository = self
            .repository
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/repository/{}/tag/?onlyActiveTags=true&limit=100&page={}",
            self.api, repository, page
        )
    }

    async fn fetch_page(&self, page: u32) -> Result<TagPage> {
        let mut request = self.http.get(self.page_url(page));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?.error_for_status()?.json().await?)
    }

    /// All active tags, newest first
    pub async fn fetch_tags(&self) -> Result<Vec<QuayTag>> {
        let mut tags = Vec::new();
        for page in 1..=MAX_PAGES {
            let policy = ExponentialBackoff {
                max_elapsed_time: Some(self.max_elapsed),
                ..ExponentialBackoff::default()
            };
            let fetch = || async {
                self.fetch_page(page).await.map_err(backoff::Error::transient)
            };
            let log_failure = |error: Error, wait: Duration| {
                warn!("Quay tag lookup failed, retrying in {:?}: {}", wait, error);
            };
            let batch = retry_notify(policy, fetch, log_failure).await?;
            debug!("Fetched {} tags from page {}", batch.tags.len(), page);
            tags.extend(batch.tags);
            if !batch.has_additional {
                break;
            }
        }
        Ok(tags)
    }
}

#[async_trait]
impl TagResolver for QuayTagResolver {
    async fn latest_tag(&self, upgrade: bool, latest_tag: &str) -> Result<String> {
        let tags = self.fetch_tags().await?;
        let tag = pick_tag(&tags, latest_tag, upgrade, &self.ocs_version)?;
        info!("Resolved {} to downstream build tag {}", latest_tag, tag);
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, digest: &str) -> QuayTag {
        QuayTag {
            name: name.into(),
            manifest_digest: digest.into(),
        }
    }

    fn tags() -> Vec<QuayTag> {
        vec![
            tag("latest-4.12", "sha256:c"),
            tag("latest", "sha256:c"),
            tag("4.12.0-110", "sha256:c"),
            tag("latest-stable-4.12", "sha256:b"),
            tag("4.12.0-109", "sha256:b"),
            tag("4.11.4-12", "sha256:a"),
        ]
    }

    #[test]
    fn test_pick_build_tag_sharing_digest() {
        assert_eq!(pick_tag(&tags(), "latest", false, "4.12").unwrap(), "4.12.0-110");
        assert_eq!(
            pick_tag(&tags(), "latest-stable-4.12", false, "4.12").unwrap(),
            "4.12.0-109"
        );
    }

    #[test]
    fn test_pick_upgrade_source_tag() {
        assert_eq!(pick_tag(&tags(), "latest", true, "4.12").unwrap(), "4.12.0-109");
        assert!(pick_tag(&tags(), "latest", true, "4.13").is_err());
    }

    #[test]
    fn test_missing_latest_tag() {
        let err = pick_tag(&tags(), "latest-4.14", false, "4.14").unwrap_err();
        assert!(matches!(err, Error::UnavailableResource(_)));
    }

    #[test]
    fn test_page_url_encodes_repository_segments() {
        let resolver = QuayTagResolver::new("4.12", None)
            .unwrap()
            .with_repository("rhceph dev/ocs-registry");
        assert_eq!(
            resolver.page_url(2),
            "https://quay.io/api/v1/repository/rhceph%20dev/ocs-registry/tag/?onlyActiveTags=true&limit=100&page=2"
        );
    }
}
