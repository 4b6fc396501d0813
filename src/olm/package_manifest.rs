//! Package manifest view
//!
//! OLM publishes one PackageManifest per package and catalog. The installer
//! reads the default channel, the channel's current CSV and the CSV
//! annotations (the external-mode exporter script lives there).

use crate::document::{name_of, str_at};
use crate::domain::ports::{ControlPlaneClient, ResourceKind};
use crate::error::{Error, Result};
use crate::poll::{PollTarget, Poller, Probe};
use serde_json::Value;
use std::time::Duration;

pub const MARKETPLACE_NAMESPACE: &str = "openshift-marketplace";

/// Label selector for manifests served by `catalog`
pub fn catalog_selector(catalog: &str) -> String {
    format!("catalog={}", catalog)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageManifest {
    data: Value,
}

impl PackageManifest {
    pub fn from_value(data: Value) -> Self {
        Self { data }
    }

    pub fn name(&self) -> &str {
        name_of(&self.data)
    }

    pub fn default_channel(&self) -> Result<&str> {
        str_at(&self.data, "/status/defaultChannel")
            .ok_or_else(|| Error::not_found("PackageManifest default channel", self.name()))
    }

    /// Channel entry named `channel` (default channel when `None`) whose
    /// current CSV contains `pattern`
    fn channel(&self, channel: Option<&str>, pattern: &str) -> Result<&Value> {
        let wanted = match channel {
            Some(c) => c,
            None => self.default_channel()?,
        };
        self.data
            .pointer("/status/channels")
            .and_then(Value::as_array)
            .and_then(|channels| {
                channels.iter().find(|c| {
                    c["name"] == wanted
                        && c["currentCSV"].as_str().map_or(false, |csv| csv.contains(pattern))
                })
            })
            .ok_or_else(|| {
                Error::not_found("PackageManifest channel", format!("{}/{}", self.name(), wanted))
            })
    }

    /// Current CSV of `channel`, or of the default channel when `None`
    pub fn current_csv(&self, channel: Option<&str>) -> Result<String> {
        self.current_csv_matching(channel, self.name())
    }

    /// Like [`PackageManifest::current_csv`], restricted to CSVs whose name
    /// contains `pattern`
    pub fn current_csv_matching(&self, channel: Option<&str>, pattern: &str) -> Result<String> {
        let entry = self.channel(channel, pattern)?;
        entry
            .get("currentCSV")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::not_found("currentCSV", self.name()))
    }

    /// Annotation on the current CSV description of `channel`
    pub fn csv_annotation(&self, channel: Option<&str>, key: &str) -> Result<String> {
        let entry = self.channel(channel, self.name())?;
        entry
            .pointer("/currentCSVDesc/annotations")
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::not_found("CSV annotation", key))
    }

    /// Wait until the manifest for `package` is served by the catalog
    pub async fn wait_for(
        client: &dyn ControlPlaneClient,
        poller: &Poller,
        package: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let target = PollTarget::new("PackageManifest", package, "available");
        poller
            .until(&target, Duration::from_secs(10), timeout, || async move {
                let manifests = client
                    .list(ResourceKind::PackageManifest, Some(MARKETPLACE_NAMESPACE), Some(selector))
                    .await?;
                Ok(match manifests.into_iter().find(|m| name_of(m) == package) {
                    Some(found) => Probe::Ready(Self::from_value(found)),
                    None => Probe::Pending("not served yet".into()),
                })
            })
            .await
    }
}

#[cfg(test)]
pub(crate) fn manifest_fixture(package: &str, catalog: &str, channels: &[(&str, &str)]) -> Value {
    let channels: Vec<Value> = channels
        .iter()
        .map(|(name, csv)| {
            serde_json::json!({
                "name": name,
                "currentCSV": csv,
                "currentCSVDesc": {"annotations": {}}
            })
        })
        .collect();
    serde_json::json!({
        "apiVersion": "packages.operators.coreos.com/v1",
        "kind": "PackageManifest",
        "metadata": {
            "name": package,
            "namespace": MARKETPLACE_NAMESPACE,
            "labels": {"catalog": catalog}
        },
        "status": {
            "defaultChannel": channels.first().map(|c| c["name"].clone()).unwrap_or_default(),
            "channels": channels
        }
    })
}
