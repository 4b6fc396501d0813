//! Ramen hub operator configuration
//!
//! The operator reads its settings from a YAML document stored as a string
//! under `data."ramen_manager_config.yaml"` of a ConfigMap. Edits go through
//! `serde_yaml::Value`, whose mappings keep key order, and the rendered
//! ConfigMap carries the document as a literal block scalar again.

use super::DR_NAMESPACE;
use crate::error::{Error, Result};
use serde_json::{json, Value};
use serde_yaml::{Mapping, Value as Yaml};

pub const RAMEN_HUB_CONFIG: &str = "ramen-hub-operator-config";
pub const RAMEN_CONFIG_KEY: &str = "ramen_manager_config.yaml";

/// One entry of `s3StoreProfiles`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Profile {
    pub name: String,
    /// Secret holding the bucket credentials, in the DR namespace
    pub secret: String,
}

/// Parse the embedded operator configuration
pub fn embedded_config(config_map: &Value) -> Result<Yaml> {
    let text = config_map["data"][RAMEN_CONFIG_KEY].as_str().ok_or_else(|| {
        Error::DrDeployment(format!(
            "{}/{} has no {} entry",
            DR_NAMESPACE, RAMEN_HUB_CONFIG, RAMEN_CONFIG_KEY
        ))
    })?;
    Ok(serde_yaml::from_str(text)?)
}

pub fn s3_profiles(config_map: &Value) -> Result<Vec<S3Profile>> {
    let config = embedded_config(config_map)?;
    let Some(profiles) = config.get("s3StoreProfiles").and_then(Yaml::as_sequence) else {
        return Ok(Vec::new());
    };
    profiles
        .iter()
        .map(|profile| {
            let name = profile.get("s3ProfileName").and_then(Yaml::as_str);
            let secret = profile
                .get("s3SecretRef")
                .and_then(|r| r.get("name"))
                .and_then(Yaml::as_str);
            match (name, secret) {
                (Some(name), Some(secret)) => Ok(S3Profile {
                    name: name.to_string(),
                    secret: secret.to_string(),
                }),
                _ => Err(Error::DrDeployment(format!(
                    "incomplete s3StoreProfiles entry in {}",
                    RAMEN_HUB_CONFIG
                ))),
            }
        })
        .collect()
}

/// The profile whose name mentions `cluster`
pub fn profile_for<'a>(profiles: &'a [S3Profile], cluster: &str) -> Option<&'a S3Profile> {
    profiles.iter().find(|p| p.name.contains(cluster))
}

/// Turn on DR cluster operator deployment automation.
///
/// Returns a copy of `config_map` ready to be applied again: server-owned
/// metadata and annotations are dropped and the embedded document is
/// re-serialised in its original key order.
pub fn enable_deployment_automation(config_map: &Value) -> Result<Value> {
    let mut config = embedded_config(config_map)?;
    let root = config
        .as_mapping_mut()
        .ok_or_else(|| Error::DrDeployment(format!("{} is not a mapping", RAMEN_CONFIG_KEY)))?;
    let operator = root
        .entry(Yaml::from("drClusterOperator"))
        .or_insert(Yaml::Mapping(Mapping::new()));
    let operator = operator
        .as_mapping_mut()
        .ok_or_else(|| Error::DrDeployment("drClusterOperator is not a mapping".into()))?;
    operator.insert(Yaml::from("deploymentAutomationEnabled"), Yaml::Bool(true));

    let mut merged = config_map.clone();
    if let Some(meta) = merged.get_mut("metadata").and_then(Value::as_object_mut) {
        for key in ["annotations", "creationTimestamp", "resourceVersion", "uid", "managedFields"] {
            meta.remove(key);
        }
    }
    merged["data"][RAMEN_CONFIG_KEY] = json!(serde_yaml::to_string(&config)?);
    Ok(merged)
}

/// Render a ConfigMap as YAML; multi-line values come out as `|` blocks
pub fn render(config_map: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(config_map)?)
}
