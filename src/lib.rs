//! OCS Deployer - Multi-Cluster Storage Deployment Orchestrator
//!
//! Brings up OpenShift, the OCS/ODF storage product and, across several
//! clusters, Regional Disaster Recovery between them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Deployment Orchestrator                             │
//! │   OCP ─▶ network split ─▶ ACM ─▶ LVMO ─▶ Submariner ─▶ storage ─▶ DR         │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │ Platform        │  │ Storage         │  │ Multi-Cluster DR            │  │
//! │  │ Deployers       │  │ Deployer        │  │ (MCO, MirrorPeer, DRPolicy, │  │
//! │  │ (AWS, vSphere,  │  │ (internal,      │  │  metadata store, Ramen)     │  │
//! │  │  BM, IBM Cloud) │  │  external, MCG) │  │                             │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │          ┌─────────────────────┴──────────────────────┐                     │
//! │          │ OLM installer · StorageCluster composer     │                     │
//! │          │ Poller (injected clock) · manifest store    │                     │
//! │          └─────────────────────┬──────────────────────┘                     │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                      Cluster Registry (current pointer)                      │
//! │  ┌─────────────────────────────┴───────────────────────────────────────┐   │
//! │  │  ControlPlaneClient (kube)  ·  RemoteShell (ssh)  ·  CommandRunner   │   │
//! │  └─────────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cluster`]: cluster registry, contexts and the concrete adapters
//! - [`config`] / [`plan`]: run configuration and the plan derived from it
//! - [`deploy`]: deployment phases and the orchestrator
//! - [`dr`]: Regional DR across managed clusters
//! - [`olm`]: catalog sources, subscriptions and CSV waits
//! - [`composer`]: StorageCluster manifest composition
//! - [`platform`]: per-infrastructure capabilities
//! - [`poll`]: bounded polling over the injected clock
//! - [`crd`]: typed custom resources
//! - [`domain`]: ports (traits) at the edges of the crate
//! - [`error`]: error types and classification

pub mod artifacts;
pub mod cluster;
pub mod composer;
pub mod config;
pub mod crd;
pub mod deploy;
pub mod document;
pub mod domain;
pub mod dr;
pub mod error;
pub mod metrics;
pub mod olm;
pub mod plan;
pub mod platform;
pub mod poll;
pub mod templates;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use artifacts::ManifestStore;

pub use cluster::{
    connect_all, ClusterContext, ClusterHandle, ClusterOps, ClusterRegistry, ClusterRole,
    KubeControlPlane, ProcessRunner, SshShell,
};

pub use config::RunConfig;

pub use deploy::{Adapters, Orchestrator, StorageDeployer, StorageOutcome};

pub use domain::ports::{
    Clock, CommandRunner, ControlPlaneClient, RemoteShell, ResourceKind, SystemClock, TagResolver,
};

pub use dr::{DrReport, MultiClusterDrDeployer};

pub use error::{Error, ErrorClass, Result};

pub use metrics::DeployMetrics;

pub use olm::{OperatorInstaller, QuayTagResolver};

pub use plan::{DeploymentPlan, Platform, Version};

pub use platform::{PlatformDeployer, PlatformFactory, PlatformSettings};

pub use poll::Poller;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
