//! Seams to the image and infrastructure subsystems.
//!
//! The scheduler neither builds images nor creates networks or roles. It
//! asks an [`ImageProvider`] for the image reference and an
//! [`InfraProvisioner`] for the network and identity handles once, when the
//! session starts, and passes both to every launch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::types::plan::ClusterPlan;

/// A resolved, launchable image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Image URI or task definition the executor launches.
    pub uri: String,
}

/// Network and identity handles for launching workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraHandles {
    /// Subnets workers attach to.
    pub subnets: Vec<String>,
    /// Security groups applied to workers.
    pub security_groups: Vec<String>,
    /// Whether workers receive a public IP.
    pub assign_public_ip: bool,
    /// Role the container agent uses to pull images and write logs.
    pub execution_role: Option<String>,
    /// Role the work itself runs as.
    pub task_role: Option<String>,
    /// Log group for worker output.
    pub log_group: Option<String>,
}

/// Resolves the image named by a plan.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Returns a launchable reference for the plan's image.
    async fn resolve_image(&self, plan: &ClusterPlan) -> Result<ImageReference, FleetError>;
}

/// Ensures network and identity capacity exists for a plan.
#[async_trait]
pub trait InfraProvisioner: Send + Sync {
    /// Returns handles for already provisioned infrastructure.
    async fn ensure_capacity(&self, plan: &ClusterPlan) -> Result<InfraHandles, FleetError>;
}

/// Uses the plan's image reference verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticImage;

#[async_trait]
impl ImageProvider for StaticImage {
    async fn resolve_image(&self, plan: &ClusterPlan) -> Result<ImageReference, FleetError> {
        Ok(ImageReference {
            uri: plan.image().to_string(),
        })
    }
}

/// Hands out a fixed set of handles created outside the session.
#[derive(Debug, Clone, Default)]
pub struct PreprovisionedInfra {
    handles: InfraHandles,
}

impl PreprovisionedInfra {
    /// Wraps existing handles.
    pub fn new(handles: InfraHandles) -> Self {
        Self { handles }
    }
}

#[async_trait]
impl InfraProvisioner for PreprovisionedInfra {
    async fn ensure_capacity(&self, _plan: &ClusterPlan) -> Result<InfraHandles, FleetError> {
        if self.handles.subnets.iter().any(|s| s.trim().is_empty()) {
            return Err(FleetError::Config("subnet identifiers must not be empty".to_string()));
        }
        Ok(self.handles.clone())
    }
}
