use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::HealthCheck;

/// Physical identifiers a stack reference resolves to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLocator {
    pub service_id: String,
    pub cluster_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub environment: Vec<EnvVar>,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    /// Port mappings, log config and anything else carried over verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ContainerDefinition {
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.environment.iter().find(|e| e.name == name).map(|e| e.value.as_str())
    }
}

/// A deployment manifest revision: immutable once registered.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Assigned by the orchestrator on registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    pub family: String,
    #[serde(default)]
    pub task_role: Option<String>,
    #[serde(default)]
    pub execution_role: Option<String>,
    #[serde(default)]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub requires_compatibilities: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<serde_json::Value>,
    #[serde(default)]
    pub cpu: Option<u32>,
    #[serde(default)]
    pub memory: Option<u32>,
    #[serde(default)]
    pub containers: Vec<ContainerDefinition>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Primary,
    Active,
    Inactive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutState {
    InProgress,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    /// Manifest revision this deployment runs, in whichever form the
    /// orchestrator reports it.
    pub manifest_revision_id: String,
    pub status: DeploymentStatus,
    pub rollout_state: RolloutState,
}

impl Deployment {
    pub fn is_stable(&self) -> bool {
        self.status == DeploymentStatus::Primary && self.rollout_state == RolloutState::Completed
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescription {
    pub desired_count: u32,
    pub running_count: u32,
    pub manifest_revision_id: String,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

/// Changes requested of a running service. `None` leaves a setting alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUpdate {
    pub manifest_revision_id: Option<String>,
    pub desired_count: Option<u32>,
    pub force_redeploy: bool,
}

impl ServiceUpdate {
    pub fn scale_to(desired_count: u32) -> Self {
        Self { desired_count: Some(desired_count), ..Default::default() }
    }

    pub fn redeploy(manifest_revision_id: impl Into<String>) -> Self {
        Self {
            manifest_revision_id: Some(manifest_revision_id.into()),
            desired_count: None,
            force_redeploy: true,
        }
    }
}

/// Min/max bounds for the scalable target behind a service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingBounds {
    pub min: u32,
    pub max: u32,
}

impl ScalingBounds {
    pub const ZERO: ScalingBounds = ScalingBounds { min: 0, max: 0 };
}
