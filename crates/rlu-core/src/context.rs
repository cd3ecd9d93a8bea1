use serde::{Deserialize, Serialize};

use crate::ids::{ResourceId, RunId, StackRef};
use crate::model::ResourceStatus;
use crate::update::UpdateRequest;

/// Payload threaded through every workflow step.
///
/// Steps never share memory: each receives the whole context, and returns
/// a new one built from it by adding or overwriting fields. Nothing is
/// removed once set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub resource_id: ResourceId,
    /// Correlates log lines across step invocations.
    pub run_id: RunId,
    pub stack_ref: StackRef,
    pub update_payload: UpdateRequest,

    #[serde(default)]
    pub is_enable: bool,
    #[serde(default)]
    pub is_disable: bool,
    #[serde(default)]
    pub has_capacity_update: bool,
    #[serde(default)]
    pub needs_deployment_update: bool,

    /// Status the record held before this update began.
    pub initial_status: ResourceStatus,
    /// Status written by intake.
    pub current_status: ResourceStatus,

    /// Environment keys removed by the merge; the manifest drops them too.
    #[serde(default)]
    pub env_vars_to_delete: Vec<String>,

    #[serde(default)]
    pub new_manifest_revision_id: Option<String>,
    #[serde(default)]
    pub remaining_deployment_polls: u32,
    #[serde(default)]
    pub remaining_capacity_polls: u32,
    /// Continuation flag written by the poller that ran last.
    #[serde(default)]
    pub should_continue: bool,

    #[serde(default)]
    pub deployment_update_error: Option<String>,
    #[serde(default)]
    pub deployment_poll_error: Option<String>,
    /// Capacity did not converge within its budget.
    #[serde(default, alias = "capacityPollError")]
    pub poll_error: Option<String>,

    #[serde(default)]
    pub final_status: Option<ResourceStatus>,
}

impl ExecutionContext {
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}
