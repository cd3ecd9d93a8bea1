use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ResourceId, StackRef};

/// Lifecycle status of a hosted resource.
///
/// Edges:
/// - `Stopped -> Starting -> InService | Stopped`
/// - `InService -> Stopping -> Stopped`
/// - `Stopped | InService -> Updating -> <status before the update>`
///
/// Staying in the same status is always allowed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    Stopped,
    Starting,
    InService,
    Updating,
    Stopping,
}

impl ResourceStatus {
    pub fn can_transition(self, to: ResourceStatus) -> bool {
        use ResourceStatus::*;
        if self == to {
            return true;
        }
        match (self, to) {
            (Stopped, Starting) | (Stopped, Updating) => true,
            (Starting, InService) | (Starting, Stopped) => true,
            (InService, Stopping) | (InService, Updating) => true,
            (Stopping, Stopped) => true,
            // Updating is transient and returns to whatever preceded it.
            (Updating, Stopped) | (Updating, InService) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Stopped => "Stopped",
            ResourceStatus::Starting => "Starting",
            ResourceStatus::InService => "InService",
            ResourceStatus::Updating => "Updating",
            ResourceStatus::Stopping => "Stopping",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as seen by the secondary consumer store.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConsumerStatus {
    Active,
    Inactive,
}

/// Container health check settings. Times are in seconds.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub command: Vec<String>,
    pub interval: u32,
    pub timeout: u32,
    pub start_period: u32,
    pub retries: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingConfig {
    pub min_capacity: u32,
    pub max_capacity: u32,
    #[serde(default)]
    pub cooldown: u32,
    #[serde(default)]
    pub target_value: f64,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub duration: u32,
}

/// Mutable runtime configuration of a resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceConfig {
    pub description: String,
    /// Ordered set: insertion order is kept, duplicates are not.
    pub groups: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub cpu: u32,
    pub memory: u32,
    pub health_check: Option<HealthCheck>,
    /// Passed through to the load balancer untouched.
    pub load_balancer_health_check: Option<serde_json::Value>,
    pub autoscaling: Option<AutoScalingConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub status: ResourceStatus,
    #[serde(default)]
    pub stack_ref: Option<StackRef>,
    #[serde(default)]
    pub config: ResourceConfig,
    #[serde(default)]
    pub last_modified: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResourceStatus::*;

    #[test]
    fn enable_and_disable_edges() {
        assert!(Stopped.can_transition(Starting));
        assert!(Starting.can_transition(InService));
        assert!(Starting.can_transition(Stopped));
        assert!(InService.can_transition(Stopping));
        assert!(Stopping.can_transition(Stopped));
    }

    #[test]
    fn rejects_skipping_edges() {
        assert!(!Stopped.can_transition(InService));
        assert!(!Stopped.can_transition(Stopping));
        assert!(!InService.can_transition(Starting));
        assert!(!Starting.can_transition(Updating));
        assert!(!Stopping.can_transition(InService));
    }

    #[test]
    fn updating_returns_to_prior_status() {
        assert!(InService.can_transition(Updating));
        assert!(Updating.can_transition(InService));
        assert!(Updating.can_transition(Stopped));
        assert!(!Updating.can_transition(Starting));
        assert!(!Updating.can_transition(Stopping));
    }

    #[test]
    fn status_serializes_as_variant_name() {
        let s = serde_json::to_string(&InService).unwrap();
        assert_eq!(s, "\"InService\"");
        assert_eq!(InService.to_string(), "InService");
    }
}
