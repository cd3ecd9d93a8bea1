use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::model::{AutoScalingConfig, HealthCheck};

/// Wire value older clients send in a map field to mean "remove this key".
pub const DELETION_SENTINEL: &str = "LISA_MARKED_FOR_DELETION";

/// Per-entry update for map-valued config fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    #[default]
    Unchanged,
    Set(T),
    Delete,
}

/// Applies `updates` to `target` and returns the keys that were deleted, in
/// key order. `Unchanged` entries are ignored.
pub fn apply_map_updates<K, V>(target: &mut BTreeMap<K, V>, updates: &BTreeMap<K, FieldUpdate<V>>) -> Vec<K>
where
    K: Ord + Clone,
    V: Clone,
{
    let mut deleted = Vec::new();
    for (key, update) in updates {
        match update {
            FieldUpdate::Unchanged => {}
            FieldUpdate::Set(value) => {
                target.insert(key.clone(), value.clone());
            }
            FieldUpdate::Delete => {
                target.remove(key);
                deleted.push(key.clone());
            }
        }
    }
    deleted
}

/// Environment variable patch.
///
/// JSON form is a string map: a string sets the key, `null` or the
/// [`DELETION_SENTINEL`] deletes it. Keys left out are unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentPatch(pub BTreeMap<String, FieldUpdate<String>>);

impl EnvironmentPatch {
    pub fn entries(&self) -> &BTreeMap<String, FieldUpdate<String>> {
        &self.0
    }

    /// Keys with a `Set` value, in key order.
    pub fn additions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|(k, v)| match v {
            FieldUpdate::Set(value) => Some((k.as_str(), value.as_str())),
            _ => None,
        })
    }
}

impl<const N: usize> From<[(&str, FieldUpdate<String>); N]> for EnvironmentPatch {
    fn from(entries: [(&str, FieldUpdate<String>); N]) -> Self {
        Self(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

impl Serialize for EnvironmentPatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<_> = self.0.iter().filter(|(_, v)| **v != FieldUpdate::Unchanged).collect();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, update) in entries {
            match update {
                FieldUpdate::Set(value) => map.serialize_entry(key, value)?,
                _ => map.serialize_entry(key, &Option::<String>::None)?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EnvironmentPatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Option<String>>::deserialize(deserializer)?;
        let entries = raw
            .into_iter()
            .map(|(key, value)| {
                let update = match value {
                    Some(v) if v == DELETION_SENTINEL => FieldUpdate::Delete,
                    Some(v) => FieldUpdate::Set(v),
                    None => FieldUpdate::Delete,
                };
                (key, update)
            })
            .collect();
        Ok(Self(entries))
    }
}

/// Partial health check; only fields present are overwritten.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub start_period: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub retries: Option<u32>,
}

impl HealthCheckPatch {
    pub fn is_empty(&self) -> bool {
        self.command.is_none()
            && self.interval.is_none()
            && self.timeout.is_none()
            && self.start_period.is_none()
            && self.retries.is_none()
    }

    pub fn apply_to(&self, target: &mut HealthCheck) {
        if let Some(command) = &self.command {
            target.command = command.clone();
        }
        if let Some(v) = self.interval {
            target.interval = v;
        }
        if let Some(v) = self.timeout {
            target.timeout = v;
        }
        if let Some(v) = self.start_period {
            target.start_period = v;
        }
        if let Some(v) = self.retries {
            target.retries = v;
        }
    }

    /// The patch as a whole health check; `None` unless every field is set.
    pub fn to_health_check(&self) -> Option<HealthCheck> {
        Some(HealthCheck {
            command: self.command.clone()?,
            interval: self.interval?,
            timeout: self.timeout?,
            start_period: self.start_period?,
            retries: self.retries?,
        })
    }

    /// Merges onto an existing health check field by field. Where there is
    /// none, only a complete patch creates one. Returns false when nothing
    /// could be applied.
    pub fn merge_into(&self, target: &mut Option<HealthCheck>) -> bool {
        match target {
            Some(existing) => {
                self.apply_to(existing);
                true
            }
            None => match self.to_health_check() {
                Some(created) => {
                    *target = Some(created);
                    true
                }
                None => false,
            },
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingPatch {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub min_capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub max_capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub cooldown: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub duration: Option<u32>,
}

impl AutoScalingPatch {
    pub fn apply_to(&self, target: &mut AutoScalingConfig) {
        if let Some(v) = self.min_capacity {
            target.min_capacity = v;
        }
        if let Some(v) = self.max_capacity {
            target.max_capacity = v;
        }
        if let Some(v) = self.cooldown {
            target.cooldown = v;
        }
        if let Some(v) = self.target_value {
            target.target_value = v;
        }
        if let Some(v) = &self.metric_name {
            target.metric_name = v.clone();
        }
        if let Some(v) = self.duration {
            target.duration = v;
        }
    }
}

/// Requested changes to a resource. Every field is optional and
/// independently settable.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_u32")]
    pub memory: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_health_check: Option<serde_json::Value>,
    /// Presence requests activation or deactivation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scaling_config: Option<AutoScalingPatch>,
}

impl UpdateRequest {
    /// True when any container-level field is present; these need a new
    /// manifest revision to take effect.
    pub fn touches_container(&self) -> bool {
        self.environment.is_some() || self.cpu.is_some() || self.memory.is_some() || self.health_check.is_some()
    }

    pub fn has_config_fields(&self) -> bool {
        self.touches_container()
            || self.description.is_some()
            || self.groups.is_some()
            || self.load_balancer_health_check.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_config_fields() && self.enabled.is_none() && self.auto_scaling_config.is_none()
    }
}

mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    /// Accepts `12`, `"12"` or `null`.
    pub fn opt_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        let raw = Option::<NumOrString>::deserialize(deserializer)?;
        let value = match raw {
            None => return Ok(None),
            Some(NumOrString::Num(n)) => n,
            Some(NumOrString::Str(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| serde::de::Error::custom(format!("expected an integer, got {s:?}")))?,
        };
        u32::try_from(value)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("integer {value} out of range")))
    }
}
