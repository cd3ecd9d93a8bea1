use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rlu_core::{ConsumerStatus, ExecutionContext, Manifest, ResourceRecord, ResourceStatus, ServiceUpdate, UpdateRequest};
use rlu_store::{
    ConsumerEntry, InMemoryAutoscaler, InMemoryConsumerStore, InMemoryOrchestrator, InMemoryRecordStore, RecordStore,
    SimServiceSpec,
};
use serde::Deserialize;

use crate::deps::Collaborators;
use crate::engine::LocalEngine;
use crate::WorkflowSettings;

/// One end-to-end run against the simulated collaborators, read from
/// `<dir>/scenario.yaml`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub scenario_id: String,
    pub record: ResourceRecord,
    pub service: SimServiceSpec,
    #[serde(default)]
    pub consumers: Vec<ConsumerEntry>,
    pub request: UpdateRequest,
    #[serde(default)]
    pub expected: Expected,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Expected {
    /// The run fails before finalizing, with a validation error.
    pub rejected: bool,
    pub final_status: Option<ResourceStatus>,
    pub consumer_status: Option<ConsumerStatus>,
    pub poll_error: Option<bool>,
    pub deployment_poll_error: Option<bool>,
    /// Checked against the target container of the last registered manifest.
    pub env_present: BTreeMap<String, String>,
    pub env_absent: Vec<String>,
    pub zero_scale_calls: Option<usize>,
}

#[derive(Debug)]
pub struct ScenarioOutcome {
    pub context: Option<ExecutionContext>,
    pub error: Option<String>,
    pub record: Option<ResourceRecord>,
    pub consumers: Vec<ConsumerEntry>,
    pub registered_manifests: Vec<Manifest>,
    pub service_updates: Vec<ServiceUpdate>,
}

impl ScenarioOutcome {
    pub fn zero_scale_calls(&self) -> usize {
        self.service_updates.iter().filter(|u| u.desired_count == Some(0)).count()
    }
}

pub fn load_scenario(dir: &Path) -> Result<Scenario> {
    let p = dir.join("scenario.yaml");
    let s = std::fs::read_to_string(&p).with_context(|| format!("read scenario.yaml: {}", p.display()))?;
    let scenario: Scenario = serde_yaml::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
    Ok(scenario)
}

/// Runs `scenario` with the given record store; the record must already be
/// seeded. Orchestrator, autoscaler and consumer store are simulated.
pub fn run_with(scenario: &Scenario, records: Arc<dyn RecordStore>, settings: &WorkflowSettings) -> Result<ScenarioOutcome> {
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let autoscaler = Arc::new(InMemoryAutoscaler::new());
    let consumers = Arc::new(InMemoryConsumerStore::new());
    orchestrator.add_service(scenario.service.clone());
    for entry in &scenario.consumers {
        consumers.put(&scenario.record.id, entry.clone());
    }

    let deps = Collaborators {
        records: records.clone(),
        orchestrator: orchestrator.clone(),
        autoscaler,
        consumers: consumers.clone(),
    };
    let engine = LocalEngine::new(deps, settings.clone());
    tracing::info!(scenario_id = %scenario.scenario_id, resource_id = %scenario.record.id, "running scenario");
    let (context, error) = match engine.run(&scenario.record.id, scenario.request.clone()) {
        Ok(ctx) => (Some(ctx), None),
        Err(e) => (None, Some(format!("{e:#}"))),
    };

    Ok(ScenarioOutcome {
        context,
        error,
        record: records.get(&scenario.record.id, true)?,
        consumers: consumers.entries_for(&scenario.record.id),
        registered_manifests: orchestrator.registered_manifests(),
        service_updates: orchestrator.service_updates(),
    })
}

/// Loads and runs the scenario in `dir` against an in-memory record store.
pub fn simulate(dir: &Path, settings: &WorkflowSettings) -> Result<(Scenario, ScenarioOutcome)> {
    let scenario = load_scenario(dir)?;
    let records = Arc::new(InMemoryRecordStore::new());
    records.put(scenario.record.clone());
    let outcome = run_with(&scenario, records, settings)?;
    Ok((scenario, outcome))
}

impl Expected {
    pub fn check(&self, outcome: &ScenarioOutcome, container_name: Option<&str>) -> Result<()> {
        if self.rejected {
            if outcome.error.is_none() {
                bail!("expected the run to be rejected, but it finished");
            }
            return Ok(());
        }
        let Some(ctx) = &outcome.context else {
            bail!("run failed: {}", outcome.error.as_deref().unwrap_or("unknown error"));
        };

        if let Some(status) = self.final_status {
            if ctx.final_status != Some(status) {
                bail!("final status: expected {status}, got {:?}", ctx.final_status);
            }
            let stored = outcome.record.as_ref().map(|r| r.status);
            if stored != Some(status) {
                bail!("stored status: expected {status}, got {stored:?}");
            }
        }
        if let Some(status) = self.consumer_status {
            if let Some(entry) = outcome.consumers.iter().find(|e| e.status != Some(status)) {
                bail!("consumer {}: expected {status:?}, got {:?}", entry.owner_id, entry.status);
            }
        }
        if let Some(expected) = self.poll_error {
            if ctx.poll_error.is_some() != expected {
                bail!("poll error: expected present={expected}, got {:?}", ctx.poll_error);
            }
        }
        if let Some(expected) = self.deployment_poll_error {
            if ctx.deployment_poll_error.is_some() != expected {
                bail!("deployment poll error: expected present={expected}, got {:?}", ctx.deployment_poll_error);
            }
        }
        if let Some(n) = self.zero_scale_calls {
            if outcome.zero_scale_calls() != n {
                bail!("zero-scale calls: expected {n}, got {}", outcome.zero_scale_calls());
            }
        }

        if !self.env_present.is_empty() || !self.env_absent.is_empty() {
            let Some(manifest) = outcome.registered_manifests.last() else {
                bail!("expected a new manifest revision, none was registered");
            };
            let container = match container_name {
                Some(name) => manifest.containers.iter().find(|c| c.name == name),
                None => manifest.containers.first(),
            };
            let Some(container) = container else {
                bail!("registered manifest has no target container");
            };
            for (name, value) in &self.env_present {
                if container.env_value(name) != Some(value.as_str()) {
                    bail!("env {name}: expected {value:?}, got {:?}", container.env_value(name));
                }
            }
            for name in &self.env_absent {
                if container.env_value(name).is_some() {
                    bail!("env {name}: expected absent");
                }
            }
        }
        Ok(())
    }
}
