use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail};
use rlu_core::{
    ConsumerStatus, Deployment, DeploymentStatus, Manifest, ResourceId, ResourceRecord, RevisionRef, RolloutState,
    ScalingBounds, ServiceDescription, ServiceLocator, ServiceUpdate, StackRef, StoreError,
};
use serde::{Deserialize, Serialize};

use crate::traits::{
    Autoscaler, ComputeOrchestrator, ConsumerRecordKey, ConsumerStore, ConsumerUpdate, RecordStore, RecordUpdate,
};

/// Qualifier the in-memory orchestrator puts in front of `family:revision`.
pub const LOCAL_MANIFEST_QUALIFIER: &str = "arn:local:orchestrator:local:000000000000:task-definition";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory record store for tests and local simulation.
#[derive(Default)]
pub struct InMemoryRecordStore {
    inner: Mutex<RecordsInner>,
}

#[derive(Default)]
struct RecordsInner {
    records: HashMap<String, ResourceRecord>,
    writes: usize,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a record. Stands in for the provisioning workflow.
    pub fn put(&self, record: ResourceRecord) {
        lock(&self.inner).records.insert(record.id.0.clone(), record);
    }

    pub fn record(&self, id: &ResourceId) -> Option<ResourceRecord> {
        lock(&self.inner).records.get(&id.0).cloned()
    }

    /// Number of successful `update` calls.
    pub fn write_count(&self) -> usize {
        lock(&self.inner).writes
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, id: &ResourceId, _consistent: bool) -> Result<Option<ResourceRecord>, StoreError> {
        Ok(lock(&self.inner).records.get(&id.0).cloned())
    }

    fn update(&self, id: &ResourceId, update: &RecordUpdate) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        let record = inner.records.get_mut(&id.0).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if let Some(expected) = update.expected_status {
            if record.status != expected {
                return Err(StoreError::ConditionFailed { resource_id: id.clone(), expected });
            }
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(config) = &update.config {
            record.config = config.clone();
        }
        record.last_modified = update.last_modified;
        inner.writes += 1;
        tracing::debug!(resource_id = %id, status = ?update.status, "record updated");
        Ok(())
    }
}

/// How a simulated rollout progresses after a forced redeploy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutBehavior {
    /// Completes after this many `describe_service` calls.
    CompleteAfter(u32),
    Fail,
    Never,
}

/// How running tasks follow a change of desired count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityBehavior {
    /// Running count matches desired after this many `describe_service` calls.
    ConvergeAfter(u32),
    Never,
}

/// Seed for one simulated service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimServiceSpec {
    pub stack_ref: StackRef,
    pub service_id: String,
    pub cluster_id: String,
    pub manifest: Manifest,
    #[serde(default)]
    pub desired_count: u32,
    #[serde(default)]
    pub running_count: u32,
    #[serde(default = "default_rollout")]
    pub rollout: RolloutBehavior,
    #[serde(default = "default_capacity")]
    pub capacity: CapacityBehavior,
}

fn default_rollout() -> RolloutBehavior {
    RolloutBehavior::CompleteAfter(1)
}

fn default_capacity() -> CapacityBehavior {
    CapacityBehavior::ConvergeAfter(1)
}

/// Calls observed by the in-memory orchestrator, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum OrchestratorCall {
    Resolve(StackRef),
    DescribeService(String),
    DescribeManifest(String),
    RegisterManifest(Manifest),
    UpdateService(String, ServiceUpdate),
}

struct SimService {
    locator: ServiceLocator,
    desired: u32,
    running: u32,
    manifest_revision_id: String,
    deployments: Vec<Deployment>,
    rollout: RolloutBehavior,
    rollout_ticks: u32,
    capacity: CapacityBehavior,
    capacity_ticks: u32,
}

impl SimService {
    fn tick(&mut self) {
        if let Some(primary) = self.deployments.iter_mut().find(|d| d.status == DeploymentStatus::Primary) {
            if primary.rollout_state == RolloutState::InProgress {
                match self.rollout {
                    RolloutBehavior::CompleteAfter(_) if self.rollout_ticks > 0 => self.rollout_ticks -= 1,
                    RolloutBehavior::CompleteAfter(_) => primary.rollout_state = RolloutState::Completed,
                    RolloutBehavior::Fail => primary.rollout_state = RolloutState::Failed,
                    RolloutBehavior::Never => {}
                }
            }
        }
        if self.deployments.iter().any(|d| d.is_stable()) {
            self.deployments.retain(|d| d.status == DeploymentStatus::Primary);
        }

        if self.running != self.desired {
            match self.capacity {
                CapacityBehavior::ConvergeAfter(_) if self.capacity_ticks > 0 => self.capacity_ticks -= 1,
                CapacityBehavior::ConvergeAfter(_) => self.running = self.desired,
                CapacityBehavior::Never => {}
            }
        }
    }
}

#[derive(Default)]
struct OrchestratorInner {
    stacks: HashMap<StackRef, String>,
    services: HashMap<String, SimService>,
    manifests: BTreeMap<String, Manifest>,
    family_revisions: HashMap<String, u32>,
    deployment_seq: u32,
    calls: Vec<OrchestratorCall>,
    failing: HashSet<&'static str>,
}

impl OrchestratorInner {
    fn check(&self, op: &'static str) -> anyhow::Result<()> {
        if self.failing.contains(op) {
            bail!("injected {op} failure");
        }
        Ok(())
    }

    fn next_deployment_id(&mut self) -> String {
        self.deployment_seq += 1;
        format!("deployment-{}", self.deployment_seq)
    }

    fn register(&mut self, manifest: &Manifest) -> (String, String) {
        let n = self.family_revisions.entry(manifest.family.clone()).or_insert(0);
        *n += 1;
        let short = format!("{}:{}", manifest.family, n);
        let qualified = format!("{LOCAL_MANIFEST_QUALIFIER}/{short}");
        let mut stored = manifest.clone();
        stored.revision_id = Some(qualified.clone());
        self.manifests.insert(qualified.clone(), stored);
        (qualified, short)
    }
}

/// In-memory compute orchestrator. Each `describe_service` call advances
/// the simulated rollout and capacity by one tick. Deployments report
/// manifest revisions in short `family:revision` form while
/// `register_manifest` returns the qualified form.
#[derive(Default)]
pub struct InMemoryOrchestrator {
    inner: Mutex<OrchestratorInner>,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service running revision 1 of `spec.manifest`; returns that
    /// revision's qualified id.
    pub fn add_service(&self, spec: SimServiceSpec) -> String {
        let mut inner = lock(&self.inner);
        let (qualified, short) = inner.register(&spec.manifest);
        let deployment_id = inner.next_deployment_id();
        inner.stacks.insert(spec.stack_ref.clone(), spec.service_id.clone());
        inner.services.insert(
            spec.service_id.clone(),
            SimService {
                locator: ServiceLocator { service_id: spec.service_id, cluster_id: spec.cluster_id },
                desired: spec.desired_count,
                running: spec.running_count,
                manifest_revision_id: qualified.clone(),
                deployments: vec![Deployment {
                    id: deployment_id,
                    manifest_revision_id: short,
                    status: DeploymentStatus::Primary,
                    rollout_state: RolloutState::Completed,
                }],
                rollout: spec.rollout,
                rollout_ticks: 0,
                capacity: spec.capacity,
                capacity_ticks: 0,
            },
        );
        qualified
    }

    /// Makes every later call to `op` fail. `op` is the trait method name.
    pub fn fail(&self, op: &'static str) {
        lock(&self.inner).failing.insert(op);
    }

    pub fn calls(&self) -> Vec<OrchestratorCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn service_updates(&self) -> Vec<ServiceUpdate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OrchestratorCall::UpdateService(_, u) => Some(u),
                _ => None,
            })
            .collect()
    }

    pub fn registered_manifests(&self) -> Vec<Manifest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OrchestratorCall::RegisterManifest(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn manifest(&self, revision_id: &str) -> Option<Manifest> {
        lock(&self.inner).manifests.get(revision_id).cloned()
    }

    /// `(desired, running)` without advancing the simulation.
    pub fn counts(&self, service_id: &str) -> Option<(u32, u32)> {
        lock(&self.inner).services.get(service_id).map(|s| (s.desired, s.running))
    }
}

impl ComputeOrchestrator for InMemoryOrchestrator {
    fn resolve(&self, stack_ref: &StackRef) -> anyhow::Result<ServiceLocator> {
        let mut inner = lock(&self.inner);
        inner.calls.push(OrchestratorCall::Resolve(stack_ref.clone()));
        inner.check("resolve")?;
        let service_id = inner.stacks.get(stack_ref).ok_or_else(|| anyhow!("unknown stack {stack_ref}"))?;
        let service = inner.services.get(service_id).ok_or_else(|| anyhow!("unknown service {service_id}"))?;
        Ok(service.locator.clone())
    }

    fn describe_service(&self, service: &ServiceLocator) -> anyhow::Result<ServiceDescription> {
        let mut inner = lock(&self.inner);
        inner.calls.push(OrchestratorCall::DescribeService(service.service_id.clone()));
        inner.check("describe_service")?;
        let sim = inner
            .services
            .get_mut(&service.service_id)
            .ok_or_else(|| anyhow!("unknown service {}", service.service_id))?;
        sim.tick();
        Ok(ServiceDescription {
            desired_count: sim.desired,
            running_count: sim.running,
            manifest_revision_id: sim.manifest_revision_id.clone(),
            deployments: sim.deployments.clone(),
        })
    }

    fn describe_manifest(&self, revision_id: &str) -> anyhow::Result<Manifest> {
        let mut inner = lock(&self.inner);
        inner.calls.push(OrchestratorCall::DescribeManifest(revision_id.to_string()));
        inner.check("describe_manifest")?;
        inner.manifests.get(revision_id).cloned().ok_or_else(|| anyhow!("unknown manifest {revision_id}"))
    }

    fn register_manifest(&self, manifest: &Manifest) -> anyhow::Result<String> {
        let mut inner = lock(&self.inner);
        inner.calls.push(OrchestratorCall::RegisterManifest(manifest.clone()));
        inner.check("register_manifest")?;
        let (qualified, _) = inner.register(manifest);
        Ok(qualified)
    }

    fn update_service(&self, service: &ServiceLocator, update: &ServiceUpdate) -> anyhow::Result<()> {
        let mut inner = lock(&self.inner);
        inner.calls.push(OrchestratorCall::UpdateService(service.service_id.clone(), update.clone()));
        inner.check("update_service")?;

        let new_revision = match &update.manifest_revision_id {
            Some(id) => {
                if !inner.manifests.contains_key(id) {
                    bail!("unknown manifest {id}");
                }
                let short = RevisionRef::parse(id).to_short_string().unwrap_or_else(|| id.clone());
                Some((id.clone(), short))
            }
            None => None,
        };
        let deployment_id = new_revision.as_ref().map(|_| inner.next_deployment_id());

        let sim = inner
            .services
            .get_mut(&service.service_id)
            .ok_or_else(|| anyhow!("unknown service {}", service.service_id))?;

        if let Some(desired) = update.desired_count {
            if desired != sim.desired {
                sim.desired = desired;
                if let CapacityBehavior::ConvergeAfter(n) = sim.capacity {
                    sim.capacity_ticks = n;
                }
            }
        }

        if let (Some((qualified, short)), Some(deployment_id)) = (new_revision, deployment_id) {
            if qualified != sim.manifest_revision_id || update.force_redeploy {
                for d in sim.deployments.iter_mut() {
                    d.status = DeploymentStatus::Active;
                }
                sim.deployments.insert(
                    0,
                    Deployment {
                        id: deployment_id,
                        manifest_revision_id: short,
                        status: DeploymentStatus::Primary,
                        rollout_state: RolloutState::InProgress,
                    },
                );
                sim.manifest_revision_id = qualified;
                if let RolloutBehavior::CompleteAfter(n) = sim.rollout {
                    sim.rollout_ticks = n;
                }
            }
        }
        tracing::debug!(service_id = %service.service_id, ?update, "simulated service updated");
        Ok(())
    }
}

/// In-memory autoscaler that records every registration.
#[derive(Default)]
pub struct InMemoryAutoscaler {
    registrations: Mutex<Vec<(ServiceLocator, ScalingBounds)>>,
    failing: Mutex<bool>,
}

impl InMemoryAutoscaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        *lock(&self.failing) = true;
    }

    pub fn registrations(&self) -> Vec<(ServiceLocator, ScalingBounds)> {
        lock(&self.registrations).clone()
    }

    pub fn last_bounds(&self) -> Option<ScalingBounds> {
        lock(&self.registrations).last().map(|(_, b)| *b)
    }
}

impl Autoscaler for InMemoryAutoscaler {
    fn register_scalable_target(&self, service: &ServiceLocator, bounds: ScalingBounds) -> anyhow::Result<()> {
        if *lock(&self.failing) {
            bail!("injected register_scalable_target failure");
        }
        lock(&self.registrations).push((service.clone(), bounds));
        Ok(())
    }
}

/// One owner's copy of a resource in the consumer store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerEntry {
    pub owner_id: String,
    pub status: Option<ConsumerStatus>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Default)]
struct ConsumerInner {
    // record_key -> (resource id, entry)
    entries: BTreeMap<String, (ResourceId, ConsumerEntry)>,
    failing: bool,
}

/// In-memory secondary consumer store.
#[derive(Default)]
pub struct InMemoryConsumerStore {
    inner: Mutex<ConsumerInner>,
}

impl InMemoryConsumerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, resource_id: &ResourceId, entry: ConsumerEntry) {
        let key = format!("{}#{}", entry.owner_id, resource_id);
        lock(&self.inner).entries.insert(key, (resource_id.clone(), entry));
    }

    pub fn fail(&self) {
        lock(&self.inner).failing = true;
    }

    pub fn entries_for(&self, resource_id: &ResourceId) -> Vec<ConsumerEntry> {
        lock(&self.inner)
            .entries
            .values()
            .filter(|(id, _)| id == resource_id)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl ConsumerStore for InMemoryConsumerStore {
    fn scan_by_resource_id(&self, id: &ResourceId) -> anyhow::Result<Vec<ConsumerRecordKey>> {
        let inner = lock(&self.inner);
        if inner.failing {
            bail!("injected consumer store scan failure");
        }
        Ok(inner
            .entries
            .iter()
            .filter(|(_, (rid, _))| rid == id)
            .map(|(key, (_, e))| ConsumerRecordKey { owner_id: e.owner_id.clone(), record_key: key.clone() })
            .collect())
    }

    fn update(&self, key: &ConsumerRecordKey, update: &ConsumerUpdate) -> anyhow::Result<()> {
        let mut inner = lock(&self.inner);
        if inner.failing {
            bail!("injected consumer store update failure");
        }
        let (_, entry) = inner
            .entries
            .get_mut(&key.record_key)
            .ok_or_else(|| anyhow!("unknown consumer record {}", key.record_key))?;
        if let Some(status) = update.status {
            entry.status = Some(status);
        }
        if let Some(description) = &update.description {
            entry.description = description.clone();
        }
        if let Some(groups) = &update.groups {
            entry.groups = groups.clone();
        }
        Ok(())
    }
}
