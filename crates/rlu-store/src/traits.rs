use rlu_core::{
    ConsumerStatus, Manifest, ResourceConfig, ResourceId, ResourceRecord, ResourceStatus, ScalingBounds,
    ServiceDescription, ServiceLocator, ServiceUpdate, StackRef, StoreError,
};

/// Attribute-level update of one record. Fields left `None` are untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<ResourceStatus>,
    pub config: Option<ResourceConfig>,
    pub last_modified: i64,
    /// Write only if the stored status still equals this one.
    pub expected_status: Option<ResourceStatus>,
}

pub trait RecordStore: Send + Sync {
    fn get(&self, id: &ResourceId, consistent: bool) -> Result<Option<ResourceRecord>, StoreError>;

    /// Fails with `ConditionFailed` when `expected_status` does not hold and
    /// `NotFound` when there is no record; records are never created here.
    fn update(&self, id: &ResourceId, update: &RecordUpdate) -> Result<(), StoreError>;
}

pub trait ComputeOrchestrator: Send + Sync {
    fn resolve(&self, stack_ref: &StackRef) -> anyhow::Result<ServiceLocator>;

    fn describe_service(&self, service: &ServiceLocator) -> anyhow::Result<ServiceDescription>;

    fn describe_manifest(&self, revision_id: &str) -> anyhow::Result<Manifest>;

    /// Registers a new, immutable revision and returns its id. Existing
    /// revisions are never modified.
    fn register_manifest(&self, manifest: &Manifest) -> anyhow::Result<String>;

    fn update_service(&self, service: &ServiceLocator, update: &ServiceUpdate) -> anyhow::Result<()>;
}

pub trait Autoscaler: Send + Sync {
    fn register_scalable_target(&self, service: &ServiceLocator, bounds: ScalingBounds) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerRecordKey {
    pub owner_id: String,
    pub record_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerUpdate {
    pub status: Option<ConsumerStatus>,
    pub description: Option<String>,
    pub groups: Option<Vec<String>>,
}

impl ConsumerUpdate {
    pub fn status(status: ConsumerStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.description.is_none() && self.groups.is_none()
    }
}

/// Secondary store holding per-owner copies of resource metadata.
pub trait ConsumerStore: Send + Sync {
    fn scan_by_resource_id(&self, id: &ResourceId) -> anyhow::Result<Vec<ConsumerRecordKey>>;

    fn update(&self, key: &ConsumerRecordKey, update: &ConsumerUpdate) -> anyhow::Result<()>;
}
