//! Shared fixtures for step tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use rlu_core::{
    AutoScalingConfig, ContainerDefinition, EnvVar, HealthCheck, Manifest, ResourceConfig, ResourceId,
    ResourceRecord, ResourceStatus, StackRef,
};
use rlu_store::{
    CapacityBehavior, ConsumerEntry, InMemoryAutoscaler, InMemoryConsumerStore, InMemoryOrchestrator,
    InMemoryRecordStore, RolloutBehavior, SimServiceSpec,
};

use crate::deps::Collaborators;

pub const ID: &str = "model-1";

pub struct Harness {
    pub records: Arc<InMemoryRecordStore>,
    pub orchestrator: Arc<InMemoryOrchestrator>,
    pub autoscaler: Arc<InMemoryAutoscaler>,
    pub consumers: Arc<InMemoryConsumerStore>,
    pub deps: Collaborators,
}

impl Harness {
    pub fn new(status: ResourceStatus, rollout: RolloutBehavior, capacity: CapacityBehavior) -> Self {
        let records = Arc::new(InMemoryRecordStore::new());
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let autoscaler = Arc::new(InMemoryAutoscaler::new());
        let consumers = Arc::new(InMemoryConsumerStore::new());

        records.put(record(status));
        let running = if status == ResourceStatus::InService { 1 } else { 0 };
        orchestrator.add_service(SimServiceSpec {
            stack_ref: StackRef::from_str(format!("stack/{ID}")),
            service_id: format!("svc-{ID}"),
            cluster_id: "cluster-1".into(),
            manifest: manifest(),
            desired_count: running,
            running_count: running,
            rollout,
            capacity,
        });
        consumers.put(&id(), ConsumerEntry { owner_id: "alice".into(), ..Default::default() });

        let deps = Collaborators {
            records: records.clone(),
            orchestrator: orchestrator.clone(),
            autoscaler: autoscaler.clone(),
            consumers: consumers.clone(),
        };
        Self { records, orchestrator, autoscaler, consumers, deps }
    }

    pub fn record(&self) -> ResourceRecord {
        self.records.record(&id()).expect("seeded record")
    }
}

pub fn id() -> ResourceId {
    ResourceId::from_str(ID)
}

pub fn record(status: ResourceStatus) -> ResourceRecord {
    ResourceRecord {
        id: id(),
        status,
        stack_ref: Some(StackRef::from_str(format!("stack/{ID}"))),
        config: ResourceConfig {
            description: "test model".into(),
            environment: BTreeMap::from([("Y".to_string(), "old".to_string())]),
            cpu: 512,
            memory: 1024,
            autoscaling: Some(AutoScalingConfig { min_capacity: 1, max_capacity: 3, ..Default::default() }),
            ..Default::default()
        },
        last_modified: 0,
    }
}

pub fn manifest() -> Manifest {
    Manifest {
        family: ID.into(),
        task_role: Some("role/task".into()),
        execution_role: Some("role/exec".into()),
        network_mode: Some("awsvpc".into()),
        requires_compatibilities: vec!["FARGATE".into()],
        cpu: Some(512),
        memory: Some(1024),
        containers: vec![ContainerDefinition {
            name: "app".into(),
            image: "registry/app:1".into(),
            environment: vec![
                EnvVar { name: "Y".into(), value: "old".into() },
                EnvVar { name: "W".into(), value: "w".into() },
            ],
            health_check: Some(HealthCheck {
                command: vec!["CMD-SHELL".into(), "curl -f localhost/health".into()],
                interval: 30,
                timeout: 5,
                start_period: 60,
                retries: 3,
            }),
            ..Default::default()
        }],
        ..Default::default()
    }
}
