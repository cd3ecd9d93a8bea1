use std::sync::Arc;

use rlu_core::{ServiceLocator, StackRef};
use rlu_store::{Autoscaler, ComputeOrchestrator, ConsumerStore, RecordStore};

/// Collaborator handles, built once at process start and passed into every
/// step.
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub orchestrator: Arc<dyn ComputeOrchestrator>,
    pub autoscaler: Arc<dyn Autoscaler>,
    pub consumers: Arc<dyn ConsumerStore>,
}

/// Resolves a stack reference at most once per step invocation. Never kept
/// across invocations: the context only carries the stack reference.
pub struct StackResolver<'a> {
    orchestrator: &'a dyn ComputeOrchestrator,
    stack_ref: &'a StackRef,
    cached: Option<ServiceLocator>,
}

impl<'a> StackResolver<'a> {
    pub fn new(orchestrator: &'a dyn ComputeOrchestrator, stack_ref: &'a StackRef) -> Self {
        Self { orchestrator, stack_ref, cached: None }
    }

    pub fn resolve(&mut self) -> anyhow::Result<ServiceLocator> {
        if let Some(locator) = &self.cached {
            return Ok(locator.clone());
        }
        let locator = self.orchestrator.resolve(self.stack_ref)?;
        self.cached = Some(locator.clone());
        Ok(locator)
    }
}
