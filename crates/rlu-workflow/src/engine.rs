use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use rlu_core::{ExecutionContext, ResourceId, UpdateRequest};

use crate::deploy::update_deployment;
use crate::deps::Collaborators;
use crate::finalize::finalize;
use crate::intake::intake;
use crate::poll::{poll_capacity, poll_deployment};
use crate::WorkflowSettings;

/// In-process stand-in for the external workflow engine.
///
/// Runs the steps in order and loops each poller while it asks to continue.
/// The context crosses every step boundary as JSON, the same way a remote
/// engine would hand it over.
pub struct LocalEngine {
    deps: Collaborators,
    settings: WorkflowSettings,
}

impl LocalEngine {
    pub fn new(deps: Collaborators, settings: WorkflowSettings) -> Self {
        Self { deps, settings }
    }

    pub fn run(&self, resource_id: &ResourceId, request: UpdateRequest) -> Result<ExecutionContext> {
        let ctx = intake(&self.deps, &self.settings, resource_id, request)?;
        let mut ctx = handoff(ctx)?;

        if ctx.needs_deployment_update {
            ctx = handoff(update_deployment(&self.deps, &self.settings, ctx))?;
            loop {
                ctx = handoff(poll_deployment(&self.deps, ctx))?;
                if !ctx.should_continue {
                    break;
                }
                self.wait();
            }
        }

        if ctx.has_capacity_update {
            loop {
                ctx = handoff(poll_capacity(&self.deps, ctx))?;
                if !ctx.should_continue {
                    break;
                }
                self.wait();
            }
        }

        let ctx = finalize(&self.deps, ctx)?;
        handoff(ctx)
    }

    fn wait(&self) {
        if self.settings.poll_interval_ms > 0 {
            thread::sleep(Duration::from_millis(self.settings.poll_interval_ms));
        }
    }
}

fn handoff(ctx: ExecutionContext) -> Result<ExecutionContext> {
    let payload = ctx.to_json().context("encode execution context")?;
    ExecutionContext::from_json(payload).context("decode execution context")
}
