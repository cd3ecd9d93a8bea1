use rlu_core::{
    now_unix, ConsumerStatus, ExecutionContext, ResourceStatus, Result, ScalingBounds, ServiceUpdate, StoreError,
    WorkflowError,
};
use rlu_store::{ConsumerUpdate, RecordUpdate};

use crate::consumer::propagate;
use crate::deps::{Collaborators, StackResolver};

/// What the finalizer does besides writing the status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalAction {
    /// Capacity never converged: drop bounds and desired count to zero.
    Rollback,
    /// Enabling succeeded: consumers see the resource as active.
    Activate,
    None,
}

/// Terminal status for a run; the first matching rule wins.
pub fn decide(ctx: &ExecutionContext) -> (ResourceStatus, FinalAction) {
    if ctx.poll_error.is_some() {
        (ResourceStatus::Stopped, FinalAction::Rollback)
    } else if ctx.is_disable {
        (ResourceStatus::Stopped, FinalAction::None)
    } else if ctx.has_capacity_update {
        (ResourceStatus::InService, FinalAction::Activate)
    } else {
        (ctx.initial_status, FinalAction::None)
    }
}

/// Commits the terminal status. The write only lands if the record still
/// holds the status intake wrote. A record that already holds the resolved
/// status means an earlier invocation committed: the call succeeds without
/// repeating side effects. Anything else lost a race and ends with
/// [`WorkflowError::Conflict`].
pub fn finalize(deps: &Collaborators, ctx: ExecutionContext) -> Result<ExecutionContext> {
    let (status, action) = decide(&ctx);
    if !ctx.current_status.can_transition(status) {
        return Err(WorkflowError::InvalidStateTransition { from: ctx.current_status, to: status });
    }
    if let Some(error) = &ctx.deployment_update_error {
        tracing::error!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, %error, "run ended with a deployment update error");
    }
    if let Some(error) = &ctx.deployment_poll_error {
        tracing::error!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, %error, "run ended with an unstable deployment");
    }

    let committed = commit(deps, &ctx, status)?;
    if committed {
        // side effects only follow our own commit, never a lost race or a retry
        match action {
            FinalAction::Rollback => rollback(deps, &ctx),
            FinalAction::Activate => {
                propagate(deps.consumers.as_ref(), &ctx.resource_id, &ConsumerUpdate::status(ConsumerStatus::Active));
            }
            FinalAction::None => {}
        }
    }

    tracing::info!(
        resource_id = %ctx.resource_id,
        run_id = %ctx.run_id,
        from = %ctx.current_status,
        to = %status,
        ?action,
        committed,
        "update finalized"
    );
    Ok(ExecutionContext { final_status: Some(status), should_continue: false, ..ctx })
}

/// Returns false when the record already held `status` from an earlier call.
fn commit(deps: &Collaborators, ctx: &ExecutionContext, status: ResourceStatus) -> Result<bool> {
    let update = RecordUpdate {
        status: Some(status),
        config: None,
        last_modified: now_unix(),
        expected_status: Some(ctx.current_status),
    };
    match deps.records.update(&ctx.resource_id, &update) {
        Ok(()) => Ok(true),
        Err(StoreError::ConditionFailed { resource_id, expected }) => {
            let stored = deps.records.get(&ctx.resource_id, true)?.map(|r| r.status);
            if stored != Some(status) {
                return Err(WorkflowError::Conflict { resource_id, expected });
            }
            tracing::info!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, %status, "already finalized");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

// Errors are logged and swallowed; the record is already Stopped.
fn rollback(deps: &Collaborators, ctx: &ExecutionContext) {
    let mut resolver = StackResolver::new(deps.orchestrator.as_ref(), &ctx.stack_ref);
    let service = match resolver.resolve() {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(resource_id = %ctx.resource_id, error = %format!("{e:#}"), "rollback: resolve failed");
            return;
        }
    };
    if let Err(e) = deps.autoscaler.register_scalable_target(&service, ScalingBounds::ZERO) {
        tracing::error!(resource_id = %ctx.resource_id, error = %format!("{e:#}"), "rollback: zeroing bounds failed");
    }
    if let Err(e) = deps.orchestrator.update_service(&service, &ServiceUpdate::scale_to(0)) {
        tracing::error!(resource_id = %ctx.resource_id, error = %format!("{e:#}"), "rollback: scale to zero failed");
    }
}
