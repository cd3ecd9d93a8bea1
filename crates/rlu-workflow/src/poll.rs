use rlu_core::{same_revision, ExecutionContext, ServiceDescription};

use crate::deps::{Collaborators, StackResolver};

/// One rollout check. Sets `shouldContinue` while the new revision is not
/// yet the stable primary deployment and budget remains.
pub fn poll_deployment(deps: &Collaborators, ctx: ExecutionContext) -> ExecutionContext {
    if ctx.deployment_update_error.is_some() || !ctx.needs_deployment_update {
        return ExecutionContext { should_continue: false, ..ctx };
    }
    let remaining = ctx.remaining_deployment_polls.saturating_sub(1);
    let stable = match (&ctx.new_manifest_revision_id, describe(deps, &ctx)) {
        (Some(revision_id), Some(description)) => is_stable_primary(&description, revision_id),
        _ => false,
    };

    if stable {
        tracing::info!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, remaining, "rollout complete");
        return ExecutionContext { remaining_deployment_polls: remaining, should_continue: false, ..ctx };
    }
    if remaining == 0 {
        tracing::warn!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, "rollout did not stabilize within budget");
        let message = format!(
            "deployment of {} did not stabilize",
            ctx.new_manifest_revision_id.as_deref().unwrap_or("<unknown revision>")
        );
        return ExecutionContext {
            remaining_deployment_polls: 0,
            should_continue: false,
            deployment_poll_error: Some(message),
            ..ctx
        };
    }
    tracing::debug!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, remaining, "rollout in progress");
    ExecutionContext { remaining_deployment_polls: remaining, should_continue: true, ..ctx }
}

/// True when the deployment running `revision_id` is primary and its rollout
/// completed. Either identifier form matches.
pub fn is_stable_primary(description: &ServiceDescription, revision_id: &str) -> bool {
    description
        .deployments
        .iter()
        .find(|d| same_revision(&d.manifest_revision_id, revision_id))
        .is_some_and(|d| d.is_stable())
}

/// One capacity check. Done when desired and running counts agree.
pub fn poll_capacity(deps: &Collaborators, ctx: ExecutionContext) -> ExecutionContext {
    if !ctx.has_capacity_update {
        return ExecutionContext { should_continue: false, ..ctx };
    }
    let remaining = ctx.remaining_capacity_polls.saturating_sub(1);
    let counts = describe(deps, &ctx).map(|d| (d.desired_count, d.running_count));
    let converged = matches!(counts, Some((desired, running)) if desired == running);

    if converged {
        tracing::info!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, ?counts, "capacity converged");
        return ExecutionContext { remaining_capacity_polls: remaining, should_continue: false, ..ctx };
    }
    if remaining == 0 {
        tracing::warn!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, ?counts, "capacity did not converge within budget");
        let message = match counts {
            Some((desired, running)) => format!("capacity did not converge: desired {desired}, running {running}"),
            None => "capacity did not converge: service could not be described".to_string(),
        };
        return ExecutionContext {
            remaining_capacity_polls: 0,
            should_continue: false,
            poll_error: Some(message),
            ..ctx
        };
    }
    tracing::debug!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, ?counts, remaining, "waiting for capacity");
    ExecutionContext { remaining_capacity_polls: remaining, should_continue: true, ..ctx }
}

// A failed describe counts as "not there yet"; the budget bounds the wait.
fn describe(deps: &Collaborators, ctx: &ExecutionContext) -> Option<ServiceDescription> {
    let mut resolver = StackResolver::new(deps.orchestrator.as_ref(), &ctx.stack_ref);
    let result = resolver.resolve().and_then(|service| deps.orchestrator.describe_service(&service));
    match result {
        Ok(description) => Some(description),
        Err(e) => {
            tracing::warn!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, error = %format!("{e:#}"), "describe service failed");
            None
        }
    }
}
