use anyhow::{anyhow, bail, Context};
use rlu_core::{EnvVar, ExecutionContext, Manifest, ServiceUpdate, UpdateRequest};

use crate::deps::{Collaborators, StackResolver};
use crate::WorkflowSettings;

/// Registers a manifest revision carrying the container changes of the
/// request and force-redeploys the service onto it.
///
/// Never fails: an error is recorded as `deploymentUpdateError` so the
/// deployment poller can short-circuit on it.
pub fn update_deployment(deps: &Collaborators, settings: &WorkflowSettings, ctx: ExecutionContext) -> ExecutionContext {
    if !ctx.needs_deployment_update {
        return ctx;
    }
    match register_and_redeploy(deps, settings, &ctx) {
        Ok(revision_id) => {
            tracing::info!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, %revision_id, "redeploy triggered");
            ExecutionContext { new_manifest_revision_id: Some(revision_id), ..ctx }
        }
        Err(e) => {
            tracing::error!(resource_id = %ctx.resource_id, run_id = %ctx.run_id, error = %format!("{e:#}"), "deployment update failed");
            ExecutionContext { deployment_update_error: Some(format!("{e:#}")), ..ctx }
        }
    }
}

fn register_and_redeploy(
    deps: &Collaborators,
    settings: &WorkflowSettings,
    ctx: &ExecutionContext,
) -> anyhow::Result<String> {
    let mut resolver = StackResolver::new(deps.orchestrator.as_ref(), &ctx.stack_ref);
    let service = resolver.resolve().context("resolve stack")?;
    let description = deps.orchestrator.describe_service(&service).context("describe service")?;
    let current = deps
        .orchestrator
        .describe_manifest(&description.manifest_revision_id)
        .with_context(|| format!("describe manifest {}", description.manifest_revision_id))?;

    let manifest = build_manifest(
        &current,
        &ctx.update_payload,
        &ctx.env_vars_to_delete,
        settings.container_name.as_deref(),
    )?;
    let revision_id = deps.orchestrator.register_manifest(&manifest).context("register manifest")?;
    deps.orchestrator
        .update_service(&service, &ServiceUpdate::redeploy(revision_id.clone()))
        .context("update service")?;
    Ok(revision_id)
}

/// Derives the next manifest revision from `current`.
///
/// Fields the request cannot touch are copied as they are. The target
/// container keeps its existing environment, gains the request's set
/// entries and loses `env_vars_to_delete`. Health check fields are
/// overwritten one by one; a container without a health check only gets
/// one from a complete patch.
pub fn build_manifest(
    current: &Manifest,
    request: &UpdateRequest,
    env_vars_to_delete: &[String],
    container_name: Option<&str>,
) -> anyhow::Result<Manifest> {
    let mut next = Manifest { revision_id: None, ..current.clone() };
    if let Some(cpu) = request.cpu {
        next.cpu = Some(cpu);
    }
    if let Some(memory) = request.memory {
        next.memory = Some(memory);
    }

    let container = match container_name {
        Some(name) => next
            .containers
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| anyhow!("manifest {} has no container named {name}", current.family))?,
        None => next
            .containers
            .first_mut()
            .ok_or_else(|| anyhow!("manifest {} has no containers", current.family))?,
    };

    if let Some(environment) = &request.environment {
        for (name, value) in environment.additions() {
            match container.environment.iter_mut().find(|e| e.name == name) {
                Some(existing) => existing.value = value.to_string(),
                None => container.environment.push(EnvVar { name: name.to_string(), value: value.to_string() }),
            }
        }
    }
    container.environment.retain(|e| !env_vars_to_delete.contains(&e.name));

    if let Some(patch) = &request.health_check {
        if !patch.is_empty() && !patch.merge_into(&mut container.health_check) {
            bail!(
                "container {} has no health check; creating one needs command, interval, timeout, startPeriod and retries",
                container.name
            );
        }
    }
    Ok(next)
}
