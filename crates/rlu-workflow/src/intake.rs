use rlu_core::{
    now_unix, ConsumerStatus, ExecutionContext, ResourceId, ResourceStatus, Result, RunId, ScalingBounds,
    ServiceUpdate, UpdateRequest, WorkflowError,
};
use rlu_store::{ConsumerUpdate, RecordUpdate};

use crate::consumer::propagate;
use crate::deps::{Collaborators, StackResolver};
use crate::merge::merge_config;
use crate::WorkflowSettings;

/// Validates and classifies an update request, applies the immediate side
/// effects, and writes the merged config and preliminary status in one
/// conditional record update.
///
/// Classification, in order:
/// 1. `enabled: true` on a `Stopped` record: `Starting`, scale to min capacity now.
/// 2. `enabled: false` on an `InService` record: `Stopping`, consumers go
///    `Inactive`, bounds and desired count drop to zero now.
/// 3. `autoScalingConfig`: merged into the stored bounds, applied right away
///    only when the record is `InService`.
/// 4. Config fields: merged; `Updating` when none of the above applied.
pub fn intake(
    deps: &Collaborators,
    settings: &WorkflowSettings,
    resource_id: &ResourceId,
    request: UpdateRequest,
) -> Result<ExecutionContext> {
    if request.is_empty() {
        return Err(WorkflowError::InvalidRequest("update request contains no changes".into()));
    }
    if request.enabled.is_some() && request.auto_scaling_config.is_some() {
        return Err(WorkflowError::InvalidRequest(
            "enabled and autoScalingConfig cannot be combined in one request".into(),
        ));
    }

    let record = deps.records.get(resource_id, true)?.ok_or_else(|| WorkflowError::NotFound(resource_id.clone()))?;
    let stack_ref = record
        .stack_ref
        .clone()
        .filter(|s| !s.is_blank())
        .ok_or_else(|| WorkflowError::PreconditionFailed {
            resource_id: resource_id.clone(),
            message: "record has no stack reference".into(),
        })?;
    if request.auto_scaling_config.is_some() && record.config.autoscaling.is_none() {
        return Err(WorkflowError::InvalidRequest(format!(
            "resource {resource_id} has no autoscaling config to update"
        )));
    }

    if let Some(patch) = &request.health_check {
        if record.config.health_check.is_none() && !patch.is_empty() && patch.to_health_check().is_none() {
            return Err(WorkflowError::InvalidRequest(format!(
                "resource {resource_id} has no health check; a new one needs command, interval, timeout, startPeriod and retries"
            )));
        }
    }

    let initial_status = record.status;
    let is_enable = request.enabled == Some(true);
    let is_disable = request.enabled == Some(false);
    let mut config = record.config.clone();
    let mut new_status = None;

    // Validate everything before the first side effect.
    if is_enable {
        require_transition(initial_status, ResourceStatus::Stopped, ResourceStatus::Starting)?;
        new_status = Some(ResourceStatus::Starting);
    }
    if is_disable {
        require_transition(initial_status, ResourceStatus::InService, ResourceStatus::Stopping)?;
        new_status = Some(ResourceStatus::Stopping);
    }
    let enable_bounds = if is_enable {
        let autoscaling = config.autoscaling.as_ref().ok_or_else(|| WorkflowError::PreconditionFailed {
            resource_id: resource_id.clone(),
            message: "autoscaling config is required to enable".into(),
        })?;
        Some(ScalingBounds { min: autoscaling.min_capacity, max: autoscaling.max_capacity })
    } else {
        None
    };
    let staged_bounds = match (&request.auto_scaling_config, config.autoscaling.as_mut()) {
        (Some(patch), Some(autoscaling)) => {
            patch.apply_to(autoscaling);
            Some(ScalingBounds { min: autoscaling.min_capacity, max: autoscaling.max_capacity })
        }
        _ => None,
    };
    let merged = merge_config(&mut config, &request);
    if merged.has_updates && new_status.is_none() && staged_bounds.is_none() {
        if !initial_status.can_transition(ResourceStatus::Updating) {
            return Err(WorkflowError::InvalidStateTransition { from: initial_status, to: ResourceStatus::Updating });
        }
        new_status = Some(ResourceStatus::Updating);
    }

    let run_id = RunId::new();
    let mut resolver = StackResolver::new(deps.orchestrator.as_ref(), &stack_ref);

    if let Some(bounds) = enable_bounds {
        let service = resolver.resolve().map_err(|e| WorkflowError::external("resolve stack", e))?;
        deps.autoscaler
            .register_scalable_target(&service, bounds)
            .map_err(|e| WorkflowError::external("register scalable target", e))?;
        deps.orchestrator
            .update_service(&service, &ServiceUpdate::scale_to(bounds.min))
            .map_err(|e| WorkflowError::external("scale service up", e))?;
        tracing::info!(resource_id = %resource_id, %run_id, desired = bounds.min, "scale-up requested");
    }

    if is_disable {
        propagate(deps.consumers.as_ref(), resource_id, &ConsumerUpdate::status(ConsumerStatus::Inactive));
        let service = resolver.resolve().map_err(|e| WorkflowError::external("resolve stack", e))?;
        // Bounds first, so scaling policies cannot raise the count again.
        deps.autoscaler
            .register_scalable_target(&service, ScalingBounds::ZERO)
            .map_err(|e| WorkflowError::external("register scalable target", e))?;
        deps.orchestrator
            .update_service(&service, &ServiceUpdate::scale_to(0))
            .map_err(|e| WorkflowError::external("scale service down", e))?;
        tracing::info!(resource_id = %resource_id, %run_id, "scale-down requested");
    }

    if let Some(bounds) = staged_bounds {
        if initial_status == ResourceStatus::InService {
            let service = resolver.resolve().map_err(|e| WorkflowError::external("resolve stack", e))?;
            deps.autoscaler
                .register_scalable_target(&service, bounds)
                .map_err(|e| WorkflowError::external("register scalable target", e))?;
            tracing::info!(resource_id = %resource_id, %run_id, min = bounds.min, max = bounds.max, "autoscaling bounds applied");
        } else {
            tracing::info!(resource_id = %resource_id, %run_id, status = %initial_status, "autoscaling bounds staged");
        }
    }

    if request.description.is_some() || request.groups.is_some() {
        let update = ConsumerUpdate {
            status: None,
            description: request.description.clone(),
            groups: request.groups.as_ref().map(|_| config.groups.clone()),
        };
        propagate(deps.consumers.as_ref(), resource_id, &update);
    }

    let config_changed = config != record.config;
    deps.records.update(
        resource_id,
        &RecordUpdate {
            status: new_status,
            config: config_changed.then(|| config.clone()),
            last_modified: now_unix(),
            expected_status: Some(initial_status),
        },
    )?;

    let current_status = new_status.unwrap_or(initial_status);
    let needs_deployment_update = request.touches_container() && initial_status == ResourceStatus::InService;
    tracing::info!(
        resource_id = %resource_id,
        %run_id,
        from = %initial_status,
        to = %current_status,
        is_enable,
        is_disable,
        needs_deployment_update,
        "update accepted"
    );

    Ok(ExecutionContext {
        resource_id: resource_id.clone(),
        run_id,
        stack_ref,
        update_payload: request,
        is_enable,
        is_disable,
        has_capacity_update: is_enable || is_disable,
        needs_deployment_update,
        initial_status,
        current_status,
        env_vars_to_delete: merged.env_vars_to_delete,
        new_manifest_revision_id: None,
        remaining_deployment_polls: settings.deployment_poll_budget,
        remaining_capacity_polls: settings.capacity_poll_budget,
        should_continue: false,
        deployment_update_error: None,
        deployment_poll_error: None,
        poll_error: None,
        final_status: None,
    })
}

fn require_transition(current: ResourceStatus, required: ResourceStatus, to: ResourceStatus) -> Result<()> {
    if current != required || !current.can_transition(to) {
        return Err(WorkflowError::InvalidStateTransition { from: current, to });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{id, Harness};
    use rlu_core::{AutoScalingPatch, EnvironmentPatch, FieldUpdate, HealthCheckPatch};
    use rlu_store::{CapacityBehavior, RolloutBehavior};

    fn harness(status: ResourceStatus) -> Harness {
        Harness::new(status, RolloutBehavior::CompleteAfter(0), CapacityBehavior::ConvergeAfter(0))
    }

    fn run(h: &Harness, request: UpdateRequest) -> Result<ExecutionContext> {
        intake(&h.deps, &WorkflowSettings::default(), &id(), request)
    }

    #[test]
    fn rejects_enabled_with_autoscaling_before_any_write() {
        let h = harness(ResourceStatus::Stopped);
        let request = UpdateRequest {
            enabled: Some(true),
            auto_scaling_config: Some(AutoScalingPatch { min_capacity: Some(2), ..Default::default() }),
            ..Default::default()
        };
        let err = run(&h, request).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidRequest(_)));
        assert_eq!(h.records.write_count(), 0);
        assert!(h.orchestrator.calls().is_empty());
    }

    #[test]
    fn rejects_empty_request() {
        let h = harness(ResourceStatus::InService);
        assert!(matches!(run(&h, UpdateRequest::default()), Err(WorkflowError::InvalidRequest(_))));
    }

    #[test]
    fn missing_record_is_not_found() {
        let h = harness(ResourceStatus::Stopped);
        let err = intake(
            &h.deps,
            &WorkflowSettings::default(),
            &ResourceId::from_str("ghost"),
            UpdateRequest { enabled: Some(true), ..Default::default() },
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[test]
    fn missing_stack_ref_is_precondition_failure() {
        let h = harness(ResourceStatus::Stopped);
        let mut record = h.record();
        record.stack_ref = None;
        h.records.put(record);
        let err = run(&h, UpdateRequest { enabled: Some(true), ..Default::default() }).unwrap_err();
        assert!(matches!(err, WorkflowError::PreconditionFailed { .. }));
    }

    #[test]
    fn enabling_requires_stopped() {
        let h = harness(ResourceStatus::InService);
        let before = h.record();
        let err = run(&h, UpdateRequest { enabled: Some(true), ..Default::default() }).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidStateTransition { from: ResourceStatus::InService, to: ResourceStatus::Starting }
        ));
        assert_eq!(h.record(), before);
        assert_eq!(h.records.write_count(), 0);
    }

    #[test]
    fn enabling_scales_to_min_and_marks_starting() {
        let h = harness(ResourceStatus::Stopped);
        let ctx = run(&h, UpdateRequest { enabled: Some(true), ..Default::default() }).unwrap();
        assert!(ctx.is_enable && ctx.has_capacity_update);
        assert!(!ctx.needs_deployment_update);
        assert_eq!(ctx.initial_status, ResourceStatus::Stopped);
        assert_eq!(ctx.current_status, ResourceStatus::Starting);
        assert_eq!(ctx.remaining_capacity_polls, 30);
        assert_eq!(h.record().status, ResourceStatus::Starting);
        assert_eq!(h.autoscaler.last_bounds(), Some(ScalingBounds { min: 1, max: 3 }));
        assert_eq!(h.orchestrator.service_updates(), vec![ServiceUpdate::scale_to(1)]);
        assert_eq!(h.records.write_count(), 1);
    }

    #[test]
    fn enabling_without_autoscaling_is_precondition_failure() {
        let h = harness(ResourceStatus::Stopped);
        let mut record = h.record();
        record.config.autoscaling = None;
        h.records.put(record);
        let err = run(&h, UpdateRequest { enabled: Some(true), ..Default::default() }).unwrap_err();
        assert!(matches!(err, WorkflowError::PreconditionFailed { .. }));
        assert!(h.orchestrator.calls().is_empty());
    }

    #[test]
    fn disabling_zeroes_bounds_and_marks_consumers_inactive() {
        let h = harness(ResourceStatus::InService);
        let ctx = run(&h, UpdateRequest { enabled: Some(false), ..Default::default() }).unwrap();
        assert!(ctx.is_disable && ctx.has_capacity_update);
        assert_eq!(ctx.current_status, ResourceStatus::Stopping);
        assert_eq!(h.autoscaler.last_bounds(), Some(ScalingBounds::ZERO));
        assert_eq!(h.orchestrator.service_updates(), vec![ServiceUpdate::scale_to(0)]);
        assert_eq!(h.consumers.entries_for(&id())[0].status, Some(ConsumerStatus::Inactive));
    }

    #[test]
    fn disabling_a_stopped_resource_is_rejected() {
        let h = harness(ResourceStatus::Stopped);
        let err = run(&h, UpdateRequest { enabled: Some(false), ..Default::default() }).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStateTransition { .. }));
    }

    #[test]
    fn autoscaling_on_in_service_applies_immediately() {
        let h = harness(ResourceStatus::InService);
        let request = UpdateRequest {
            auto_scaling_config: Some(AutoScalingPatch { max_capacity: Some(8), ..Default::default() }),
            ..Default::default()
        };
        let ctx = run(&h, request).unwrap();
        assert_eq!(ctx.current_status, ResourceStatus::InService);
        assert!(!ctx.has_capacity_update);
        assert_eq!(h.autoscaler.last_bounds(), Some(ScalingBounds { min: 1, max: 8 }));
        assert_eq!(h.record().config.autoscaling.unwrap().max_capacity, 8);
    }

    #[test]
    fn autoscaling_on_stopped_is_only_staged() {
        let h = harness(ResourceStatus::Stopped);
        let request = UpdateRequest {
            auto_scaling_config: Some(AutoScalingPatch { min_capacity: Some(2), ..Default::default() }),
            ..Default::default()
        };
        run(&h, request).unwrap();
        assert!(h.autoscaler.registrations().is_empty());
        assert_eq!(h.record().config.autoscaling.unwrap().min_capacity, 2);
        assert_eq!(h.record().status, ResourceStatus::Stopped);
    }

    #[test]
    fn autoscaling_without_stored_config_is_rejected() {
        let h = harness(ResourceStatus::InService);
        let mut record = h.record();
        record.config.autoscaling = None;
        h.records.put(record);
        let request = UpdateRequest {
            auto_scaling_config: Some(AutoScalingPatch { min_capacity: Some(2), ..Default::default() }),
            ..Default::default()
        };
        assert!(matches!(run(&h, request), Err(WorkflowError::InvalidRequest(_))));
    }

    #[test]
    fn partial_health_check_without_existing_check_is_rejected() {
        let h = harness(ResourceStatus::InService);
        assert_eq!(h.record().config.health_check, None);
        let request = UpdateRequest {
            health_check: Some(HealthCheckPatch { retries: Some(5), ..Default::default() }),
            ..Default::default()
        };
        assert!(matches!(run(&h, request), Err(WorkflowError::InvalidRequest(_))));
        assert_eq!(h.records.write_count(), 0);
    }

    #[test]
    fn complete_health_check_creates_one() {
        let h = harness(ResourceStatus::Stopped);
        let request = UpdateRequest {
            health_check: Some(HealthCheckPatch {
                command: Some(vec!["CMD".into(), "true".into()]),
                interval: Some(10),
                timeout: Some(2),
                start_period: Some(0),
                retries: Some(5),
            }),
            ..Default::default()
        };
        run(&h, request).unwrap();
        assert_eq!(h.record().config.health_check.map(|hc| hc.retries), Some(5));
    }

    #[test]
    fn env_change_on_in_service_needs_deployment() {
        let h = harness(ResourceStatus::InService);
        let request = UpdateRequest {
            environment: Some(EnvironmentPatch::from([
                ("X", FieldUpdate::Set("1".to_string())),
                ("Y", FieldUpdate::Delete),
            ])),
            ..Default::default()
        };
        let ctx = run(&h, request).unwrap();
        assert!(ctx.needs_deployment_update);
        assert!(!ctx.has_capacity_update);
        assert_eq!(ctx.current_status, ResourceStatus::Updating);
        assert_eq!(ctx.env_vars_to_delete, vec!["Y".to_string()]);
        let stored = h.record();
        assert_eq!(stored.status, ResourceStatus::Updating);
        assert_eq!(stored.config.environment.get("X").map(String::as_str), Some("1"));
        assert!(!stored.config.environment.contains_key("Y"));
    }

    #[test]
    fn env_change_on_stopped_skips_deployment() {
        let h = harness(ResourceStatus::Stopped);
        let request = UpdateRequest { cpu: Some(2048), ..Default::default() };
        let ctx = run(&h, request).unwrap();
        assert!(!ctx.needs_deployment_update);
        assert_eq!(ctx.current_status, ResourceStatus::Updating);
    }

    #[test]
    fn metadata_change_while_starting_is_rejected() {
        let h = harness(ResourceStatus::Starting);
        let request = UpdateRequest { description: Some("new".into()), ..Default::default() };
        assert!(matches!(run(&h, request), Err(WorkflowError::InvalidStateTransition { .. })));
    }

    #[test]
    fn description_propagates_to_consumers() {
        let h = harness(ResourceStatus::InService);
        let request = UpdateRequest {
            description: Some("renamed".into()),
            groups: Some(vec!["ops".into(), "ops".into()]),
            ..Default::default()
        };
        let ctx = run(&h, request).unwrap();
        assert!(!ctx.needs_deployment_update);
        let entry = &h.consumers.entries_for(&id())[0];
        assert_eq!(entry.description, "renamed");
        assert_eq!(entry.groups, vec!["ops".to_string()]);
    }

    #[test]
    fn orchestrator_failure_surfaces_as_external_without_write() {
        let h = harness(ResourceStatus::Stopped);
        h.orchestrator.fail("update_service");
        let err = run(&h, UpdateRequest { enabled: Some(true), ..Default::default() }).unwrap_err();
        assert!(matches!(err, WorkflowError::External { operation: "scale service up", .. }));
        assert_eq!(h.records.write_count(), 0);
    }

    #[test]
    fn concurrent_status_change_is_a_conflict() {
        struct RacingStore(Harness);
        impl rlu_store::RecordStore for RacingStore {
            fn get(
                &self,
                id: &ResourceId,
                consistent: bool,
            ) -> std::result::Result<Option<rlu_core::ResourceRecord>, rlu_core::StoreError> {
                let got = self.0.records.get(id, consistent);
                // another run flips the status right after our read
                let mut record = self.0.record();
                record.status = ResourceStatus::Stopping;
                self.0.records.put(record);
                got
            }
            fn update(&self, id: &ResourceId, update: &RecordUpdate) -> std::result::Result<(), rlu_core::StoreError> {
                self.0.records.update(id, update)
            }
        }

        let h = harness(ResourceStatus::InService);
        let mut deps = h.deps.clone();
        let store = std::sync::Arc::new(RacingStore(harness(ResourceStatus::InService)));
        deps.records = store;
        let err = intake(
            &deps,
            &WorkflowSettings::default(),
            &id(),
            UpdateRequest { description: Some("x".into()), ..Default::default() },
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict { expected: ResourceStatus::InService, .. }));
    }
}
