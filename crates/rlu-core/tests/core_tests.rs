use rlu_core::{
    same_revision, AutoScalingPatch, ExecutionContext, FieldUpdate, ResourceConfig, ResourceId, ResourceRecord,
    ResourceStatus, RunId, StackRef, UpdateRequest,
};

#[test]
fn test_record_round_trips_through_json() {
    let record = ResourceRecord {
        id: ResourceId::from_str("model-1"),
        status: ResourceStatus::InService,
        stack_ref: Some(StackRef::from_str("stack/model-1")),
        config: ResourceConfig {
            description: "chat model".into(),
            groups: vec!["admins".into()],
            cpu: 1024,
            memory: 2048,
            ..Default::default()
        },
        last_modified: 1_700_000_000,
    };
    let json = serde_json::to_string(&record).unwrap();
    assert!(json.contains("\"stackRef\":\"stack/model-1\""));
    let back: ResourceRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}

#[test]
fn test_record_without_stack_ref_parses() {
    let record: ResourceRecord = serde_json::from_str(r#"{"id":"m","status":"Stopped"}"#).unwrap();
    assert!(record.stack_ref.is_none());
    assert!(record.config.autoscaling.is_none());
}

#[test]
fn test_update_request_wire_format() {
    let req: UpdateRequest = serde_json::from_str(
        r#"{"environment":{"X":"1","Y":"LISA_MARKED_FOR_DELETION"},"autoScalingConfig":{"minCapacity":"2"}}"#,
    )
    .unwrap();
    let env = req.environment.as_ref().unwrap();
    assert_eq!(env.0["Y"], FieldUpdate::Delete);
    assert_eq!(env.additions().collect::<Vec<_>>(), vec![("X", "1")]);
    assert_eq!(req.auto_scaling_config, Some(AutoScalingPatch { min_capacity: Some(2), ..Default::default() }));
    assert!(req.touches_container());
}

#[test]
fn test_context_survives_step_boundary() {
    let ctx = ExecutionContext {
        resource_id: ResourceId::from_str("m"),
        run_id: RunId::new(),
        stack_ref: StackRef::from_str("s"),
        update_payload: UpdateRequest { enabled: Some(true), ..Default::default() },
        is_enable: true,
        is_disable: false,
        has_capacity_update: true,
        needs_deployment_update: false,
        initial_status: ResourceStatus::Stopped,
        current_status: ResourceStatus::Starting,
        env_vars_to_delete: vec![],
        new_manifest_revision_id: None,
        remaining_deployment_polls: 30,
        remaining_capacity_polls: 30,
        should_continue: false,
        deployment_update_error: None,
        deployment_poll_error: None,
        poll_error: None,
        final_status: None,
    };
    let back = ExecutionContext::from_json(ctx.to_json().unwrap()).unwrap();
    assert_eq!(back, ctx);
}

#[test]
fn test_revision_equivalence_is_symmetric() {
    let full = "arn:aws:ecs:us-east-1:1:task-definition/mcp-server:12";
    assert!(same_revision(full, "mcp-server:12"));
    assert!(same_revision("mcp-server:12", full));
    assert!(!same_revision("mcp-server:1", full));
}
