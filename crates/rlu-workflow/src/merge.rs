use rlu_core::{apply_map_updates, ResourceConfig, UpdateRequest};

/// What a merge changed besides the config itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub has_updates: bool,
    /// Environment keys removed from the config. Not stored; the deployment
    /// mutator removes them from the manifest as well.
    pub env_vars_to_delete: Vec<String>,
}

/// Applies the config fields of `request` onto `config`.
///
/// `enabled` and `autoScalingConfig` are not config fields and are ignored.
pub fn merge_config(config: &mut ResourceConfig, request: &UpdateRequest) -> MergeOutcome {
    let mut outcome = MergeOutcome { has_updates: request.has_config_fields(), ..Default::default() };

    if let Some(description) = &request.description {
        config.description = description.clone();
    }
    if let Some(groups) = &request.groups {
        config.groups = dedup_keep_order(groups);
    }
    if let Some(environment) = &request.environment {
        outcome.env_vars_to_delete = apply_map_updates(&mut config.environment, environment.entries());
    }
    if let Some(cpu) = request.cpu {
        config.cpu = cpu;
    }
    if let Some(memory) = request.memory {
        config.memory = memory;
    }
    if let Some(patch) = &request.health_check {
        // intake rejects a partial patch when there is nothing to merge onto
        patch.merge_into(&mut config.health_check);
    }
    if let Some(lb) = &request.load_balancer_health_check {
        config.load_balancer_health_check = Some(lb.clone());
    }
    outcome
}

fn dedup_keep_order(groups: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(groups.len());
    for g in groups {
        if !out.contains(g) {
            out.push(g.clone());
        }
    }
    out
}
