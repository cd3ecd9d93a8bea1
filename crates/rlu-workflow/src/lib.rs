pub mod config;
pub mod consumer;
pub mod deploy;
pub mod deps;
pub mod engine;
pub mod finalize;
pub mod intake;
pub mod merge;
pub mod poll;
pub mod scenario;

#[cfg(test)]
mod testkit;

pub use config::*;
pub use deploy::*;
pub use deps::*;
pub use engine::*;
pub use finalize::*;
pub use intake::*;
pub use merge::*;
pub use poll::*;

#[cfg(test)]
mod scenario_tests {
    use super::scenario::*;
    use super::WorkflowSettings;
    use std::path::Path;

    fn run(dir: &str) -> (Scenario, ScenarioOutcome) {
        let p = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/scenarios").join(dir);
        simulate(&p, &WorkflowSettings::default()).unwrap()
    }

    #[test]
    fn every_fixture_meets_its_expectations() {
        for dir in ["SC-A-enable", "SC-B-env-update", "SC-C-capacity-timeout", "SC-D-disable", "SC-E-rejected"] {
            let (scenario, outcome) = run(dir);
            scenario
                .expected
                .check(&outcome, None)
                .unwrap_or_else(|e| panic!("{}: {e:#}", scenario.scenario_id));
        }
    }

    #[test]
    fn scenario_c_rolls_back_once() {
        let (_, outcome) = run("SC-C-capacity-timeout");
        let ctx = outcome.context.as_ref().unwrap();
        assert_eq!(ctx.final_status, Some(rlu_core::ResourceStatus::Stopped));
        assert_eq!(ctx.remaining_capacity_polls, 0);
        assert_eq!(outcome.zero_scale_calls(), 1);
    }
}
