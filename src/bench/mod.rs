mod catalog;
mod config;
mod milestones;
mod result;
mod store;

pub use catalog::Catalog;
#[cfg(test)]
pub use catalog::Game;
pub use config::{available_combinations, lookup, total_instances, Category, CategoryConfig, Level, Tool, BENCHMARK};
pub use milestones::{MilestoneKind, MilestoneTracker};
#[cfg(test)]
pub use milestones::{MilestoneProgress, MilestoneSummary};
pub use result::{
    AgentState, InstanceHeader, InstanceResult, Metrics, RunOutcome, RunSummary,
};
pub use store::RunStore;
