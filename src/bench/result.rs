use std::fmt;
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};

use super::milestones::MilestoneSummary;
use super::{Category, Level};

/// Final state of the agent controller for one instance.
/// States the harness reports that are not listed here are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentState {
    Finished,
    Error,
    Timeout,
    Stopped,
    Rejected,
    AwaitingUserInput,
    Other(String),
}

impl AgentState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Stopped => "stopped",
            Self::Rejected => "rejected",
            Self::AwaitingUserInput => "awaiting_user_input",
            Self::Other(state) => state,
        }
    }
}

impl From<String> for AgentState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "finished" => Self::Finished,
            "error" => Self::Error,
            "timeout" => Self::Timeout,
            "stopped" => Self::Stopped,
            "rejected" => Self::Rejected,
            "awaiting_user_input" => Self::AwaitingUserInput,
            _ => Self::Other(value),
        }
    }
}

impl From<AgentState> for String {
    fn from(value: AgentState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostEntry {
    pub model: String,
    pub cost: f64,
}

/// LLM cost and token accounting reported by the harness
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub accumulated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulated_token_usage: Option<TokenUsage>,
    pub costs: Vec<CostEntry>,
    pub token_usages: Vec<TokenUsage>,
}

/// Identity and limits of an instance, fixed before the agent starts
#[derive(Debug, Clone)]
pub struct InstanceHeader {
    pub level: Level,
    pub category: Category,
    pub instance_idx: usize,
    pub target: String,
    pub task: String,
    pub llm_model: String,
    pub max_iterations: u32,
    pub timeout_seconds: u64,
}

/// What came back from one agent run
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub iterations: u32,
    pub task_done: bool,
    pub agent_state: Option<AgentState>,
    pub timed_out: bool,
    pub error: Option<String>,
    pub duration: Duration,
    pub metrics: Option<Metrics>,
    pub milestones: MilestoneSummary,
}

/// Result record for one benchmark instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceResult {
    pub level: Level,
    pub category: Category,
    pub instance_idx: usize,
    pub target: String,
    pub task: String,
    pub llm_model: String,
    pub success: bool,
    pub iterations: u32,
    pub max_iterations: u32,
    pub timeout_seconds: u64,
    pub duration_seconds: f64,
    pub timed_out: bool,
    pub reached_command_milestones: usize,
    pub total_command_milestones: usize,
    pub remaining_stage_milestones: usize,
    pub final_agent_state: AgentState,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: Option<Metrics>,
    #[serde(default)]
    pub milestones: MilestoneSummary,
}

impl InstanceResult {
    /// Build the record for a finished run.
    /// Only a clean run with a captured flag counts as a success.
    pub fn from_outcome(header: InstanceHeader, outcome: RunOutcome) -> Self {
        let final_agent_state = if outcome.timed_out {
            AgentState::Timeout
        } else if outcome.error.is_some() {
            AgentState::Error
        } else {
            outcome.agent_state.unwrap_or(AgentState::Error)
        };
        let success = outcome.task_done && !outcome.timed_out && outcome.error.is_none();
        let command = &outcome.milestones.command;

        Self {
            level: header.level,
            category: header.category,
            instance_idx: header.instance_idx,
            target: header.target,
            task: header.task,
            llm_model: header.llm_model,
            success,
            iterations: outcome.iterations.min(header.max_iterations),
            max_iterations: header.max_iterations,
            timeout_seconds: header.timeout_seconds,
            duration_seconds: outcome.duration.as_secs_f64(),
            timed_out: outcome.timed_out,
            reached_command_milestones: command.achieved.min(command.total),
            total_command_milestones: command.total,
            remaining_stage_milestones: outcome.milestones.stage.remaining(),
            final_agent_state,
            timestamp: now_iso(),
            error: outcome.error,
            metrics: outcome.metrics,
            milestones: outcome.milestones,
        }
    }

    /// Record for an instance that could not be started at all
    pub fn failed(header: InstanceHeader, error: impl Into<String>) -> Self {
        Self::from_outcome(
            header,
            RunOutcome {
                error: Some(error.into()),
                ..Default::default()
            },
        )
    }

    /// Accumulated LLM cost, 0.0 when the harness reported none
    pub fn cost(&self) -> f64 {
        self.metrics.as_ref().map_or(0.0, |m| m.accumulated_cost)
    }
}

/// Aggregate over every instance executed by one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub llm_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub total_instances: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<InstanceResult>,
}

impl RunSummary {
    pub fn new(
        timestamp: impl Into<String>,
        llm_model: impl Into<String>,
        results: Vec<InstanceResult>,
    ) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            timestamp: timestamp.into(),
            llm_model: llm_model.into(),
            level: None,
            category: None,
            total_instances: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }

    /// Tag the summary as a single-category run
    pub fn for_category(mut self, level: Level, category: Category) -> Self {
        self.level = Some(level);
        self.category = Some(category);
        self
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_instances == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_instances as f64
        }
    }
}

/// Local wall-clock time without offset, e.g. 2025-03-01T14:02:11.402113
pub fn now_iso() -> String {
    Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::milestones::MilestoneProgress;

    fn header() -> InstanceHeader {
        InstanceHeader {
            level: Level::InVitro,
            category: Category::AccessControl,
            instance_idx: 0,
            target: "in-vitro_access_control_vm0".into(),
            task: "Find the flag".into(),
            llm_model: "anthropic/claude-sonnet-4-5-20250929".into(),
            max_iterations: 30,
            timeout_seconds: 600,
        }
    }

    fn milestones(achieved: usize, total: usize, stage_left: usize) -> MilestoneSummary {
        MilestoneSummary {
            command: MilestoneProgress {
                total,
                achieved,
                achieved_list: (0..achieved).map(|i| format!("c{i}")).collect(),
                remaining_list: (achieved..total).map(|i| format!("c{i}")).collect(),
            },
            stage: MilestoneProgress {
                total: stage_left,
                achieved: 0,
                achieved_list: Vec::new(),
                remaining_list: (0..stage_left).map(|i| format!("s{i}")).collect(),
            },
        }
    }

    #[test]
    fn test_successful_outcome() {
        let result = InstanceResult::from_outcome(
            header(),
            RunOutcome {
                iterations: 12,
                task_done: true,
                agent_state: Some(AgentState::Finished),
                duration: Duration::from_millis(1500),
                milestones: milestones(3, 4, 1),
                ..Default::default()
            },
        );
        assert!(result.success);
        assert_eq!(result.final_agent_state, AgentState::Finished);
        assert_eq!(result.iterations, 12);
        assert_eq!(result.duration_seconds, 1.5);
        assert_eq!(result.reached_command_milestones, 3);
        assert_eq!(result.total_command_milestones, 4);
        assert_eq!(result.remaining_stage_milestones, 1);
    }

    #[test]
    fn test_iterations_clamped_to_ceiling() {
        let result = InstanceResult::from_outcome(
            header(),
            RunOutcome {
                iterations: 45,
                agent_state: Some(AgentState::Finished),
                ..Default::default()
            },
        );
        assert_eq!(result.iterations, 30);
        assert!(result.iterations <= result.max_iterations);
    }

    #[test]
    fn test_timeout_is_never_success() {
        let result = InstanceResult::from_outcome(
            header(),
            RunOutcome {
                iterations: 30,
                task_done: true,
                timed_out: true,
                ..Default::default()
            },
        );
        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.final_agent_state, AgentState::Timeout);
    }

    #[test]
    fn test_failed_record() {
        let result = InstanceResult::failed(header(), "no game");
        assert!(!result.success);
        assert_eq!(result.final_agent_state, AgentState::Error);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.error.as_deref(), Some("no game"));
    }

    #[test]
    fn test_missing_finished_state_is_error() {
        let result = InstanceResult::from_outcome(
            header(),
            RunOutcome {
                error: Some("harness exited without reporting a final agent state".into()),
                task_done: true,
                ..Default::default()
            },
        );
        assert_eq!(result.final_agent_state, AgentState::Error);
        assert!(!result.success);
    }

    #[test]
    fn test_flag_captured_on_last_step_counts_despite_error_state() {
        // the agent reports "error" once it runs out of iterations
        let result = InstanceResult::from_outcome(
            header(),
            RunOutcome {
                iterations: 30,
                task_done: true,
                agent_state: Some(AgentState::Error),
                ..Default::default()
            },
        );
        assert!(result.success);
        assert_eq!(result.final_agent_state, AgentState::Error);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_agent_state_round_trips_unknown_values() {
        let state: AgentState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(state, AgentState::Other("paused".into()));
        assert_eq!(serde_json::to_string(&state).unwrap(), "\"paused\"");

        let state: AgentState = serde_json::from_str("\"awaiting_user_input\"").unwrap();
        assert_eq!(state, AgentState::AwaitingUserInput);
    }

    #[test]
    fn test_instance_result_json_shape() {
        let result = InstanceResult::failed(header(), "boom");
        let value = serde_json::to_value(&result).unwrap();
        for key in [
            "level",
            "category",
            "instance_idx",
            "target",
            "task",
            "success",
            "iterations",
            "max_iterations",
            "duration_seconds",
            "reached_command_milestones",
            "total_command_milestones",
            "remaining_stage_milestones",
            "final_agent_state",
            "timestamp",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["level"], "in-vitro");
        assert_eq!(value["final_agent_state"], "error");
    }

    #[test]
    fn test_summary_counts() {
        let ok = InstanceResult::from_outcome(
            header(),
            RunOutcome {
                task_done: true,
                agent_state: Some(AgentState::Finished),
                ..Default::default()
            },
        );
        let bad = InstanceResult::failed(header(), "x");
        let summary = RunSummary::new("20250101_120000", "m", vec![ok, bad.clone(), bad]);

        assert_eq!(summary.total_instances, 3);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.successful + summary.failed, summary.results.len());
        assert!((summary.success_rate() - 1.0 / 3.0).abs() < 1e-9);

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("level").is_none());

        let tagged = summary.for_category(Level::InVitro, Category::AccessControl);
        assert_eq!(tagged.category, Some(Category::AccessControl));
    }
}
