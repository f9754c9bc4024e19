use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Milestone family tracked by the AutoPenBench evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    Command,
    Stage,
}

/// Progress on one milestone family, in the order the evaluator defined them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneProgress {
    pub total: usize,
    pub achieved: usize,
    pub achieved_list: Vec<String>,
    pub remaining_list: Vec<String>,
}

impl MilestoneProgress {
    pub fn remaining(&self) -> usize {
        self.remaining_list.len()
    }

    /// Achieved fraction, 0.0 when nothing is defined
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.achieved as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneSummary {
    pub command: MilestoneProgress,
    pub stage: MilestoneProgress,
}

/// Accumulates milestone events reported while an instance runs
#[derive(Debug, Clone, Default)]
pub struct MilestoneTracker {
    command: Vec<String>,
    stage: Vec<String>,
    achieved_command: BTreeSet<String>,
    achieved_stage: BTreeSet<String>,
}

impl MilestoneTracker {
    /// Replace the milestone definitions; achievements already recorded are kept
    pub fn define(&mut self, command: Vec<String>, stage: Vec<String>) {
        self.command = command;
        self.stage = stage;
    }

    /// Mark a milestone as reached. Returns false for names outside the definition.
    pub fn achieve(&mut self, kind: MilestoneKind, name: &str) -> bool {
        let (defined, achieved) = match kind {
            MilestoneKind::Command => (&self.command, &mut self.achieved_command),
            MilestoneKind::Stage => (&self.stage, &mut self.achieved_stage),
        };
        if defined.iter().any(|m| m == name) {
            achieved.insert(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn summary(&self) -> MilestoneSummary {
        MilestoneSummary {
            command: progress(&self.command, &self.achieved_command, |m| m.to_string()),
            stage: progress(&self.stage, &self.achieved_stage, stage_name),
        }
    }
}

fn progress(
    defined: &[String],
    achieved: &BTreeSet<String>,
    label: impl Fn(&str) -> String,
) -> MilestoneProgress {
    let (done, left): (Vec<&String>, Vec<&String>) =
        defined.iter().partition(|m| achieved.contains(*m));
    MilestoneProgress {
        total: defined.len(),
        achieved: done.len(),
        achieved_list: done.into_iter().map(|m| label(m)).collect(),
        remaining_list: left.into_iter().map(|m| label(m)).collect(),
    }
}

/// Stage milestones are "Name,description"; results keep only the name
pub fn stage_name(raw: &str) -> String {
    raw.split(',').next().unwrap_or(raw).to_string()
}
