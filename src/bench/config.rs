use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Benchmark level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum Level {
    InVitro,
    RealWorld,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InVitro => "in-vitro",
            Self::RealWorld => "real-world",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task category within a level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Category {
    AccessControl,
    NetworkSecurity,
    Cryptography,
    WebSecurity,
    Cve,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessControl => "access_control",
            Self::NetworkSecurity => "network_security",
            Self::Cryptography => "cryptography",
            Self::WebSecurity => "web_security",
            Self::Cve => "cve",
        }
    }

    /// Short label used in result tables
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Self::AccessControl => "AC",
            Self::NetworkSecurity => "NS",
            Self::Cryptography => "CRPT",
            Self::WebSecurity => "WS",
            Self::Cve => "CVE",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra agent tools enabled for specific instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    WriteFile,
}

/// Per-category run parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryConfig {
    pub level: Level,
    pub category: Category,
    pub num_instances: usize,
    pub max_iterations: u32,
    /// Instance indices that get the write_file tool
    pub write_file_instances: &'static [usize],
}

impl CategoryConfig {
    /// Tools enabled for one instance beyond the defaults
    pub fn tools_for(&self, instance_idx: usize) -> Vec<Tool> {
        if self.write_file_instances.contains(&instance_idx) {
            vec![Tool::WriteFile]
        } else {
            Vec::new()
        }
    }

    /// Indices to run: all of them, or just the requested one
    pub fn select_indices(&self, instance_idx: Option<usize>) -> Result<Vec<usize>, RunError> {
        match instance_idx {
            Some(idx) if idx >= self.num_instances => Err(RunError::InstanceOutOfRange {
                level: self.level,
                category: self.category,
                instance_idx: idx,
                num_instances: self.num_instances,
            }),
            Some(idx) => Ok(vec![idx]),
            None => Ok((0..self.num_instances).collect()),
        }
    }
}

/// Step budgets and instance counts used in the published AutoPenBench experiments.
/// cve spans vm0..vm10.
pub const BENCHMARK: [CategoryConfig; 5] = [
    CategoryConfig {
        level: Level::InVitro,
        category: Category::AccessControl,
        num_instances: 5,
        max_iterations: 30,
        write_file_instances: &[],
    },
    CategoryConfig {
        level: Level::InVitro,
        category: Category::NetworkSecurity,
        num_instances: 6,
        max_iterations: 30,
        // vm5 is served by the vm5a image
        write_file_instances: &[4, 5],
    },
    CategoryConfig {
        level: Level::InVitro,
        category: Category::Cryptography,
        num_instances: 4,
        max_iterations: 30,
        write_file_instances: &[2, 3],
    },
    CategoryConfig {
        level: Level::InVitro,
        category: Category::WebSecurity,
        num_instances: 7,
        max_iterations: 30,
        write_file_instances: &[],
    },
    CategoryConfig {
        level: Level::RealWorld,
        category: Category::Cve,
        num_instances: 11,
        max_iterations: 60,
        write_file_instances: &[],
    },
];

/// Look up the configuration for a level/category pair
pub fn lookup(level: Level, category: Category) -> Result<&'static CategoryConfig, RunError> {
    BENCHMARK
        .iter()
        .find(|c| c.level == level && c.category == category)
        .ok_or(RunError::InvalidCategory { level, category })
}

/// Total number of instances across the whole table
pub fn total_instances() -> usize {
    BENCHMARK.iter().map(|c| c.num_instances).sum()
}

/// "level/category" pairs, for error output
pub fn available_combinations() -> Vec<String> {
    BENCHMARK
        .iter()
        .map(|c| format!("{}/{}", c.level, c.category))
        .collect()
}
