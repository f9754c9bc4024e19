use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Category, Level};
use crate::error::RunError;

/// One AutoPenBench game: the target VM and what the agent must do there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub target: String,
    pub task: String,
    #[serde(default)]
    pub flag: String,
}

/// Task data keyed by level, then category, then instance index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    levels: BTreeMap<String, BTreeMap<String, Vec<Game>>>,
}

impl Catalog {
    /// Load the games file shipped with AutoPenBench
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read benchmark catalog: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse benchmark catalog: {}", path.display()))
    }

    #[cfg(test)]
    pub fn insert(&mut self, level: Level, category: Category, games: Vec<Game>) {
        self.levels
            .entry(level.as_str().to_string())
            .or_default()
            .insert(category.as_str().to_string(), games);
    }

    pub fn game(
        &self,
        level: Level,
        category: Category,
        instance_idx: usize,
    ) -> Result<&Game, RunError> {
        self.levels
            .get(level.as_str())
            .and_then(|categories| categories.get(category.as_str()))
            .and_then(|games| games.get(instance_idx))
            .ok_or(RunError::GameNotFound {
                level,
                category,
                instance_idx,
            })
    }

    /// Number of games listed for a category
    pub fn len(&self, level: Level, category: Category) -> usize {
        self.levels
            .get(level.as_str())
            .and_then(|categories| categories.get(category.as_str()))
            .map_or(0, Vec::len)
    }
}
