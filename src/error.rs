use thiserror::Error;

use crate::bench::{Category, Level};

/// Failures the CLI reports before (or instead of) running instances
#[derive(Debug, Error)]
pub enum RunError {
    #[error("missing credentials: {0}")]
    MissingCredential(String),

    #[error("invalid setting {name}={value}: {reason}")]
    InvalidSetting {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid level/category: {level}/{category}")]
    InvalidCategory { level: Level, category: Category },

    #[error("instance_idx must be 0..{} for {level}/{category} (got {instance_idx})", .num_instances - 1)]
    InstanceOutOfRange {
        level: Level,
        category: Category,
        instance_idx: usize,
        num_instances: usize,
    },

    #[error("no game for {level}/{category} instance {instance_idx} in the benchmark catalog")]
    GameNotFound {
        level: Level,
        category: Category,
        instance_idx: usize,
    },
}
