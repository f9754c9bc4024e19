use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use crate::agent::{create_instruction, AgentBackend, AgentRequest};
use crate::bench::{
    lookup, Catalog, Category, CategoryConfig, InstanceHeader, InstanceResult, Level, RunStore,
    RunSummary, BENCHMARK,
};
use crate::error::RunError;

/// Drives the agent across benchmark instances, one at a time
pub struct ExperimentRunner<B> {
    backend: B,
    catalog: Catalog,
    store: RunStore,
    llm_model: String,
    seconds_per_iteration: u64,
}

impl<B: AgentBackend> ExperimentRunner<B> {
    pub fn new(
        backend: B,
        catalog: Catalog,
        store: RunStore,
        llm_model: impl Into<String>,
        seconds_per_iteration: u64,
    ) -> Self {
        Self {
            backend,
            catalog,
            store,
            llm_model: llm_model.into(),
            seconds_per_iteration,
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Run one instance and persist its record. Never fails: errors become failed records.
    pub async fn run_single_instance(
        &self,
        config: &CategoryConfig,
        instance_idx: usize,
    ) -> InstanceResult {
        let (level, category) = (config.level, config.category);
        tracing::info!("Running: {}/{} - Instance {}", level, category, instance_idx);

        let timeout_seconds = u64::from(config.max_iterations) * self.seconds_per_iteration;
        let mut header = InstanceHeader {
            level,
            category,
            instance_idx,
            target: format!("vm{}", instance_idx),
            task: String::new(),
            llm_model: self.llm_model.clone(),
            max_iterations: config.max_iterations,
            timeout_seconds,
        };

        let game = match self.catalog.game(level, category, instance_idx) {
            Ok(game) => game,
            Err(e) => {
                tracing::error!("Failed to run instance {}: {}", instance_idx, e);
                return self.record(InstanceResult::failed(header, e.to_string()));
            }
        };
        header.target = game.target.clone();
        header.task = game.task.clone();
        tracing::info!(target_vm = %game.target, "Task: {}", preview(&game.task, 100));

        let stem = RunStore::instance_stem(level, category, instance_idx, &game.target);
        let artifacts = match self.store.instance_dir(&stem) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!("Failed to run instance {}: {:#}", instance_idx, e);
                return self.record(InstanceResult::failed(header, format!("{:#}", e)));
            }
        };

        let tools = config.tools_for(instance_idx);
        let request = AgentRequest {
            session_id: session_id(level, category, instance_idx),
            level,
            category,
            instance_idx,
            target: game.target.clone(),
            task: game.task.clone(),
            flag: game.flag.clone(),
            instruction: create_instruction(&game.task, &tools, None),
            max_iterations: config.max_iterations,
            tools,
            trajectory_path: artifacts.join("trajectory.json"),
        };

        tracing::info!(
            session = %request.session_id,
            "Running agent (max {} iterations, {}s)",
            config.max_iterations,
            timeout_seconds
        );
        let outcome = self
            .backend
            .run(&request, &artifacts, Duration::from_secs(timeout_seconds))
            .await;
        let result = InstanceResult::from_outcome(header, outcome);

        tracing::info!(
            success = result.success,
            state = %result.final_agent_state,
            "Results for {}/{}/{}: iterations {}/{}, command milestones {}/{}, duration {:.1}s",
            level,
            category,
            instance_idx,
            result.iterations,
            result.max_iterations,
            result.reached_command_milestones,
            result.total_command_milestones,
            result.duration_seconds
        );
        self.record(result)
    }

    /// Run every instance of a category, or only `instance_idx`
    pub async fn run_category(
        &self,
        level: Level,
        category: Category,
        instance_idx: Option<usize>,
    ) -> Result<Vec<InstanceResult>, RunError> {
        let config = lookup(level, category)?;
        let indices = config.select_indices(instance_idx)?;
        let listed = self.catalog.len(level, category);
        if listed < config.num_instances {
            tracing::warn!(
                "Catalog lists {} games for {}/{}, expected {}",
                listed,
                level,
                category,
                config.num_instances
            );
        }
        tracing::info!(
            "Category: {}/{} - instances {:?} (of {}), max iterations {}",
            level,
            category,
            indices,
            config.num_instances,
            config.max_iterations
        );

        let mut results = Vec::with_capacity(indices.len());
        for idx in indices {
            results.push(self.run_single_instance(config, idx).await);
        }
        Ok(results)
    }

    /// Run the whole benchmark table in order
    pub async fn run_all(&self) -> Vec<InstanceResult> {
        let mut results = Vec::new();
        for config in BENCHMARK.iter() {
            for idx in 0..config.num_instances {
                results.push(self.run_single_instance(config, idx).await);
            }
        }
        results
    }

    /// Aggregate results and write summary.json
    pub fn summarize(
        &self,
        results: Vec<InstanceResult>,
        scope: Option<(Level, Category)>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::new(self.store.timestamp(), &self.llm_model, results);
        if let Some((level, category)) = scope {
            summary = summary.for_category(level, category);
        }
        let path = self.store.save_summary(&summary)?;
        tracing::info!(path = %path.display(), "Summary saved");
        Ok(summary)
    }

    fn record(&self, result: InstanceResult) -> InstanceResult {
        match self.store.save_instance(&result) {
            Ok(path) => tracing::debug!(path = %path.display(), "Instance result saved"),
            Err(e) => tracing::error!("Failed to save instance result: {:#}", e),
        }
        result
    }
}

fn session_id(level: Level, category: Category, instance_idx: usize) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("openhands_{}_{}_{}_{}", level, category, instance_idx, &suffix[..8])
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
