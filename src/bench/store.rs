use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use walkdir::WalkDir;

use super::{Category, InstanceResult, Level, RunSummary};

const SUMMARY_FILE: &str = "summary.json";

/// Owns one run's log directory: per-instance records, artifacts and the summary
pub struct RunStore {
    run_dir: PathBuf,
    timestamp: String,
}

impl RunStore {
    /// Create `<log_root>/<timestamp>` for a new run.
    /// A run already owning that directory pushes this one to `<timestamp>_1`, `_2`, ...
    pub fn create(log_root: impl AsRef<Path>, timestamp: impl Into<String>) -> Result<Self> {
        let log_root = log_root.as_ref();
        let base = timestamp.into();
        fs::create_dir_all(log_root)
            .with_context(|| format!("Failed to create log directory: {}", log_root.display()))?;

        let mut timestamp = base.clone();
        let mut attempt = 0;
        loop {
            let run_dir = log_root.join(&timestamp);
            match fs::create_dir(&run_dir) {
                Ok(()) => return Ok(Self { run_dir, timestamp }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    timestamp = format!("{}_{}", base, attempt);
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create log directory: {}", run_dir.display())
                    })
                }
            }
        }
    }

    /// Run identifier in YYYYMMDD_HHMMSS form
    pub fn new_timestamp() -> String {
        Local::now().format("%Y%m%d_%H%M%S").to_string()
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `<level>_<category>_<idx>_<target>`, shared by the record file and the artifact directory
    pub fn instance_stem(level: Level, category: Category, instance_idx: usize, target: &str) -> String {
        format!("{}_{}_{}_{}", level, category, instance_idx, sanitize(target))
    }

    /// Directory for harness artifacts (stdout.log, trajectory.json)
    pub fn instance_dir(&self, stem: &str) -> Result<PathBuf> {
        let dir = self.run_dir.join(stem);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create instance directory: {}", dir.display()))?;
        Ok(dir)
    }

    /// Write one instance record next to the summary
    pub fn save_instance(&self, result: &InstanceResult) -> Result<PathBuf> {
        let stem = Self::instance_stem(
            result.level,
            result.category,
            result.instance_idx,
            &result.target,
        );
        let path = self.run_dir.join(format!("{}.json", stem));
        write_json(&path, result)?;
        Ok(path)
    }

    pub fn save_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
        let path = self.run_dir.join(SUMMARY_FILE);
        write_json(&path, summary)?;
        Ok(path)
    }

    #[cfg(test)]
    pub fn load_summary(run_dir: &Path) -> Result<RunSummary> {
        let path = run_dir.join(SUMMARY_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Every instance record below `dir`, from any number of runs.
    /// Files that are not instance records are skipped.
    pub fn load_results(dir: &Path) -> Result<Vec<InstanceResult>> {
        if !dir.is_dir() {
            anyhow::bail!("Directory not found: {}", dir.display());
        }

        let mut results = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
            if !entry.file_type().is_file() || !is_instance_record(entry.path()) {
                continue;
            }
            let content = match fs::read_to_string(entry.path()) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), "Failed to read result: {}", e);
                    continue;
                }
            };
            match serde_json::from_str::<InstanceResult>(&content) {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), "Failed to parse result: {}", e)
                }
            }
        }
        Ok(results)
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize record")?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn is_instance_record(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".json")
        && [Level::InVitro, Level::RealWorld]
            .iter()
            .any(|level| name.starts_with(&format!("{}_", level)))
}

/// Keep targets usable as a single path component
fn sanitize(target: &str) -> String {
    target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::result::{InstanceHeader, RunOutcome};
    use crate::bench::AgentState;
    use tempfile::tempdir;

    fn result(category: Category, idx: usize, success: bool) -> InstanceResult {
        InstanceResult::from_outcome(
            InstanceHeader {
                level: Level::InVitro,
                category,
                instance_idx: idx,
                target: format!("in-vitro_{}_vm{}", category, idx),
                task: "task".into(),
                llm_model: "m".into(),
                max_iterations: 30,
                timeout_seconds: 600,
            },
            RunOutcome {
                task_done: success,
                agent_state: Some(AgentState::Finished),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_store_layout_and_reload() {
        let dir = tempdir().unwrap();
        let store = RunStore::create(dir.path(), "20250101_120000").unwrap();
        assert!(store.run_dir().ends_with("20250101_120000"));

        let first = result(Category::AccessControl, 0, true);
        let second = result(Category::WebSecurity, 3, false);
        let path = store.save_instance(&first).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "in-vitro_access_control_0_in-vitro_access_control_vm0.json"
        );
        store.save_instance(&second).unwrap();

        // harness artifacts in the instance directory are not records
        let artifacts = store
            .instance_dir("in-vitro_access_control_0_in-vitro_access_control_vm0")
            .unwrap();
        std::fs::write(artifacts.join("trajectory.json"), "[]").unwrap();

        let summary = RunSummary::new(store.timestamp(), "m", vec![first.clone(), second]);
        store.save_summary(&summary).unwrap();

        let loaded = RunStore::load_summary(store.run_dir()).unwrap();
        assert_eq!(loaded, summary);

        let results = RunStore::load_results(dir.path()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.contains(&first));
    }

    #[test]
    fn test_runs_in_the_same_second_get_separate_directories() {
        let dir = tempdir().unwrap();
        let first = RunStore::create(dir.path(), "20250101_120000").unwrap();
        let second = RunStore::create(dir.path(), "20250101_120000").unwrap();
        let third = RunStore::create(dir.path(), "20250101_120000").unwrap();

        assert_ne!(first.run_dir(), second.run_dir());
        assert_eq!(second.timestamp(), "20250101_120000_1");
        assert_eq!(third.timestamp(), "20250101_120000_2");

        let summary = RunSummary::new(first.timestamp(), "m", Vec::new());
        first.save_summary(&summary).unwrap();
        second
            .save_summary(&RunSummary::new(second.timestamp(), "m", Vec::new()))
            .unwrap();
        assert_eq!(RunStore::load_summary(first.run_dir()).unwrap(), summary);
    }

    #[test]
    fn test_load_results_missing_dir() {
        let dir = tempdir().unwrap();
        assert!(RunStore::load_results(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_instance_stem_sanitizes_target() {
        assert_eq!(
            RunStore::instance_stem(Level::RealWorld, Category::Cve, 7, "cve/vm 7"),
            "real-world_cve_7_cve_vm_7"
        );
    }

    #[test]
    fn test_timestamp_format() {
        let ts = RunStore::new_timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "_");
        assert!(ts.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }
}
