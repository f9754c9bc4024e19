use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::harness::AgentSpec;
use crate::bench::{
    AgentState, Category, Level, Metrics, MilestoneKind, MilestoneTracker, RunOutcome, Tool,
};

/// Marks a harness stdout line as a protocol event rather than agent chatter
pub const EVENT_PREFIX: &str = "AUTOPEN_EVENT ";

/// Time the harness gets after SIGTERM to save its trajectory before SIGKILL
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Written to the harness's stdin as a single JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub session_id: String,
    pub level: Level,
    pub category: Category,
    pub instance_idx: usize,
    pub target: String,
    pub task: String,
    pub flag: String,
    pub instruction: String,
    pub max_iterations: u32,
    pub tools: Vec<Tool>,
    pub trajectory_path: PathBuf,
}

/// Progress reported by the harness on stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HarnessEvent {
    /// Milestones the evaluator will score this instance against
    Milestones {
        #[serde(default)]
        command: Vec<String>,
        #[serde(default)]
        stage: Vec<String>,
    },
    Step {
        iteration: u32,
    },
    Milestone {
        kind: MilestoneKind,
        name: String,
    },
    /// The driver accepted the submitted flag
    TaskDone,
    Finished {
        agent_state: AgentState,
        #[serde(default)]
        metrics: Option<Metrics>,
    },
}

impl HarnessEvent {
    /// None for plain output lines
    pub fn parse_line(line: &str) -> Option<serde_json::Result<Self>> {
        line.strip_prefix(EVENT_PREFIX)
            .map(|payload| serde_json::from_str(payload.trim()))
    }
}

/// Accumulated state of a running instance
#[derive(Debug, Default)]
pub struct RunProgress {
    iterations: u32,
    task_done: bool,
    agent_state: Option<AgentState>,
    metrics: Option<Metrics>,
    milestones: MilestoneTracker,
}

impl RunProgress {
    pub fn apply(&mut self, event: HarnessEvent) {
        match event {
            HarnessEvent::Milestones { command, stage } => {
                tracing::debug!(
                    command = command.len(),
                    stage = stage.len(),
                    "Evaluator milestones loaded"
                );
                self.milestones.define(command, stage);
            }
            HarnessEvent::Step { iteration } => {
                tracing::debug!(iteration, "Agent step");
                self.iterations = self.iterations.max(iteration);
            }
            HarnessEvent::Milestone { kind, name } => {
                if self.milestones.achieve(kind, &name) {
                    tracing::info!(?kind, milestone = %name, "Milestone reached");
                } else {
                    tracing::warn!(?kind, milestone = %name, "Unknown milestone reported");
                }
            }
            HarnessEvent::TaskDone => {
                tracing::info!("Flag captured");
                self.task_done = true;
            }
            HarnessEvent::Finished {
                agent_state,
                metrics,
            } => {
                self.agent_state = Some(agent_state);
                self.metrics = metrics;
            }
        }
    }

    pub fn finished(&self) -> bool {
        self.agent_state.is_some()
    }

    pub fn into_outcome(self, status: AgentStatus, duration: Duration) -> RunOutcome {
        let (timed_out, error) = match status {
            AgentStatus::Completed => (false, None),
            AgentStatus::TimedOut => (true, None),
            AgentStatus::Failed(reason) => (false, Some(reason)),
        };
        RunOutcome {
            iterations: self.iterations,
            task_done: self.task_done,
            agent_state: self.agent_state,
            timed_out,
            error,
            duration,
            metrics: self.metrics,
            milestones: self.milestones.summary(),
        }
    }
}

/// How the harness process ended
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStatus {
    Completed,
    TimedOut,
    Failed(String),
}

/// Runs the agent on one instance. Implementations never fail: problems land in the outcome.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn run(&self, request: &AgentRequest, artifacts: &Path, limit: Duration) -> RunOutcome;
}

/// Spawns the harness as a child process per instance
pub struct ProcessBackend {
    spec: AgentSpec,
    env: Vec<(String, String)>,
}

impl ProcessBackend {
    pub fn new(spec: AgentSpec, env: Vec<(String, String)>) -> Self {
        Self { spec, env }
    }

    async fn drive(
        &self,
        request: &AgentRequest,
        artifacts: &Path,
        limit: Duration,
        progress: &mut RunProgress,
    ) -> Result<AgentStatus> {
        let payload = serde_json::to_vec(request).context("Failed to serialize agent request")?;

        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group, so a timeout reaches everything the harness started
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start {}", self.spec.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // a harness that exits without reading surfaces through its exit status
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::warn!(session = %request.session_id, "Failed to send request to harness: {}", e);
            }
        }

        let (tx, mut rx) = mpsc::channel::<String>(100);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, "", tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, "[stderr] ", tx.clone());
        }
        drop(tx);

        let log_path = artifacts.join("stdout.log");
        let mut log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .with_context(|| format!("Failed to open {}", log_path.display()))?;

        let pump = async {
            while let Some(line) = rx.recv().await {
                let _ = log_file.write_all(format!("{}\n", line).as_bytes()).await;
                match HarnessEvent::parse_line(&line) {
                    Some(Ok(event)) => progress.apply(event),
                    Some(Err(e)) => tracing::warn!("Malformed harness event: {}", e),
                    None => tracing::trace!("{}", line),
                }
            }
            let _ = log_file.flush().await;
            child.wait().await
        };
        let waited = tokio::time::timeout(limit, pump).await;

        match waited {
            Ok(Ok(status)) if status.success() => {
                if progress.finished() {
                    Ok(AgentStatus::Completed)
                } else {
                    Ok(AgentStatus::Failed(
                        "harness exited without reporting a final agent state".into(),
                    ))
                }
            }
            Ok(Ok(status)) => Ok(AgentStatus::Failed(format!(
                "harness exited with code {:?}",
                status.code()
            ))),
            Ok(Err(e)) => Err(e).context("Failed to wait for agent harness"),
            Err(_) => {
                tracing::warn!(
                    session = %request.session_id,
                    "Timeout after {}s ({:.1} minutes)",
                    limit.as_secs(),
                    limit.as_secs_f64() / 60.0
                );
                terminate(&mut child, TERMINATE_GRACE).await;
                Ok(AgentStatus::TimedOut)
            }
        }
    }
}

#[async_trait]
impl AgentBackend for ProcessBackend {
    async fn run(&self, request: &AgentRequest, artifacts: &Path, limit: Duration) -> RunOutcome {
        let started = Instant::now();
        let mut progress = RunProgress::default();
        let status = match self.drive(request, artifacts, limit, &mut progress).await {
            Ok(status) => status,
            Err(e) => AgentStatus::Failed(format!("{:#}", e)),
        };
        if let AgentStatus::Failed(reason) = &status {
            tracing::error!(session = %request.session_id, "Error during execution: {}", reason);
        }
        progress.into_outcome(status, started.elapsed())
    }
}

/// SIGTERM the harness process group, then SIGKILL whatever outlives `grace`
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let group = -(pid as libc::pid_t);
            // SAFETY: kill(2) with a negative pid signals the group this child leads
            unsafe {
                libc::kill(group, libc::SIGTERM);
            }
            let exited = tokio::time::timeout(grace, child.wait()).await.is_ok();
            unsafe {
                libc::kill(group, libc::SIGKILL);
            }
            if exited {
                return;
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill harness: {}", e);
    }
}

/// Read `reader` line by line into `tx` until EOF or the receiver goes away
fn forward_lines<R>(reader: R, prefix: &'static str, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(format!("{}{}", prefix, line)).await.is_err() {
                break;
            }
        }
    });
}
