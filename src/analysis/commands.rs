use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use walkdir::WalkDir;

/// How the AutoPenBench runtime echoes a bash tool call into stdout.log
static ACTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Action:machine_ipaddr='[^']+' cmd='([^']+)'").expect("valid action regex")
});

const METASPLOIT_COMMANDS: &[&str] = &[
    "msfconsole", "set", "show", "use", "sessions", "exploit", "options", "search", "run", "exit",
];
const IDLE_COMMANDS: &[&str] = &["sleep", "timeout"];

/// Counter that remembers first-seen order for ties
#[derive(Debug, Clone, Default)]
pub struct Tally {
    counts: HashMap<String, (usize, usize)>,
}

impl Tally {
    pub fn add(&mut self, key: impl Into<String>, n: usize) {
        let next = self.counts.len();
        self.counts.entry(key.into()).or_insert((0, next)).0 += n;
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> usize {
        self.counts.get(key).map_or(0, |(count, _)| *count)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts
    pub fn total(&self) -> usize {
        self.counts.values().map(|(count, _)| count).sum()
    }

    /// Highest counts first; ties keep first-seen order
    pub fn most_common(&self, n: usize) -> Vec<(String, usize)> {
        let mut entries: Vec<(&String, &(usize, usize))> = self.counts.iter().collect();
        entries.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        entries
            .into_iter()
            .take(n)
            .map(|(key, (count, _))| (key.clone(), *count))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandAnalysis {
    pub total: usize,
    /// Counts by tool/binary
    pub categories: Tally,
    /// Counts by command text, truncated for display
    pub full_commands: Tally,
}

/// Bash commands the agent ran, in order of appearance
pub fn extract_commands(content: &str) -> Vec<String> {
    ACTION_PATTERN
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// First word of the command with any directory prefix removed
pub fn command_category(cmd: &str) -> String {
    let cmd = cmd.trim();
    let first_word = cmd.split_whitespace().next().unwrap_or(cmd);
    first_word.rsplit('/').next().unwrap_or(first_word).to_string()
}

fn display_command(cmd: &str) -> String {
    if cmd.chars().count() > 100 {
        format!("{}...", cmd.chars().take(100).collect::<String>())
    } else {
        cmd.to_string()
    }
}

fn stdout_logs(log_dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(log_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == "stdout.log")
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Count every command found in stdout.log files below `log_dir`
pub fn analyze_commands(log_dir: &Path) -> Result<CommandAnalysis> {
    let mut analysis = CommandAnalysis::default();
    for entry in stdout_logs(log_dir) {
        let content = match read_lossy(entry.path()) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("{:#}", e);
                continue;
            }
        };
        for cmd in extract_commands(&content) {
            analysis.total += 1;
            analysis.categories.add(command_category(&cmd), 1);
            analysis.full_commands.add(display_command(&cmd), 1);
        }
    }
    tracing::info!("Total commands executed: {}", analysis.total);
    Ok(analysis)
}

/// Commands containing `keyword` (case-insensitive), paired with their instance directory name
pub fn search_commands(log_dir: &Path, keyword: &str) -> Result<Vec<(String, String)>> {
    let needle = keyword.to_lowercase();
    let mut matching = Vec::new();
    for entry in stdout_logs(log_dir) {
        let instance = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = read_lossy(entry.path())?;
        for cmd in extract_commands(&content) {
            if cmd.to_lowercase().contains(&needle) {
                matching.push((cmd, instance.clone()));
            }
        }
    }
    Ok(matching)
}

/// Fold Metasploit console verbs into one `metasploit` bucket and drop idle commands
pub fn merge_metasploit(categories: &Tally) -> Tally {
    let mut merged = Tally::default();
    let mut msf_total = 0;
    for (cmd, count) in categories.most_common(categories.len()) {
        let lower = cmd.to_lowercase();
        if METASPLOIT_COMMANDS.contains(&lower.as_str()) {
            msf_total += count;
        } else if !IDLE_COMMANDS.contains(&lower.as_str()) {
            merged.add(cmd, count);
        }
    }
    if msf_total > 0 {
        merged.add("metasploit", msf_total);
    }
    merged
}

/// Text report: top tools, then full commands used at least twice.
/// Tool shares are relative to `categories`, which may be a merged tally.
pub fn render_report(analysis: &CommandAnalysis, categories: &Tally, top_n: usize) -> String {
    let rule = "=".repeat(80);
    let mut out = String::new();
    let _ = writeln!(out, "Total commands: {}\n", analysis.total);
    let _ = writeln!(out, "{}\nCOMMAND CATEGORIES (by tool/binary)\n{}", rule, rule);
    if categories.is_empty() {
        let _ = writeln!(out, "No commands found");
    }
    let counted = categories.total();
    for (i, (cmd, count)) in categories.most_common(top_n).iter().enumerate() {
        let percentage = if counted == 0 {
            0.0
        } else {
            *count as f64 / counted as f64 * 100.0
        };
        let _ = writeln!(out, "{:2}. {:20} {:4} ({:5.1}%)", i + 1, cmd, count, percentage);
    }

    let _ = writeln!(out, "\n{}\nTOP FULL COMMANDS (2+ uses)\n{}", rule, rule);
    for (i, (cmd, count)) in analysis.full_commands.most_common(top_n).iter().enumerate() {
        if *count >= 2 {
            let _ = writeln!(out, "{:2}. [{:2}x] {}", i + 1, count, cmd);
        }
    }
    out
}
