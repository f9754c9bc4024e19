use std::collections::BTreeMap;

use crate::bench::{Category, InstanceResult, Level};

/// Success and progress figures for one level/category
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMetrics {
    pub total: usize,
    pub successful: usize,
    /// Success rate
    pub sr: f64,
    /// Mean command-milestone progress over all instances
    pub overall_pr: f64,
    pub failed_pr_avg: f64,
    pub failed_pr_min: f64,
    pub failed_pr_max: f64,
    pub avg_cost: f64,
    pub avg_steps: f64,
}

/// Order of the in-vitro rows in the published table
const IN_VITRO_ROWS: [Category; 4] = [
    Category::AccessControl,
    Category::WebSecurity,
    Category::NetworkSecurity,
    Category::Cryptography,
];

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn calculate_metrics(results: &[InstanceResult]) -> BTreeMap<(Level, Category), CategoryMetrics> {
    let mut grouped: BTreeMap<(Level, Category), Vec<&InstanceResult>> = BTreeMap::new();
    for r in results {
        grouped.entry((r.level, r.category)).or_default().push(r);
    }

    grouped
        .into_iter()
        .map(|(key, instances)| {
            let total = instances.len();
            let successful = instances.iter().filter(|r| r.success).count();
            let pr_all: Vec<f64> = instances.iter().map(|r| r.milestones.command.rate()).collect();
            let pr_failed: Vec<f64> = instances
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.milestones.command.rate())
                .collect();
            let costs: Vec<f64> = instances.iter().map(|r| r.cost()).collect();
            let steps: Vec<f64> = instances.iter().map(|r| f64::from(r.iterations)).collect();

            let metrics = CategoryMetrics {
                total,
                successful,
                sr: if total > 0 { successful as f64 / total as f64 } else { 0.0 },
                overall_pr: mean(&pr_all),
                failed_pr_avg: mean(&pr_failed),
                failed_pr_min: pr_failed.iter().copied().reduce(f64::min).unwrap_or(0.0),
                failed_pr_max: pr_failed.iter().copied().reduce(f64::max).unwrap_or(0.0),
                avg_cost: mean(&costs),
                avg_steps: mean(&steps),
            };
            (key, metrics)
        })
        .collect()
}

fn row(label: &str, m: &CategoryMetrics) -> String {
    format!(
        "{} & {} & {:.2} & {:.2} & {:.1} & {:.3} \\\\",
        label, m.total, m.sr, m.overall_pr, m.avg_steps, m.avg_cost
    )
}

/// LaTeX tabular with per-category rows, the in-vitro total, real-world and the grand total
pub fn render_latex_table(metrics: &BTreeMap<(Level, Category), CategoryMetrics>) -> String {
    let mut lines = vec![
        "\\begin{tabular}{l|c|cccc}".to_string(),
        "\\hline".to_string(),
        "& \\textbf{Tasks} & \\textbf{SR} & \\textbf{PR} & \\textbf{Avg Queries} & \\textbf{Avg Cost (\\$)} \\\\"
            .to_string(),
        "\\hline".to_string(),
    ];

    let in_vitro: Vec<&CategoryMetrics> = IN_VITRO_ROWS
        .iter()
        .filter_map(|category| {
            let m = metrics.get(&(Level::InVitro, *category))?;
            lines.push(row(category.abbreviation(), m));
            Some(m)
        })
        .collect();
    lines.push("\\hline".to_string());

    let tasks: usize = in_vitro.iter().map(|m| m.total).sum();
    let successful: usize = in_vitro.iter().map(|m| m.successful).sum();
    let mut prs: Vec<f64> = in_vitro.iter().map(|m| m.overall_pr).collect();
    let mut costs: Vec<f64> = in_vitro.iter().map(|m| m.avg_cost).collect();
    let steps: Vec<f64> = in_vitro.iter().map(|m| m.avg_steps).collect();
    let in_vitro_total = CategoryMetrics {
        total: tasks,
        successful,
        sr: if tasks > 0 { successful as f64 / tasks as f64 } else { 0.0 },
        overall_pr: mean(&prs),
        failed_pr_avg: 0.0,
        failed_pr_min: 0.0,
        failed_pr_max: 0.0,
        avg_cost: mean(&costs),
        avg_steps: mean(&steps),
    };
    lines.push(row("Tot. in-vitro", &in_vitro_total));
    lines.push("\\hline".to_string());

    if let Some(cve) = metrics.get(&(Level::RealWorld, Category::Cve)) {
        lines.push(row("Real-world", cve));
        lines.push("\\hline".to_string());

        let grand_tasks = tasks + cve.total;
        let grand_successful = successful + cve.successful;
        let grand_sr = if grand_tasks > 0 {
            grand_successful as f64 / grand_tasks as f64
        } else {
            0.0
        };
        prs.push(cve.overall_pr);
        costs.push(cve.avg_cost);
        lines.push(format!(
            "Total & {} & {:.2} & {:.2} & - & {:.3} \\\\",
            grand_tasks,
            grand_sr,
            mean(&prs),
            mean(&costs)
        ));
    }

    lines.push("\\hline".to_string());
    lines.push("\\end{tabular}".to_string());
    lines.join("\n")
}

/// One line per category, for the console
pub fn render_metrics_summary(metrics: &BTreeMap<(Level, Category), CategoryMetrics>) -> String {
    metrics
        .iter()
        .map(|((level, category), m)| {
            format!(
                "{}/{}: {} tasks, SR={:.2}, PR={:.2} (failed avg {:.2}, min {:.2}, max {:.2}), Avg Steps={:.1}, Avg Cost=${:.3}",
                level,
                category,
                m.total,
                m.sr,
                m.overall_pr,
                m.failed_pr_avg,
                m.failed_pr_min,
                m.failed_pr_max,
                m.avg_steps,
                m.avg_cost
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::{
        AgentState, InstanceHeader, Metrics, MilestoneProgress, MilestoneSummary, RunOutcome,
    };

    fn result(
        level: Level,
        category: Category,
        success: bool,
        achieved: usize,
        total: usize,
        iterations: u32,
        cost: f64,
    ) -> InstanceResult {
        InstanceResult::from_outcome(
            InstanceHeader {
                level,
                category,
                instance_idx: 0,
                target: "vm0".into(),
                task: "t".into(),
                llm_model: "m".into(),
                max_iterations: 60,
                timeout_seconds: 1200,
            },
            RunOutcome {
                iterations,
                task_done: success,
                agent_state: Some(AgentState::Finished),
                metrics: Some(Metrics {
                    accumulated_cost: cost,
                    ..Default::default()
                }),
                milestones: MilestoneSummary {
                    command: MilestoneProgress {
                        total,
                        achieved,
                        achieved_list: Vec::new(),
                        remaining_list: Vec::new(),
                    },
                    stage: MilestoneProgress::default(),
                },
                ..Default::default()
            },
        )
    }

    fn sample() -> Vec<InstanceResult> {
        vec![
            result(Level::InVitro, Category::AccessControl, true, 3, 4, 10, 0.10),
            result(Level::InVitro, Category::AccessControl, false, 1, 4, 30, 0.30),
            result(Level::InVitro, Category::WebSecurity, false, 0, 5, 30, 0.20),
            result(Level::RealWorld, Category::Cve, true, 2, 2, 20, 1.00),
            result(Level::RealWorld, Category::Cve, false, 0, 0, 60, 2.00),
        ]
    }

    #[test]
    fn test_calculate_metrics() {
        let metrics = calculate_metrics(&sample());
        assert_eq!(metrics.len(), 3);

        let ac = &metrics[&(Level::InVitro, Category::AccessControl)];
        assert_eq!(ac.total, 2);
        assert_eq!(ac.sr, 0.5);
        assert_eq!(ac.overall_pr, 0.5);
        assert_eq!(ac.failed_pr_avg, 0.25);
        assert_eq!(ac.failed_pr_min, 0.25);
        assert_eq!(ac.failed_pr_max, 0.25);
        assert!((ac.avg_cost - 0.2).abs() < 1e-9);
        assert_eq!(ac.avg_steps, 20.0);

        // no milestones defined counts as zero progress
        let cve = &metrics[&(Level::RealWorld, Category::Cve)];
        assert_eq!(cve.overall_pr, 0.5);
        assert_eq!(cve.failed_pr_min, 0.0);
    }

    #[test]
    fn test_render_latex_table() {
        let latex = render_latex_table(&calculate_metrics(&sample()));
        let lines: Vec<&str> = latex.lines().collect();

        assert_eq!(lines[0], "\\begin{tabular}{l|c|cccc}");
        assert_eq!(lines[4], "AC & 2 & 0.50 & 0.50 & 20.0 & 0.200 \\\\");
        assert_eq!(lines[5], "WS & 1 & 0.00 & 0.00 & 30.0 & 0.200 \\\\");
        assert!(latex.contains("Tot. in-vitro & 3 & 0.33 & 0.25 & 25.0 & 0.200 \\\\"));
        assert!(latex.contains("Real-world & 2 & 0.50 & 0.50 & 40.0 & 1.500 \\\\"));
        assert!(latex.contains("Total & 5 & 0.40 & 0.33 & - & 0.633 \\\\"));
        assert_eq!(*lines.last().unwrap(), "\\end{tabular}");
        assert!(!latex.contains("NS &"));
    }

    #[test]
    fn test_render_latex_table_without_real_world() {
        let in_vitro_only: Vec<InstanceResult> = sample()
            .into_iter()
            .filter(|r| r.level == Level::InVitro)
            .collect();
        let latex = render_latex_table(&calculate_metrics(&in_vitro_only));
        assert!(!latex.contains("Real-world"));
        assert!(!latex.contains("Total &"));
    }

    #[test]
    fn test_render_metrics_summary() {
        let summary = render_metrics_summary(&calculate_metrics(&sample()));
        assert!(summary.contains("in-vitro/access_control: 2 tasks, SR=0.50"));
        assert!(summary.contains("real-world/cve"));
    }
}
