mod commands;
mod report;
mod stages;

pub use commands::{analyze_commands, merge_metasploit, render_report, search_commands};
pub use report::{calculate_metrics, render_latex_table, render_metrics_summary};
pub use stages::{render_stage_chart, stage_success_rates};
