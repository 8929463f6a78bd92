use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::agents::AgentRole;
use crate::theme::*;
use crate::workflow::WorkflowResult;

pub fn report_file_name(at: DateTime<Local>) -> String {
    format!("result_{}.md", at.format("%Y%m%d_%H%M%S"))
}

/// Markdown report: title, run timestamp, execution time, final answer, then
/// one subsection per stage in pipeline order.
pub fn render_markdown(result: &WorkflowResult, at: DateTime<Local>) -> String {
    let mut out = String::new();
    out.push_str("# Multi-stage reasoning result\n\n");
    out.push_str(&format!("**Run at**: {}\n\n", at.format("%Y-%m-%d %H:%M:%S")));
    out.push_str(&format!("**Execution time**: {:.2}s\n\n", result.execution_time));
    out.push_str("## Question\n\n");
    out.push_str(result.query.trim());
    out.push_str("\n\n## Final answer\n\n");
    out.push_str(result.final_answer.trim());
    out.push_str("\n\n---\n\n## Stage outputs\n");

    for role in AgentRole::PIPELINE {
        let Some(output) = result.output_for(role) else {
            continue;
        };
        out.push_str(&format!("\n### {}\n\n{}\n", role.display_name(), output.trim()));
    }

    out
}

pub fn save_result(result: &WorkflowResult, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).with_context(|| {
        format!("failed to create output directory '{}'", output_dir.display())
    })?;

    let now = Local::now();
    let path = output_dir.join(report_file_name(now));
    std::fs::write(&path, render_markdown(result, now))
        .with_context(|| format!("failed to write result file '{}'", path.display()))?;
    tracing::info!(path = %path.display(), "result saved");
    Ok(path)
}

pub fn print_result(result: &WorkflowResult, verbose: bool) {
    if verbose {
        for role in AgentRole::PIPELINE {
            if let Some(output) = result.output_for(role) {
                print_section(&format!("{CYAN}{}{RESET}", role.display_name()));
                println!("{}", output.trim());
            }
        }
    }

    print_section(&format!("{BOLD_GREEN}Final answer{RESET}"));
    println!("{}", result.final_answer.trim());
    println!();
    println!("{DIM}Execution time: {:.2}s{RESET}", result.execution_time);
}
