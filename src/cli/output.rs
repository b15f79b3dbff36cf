//! CLI output formatting

use crate::execution::{ExecutionEvent, ExecutionStatus};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "* ");

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn step_label(id: i64, name: &str) -> String {
    format!("{} {}", name, style(format!("[{}]", id)).dim())
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            steps,
        } => format!(
            "{} Starting pipeline {} ({} steps, {})",
            ROCKET,
            style(pipeline_name).bold(),
            steps,
            style(&execution_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::BackgroundStarted { step_id, step_name } => {
            format!("{} {} (background)", GEAR, style(step_label(*step_id, step_name)).cyan())
        }
        ExecutionEvent::StepStarted { step_id, step_name } => {
            format!("{} {}", SPINNER, style(step_label(*step_id, step_name)).cyan())
        }
        ExecutionEvent::StepCompleted {
            step_id,
            step_name,
            duration_ms,
        } => format!(
            "{} {} {}",
            CHECK,
            style(step_label(*step_id, step_name)).green(),
            style(format!("{}ms", duration_ms)).dim()
        ),
        ExecutionEvent::StepSkipped {
            step_id,
            step_name,
            reason,
        } => format!("{} {} skipped: {}", WARN, step_label(*step_id, step_name), style(reason).dim()),
        ExecutionEvent::StepFailed {
            step_id,
            step_name,
            error,
        } => format!(
            "{} {}: {}",
            CROSS,
            style(step_label(*step_id, step_name)).red(),
            style(error).dim()
        ),
        ExecutionEvent::PipelineCompleted {
            execution_id,
            pipeline_name,
            status,
        } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("completed {}", style("successfully").green()),
                other => format_status(*other),
            };
            format!(
                "{} Pipeline {} ({}) {}",
                INFO,
                style(pipeline_name).bold(),
                style(&execution_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}
