// sprout/src/cli/status.rs
//! Prints install progress from the installer's event stream.
use colored::*;
use sprout_common::pipeline::{InstallEvent, InstallStage};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

fn stage_indicator(stage: InstallStage) -> String {
    match stage {
        InstallStage::Selecting => " ·".dimmed().to_string(),
        InstallStage::Fetching => " ↓".yellow().to_string(),
        InstallStage::Verifying => " ✓".green().to_string(),
        InstallStage::Unpacking => " ⚙".blue().to_string(),
        InstallStage::Placing => " ⚙".magenta().to_string(),
        InstallStage::Linking => " →".cyan().to_string(),
        InstallStage::TestingSmoke => " ?".yellow().to_string(),
        InstallStage::Done => " ✓".green().bold().to_string(),
    }
}

fn colored_stage(stage: InstallStage) -> ColoredString {
    let label = match stage {
        InstallStage::Selecting => "selecting",
        InstallStage::Fetching => "fetching",
        InstallStage::Verifying => "verifying",
        InstallStage::Unpacking => "unpacking",
        InstallStage::Placing => "placing",
        InstallStage::Linking => "linking",
        InstallStage::TestingSmoke => "testing",
        InstallStage::Done => "done",
    };
    match stage {
        InstallStage::Selecting => label.dimmed(),
        InstallStage::Fetching => label.yellow(),
        InstallStage::Verifying => label.green(),
        InstallStage::Unpacking => label.blue(),
        InstallStage::Placing => label.magenta(),
        InstallStage::Linking => label.cyan(),
        InstallStage::TestingSmoke => label.yellow(),
        InstallStage::Done => label.green().bold(),
    }
}

/// Renders one event as a status line, `None` for events that are not shown.
pub fn render_event(event: &InstallEvent) -> Option<String> {
    match event {
        InstallEvent::StageEntered { target_id, stage } => {
            // Done is reported by InstallFinished.
            if *stage == InstallStage::Done {
                return None;
            }
            Some(format!(
                "{} {:<24} {}",
                stage_indicator(*stage),
                target_id,
                colored_stage(*stage)
            ))
        }
        InstallEvent::FetchRetry {
            target_id,
            attempt,
            error,
            ..
        } => Some(format!(
            "{} {:<24} {} {}",
            " ↻".yellow(),
            target_id,
            format!("retrying after attempt {attempt}:").yellow(),
            error
        )),
        InstallEvent::InstallFinished {
            target_id,
            install_root,
            degraded,
        } => {
            let state = if *degraded {
                "installed, smoke test failed".yellow().bold()
            } else {
                "installed".green().bold()
            };
            Some(format!(
                "{} {:<24} {} {}",
                stage_indicator(InstallStage::Done),
                target_id,
                state,
                install_root.display().to_string().dimmed()
            ))
        }
        InstallEvent::InstallFailed {
            target_id, stage, ..
        } => Some(format!(
            "{} {:<24} {}",
            " ✗".red().bold(),
            target_id,
            format!("failed during {stage}").red().bold()
        )),
    }
}

/// Prints events until every sender is gone.
pub fn spawn_status_printer(mut rx: broadcast::Receiver<InstallEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = render_event(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Status display skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
