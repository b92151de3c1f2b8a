use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::terraform::{Operation, Workspace};

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub operation: Operation,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u128,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Ok { message: String },
    Failed { error: String, kind: String },
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Ok { .. })
    }
}

/// Runs one operation under the workspace lock. Tool failures are part of
/// the result, not an `Err`, so `--json` can still report them.
pub async fn cmd_run(workspace: &Workspace, op: Operation) -> RunResult {
    let started = Instant::now();
    let outcome = match workspace.invoke(op).await {
        Ok(_) => RunOutcome::Ok {
            message: op.success_message().to_string(),
        },
        Err(e) => RunOutcome::Failed {
            error: e.to_string(),
            kind: e.kind().to_string(),
        },
    };

    RunResult {
        operation: op,
        finished_at: Utc::now(),
        duration_ms: started.elapsed().as_millis(),
        outcome,
    }
}

pub fn format_run_human(result: &RunResult) -> String {
    match &result.outcome {
        RunOutcome::Ok { message } => message.clone(),
        RunOutcome::Failed { error, .. } => {
            format!("{} failed: {}", result.operation.name(), error)
        }
    }
}
