use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Maximum size for captured step output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// The three fixed stages of a deployment
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepName {
    Fetch,
    Install,
    Build,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Fetch => "fetch",
            StepName::Install => "install",
            StepName::Build => "build",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub name: StepName,
    pub succeeded: bool,
    pub output: String,
    pub output_truncated: bool,
    pub error: Option<String>,
}

impl StepResult {
    pub fn success(name: StepName, output: String) -> Self {
        let (output, output_truncated) = truncate_output(output);
        Self {
            name,
            succeeded: true,
            output,
            output_truncated,
            error: None,
        }
    }

    pub fn failure(name: StepName, output: String, error: String) -> Self {
        let (output, output_truncated) = truncate_output(output);
        Self {
            name,
            succeeded: false,
            output,
            output_truncated,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Running,
    Success,
    Failed { step: StepName, reason: String },
}

/// One fetch/install/build execution, owned by the task running it
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepResult>,
    pub outcome: RunOutcome,
}

impl DeploymentRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            outcome: RunOutcome::Running,
        }
    }

    /// Record a finished step. A failed step marks the whole run failed.
    pub fn record(&mut self, step: StepResult) {
        if !step.succeeded {
            self.mark_failed(step.name, step.error.clone().unwrap_or_default());
        }
        self.steps.push(step);
    }

    pub fn mark_success(&mut self) {
        self.outcome = RunOutcome::Success;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, step: StepName, reason: String) {
        self.outcome = RunOutcome::Failed { step, reason };
        self.completed_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    pub fn failed_step(&self) -> Option<StepName> {
        match &self.outcome {
            RunOutcome::Failed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl Default for DeploymentRun {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_output(mut output: String) -> (String, bool) {
    if output.len() <= MAX_OUTPUT_SIZE {
        return (output, false);
    }
    let mut cut = MAX_OUTPUT_SIZE;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n... (output truncated)");
    (output, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_step_marks_run_failed() {
        let mut run = DeploymentRun::new();
        run.record(StepResult::success(StepName::Fetch, "HEAD is now at abc".into()));
        assert_eq!(run.outcome, RunOutcome::Running);

        run.record(StepResult::failure(
            StepName::Install,
            String::new(),
            "ERR_PNPM_FETCH_404".into(),
        ));
        assert_eq!(run.failed_step(), Some(StepName::Install));
        assert!(run.completed_at.is_some());
        assert_eq!(run.steps.len(), 2);
    }

    #[test]
    fn oversized_output_is_truncated() {
        let step = StepResult::success(StepName::Build, "é".repeat(MAX_OUTPUT_SIZE));
        assert!(step.output_truncated);
        assert!(step.output.ends_with("(output truncated)"));
        assert!(step.output.len() < MAX_OUTPUT_SIZE + 64);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = RunOutcome::Failed {
            step: StepName::Build,
            reason: "boom".into(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["step"], "build");
    }
}
