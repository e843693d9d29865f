//! Fetch, install and build the site in its working directory

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::WebhookConfig;
use crate::error::{StepError, WebhookError};
use crate::job::{DeploymentRun, StepName, StepResult};
use crate::logging::{EventLog, LogLevel};

/// Markers git prints on stderr for real failures (progress goes there too)
pub const GIT_ERROR_MARKERS: &[&str] = &["fatal:", "error:"];
/// pnpm prefixes its error codes with `ERR_PNPM_`; warnings use `WARN`
pub const PACKAGE_MANAGER_ERROR_MARKERS: &[&str] = &["ERR"];

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
        }
    }

    /// Split a command line on whitespace into program and args
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    /// `sh -c <script>`
    pub fn shell(script: &str) -> Self {
        Self::new("sh", ["-c", script])
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            cmd.push(' ');
            cmd.push_str(arg);
        }
        cmd
    }
}

#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: StepName,
    pub commands: Vec<CommandSpec>,
    pub error_markers: Vec<String>,
}

impl StepSpec {
    pub fn new(name: StepName, commands: Vec<CommandSpec>, error_markers: &[&str]) -> Self {
        Self {
            name,
            commands,
            error_markers: error_markers.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Fetch the remote branch and hard-reset onto it, never prompting
    pub fn fetch(remote_branch: &str) -> Self {
        let fetch = CommandSpec::new("git", ["fetch", "origin", remote_branch])
            .env("GIT_TERMINAL_PROMPT", "0");
        let reset = CommandSpec::new(
            "git",
            ["reset".to_string(), "--hard".to_string(), format!("origin/{}", remote_branch)],
        )
        .env("GIT_TERMINAL_PROMPT", "0");
        Self::new(StepName::Fetch, vec![fetch, reset], GIT_ERROR_MARKERS)
    }

    pub fn describe(&self) -> String {
        self.commands
            .iter()
            .map(CommandSpec::display)
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    work_dir: PathBuf,
    steps: Vec<StepSpec>,
}

impl Pipeline {
    pub fn new(work_dir: impl Into<PathBuf>, steps: Vec<StepSpec>) -> Self {
        Self {
            work_dir: work_dir.into(),
            steps,
        }
    }

    /// The standard fetch, install, build pipeline for the configured site
    pub fn from_config(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let install = CommandSpec::parse(&config.install_command)
            .ok_or_else(|| WebhookError::Config("INSTALL_COMMAND is empty".to_string()))?;
        let build = CommandSpec::parse(&config.build_command)
            .ok_or_else(|| WebhookError::Config("BUILD_COMMAND is empty".to_string()))?;

        Ok(Self::new(
            &config.blog_path,
            vec![
                StepSpec::fetch(&config.git_branch),
                StepSpec::new(StepName::Install, vec![install], PACKAGE_MANAGER_ERROR_MARKERS),
                StepSpec::new(StepName::Build, vec![build], PACKAGE_MANAGER_ERROR_MARKERS),
            ],
        ))
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// Run every step in order, stopping at the first failure. Nothing is
    /// rolled back; a failed run leaves the working directory as it was.
    pub async fn run(&self, log: &dyn EventLog) -> DeploymentRun {
        let mut run = DeploymentRun::new();
        log.append(
            LogLevel::Info,
            &format!("Deployment {} started in '{}'", run.id, self.work_dir.display()),
        );

        for step in &self.steps {
            log.append(
                LogLevel::Info,
                &format!("Starting {}: {}", step.name, step.describe()),
            );

            let result = run_step(&self.work_dir, step).await;
            let failed = !result.succeeded;
            match &result.error {
                Some(e) => log.append(LogLevel::Error, &format!("{} failed: {}", step.name, e)),
                None => log.append(LogLevel::Success, &format!("{} completed", step.name)),
            }
            run.record(result);

            if failed {
                break;
            }
        }

        match run.failed_step() {
            Some(step) => log.append(
                LogLevel::Error,
                &format!("Deployment {} failed at {}", run.id, step),
            ),
            None => {
                run.mark_success();
                log.append(LogLevel::Success, &format!("Deployment {} finished", run.id));
            }
        }

        run
    }
}

async fn run_step(work_dir: &Path, step: &StepSpec) -> StepResult {
    let mut output = String::new();

    for command in &step.commands {
        match run_command(work_dir, command, &step.error_markers).await {
            Ok(out) => output.push_str(&out),
            Err((out, e)) => {
                output.push_str(&out);
                return StepResult::failure(step.name, output, e.to_string());
            }
        }
    }

    StepResult::success(step.name, output)
}

/// Returns the combined stdout/stderr, paired with the error on failure
async fn run_command(
    work_dir: &Path,
    command: &CommandSpec,
    error_markers: &[String],
) -> Result<String, (String, StepError)> {
    let cmd = command.display();
    info!("Running (cwd = '{}'): {}", work_dir.display(), cmd);

    let result = Command::new(&command.program)
        .current_dir(work_dir)
        .args(&command.args)
        .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .output()
        .await;

    let out = match result {
        Ok(out) => out,
        Err(source) => {
            error!("{} failed to start: {}", cmd, source);
            return Err((
                String::new(),
                StepError::Spawn {
                    command: cmd,
                    source,
                },
            ));
        }
    };

    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    let combined = format!("{}{}", stdout, stderr);
    debug!("{} output:\n{}", cmd, combined);

    if !out.status.success() {
        let code = out
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let err = StepError::ExitStatus {
            command: cmd,
            code,
            output: stderr.trim().to_string(),
        };
        return Err((combined, err));
    }

    // Exit status alone is not enough: these tools report some fatal
    // conditions on stderr while still exiting zero.
    if let Some(marker) = error_markers.iter().find(|m| stderr.contains(m.as_str())) {
        let err = StepError::ErrorMarker {
            command: cmd,
            marker: marker.clone(),
            output: stderr.trim().to_string(),
        };
        return Err((combined, err));
    }

    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RunOutcome;
    use crate::logging::MemoryEventLog;

    fn shell_step(name: StepName, script: &str) -> StepSpec {
        StepSpec::new(name, vec![CommandSpec::shell(script)], PACKAGE_MANAGER_ERROR_MARKERS)
    }

    #[test]
    fn fetch_step_resets_hard_without_prompting() {
        let step = StepSpec::fetch("main");
        assert_eq!(
            step.describe(),
            "git fetch origin main && git reset --hard origin/main"
        );
        for command in &step.commands {
            assert!(
                command
                    .envs
                    .contains(&("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()))
            );
        }
    }

    #[test]
    fn pipeline_from_config_uses_configured_commands() {
        let config = WebhookConfig::from_pairs([
            ("WEBHOOK_SECRET", "x"),
            ("BLOG_PATH", "/srv/blog"),
            ("GIT_BRANCH", "prod"),
            ("BUILD_COMMAND", "npm run build"),
        ])
        .unwrap();
        let pipeline = Pipeline::from_config(&config).unwrap();

        let names: Vec<_> = pipeline.steps().iter().map(|s| s.name).collect();
        assert_eq!(names, [StepName::Fetch, StepName::Install, StepName::Build]);
        assert_eq!(pipeline.steps()[0].describe(), StepSpec::fetch("prod").describe());
        assert_eq!(pipeline.steps()[1].describe(), "pnpm install");
        assert_eq!(pipeline.steps()[2].describe(), "npm run build");
        assert_eq!(pipeline.work_dir(), Path::new("/srv/blog"));
    }

    #[test]
    fn parse_rejects_blank_command() {
        assert!(CommandSpec::parse("   ").is_none());
    }

    #[tokio::test]
    async fn successful_run_records_all_steps() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            dir.path(),
            vec![
                shell_step(StepName::Fetch, "echo fetched"),
                shell_step(StepName::Install, "echo 'WARN deprecated subdependency' >&2"),
                shell_step(StepName::Build, "mkdir -p dist && echo built > dist/index.html"),
            ],
        );
        let log = MemoryEventLog::new();

        let run = pipeline.run(&log).await;

        assert!(run.is_success(), "{:?}", run.outcome);
        assert_eq!(run.steps.len(), 3);
        assert!(run.steps.iter().all(|s| s.succeeded));
        assert!(run.steps[0].output.contains("fetched"));
        assert!(dir.path().join("dist/index.html").exists());
        assert!(log.contains(LogLevel::Success, "finished"));
    }

    #[tokio::test]
    async fn error_marker_fails_install_and_skips_build() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            dir.path(),
            vec![
                shell_step(StepName::Fetch, "true"),
                shell_step(StepName::Install, "echo ' ERR_PNPM_FETCH_404  GET 404' >&2; exit 0"),
                shell_step(StepName::Build, "touch built"),
            ],
        );
        let log = MemoryEventLog::new();

        let run = pipeline.run(&log).await;

        assert_eq!(run.failed_step(), Some(StepName::Install));
        assert_eq!(run.steps.len(), 2);
        assert!(!dir.path().join("built").exists());
        match &run.outcome {
            RunOutcome::Failed { reason, .. } => assert!(reason.contains("ERR_PNPM_FETCH_404")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(log.contains(LogLevel::Error, "install failed"));
        assert!(!log.contains(LogLevel::Info, "Starting build"));
    }

    #[tokio::test]
    async fn non_zero_exit_fails_step() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            dir.path(),
            vec![
                shell_step(StepName::Fetch, "echo 'nothing to see' >&2; exit 3"),
                shell_step(StepName::Install, "touch installed"),
            ],
        );

        let run = pipeline.run(&MemoryEventLog::new()).await;

        assert_eq!(run.failed_step(), Some(StepName::Fetch));
        assert!(!dir.path().join("installed").exists());
        let error = run.steps[0].error.as_deref().unwrap();
        assert!(error.contains("exited with 3"));
    }

    #[tokio::test]
    async fn missing_program_fails_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            dir.path(),
            vec![StepSpec::new(
                StepName::Install,
                vec![CommandSpec::new("definitely-not-a-real-binary-xyz", ["install"])],
                PACKAGE_MANAGER_ERROR_MARKERS,
            )],
        );

        let run = pipeline.run(&MemoryEventLog::new()).await;

        assert_eq!(run.failed_step(), Some(StepName::Install));
        assert!(run.steps[0].error.as_deref().unwrap().contains("failed to start"));
    }
}
