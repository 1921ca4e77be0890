//! Detection script runner.
//!
//! [`ScriptRunner`] executes one catalog script against one target and maps
//! the result onto a [`Verdict`]. It never touches storage.
//!
//! # Invocation contract
//!
//! - `.py` scripts run under the configured Python interpreter, `.sh` scripts
//!   under the configured shell (extension match is case-insensitive).
//! - Working directory is the scripts root. The environment carries
//!   `TARGET_IP`, `TASK_ID` and `RESULT_ID`; the target address is also the
//!   only positional argument.
//! - Combined stdout/stderr goes to
//!   `task_<task>_result_<unit>_<YYYYmmdd_HHMMSS_fff>.log` under the logs
//!   directory, framed by a header and a footer.
//! - Exit code 0 is a pass, 1 is a fail, anything else is an error.
//!
//! ```rust,no_run
//! use secdet::execution::ScriptRunner;
//! use std::time::Duration;
//!
//! let runner = ScriptRunner::builder("/data/scripts", "/data/logs")
//!     .timeout(Duration::from_secs(120))
//!     .python("python3.12")
//!     .build();
//! assert_eq!(runner.timeout(), Duration::from_secs(120));
//! ```

use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::task::Verdict;
use crate::core::types::{TargetAddr, TaskId, UnitId};

/// Default wall-clock limit for one script.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

const RULE: &str = "========================================";

/// Why a script could not produce a verdict.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("path is not a file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("script path outside scripts directory: {}", .0.display())]
    OutsideScriptsDir(PathBuf),

    #[error("unsupported script type: {0}")]
    UnsupportedType(String),

    #[error("failed to prepare log file: {0}")]
    LogFile(#[source] std::io::Error),

    #[error("{0}")]
    Spawn(#[source] std::io::Error),
}

/// Interpreter family of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Python,
    Shell,
}

impl ScriptKind {
    /// Detect the kind from the file extension.
    pub fn detect(path: &Path) -> Result<Self, RunnerError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "py" => Ok(ScriptKind::Python),
            "sh" => Ok(ScriptKind::Shell),
            "" => Err(RunnerError::UnsupportedType("(none)".to_string())),
            other => Err(RunnerError::UnsupportedType(format!(".{}", other))),
        }
    }
}

/// Result of one script invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub verdict: Verdict,
    /// Error detail for non-pass/fail outcomes.
    pub message: Option<String>,
    /// Log file written for this invocation, if one was created.
    pub log_path: Option<PathBuf>,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl RunOutcome {
    fn error(message: impl Into<String>, log_path: Option<PathBuf>, elapsed: Duration) -> Self {
        Self {
            verdict: Verdict::Error,
            message: Some(message.into()),
            log_path,
            exit_code: None,
            elapsed,
        }
    }
}

/// Executes detection scripts with a timeout.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    scripts_dir: PathBuf,
    logs_dir: PathBuf,
    timeout: Duration,
    python: String,
    shell: String,
}

impl ScriptRunner {
    /// Create a new builder rooted at the given directories.
    pub fn builder(
        scripts_dir: impl Into<PathBuf>,
        logs_dir: impl Into<PathBuf>,
    ) -> ScriptRunnerBuilder {
        ScriptRunnerBuilder::new(scripts_dir, logs_dir)
    }

    /// Get the scripts root.
    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Get the logs directory.
    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check that a script stays under the scripts root, exists, is a file
    /// and has a supported type.
    pub fn validate(&self, script_path: &Path) -> Result<ScriptKind, RunnerError> {
        let escapes = script_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(RunnerError::OutsideScriptsDir(script_path.to_path_buf()));
        }
        let full_path = self.scripts_dir.join(script_path);
        if !full_path.exists() {
            return Err(RunnerError::ScriptNotFound(script_path.to_path_buf()));
        }
        if !full_path.is_file() {
            return Err(RunnerError::NotAFile(script_path.to_path_buf()));
        }
        ScriptKind::detect(&full_path)
    }

    /// Run a script against a target.
    ///
    /// Every failure mode is folded into the returned outcome.
    pub async fn run(
        &self,
        script_path: &Path,
        target: TargetAddr,
        task_id: TaskId,
        unit_id: UnitId,
    ) -> RunOutcome {
        let started = Instant::now();

        let kind = match self.validate(script_path) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(
                    task_id = %task_id,
                    unit_id = %unit_id,
                    script = %script_path.display(),
                    error = %e,
                    "script rejected"
                );
                return RunOutcome::error(e.to_string(), None, started.elapsed());
            }
        };

        let log_path = self.log_path_for(task_id, unit_id);
        let log = match self
            .open_log(&log_path, script_path, target, task_id, unit_id)
            .await
        {
            Ok(log) => log,
            Err(e) => {
                tracing::error!(task_id = %task_id, unit_id = %unit_id, error = %e, "log file unavailable");
                return RunOutcome::error(e.to_string(), None, started.elapsed());
            }
        };

        match self
            .execute(kind, script_path, target, task_id, unit_id, log, started)
            .await
        {
            Ok(mut outcome) => {
                outcome.log_path = Some(log_path);
                outcome
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, unit_id = %unit_id, error = %e, "script spawn failed");
                RunOutcome::error(e.to_string(), Some(log_path), started.elapsed())
            }
        }
    }

    fn log_path_for(&self, task_id: TaskId, unit_id: UnitId) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        self.logs_dir
            .join(format!("task_{}_result_{}_{}.log", task_id, unit_id, stamp))
    }

    async fn open_log(
        &self,
        log_path: &Path,
        script_path: &Path,
        target: TargetAddr,
        task_id: TaskId,
        unit_id: UnitId,
    ) -> Result<std::fs::File, RunnerError> {
        fs::create_dir_all(&self.logs_dir)
            .await
            .map_err(RunnerError::LogFile)?;

        let mut file = fs::File::create(log_path)
            .await
            .map_err(RunnerError::LogFile)?;
        let header = format!(
            "=== Script Execution Log ===\nScript: {}\nTarget: {}\nTask ID: {}\nResult ID: {}\nStart Time: {}\n{}\n\n",
            script_path.display(),
            target,
            task_id,
            unit_id,
            Utc::now().to_rfc3339(),
            RULE
        );
        file.write_all(header.as_bytes())
            .await
            .map_err(RunnerError::LogFile)?;
        file.flush().await.map_err(RunnerError::LogFile)?;
        Ok(file.into_std().await)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        kind: ScriptKind,
        script_path: &Path,
        target: TargetAddr,
        task_id: TaskId,
        unit_id: UnitId,
        log: std::fs::File,
        started: Instant,
    ) -> Result<RunOutcome, RunnerError> {
        let program = match kind {
            ScriptKind::Python => &self.python,
            ScriptKind::Shell => &self.shell,
        };
        let full_path = self.scripts_dir.join(script_path);

        // All three handles share one file offset, so the footer lands after
        // the script's output.
        let stderr_log = log.try_clone().map_err(RunnerError::LogFile)?;
        let footer_log = log.try_clone().map_err(RunnerError::LogFile)?;

        let mut cmd = Command::new(program);
        cmd.arg(&full_path)
            .arg(target.to_string())
            .current_dir(&self.scripts_dir)
            .env("TARGET_IP", target.to_string())
            .env("TASK_ID", task_id.to_string())
            .env("RESULT_ID", unit_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true);

        tracing::info!(
            task_id = %task_id,
            unit_id = %unit_id,
            program = %program,
            script = %full_path.display(),
            "executing script"
        );

        let mut child = cmd.spawn().map_err(RunnerError::Spawn)?;
        let mut footer = fs::File::from_std(footer_log);

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(RunnerError::Spawn(e)),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(task_id = %task_id, unit_id = %unit_id, error = %e, "failed to kill timed-out script");
                }
                let secs = self.timeout.as_secs_f64();
                append(&mut footer, &format!("\n\n=== TIMEOUT after {}s ===\n", secs)).await;
                tracing::warn!(task_id = %task_id, unit_id = %unit_id, timeout_secs = secs, "script timed out");
                return Ok(RunOutcome::error(
                    format!("script timeout after {}s", secs),
                    None,
                    started.elapsed(),
                ));
            }
        };

        let elapsed = started.elapsed();
        let code = status.code();
        append(
            &mut footer,
            &format!(
                "\n\n{}\nEnd Time: {}\nElapsed: {:.2}s\nReturn Code: {}\n",
                RULE,
                Utc::now().to_rfc3339(),
                elapsed.as_secs_f64(),
                code.map_or_else(|| "signal".to_string(), |c| c.to_string())
            ),
        )
        .await;

        let outcome = match code {
            Some(code) => {
                let verdict = Verdict::from_exit_code(code);
                let message = (verdict == Verdict::Error)
                    .then(|| format!("script exited with code {}", code));
                RunOutcome {
                    verdict,
                    message,
                    log_path: None,
                    exit_code: Some(code),
                    elapsed,
                }
            }
            None => RunOutcome::error("script terminated by signal", None, elapsed),
        };

        tracing::debug!(
            task_id = %task_id,
            unit_id = %unit_id,
            verdict = %outcome.verdict,
            elapsed_ms = elapsed.as_millis() as u64,
            "script finished"
        );
        Ok(outcome)
    }
}

async fn append(file: &mut fs::File, text: &str) {
    if let Err(e) = file.write_all(text.as_bytes()).await {
        tracing::warn!(error = %e, "failed to write log footer");
        return;
    }
    let _ = file.flush().await;
}

/// Builder for creating `ScriptRunner` instances.
#[derive(Debug, Clone)]
pub struct ScriptRunnerBuilder {
    scripts_dir: PathBuf,
    logs_dir: PathBuf,
    timeout: Duration,
    python: String,
    shell: String,
}

impl ScriptRunnerBuilder {
    /// Create a new builder with default interpreters and timeout.
    pub fn new(scripts_dir: impl Into<PathBuf>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            logs_dir: logs_dir.into(),
            timeout: DEFAULT_SCRIPT_TIMEOUT,
            python: "python3".to_string(),
            shell: "bash".to_string(),
        }
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    /// Set the interpreter for `.py` scripts.
    pub fn python(mut self, program: impl Into<String>) -> Self {
        self.python = program.into();
        self
    }

    /// Set the interpreter for `.sh` scripts.
    pub fn shell(mut self, program: impl Into<String>) -> Self {
        self.shell = program.into();
        self
    }

    /// Build the `ScriptRunner`.
    pub fn build(self) -> ScriptRunner {
        ScriptRunner {
            scripts_dir: self.scripts_dir,
            logs_dir: self.logs_dir,
            timeout: self.timeout,
            python: self.python,
            shell: self.shell,
        }
    }
}
