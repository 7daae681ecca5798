use crate::job::{FinishedFuzzingJob, FuzzingJob};
use crate::tool::Tool;
use std::any::Any;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Extension of the sidecar file recording a run's wall-clock milliseconds.
pub const TIME_EXTENSION: &str = "time";

const TARGET_TOKEN: &str = "{target}";
const OUTPUT_TOKEN: &str = "{output}";
const CONFIG_TOKEN: &str = "{config}";

/// Failures of the runner itself. A crashing or hanging analysis is not an
/// error: it finishes with an absent result.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Runner command is empty")]
    EmptyCommand,
    #[error("Failed to spawn command '{command}': {message}")]
    Spawn { command: String, message: String },
    #[error("I/O error on {path:?}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("Error waiting for child process: {0}")]
    Wait(String),
}

fn io_error(path: &Path, e: std::io::Error) -> RunnerError {
    RunnerError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Executes one [`FuzzingJob`] and writes its raw output below a folder.
///
/// Implementations must be idempotent by output path: a job whose output
/// already exists is not run again.
pub trait Runner: Send + Sync {
    fn run(&self, job: &FuzzingJob, output_folder: &Path) -> Result<FinishedFuzzingJob, RunnerError>;
}

fn time_path(output: &Path) -> PathBuf {
    output.with_extension(TIME_EXTENSION)
}

/// Returns the earlier result of `job` if it completed. The time sidecar is
/// written last, so output without one is left over from an interrupted run.
fn reuse_existing(job: &FuzzingJob, output: &Path) -> Option<FinishedFuzzingJob> {
    if !output.is_file() {
        return None;
    }
    let millis = match fs::read_to_string(time_path(output)) {
        Ok(content) => content.trim().parse::<u64>().ok()?,
        Err(_) => {
            debug!(output = ?output, "Ignoring output of an unfinished run");
            return None;
        }
    };
    let elapsed = Duration::from_millis(millis);
    debug!(output = ?output, "Reusing existing output");
    Some(FinishedFuzzingJob::new(
        job.clone(),
        elapsed,
        Some(output.to_path_buf()),
    ))
}

fn prepare(output: &Path) -> Result<(), RunnerError> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    Ok(())
}

/// Makes sure a successful run leaves an output file behind and records its time.
fn complete(job: &FuzzingJob, output: &Path, elapsed: Duration) -> Result<FinishedFuzzingJob, RunnerError> {
    if !output.exists() {
        File::create(output).map_err(|e| io_error(output, e))?;
    }
    write_time(output, elapsed)?;
    Ok(FinishedFuzzingJob::new(
        job.clone(),
        elapsed,
        Some(output.to_path_buf()),
    ))
}

/// Stages the time sidecar beside `output` and renames it into place, so a
/// sidecar on disk is always complete.
fn write_time(output: &Path, elapsed: Duration) -> Result<(), RunnerError> {
    let folder = output.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = NamedTempFile::new_in(folder).map_err(|e| io_error(folder, e))?;
    write!(staged, "{}", elapsed.as_millis()).map_err(|e| io_error(staged.path(), e))?;
    let sidecar = time_path(output);
    staged
        .persist(&sidecar)
        .map_err(|e| io_error(&sidecar, e.error))?;
    Ok(())
}

/// Removes whatever a failed run left behind, so a retry starts clean.
fn fail(job: &FuzzingJob, output: &Path, elapsed: Duration) -> FinishedFuzzingJob {
    for path in [time_path(output), output.to_path_buf()] {
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = ?path, error = %e, "Failed to remove partial output");
            }
        }
    }
    FinishedFuzzingJob::new(job.clone(), elapsed, None)
}

pub struct CommandRunnerConfig {
    /// Program and arguments. `{target}` and `{output}` are substituted
    /// inside arguments; an argument that is exactly `{config}` expands to
    /// the configuration's non-default options. Without an `{output}` token
    /// the program's stdout becomes the output.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

pub struct CommandRunner {
    config: CommandRunnerConfig,
    tool: Arc<Tool>,
}

impl CommandRunner {
    pub fn new(config: CommandRunnerConfig, tool: Arc<Tool>) -> Self {
        Self { config, tool }
    }

    fn writes_own_output(&self) -> bool {
        self.config.command.iter().any(|arg| arg.contains(OUTPUT_TOKEN))
    }

    fn expand(&self, job: &FuzzingJob, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        let mut args = Vec::with_capacity(self.config.command.len());
        for arg in &self.config.command {
            if arg == CONFIG_TOKEN {
                args.extend(job.configuration.to_args(&self.tool));
            } else {
                args.push(
                    arg.replace(TARGET_TOKEN, &job.target.name)
                        .replace(OUTPUT_TOKEN, &output),
                );
            }
        }
        args
    }

    fn wait_with_timeout(&self, mut child: Child) -> Result<Option<ExitStatus>, RunnerError> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {
                    if start_time.elapsed() > self.config.timeout {
                        warn!(timeout = ?self.config.timeout, "Analysis timed out, killing");
                        if let Err(e) = child.kill() {
                            return Err(RunnerError::Wait(format!(
                                "Failed to kill timed-out process: {e}"
                            )));
                        }
                        if let Err(e) = child.wait() {
                            warn!(error = %e, "Failed to reap timed-out process");
                        }
                        return Ok(None);
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(RunnerError::Wait(e.to_string())),
            }
        }
    }
}

impl Runner for CommandRunner {
    fn run(&self, job: &FuzzingJob, output_folder: &Path) -> Result<FinishedFuzzingJob, RunnerError> {
        let output = job.output_path(output_folder);
        if let Some(finished) = reuse_existing(job, &output) {
            return Ok(finished);
        }
        prepare(&output)?;

        let args = self.expand(job, &output);
        let (program, rest) = args.split_first().ok_or(RunnerError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(rest);
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        if self.writes_own_output() {
            cmd.stdout(Stdio::null());
        } else {
            let file = File::create(&output).map_err(|e| io_error(&output, e))?;
            cmd.stdout(Stdio::from(file));
        }
        cmd.stdin(Stdio::null());
        cmd.stderr(Stdio::null());

        let start = Instant::now();
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                fail(job, &output, Duration::ZERO);
                return Err(RunnerError::Spawn {
                    command: program.clone(),
                    message: e.to_string(),
                });
            }
        };
        let status = self.wait_with_timeout(child)?;
        let elapsed = start.elapsed();

        match status {
            Some(status) if status.success() => complete(job, &output, elapsed),
            Some(status) => {
                warn!(job = %job.configuration, target = %job.target, %status, "Analysis failed");
                Ok(fail(job, &output, elapsed))
            }
            None => Ok(fail(job, &output, elapsed)),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}

/// Runs a harness closure in-process. The closure receives the job and the
/// path it should write its output to; an `Err` or a panic fails the job.
pub struct InProcessRunner<F>
where
    F: Fn(&FuzzingJob, &Path) -> Result<(), anyhow::Error>,
{
    harness_fn: F,
}

impl<F> InProcessRunner<F>
where
    F: Fn(&FuzzingJob, &Path) -> Result<(), anyhow::Error>,
{
    pub fn new(harness_fn: F) -> Self {
        Self { harness_fn }
    }
}

impl<F> Runner for InProcessRunner<F>
where
    F: Fn(&FuzzingJob, &Path) -> Result<(), anyhow::Error> + Send + Sync,
{
    fn run(&self, job: &FuzzingJob, output_folder: &Path) -> Result<FinishedFuzzingJob, RunnerError> {
        let output = job.output_path(output_folder);
        if let Some(finished) = reuse_existing(job, &output) {
            return Ok(finished);
        }
        prepare(&output)?;

        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| (self.harness_fn)(job, &output)));
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(())) => complete(job, &output, elapsed),
            Ok(Err(e)) => {
                warn!(job = %job.configuration, error = %e, "Harness failed");
                Ok(fail(job, &output, elapsed))
            }
            Err(payload) => {
                warn!(job = %job.configuration, panic = %panic_message(payload), "Harness panicked");
                Ok(fail(job, &output, elapsed))
            }
        }
    }
}


#[cfg(all(test, unix))]
mod command_runner_tests {
    use super::*;
    use crate::configuration::Configuration;
    use crate::job::Benchmark;
    use crate::level::Level;
    use crate::tool::tests::sample_tool;
    use tempfile::tempdir;

    fn runner(command: &[&str], timeout: Duration) -> (Arc<Tool>, CommandRunner) {
        let tool = Arc::new(sample_tool());
        let config = CommandRunnerConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout,
            working_dir: None,
        };
        (tool.clone(), CommandRunner::new(config, tool))
    }

    fn job(tool: &Tool) -> FuzzingJob {
        let seed = Configuration::default_for(tool).unwrap();
        FuzzingJob::new(seed.mutated(Level::new("cg", "RTA")), Benchmark::new("app.jar"))
    }

    #[test]
    fn cmd_runner_captures_stdout_and_substitutes_tokens() {
        let dir = tempdir().unwrap();
        let (tool, runner) = runner(
            &["sh", "-c", "echo \"$@\"", "sh", "{target}", "{config}"],
            Duration::from_secs(5),
        );
        let finished = runner.run(&job(&tool), dir.path()).unwrap();
        let output = fs::read_to_string(finished.result.unwrap()).unwrap();
        assert_eq!(output.trim(), "app.jar --cg RTA");
    }

    #[test]
    fn cmd_runner_lets_tool_write_its_own_output() {
        let dir = tempdir().unwrap();
        let (tool, runner) = runner(
            &["sh", "-c", "echo found > \"$1\"", "sh", "{output}"],
            Duration::from_secs(5),
        );
        let finished = runner.run(&job(&tool), dir.path()).unwrap();
        assert_eq!(fs::read_to_string(finished.result.unwrap()).unwrap().trim(), "found");
    }

    #[test]
    fn cmd_runner_crash_leaves_no_output() {
        let dir = tempdir().unwrap();
        let (tool, runner) = runner(&["sh", "-c", "echo partial; exit 3"], Duration::from_secs(5));
        let job = job(&tool);
        let finished = runner.run(&job, dir.path()).unwrap();
        assert!(finished.result.is_none());
        assert!(!job.output_path(dir.path()).exists());
    }

    #[test]
    fn cmd_runner_timeout() {
        let dir = tempdir().unwrap();
        let (tool, runner) = runner(&["sh", "-c", "sleep 5"], Duration::from_millis(100));
        let job = job(&tool);
        let finished = runner.run(&job, dir.path()).unwrap();
        assert!(finished.result.is_none());
        assert!(finished.elapsed < Duration::from_secs(5));
        assert!(!job.output_path(dir.path()).exists());
    }

    #[test]
    fn cmd_runner_reuses_completed_output() {
        let dir = tempdir().unwrap();
        let (tool, first) = runner(&["sh", "-c", "echo edge"], Duration::from_secs(5));
        let job = job(&tool);
        let done = first.run(&job, dir.path()).unwrap();
        assert!(done.result.is_some());

        let (_, failing) = runner(&["sh", "-c", "exit 1"], Duration::from_secs(5));
        let again = failing.run(&job, dir.path()).unwrap();
        assert_eq!(again.result, done.result);
    }

    #[test]
    fn cmd_runner_invalid_command() {
        let dir = tempdir().unwrap();
        let (tool, runner) = runner(
            &["./this_command_does_not_exist_ever_12345.sh"],
            Duration::from_secs(1),
        );
        match runner.run(&job(&tool), dir.path()) {
            Err(RunnerError::Spawn { command, .. }) => {
                assert!(command.contains("this_command_does_not_exist"))
            }
            other => panic!("Expected Spawn error, got {other:?}"),
        }
    }
}
