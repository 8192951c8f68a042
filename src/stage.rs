//! Stage Runner - One External Invocation
//!
//! Runs a child process with an optional time budget and reports a tagged
//! outcome. Exit codes are reported, never judged: the pipeline decides
//! success by looking for the stage's artifact.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl StageCommand {
    /// First element is the program; `None` if `argv` is empty.
    pub fn from_argv(argv: Vec<String>) -> Option<Self> {
        let mut parts = argv.into_iter();
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            cwd: None,
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Exited on its own, with any exit code.
    Completed { exit_code: i32, output: String },
    /// Killed after exceeding its budget. Output is discarded.
    TimedOut { timeout: Duration },
    /// Terminated by a signal.
    Crashed { output: String },
    /// Could not be started or waited on.
    LaunchFailed { reason: String },
}

impl StageOutcome {
    pub fn output(&self) -> &str {
        match self {
            Self::Completed { output, .. } | Self::Crashed { output } => output,
            Self::TimedOut { .. } | Self::LaunchFailed { .. } => "",
        }
    }
}

/// Runs `command` to completion, or kills it once `timeout` elapses.
///
/// Standard output and standard error are both captured; the returned
/// output is stdout followed by stderr.
pub fn run(command: &StageCommand, timeout: Option<Duration>) -> StageOutcome {
    let started_at = Instant::now();
    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &command.cwd {
        process.current_dir(dir);
    }

    let mut child = match process.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(
                target = "mathrender::stage",
                op = "stage::run",
                result = "launch_failed",
                command = %command.command_line(),
                error = %err,
                "Failed to spawn stage command"
            );
            return StageOutcome::LaunchFailed {
                reason: err.to_string(),
            };
        }
    };

    let stdout = child.stdout.take().map(capture);
    let stderr = child.stderr.take().map(capture);

    let status = match wait(&mut child, timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate(&mut child);
            warn!(
                target = "mathrender::stage",
                op = "stage::run",
                result = "timeout",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                command = %command.command_line(),
                "Stage command exceeded its time budget"
            );
            // Reader threads are left to finish on their own; a grandchild
            // may still hold the pipes open.
            return StageOutcome::TimedOut {
                timeout: timeout.unwrap_or_default(),
            };
        }
        Err(err) => {
            terminate(&mut child);
            return StageOutcome::LaunchFailed {
                reason: err.to_string(),
            };
        }
    };

    let mut output = collect(stdout);
    output.push_str(&collect(stderr));

    info!(
        target = "mathrender::stage",
        op = "stage::run",
        result = "exited",
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        exit_code = status.code().map(i64::from).unwrap_or(-1),
        command = %command.command_line(),
        "Stage command finished"
    );

    match status.code() {
        Some(exit_code) => StageOutcome::Completed { exit_code, output },
        None => StageOutcome::Crashed { output },
    }
}

/// Kills and reaps the child so no zombie outlives the stage.
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn capture<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> StageCommand {
        StageCommand::from_argv(vec!["/bin/sh".into(), "-c".into(), script.into()]).unwrap()
    }

    #[test]
    fn test_nonzero_exit_is_completed_with_output() {
        let outcome = run(&sh("echo out; echo err >&2; exit 3"), Some(Duration::from_secs(5)));
        match outcome {
            StageOutcome::Completed { exit_code, output } => {
                assert_eq!(exit_code, 3);
                assert!(output.contains("out"));
                assert!(output.contains("err"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_timeout_kills_process() {
        let started = Instant::now();
        let outcome = run(&sh("exec sleep 5"), Some(Duration::from_millis(200)));
        assert_eq!(
            outcome,
            StageOutcome::TimedOut {
                timeout: Duration::from_millis(200)
            }
        );
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_terminate_reaps_child() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "exec sleep 5"])
            .spawn()
            .unwrap();
        terminate(&mut child);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_missing_program_is_launch_failure() {
        let command =
            StageCommand::from_argv(vec!["/nonexistent/mathrender-tool".into()]).unwrap();
        assert!(matches!(
            run(&command, None),
            StageOutcome::LaunchFailed { .. }
        ));
    }

    #[test]
    fn test_signal_termination_is_crash() {
        assert!(matches!(
            run(&sh("kill -9 $$"), None),
            StageOutcome::Crashed { .. }
        ));
    }

    #[test]
    fn test_runs_in_working_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let outcome = run(&sh("pwd -P").current_dir(dir.path()), None);
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(outcome.output().trim(), canonical.to_str().unwrap());
    }

    #[test]
    fn test_command_line_joins_args() {
        let command = StageCommand::from_argv(vec!["latex".into()]).unwrap().arg("/tmp/x");
        assert_eq!(command.command_line(), "latex /tmp/x");
        assert!(StageCommand::from_argv(vec![]).is_none());
    }
}
