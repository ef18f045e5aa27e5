//! Verification gate
//!
//! Runs the project's build/test command between phases. The gate only
//! reports; the controller decides what a failure means. Nothing here
//! retries on its own.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed while waiting for `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raw result of one build/test invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Build/test runner collaborator
pub trait BuildRunner: Send + Sync {
    /// Run `command` in `cwd`. `None` waits without bound.
    fn run(
        &self,
        command: &[String],
        cwd: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, VerificationError>;
}

/// Runs the command as a child process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl BuildRunner for ProcessRunner {
    fn run(
        &self,
        command: &[String],
        cwd: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, VerificationError> {
        let shown = command.join(" ");
        let Some((program, args)) = command.split_first() else {
            return Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
            });
        };

        let start = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| VerificationError::Spawn {
                command: shown.clone(),
                source,
            })?;

        // Drain pipes on their own threads so a chatty command cannot block on a full pipe
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_with_timeout(&mut child, &shown, timeout, start)?;
        let output = CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!(
            "`{}` exited with {} in {}ms",
            shown, output.exit_code, output.duration_ms
        );
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Poll for completion with small sleep intervals, killing on timeout
fn wait_with_timeout(
    child: &mut Child,
    command: &str,
    timeout: Option<Duration>,
    start: Instant,
) -> Result<std::process::ExitStatus, VerificationError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if let Some(limit) = timeout {
                    if start.elapsed() > limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        warn!("`{}` timed out after {}s", command, limit.as_secs());
                        return Err(VerificationError::Timeout {
                            command: command.to_string(),
                            timeout_secs: limit.as_secs(),
                        });
                    }
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(source) => {
                return Err(VerificationError::Io {
                    command: command.to_string(),
                    source,
                })
            }
        }
    }
}

/// Outcome of one gate invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// No command was configured
    #[serde(default)]
    pub skipped: bool,
}

impl VerificationReport {
    /// Last `lines` lines of stderr, or stdout when stderr is empty
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let all: Vec<&str> = source.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Verification gate: a command, a working directory and a timeout
pub struct Gate {
    runner: Box<dyn BuildRunner>,
    command: Vec<String>,
    cwd: PathBuf,
    timeout: Option<Duration>,
}

impl Gate {
    pub fn new(runner: Box<dyn BuildRunner>, command: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            command,
            cwd: cwd.into(),
            timeout: None,
        }
    }

    /// Gate that always passes
    pub fn disabled() -> Self {
        Self::new(Box::new(ProcessRunner), Vec::new(), ".")
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command_line(&self) -> Option<String> {
        (!self.command.is_empty()).then(|| self.command.join(" "))
    }

    pub fn verify(&self) -> Result<VerificationReport, VerificationError> {
        let Some(shown) = self.command_line() else {
            debug!("No verification command configured; phase passes");
            return Ok(VerificationReport {
                passed: true,
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
                skipped: true,
            });
        };
        if self.timeout.is_none() {
            warn!("Verifying with `{}` and no timeout", shown);
        }

        let output = self.runner.run(&self.command, &self.cwd, self.timeout)?;
        let report = VerificationReport {
            passed: output.exit_code == 0,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
            skipped: false,
        };
        if report.passed {
            info!("Verification passed ({}ms)", report.duration_ms);
        } else {
            warn!(
                "Verification failed: `{}` exited with {}",
                shown, report.exit_code
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        code: i32,
        calls: Arc<AtomicUsize>,
    }

    impl BuildRunner for Fixed {
        fn run(&self, _: &[String], _: &Path, _: Option<Duration>) -> Result<CommandOutput, VerificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput {
                exit_code: self.code,
                stdout: "line 1\nline 2\nline 3".into(),
                stderr: String::new(),
                duration_ms: 5,
            })
        }
    }

    #[test]
    fn test_no_command_passes_without_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Gate::new(Box::new(Fixed { code: 1, calls: calls.clone() }), Vec::new(), ".");
        let report = gate.verify().unwrap();
        assert!(report.passed && report.skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_exit_code_decides() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Gate::new(
            Box::new(Fixed { code: 2, calls: calls.clone() }),
            vec!["make".into(), "test".into()],
            ".",
        );
        let report = gate.verify().unwrap();
        assert!(!report.passed);
        assert_eq!(report.exit_code, 2);
        assert_eq!(report.tail(2), "line 2\nline 3");
        assert_eq!(gate.command_line().as_deref(), Some("make test"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_reports_exit_code() {
        let out = ProcessRunner
            .run(
                &["sh".into(), "-c".into(), "echo hi; exit 3".into()],
                Path::new("."),
                Some(Duration::from_secs(30)),
            )
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_times_out() {
        let err = ProcessRunner
            .run(
                &["sleep".into(), "5".into()],
                Path::new("."),
                Some(Duration::from_millis(200)),
            )
            .unwrap_err();
        assert!(matches!(err, VerificationError::Timeout { .. }));
    }

    #[test]
    fn test_spawn_failure() {
        let err = ProcessRunner
            .run(&["definitely-not-a-real-binary-xyz".into()], Path::new("."), None)
            .unwrap_err();
        assert!(matches!(err, VerificationError::Spawn { .. }));
    }
}
