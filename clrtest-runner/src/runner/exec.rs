// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::RunnerExecuteError,
    runner::{
        RunnerCommand,
        os::{self, Job},
    },
    signal::{ShutdownEvent, SignalHandler},
};
use std::{fmt, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, warn};

/// Options for running a single runner process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecuteOptions {
    /// Kill the process if it runs longer than this.
    pub timeout: Option<Duration>,
    /// Send the process's output to the log at debug level instead of inheriting stdout and
    /// stderr.
    pub capture_output: bool,
}

/// How a runner process finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunnerExit {
    /// The process exited by itself. `code` is `None` if it was terminated by a signal.
    Exited {
        /// The exit code.
        code: Option<i32>,
    },
    /// The process was killed after running for longer than the timeout.
    TimedOut(Duration),
    /// The process was killed because clrtest received a signal.
    Interrupted(ShutdownEvent),
}

impl RunnerExit {
    /// Returns the process's exit code, if it exited by itself with one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => *code,
            Self::TimedOut(_) | Self::Interrupted(_) => None,
        }
    }

    /// Returns true if the process exited by itself, whether or not it succeeded.
    ///
    /// Console runners exit with a non-zero code when tests fail, so only a killed process means
    /// there are no results to read.
    pub fn completed(&self) -> bool {
        matches!(self, Self::Exited { .. })
    }
}

impl fmt::Display for RunnerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::Exited { code: None } => write!(f, "terminated by a signal"),
            Self::TimedOut(timeout) => {
                write!(f, "timed out after {}", humantime::format_duration(*timeout))
            }
            Self::Interrupted(event) => write!(f, "killed on {event}"),
        }
    }
}

/// How long output forwarders may keep reading after the runner is gone. Processes the runner
/// left behind can hold its pipes open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Runs `command` to completion, or until it times out or a shutdown signal arrives.
///
/// On timeout or a signal, the runner is killed along with every process it started (its process
/// group on Unix, its job object on Windows). Only the runner itself is killed if the returned
/// future is dropped.
pub(crate) async fn execute(
    command: &RunnerCommand,
    options: ExecuteOptions,
    signal_handler: &mut SignalHandler,
) -> Result<RunnerExit, RunnerExecuteError> {
    let program = command.program().to_owned();
    let mut cmd = command.to_tokio();
    cmd.kill_on_drop(true).stdin(Stdio::null());
    if options.capture_output {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }
    os::set_process_group(cmd.as_std_mut());

    debug!("running `{command}`");
    let mut child = cmd.spawn().map_err(|error| RunnerExecuteError::Spawn {
        program: program.clone(),
        error,
    })?;
    // Without a job object only the runner itself can be killed.
    let job = os::create_job().ok();
    let _ = os::assign_process_to_job(&child, job.as_ref());

    let mut forwarders = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(forward_lines(program.clone(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(forward_lines(program.clone(), "stderr", stderr));
    }

    let timeout = async {
        match options.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    let exit = tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|error| RunnerExecuteError::Wait {
                program: program.clone(),
                error,
            })?;
            RunnerExit::Exited { code: status.code() }
        }
        () = timeout => {
            kill(&mut child, job.as_ref(), &program).await?;
            // options.timeout is always set if this branch completes.
            RunnerExit::TimedOut(options.timeout.unwrap_or_default())
        }
        event = signal_handler.recv() => {
            kill(&mut child, job.as_ref(), &program).await?;
            RunnerExit::Interrupted(event)
        }
    };

    let drain_deadline = Instant::now() + OUTPUT_DRAIN_TIMEOUT;
    for mut forwarder in forwarders {
        match tokio::time::timeout_at(drain_deadline, &mut forwarder).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!("output forwarder for `{program}` failed: {error}"),
            Err(_) => {
                debug!("output of `{program}` is still open after it finished, not reading it");
                forwarder.abort();
            }
        }
    }
    debug!("`{program}` {exit}");
    Ok(exit)
}

async fn kill(
    child: &mut Child,
    job: Option<&Job>,
    program: &str,
) -> Result<(), RunnerExecuteError> {
    os::kill_process_tree(child, job);
    child
        .kill()
        .await
        .map_err(|error| RunnerExecuteError::Kill {
            program: program.to_owned(),
            error,
        })
}

fn forward_lines(
    program: String,
    stream: &'static str,
    reader: impl AsyncRead + Unpin + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(target: "clrtest_runner::runner::output", "[{program} {stream}] {line}")
                }
                Ok(None) => break,
                Err(error) => {
                    debug!("error reading {stream} of `{program}`: {error}");
                    break;
                }
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use camino::Utf8Path;

    fn sh(script: &str) -> RunnerCommand {
        RunnerCommand::build(
            Utf8Path::new("/bin/sh"),
            vec!["-c".to_owned(), script.to_owned()],
            None,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn exit_codes() {
        let mut handler = SignalHandler::noop();
        let exit = execute(&sh("exit 3"), ExecuteOptions::default(), &mut handler)
            .await
            .unwrap();
        assert_eq!(exit, RunnerExit::Exited { code: Some(3) });
        assert_eq!(exit.exit_code(), Some(3));
        assert!(exit.completed());

        let options = ExecuteOptions {
            timeout: None,
            capture_output: true,
        };
        let exit = execute(&sh("echo out; echo err >&2"), options, &mut handler)
            .await
            .unwrap();
        assert_eq!(exit, RunnerExit::Exited { code: Some(0) });
    }

    #[tokio::test]
    async fn timeout_kills() {
        let mut handler = SignalHandler::noop();
        let options = ExecuteOptions {
            timeout: Some(Duration::from_millis(100)),
            capture_output: true,
        };
        let exit = execute(&sh("exec sleep 30"), options, &mut handler)
            .await
            .unwrap();
        assert_eq!(exit, RunnerExit::TimedOut(Duration::from_millis(100)));
        assert_eq!(exit.exit_code(), None);
        assert!(!exit.completed());
        assert_eq!(exit.to_string(), "timed out after 100ms");
    }

    #[tokio::test]
    async fn timeout_kills_process_group() {
        // The shell forks `sleep` instead of exec-ing it, so the sleep holds the output pipes.
        let mut handler = SignalHandler::noop();
        let options = ExecuteOptions {
            timeout: Some(Duration::from_millis(200)),
            capture_output: true,
        };
        let start = std::time::Instant::now();
        let exit = execute(&sh("sleep 30; true"), options, &mut handler)
            .await
            .unwrap();
        assert_eq!(exit, RunnerExit::TimedOut(Duration::from_millis(200)));
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn leftover_process_holding_output() {
        // The runner exits at once, but a background process keeps its stdout open.
        let mut handler = SignalHandler::noop();
        let options = ExecuteOptions {
            timeout: None,
            capture_output: true,
        };
        let start = std::time::Instant::now();
        let exit = execute(&sh("sleep 10 & echo started"), options, &mut handler)
            .await
            .unwrap();
        assert_eq!(exit, RunnerExit::Exited { code: Some(0) });
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn missing_program() {
        let mut handler = SignalHandler::noop();
        let command = RunnerCommand::build(
            Utf8Path::new("/nonexistent/runner.exe"),
            Vec::new(),
            None,
            None,
        )
        .unwrap();
        let error = execute(&command, ExecuteOptions::default(), &mut handler)
            .await
            .unwrap_err();
        assert!(matches!(error, RunnerExecuteError::Spawn { .. }));
    }
}
