// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::{FromPathBufError, Utf8PathBuf};
use clrtest_metadata::{ClrTestExitCode, TestType};
use clrtest_runner::{
    errors::{ConfigParseError, CreateTestListError, OrchestrateError, WriteTestListError},
    signal::ShutdownEvent,
};
use itertools::Itertools;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are short placeholders. Errors are meant to be printed with
// display_to_stderr, which adds styling and the source chain.

/// An expected failure of a `clrtest` invocation, each with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDir {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirNotUtf8 {
        #[source]
        err: FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("test list creation error")]
    CreateTestListError {
        #[from]
        err: CreateTestListError,
    },
    #[error("no binary could be read")]
    DiscoveryFailed { binaries: Vec<Utf8PathBuf> },
    #[error("test list write error")]
    WriteTestListError {
        #[from]
        err: WriteTestListError,
    },
    #[error("run error")]
    OrchestrateError {
        #[from]
        err: OrchestrateError,
    },
    #[error("test run failed")]
    TestRunFailed { failed: usize },
    #[error("test run incomplete")]
    RunIncomplete {
        interrupted: Option<ShutdownEvent>,
        timed_out: Vec<TestType>,
    },
    #[error("runners not found")]
    RunnerNotFound { test_types: Vec<TestType> },
}

impl ExpectedError {
    /// Returns the exit code for this error.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDir { .. }
            | Self::CurrentDirNotUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::RunnerNotFound { .. } => ClrTestExitCode::SETUP_ERROR,
            Self::CreateTestListError { .. } | Self::DiscoveryFailed { .. } => {
                ClrTestExitCode::TEST_LIST_CREATION_FAILED
            }
            Self::WriteTestListError { .. } => ClrTestExitCode::WRITE_OUTPUT_ERROR,
            Self::OrchestrateError { err } => match err {
                OrchestrateError::Execute { .. } => ClrTestExitCode::RUNNER_EXEC_FAILED,
                _ => ClrTestExitCode::SETUP_ERROR,
            },
            Self::TestRunFailed { .. } => ClrTestExitCode::TEST_RUN_FAILED,
            Self::RunIncomplete { .. } => ClrTestExitCode::INCOMPLETE_RUN,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDir { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirNotUtf8 { err } => {
                error!("current directory is not valid UTF-8");
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse clrtest config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::CreateTestListError { err } => {
                error!("creating test list failed");
                Some(err as &dyn Error)
            }
            Self::DiscoveryFailed { binaries } => {
                error!(
                    "none of the {} binaries could be read: {}",
                    binaries.len(),
                    binaries.iter().map(|b| b.style(styles.bold)).join(", ")
                );
                None
            }
            Self::WriteTestListError { err } => {
                error!("failed to write test list to output");
                err.source()
            }
            Self::OrchestrateError { err } => {
                error!("{err}");
                err.source()
            }
            Self::TestRunFailed { failed } => {
                let tests = if *failed == 1 { "test" } else { "tests" };
                error!("test run failed: {} {tests} failed", failed.style(styles.bold));
                None
            }
            Self::RunIncomplete {
                interrupted,
                timed_out,
            } => {
                if let Some(event) = interrupted {
                    error!("test run cancelled on {event}");
                }
                if !timed_out.is_empty() {
                    error!(
                        "{} timed out before results were written",
                        timed_out
                            .iter()
                            .map(|t| format!("{t} runner").style(styles.warning_text).to_string())
                            .join(", ")
                    );
                }
                None
            }
            Self::RunnerNotFound { test_types } => {
                error!(
                    "no runner found for {} tests (pass the runner's path with --{}-path)",
                    test_types.iter().join(", ").style(styles.bold),
                    test_types.first().map_or("<framework>", |t| t.as_str()),
                );
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {err}");
            next_error = err.source();
        }
    }
}
