// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `clrtest` failures.
///
/// `clrtest` runs may fail for a variety of reasons. This structure documents the exit codes that
/// may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum ClrTestExitCode {}

impl ClrTestExitCode {
    /// No errors occurred and clrtest exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// One or more tests had an error outcome.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Every candidate binary failed to contribute to the test list.
    pub const TEST_LIST_CREATION_FAILED: i32 = 104;

    /// A runner process could not be started or waited on.
    pub const RUNNER_EXEC_FAILED: i32 = 105;

    /// The runner process was cancelled or timed out before it exited.
    pub const INCOMPLETE_RUN: i32 = 106;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a clrtest invocation, for example a config parse
    /// error or a test runner executable that could not be located.
    pub const SETUP_ERROR: i32 = 96;
}
