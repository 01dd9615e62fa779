// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use clrtest_metadata::TestType;
use std::fmt;

/// Everything a runner needs to know about a single invocation.
#[derive(Clone, Copy, Debug)]
pub struct RunnerInvocation<'a> {
    /// The binaries containing the selected tests, in catalog order.
    pub binaries: &'a [Utf8PathBuf],
    /// The identities of the selected tests.
    pub tests: &'a [String],
    /// The run-list artifact, if this runner uses one.
    pub run_list: Option<&'a Utf8Path>,
    /// Where the runner should write its results.
    pub results: &'a Utf8Path,
}

/// How to find and invoke a framework's console runner.
pub trait RunnerStrategy: fmt::Debug + Send + Sync {
    /// The framework this strategy runs.
    fn test_type(&self) -> TestType;

    /// The runner's file name.
    fn executable_name(&self) -> &'static str;

    /// A glob matching install directories directly under a search root.
    fn install_dir_pattern(&self) -> &'static str;

    /// Subdirectories of an install directory that may contain the executable, in order. The
    /// empty string is the install directory itself.
    fn executable_subdirs(&self) -> &'static [&'static str];

    /// Whether the selected tests are passed through a run-list file.
    fn uses_run_list(&self) -> bool;

    /// The file extension of the results artifact.
    fn results_extension(&self) -> &'static str;

    /// The runner's arguments, unquoted.
    fn runner_args(&self, invocation: &RunnerInvocation<'_>) -> Vec<String>;
}

/// Returns the built-in strategy for `test_type`.
pub fn strategy_for(test_type: TestType) -> &'static dyn RunnerStrategy {
    match test_type {
        TestType::XUnit => &XUnitStrategy,
        TestType::NUnit => &NUnitStrategy,
        TestType::MsTest => &MsTestStrategy,
    }
}

// xunit.console and nunit-console 2.x share the same run-list and result flags.
fn run_list_args(invocation: &RunnerInvocation<'_>) -> Vec<String> {
    let mut args: Vec<String> = invocation.binaries.iter().map(|b| b.to_string()).collect();
    if let Some(run_list) = invocation.run_list {
        args.push(format!("/runlist={run_list}"));
    }
    args.extend(["/nologo".to_owned(), "/noshadow".to_owned()]);
    args.push(format!("/result={}", invocation.results));
    args
}

/// xUnit.net 1.x console runner.
#[derive(Clone, Copy, Debug)]
pub struct XUnitStrategy;

impl RunnerStrategy for XUnitStrategy {
    fn test_type(&self) -> TestType {
        TestType::XUnit
    }

    fn executable_name(&self) -> &'static str {
        "xunit-console.exe"
    }

    fn install_dir_pattern(&self) -> &'static str {
        "XUnit*"
    }

    fn executable_subdirs(&self) -> &'static [&'static str] {
        &[""]
    }

    fn uses_run_list(&self) -> bool {
        true
    }

    fn results_extension(&self) -> &'static str {
        "xml"
    }

    fn runner_args(&self, invocation: &RunnerInvocation<'_>) -> Vec<String> {
        run_list_args(invocation)
    }
}

/// NUnit 2.x console runner.
#[derive(Clone, Copy, Debug)]
pub struct NUnitStrategy;

impl RunnerStrategy for NUnitStrategy {
    fn test_type(&self) -> TestType {
        TestType::NUnit
    }

    fn executable_name(&self) -> &'static str {
        "nunit-console.exe"
    }

    fn install_dir_pattern(&self) -> &'static str {
        "NUnit*"
    }

    fn executable_subdirs(&self) -> &'static [&'static str] {
        &["", "bin"]
    }

    fn uses_run_list(&self) -> bool {
        true
    }

    fn results_extension(&self) -> &'static str {
        "xml"
    }

    fn runner_args(&self, invocation: &RunnerInvocation<'_>) -> Vec<String> {
        run_list_args(invocation)
    }
}

/// The Visual Studio `MSTest.exe` command-line runner.
#[derive(Clone, Copy, Debug)]
pub struct MsTestStrategy;

impl RunnerStrategy for MsTestStrategy {
    fn test_type(&self) -> TestType {
        TestType::MsTest
    }

    fn executable_name(&self) -> &'static str {
        "MSTest.exe"
    }

    fn install_dir_pattern(&self) -> &'static str {
        "Microsoft Visual Studio*"
    }

    fn executable_subdirs(&self) -> &'static [&'static str] {
        &["Common7/IDE"]
    }

    fn uses_run_list(&self) -> bool {
        false
    }

    fn results_extension(&self) -> &'static str {
        "trx"
    }

    fn runner_args(&self, invocation: &RunnerInvocation<'_>) -> Vec<String> {
        let mut args = vec!["/nologo".to_owned()];
        args.extend(
            invocation
                .binaries
                .iter()
                .map(|binary| format!("/testcontainer:{binary}")),
        );
        args.extend(invocation.tests.iter().map(|test| format!("/test:{test}")));
        args.push(format!("/resultsfile:{}", invocation.results));
        args
    }
}
