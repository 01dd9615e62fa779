// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, error, fmt, str::FromStr};

/// The test framework convention that produced a discovered test class.
///
/// A test class keeps the same `TestType` for its entire lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestType {
    /// xUnit.net: any method marked `[Fact]` or `[Theory]`.
    #[serde(rename = "xunit")]
    XUnit,

    /// NUnit: a class marked `[TestFixture]`, directly or through a base class.
    #[serde(rename = "nunit")]
    NUnit,

    /// MSTest: a class marked `[TestClass]`.
    #[serde(rename = "mstest")]
    MsTest,
}

impl TestType {
    /// All known test types, in the order classification tries them.
    pub const ALL: [TestType; 3] = [TestType::NUnit, TestType::XUnit, TestType::MsTest];

    /// Returns the string representation of this test type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::XUnit => "xunit",
            Self::NUnit => "nunit",
            Self::MsTest => "mstest",
        }
    }

    /// Returns the string representations of all known test types.
    pub fn variants() -> [&'static str; 3] {
        Self::ALL.map(Self::as_str)
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = TestTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TestTypeParseError {
                input: s.to_owned(),
            })
    }
}

/// An error that occurs while parsing a [`TestType`] from a string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestTypeParseError {
    input: String,
}

impl fmt::Display for TestTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unrecognized test type: {}\n(known values: {})",
            self.input,
            TestType::variants().join(", ")
        )
    }
}

impl error::Error for TestTypeParseError {}

/// The outcome of executing a single test.
///
/// There's no meaningful order between statuses; only equality is defined.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestExecutionStatus {
    /// The test hasn't been run, or the runner reported that it was skipped or ignored.
    #[default]
    NotRun,

    /// The test passed.
    Successful,

    /// The test failed or errored out.
    Error,

    /// The test ran but its outcome was neither a pass nor a failure.
    Inconclusive,
}

impl TestExecutionStatus {
    /// Returns the string representation of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRun => "not-run",
            Self::Successful => "successful",
            Self::Error => "error",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl fmt::Display for TestExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root element for a serializable list of discovered tests.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct TestListSummary {
    /// The total number of test methods across all classes.
    pub test_count: usize,

    /// The discovered test classes, in binary order and then declaration order.
    pub test_classes: Vec<TestClassSummary>,

    /// Units (binaries, types or methods) that were skipped during discovery.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedUnitSummary>,
}

impl TestListSummary {
    /// Creates a new, empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses JSON output from `clrtest list --message-format json`.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }
}

/// A discovered test class.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestClassSummary {
    /// The binary this class was discovered in.
    pub binary_path: Utf8PathBuf,

    /// The namespace of the class. Empty for the global namespace.
    pub namespace: String,

    /// The simple name of the class.
    pub name: String,

    /// The convention under which this class was classified.
    pub test_type: TestType,

    /// The test methods on this class, in declaration order.
    pub test_methods: Vec<TestMethodSummary>,
}

/// A discovered test method.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestMethodSummary {
    /// The simple name of the method.
    pub name: String,

    /// `Namespace.Class.Method`, used to match results produced by test runners.
    pub fully_qualified_name: String,

    /// Traits (categories) declared on the method.
    pub traits: BTreeSet<String>,

    /// The last known result for this method, if it has been run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<TestResultSummary>,
}

/// The result of executing a test, as reported by a runner.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestResultSummary {
    /// The name the runner reported for this result.
    pub method_name: String,

    /// The outcome.
    pub status: TestExecutionStatus,

    /// The time taken, in seconds.
    pub duration_secs: f64,

    /// The failure message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// The failure stack trace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    /// Child results for parameterized or data-driven tests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestResultSummary>,
}

// Floats aren't Eq, but durations here are never NaN.
impl Eq for TestResultSummary {}

/// A unit that was skipped during discovery, along with the reason.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SkippedUnitSummary {
    /// The binary being scanned.
    pub binary_path: Utf8PathBuf,

    /// The full name of the type, if the skipped unit was a type or a method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,

    /// The name of the method, if the skipped unit was a method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,

    /// Why this unit was skipped.
    pub reason: String,
}

/// Root element for a serializable summary of a `clrtest run` invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct RunSummary {
    /// One entry per framework runner that was invoked.
    pub runs: Vec<FrameworkRunSummary>,

    /// The test list after results were correlated.
    pub test_list: TestListSummary,
}

impl RunSummary {
    /// Creates a new run summary.
    pub fn new(runs: Vec<FrameworkRunSummary>, test_list: TestListSummary) -> Self {
        Self { runs, test_list }
    }

    /// Parses JSON output from `clrtest run --message-format json`.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }
}

/// A summary of a single framework runner invocation.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FrameworkRunSummary {
    /// The framework whose runner was invoked.
    pub test_type: TestType,

    /// The runner executable that was used.
    pub runner_path: Utf8PathBuf,

    /// The runner's exit code. `None` if it was terminated by a signal, cancelled or timed out.
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// The results artifact the runner was asked to produce.
    pub results_path: Utf8PathBuf,

    /// The number of selected tests passed to the runner.
    pub selected: usize,

    /// The number of results that were matched against discovered tests.
    pub matched: usize,

    /// The number of results that didn't match any discovered test.
    pub unmatched: usize,
}
