// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing of the result artifacts written by test runners.
//!
//! Each framework's runner writes its own XML schema. The parsers here all produce the same
//! normalized form: [`ExecutionResults`], a mapping from the binary a result came from to the
//! [`TestResult`]s reported for it.

mod nunit;
mod trx;
mod xml;
mod xunit;

pub use nunit::parse_nunit_results;
pub use trx::parse_trx_results;
pub use xunit::parse_xunit_results;

use crate::errors::ResultsParseError;
use camino::{Utf8Path, Utf8PathBuf};
use clrtest_metadata::{TestExecutionStatus, TestResultSummary, TestType};
use indexmap::IndexMap;
use std::time::Duration;
use tracing::{debug, warn};

/// One execution outcome reported by a runner.
#[derive(Clone, Debug, PartialEq)]
pub struct TestResult {
    /// The reported name. For parameterized cases this includes the argument list.
    pub method_name: String,
    /// The outcome.
    pub status: TestExecutionStatus,
    /// Time taken. Zero when the runner reported something unparsable.
    pub duration: Duration,
    /// The failure message, if any.
    pub failure_message: Option<String>,
    /// The failure stack trace, if any.
    pub stack_trace: Option<String>,
    /// Sub-cases of a parameterized or data-driven test, in report order.
    pub children: Vec<TestResult>,
}

impl TestResult {
    /// Creates a result with no failure details and no children.
    pub fn new(method_name: impl Into<String>, status: TestExecutionStatus) -> Self {
        Self {
            method_name: method_name.into(),
            status,
            duration: Duration::ZERO,
            failure_message: None,
            stack_trace: None,
            children: Vec::new(),
        }
    }

    /// Returns this result and its descendants, depth first.
    pub fn iter(&self) -> impl Iterator<Item = &TestResult> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }

    /// Returns the serializable form of this result.
    pub fn to_summary(&self) -> TestResultSummary {
        TestResultSummary {
            method_name: self.method_name.clone(),
            status: self.status,
            duration_secs: self.duration.as_secs_f64(),
            failure_message: self.failure_message.clone(),
            stack_trace: self.stack_trace.clone(),
            children: self.children.iter().map(Self::to_summary).collect(),
        }
    }
}

/// Parsed results, keyed by the binary path the runner reported them under.
///
/// Binaries appear in the order the runner reported them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionResults {
    by_binary: IndexMap<Utf8PathBuf, Vec<TestResult>>,
}

impl ExecutionResults {
    /// Creates an empty set of results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds results for a binary. Results for a binary that's already present are appended.
    pub fn extend(
        &mut self,
        binary: impl Into<Utf8PathBuf>,
        results: impl IntoIterator<Item = TestResult>,
    ) {
        self.by_binary
            .entry(binary.into())
            .or_default()
            .extend(results);
    }

    /// Returns true if there are no results.
    pub fn is_empty(&self) -> bool {
        self.by_binary.values().all(Vec::is_empty)
    }

    /// Returns the number of top-level results.
    pub fn len(&self) -> usize {
        self.by_binary.values().map(Vec::len).sum()
    }

    /// Iterates over binaries and their top-level results.
    pub fn iter(&self) -> impl Iterator<Item = (&Utf8Path, &[TestResult])> + '_ {
        self.by_binary
            .iter()
            .map(|(binary, results)| (binary.as_path(), results.as_slice()))
    }

    /// Returns the top-level results for a binary.
    pub fn results_for(&self, binary: &Utf8Path) -> &[TestResult] {
        self.by_binary.get(binary).map_or(&[], Vec::as_slice)
    }

    /// Finds a result for `binary` by name, including the children of hierarchical results.
    pub fn find(&self, binary: &Utf8Path, method_name: &str) -> Option<&TestResult> {
        self.results_for(binary)
            .iter()
            .flat_map(TestResult::iter)
            .find(|result| result.method_name == method_name)
    }
}

/// The outcome of reading a result artifact.
#[derive(Debug)]
pub enum ResultsOutcome {
    /// The artifact was parsed.
    Parsed(ExecutionResults),
    /// The artifact doesn't exist.
    Missing(Utf8PathBuf),
    /// The artifact couldn't be parsed.
    Malformed(ResultsParseError),
}

impl ResultsOutcome {
    /// Returns the parsed results, or empty results after logging a diagnostic.
    pub fn into_results(self) -> ExecutionResults {
        match self {
            Self::Parsed(results) => results,
            Self::Missing(path) => {
                warn!("results file {path} was not produced, no results available");
                ExecutionResults::new()
            }
            Self::Malformed(error) => {
                warn!("{error}, no results available");
                ExecutionResults::new()
            }
        }
    }
}

/// Reads the result artifact at `path` using the parser for `test_type`.
pub fn read_results(test_type: TestType, path: &Utf8Path) -> ResultsOutcome {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return ResultsOutcome::Missing(path.to_owned());
        }
        Err(error) => return ResultsOutcome::Malformed(ResultsParseError::read(path, error)),
    };
    debug!("parsing {test_type} results from {path}");

    let parsed = match test_type {
        TestType::XUnit => parse_xunit_results(&contents),
        TestType::NUnit => parse_nunit_results(&contents),
        TestType::MsTest => parse_trx_results(&contents),
    };
    match parsed {
        Ok(results) => ResultsOutcome::Parsed(results),
        Err(error) => ResultsOutcome::Malformed(ResultsParseError::parse(path, error)),
    }
}

/// Maps a runner's textual outcome to a status. Matching ignores case.
pub fn parse_status(outcome: &str) -> TestExecutionStatus {
    match outcome.to_ascii_lowercase().as_str() {
        "success" | "passed" | "pass" => TestExecutionStatus::Successful,
        "failure" | "failed" | "fail" | "error" | "timeout" | "aborted" => {
            TestExecutionStatus::Error
        }
        "inconclusive" | "warning" => TestExecutionStatus::Inconclusive,
        _ => TestExecutionStatus::NotRun,
    }
}

/// Parses a duration in seconds, such as `0.125`. Anything unparsable or negative is zero.
pub fn parse_seconds(value: Option<&str>) -> Duration {
    value
        .and_then(|value| value.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(Duration::ZERO)
}

// `test-case` elements, shared by the xUnit and NUnit schemas.
fn read_test_case(element: &xml::Element) -> TestResult {
    TestResult {
        method_name: element.attr("name").unwrap_or_default().to_owned(),
        status: parse_status(element.attr("result").unwrap_or_default()),
        duration: parse_seconds(element.attr("time")),
        failure_message: element.text_at(&["failure", "message"]),
        stack_trace: element.text_at(&["failure", "stack-trace"]),
        children: Vec::new(),
    }
}

// A `test-suite` for a parameterized test. Its leaf cases become children, and it takes the name
// its cases share.
fn read_test_suite(element: &xml::Element) -> TestResult {
    let children: Vec<_> = element
        .child("results")
        .into_iter()
        .flat_map(|results| results.children_named("test-case"))
        .map(read_test_case)
        .collect();
    let mut result = read_test_case(element);
    if let Some(prefix) = children
        .first()
        .and_then(|first| name_prefix(&first.method_name))
    {
        result.method_name = prefix.to_owned();
    }
    result.children = children;
    result
}

/// Returns the part of a parameterized test name before its argument list.
pub fn name_prefix(name: &str) -> Option<&str> {
    name.find('(').map(|index| &name[..index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Success", TestExecutionStatus::Successful)]
    #[test_case("Passed", TestExecutionStatus::Successful)]
    #[test_case("PASS", TestExecutionStatus::Successful)]
    #[test_case("Failure", TestExecutionStatus::Error)]
    #[test_case("Failed", TestExecutionStatus::Error)]
    #[test_case("Error", TestExecutionStatus::Error)]
    #[test_case("Timeout", TestExecutionStatus::Error)]
    #[test_case("Inconclusive", TestExecutionStatus::Inconclusive)]
    #[test_case("Warning", TestExecutionStatus::Inconclusive)]
    #[test_case("Ignored", TestExecutionStatus::NotRun)]
    #[test_case("NotExecuted", TestExecutionStatus::NotRun)]
    #[test_case("", TestExecutionStatus::NotRun)]
    fn status_mapping(input: &str, expected: TestExecutionStatus) {
        assert_eq!(parse_status(input), expected);
    }

    #[test_case(Some("1.5"), Duration::from_millis(1500) ; "decimal")]
    #[test_case(Some(" 2 "), Duration::from_secs(2) ; "whitespace")]
    #[test_case(Some("abc"), Duration::ZERO ; "unparsable")]
    #[test_case(Some("-1"), Duration::ZERO ; "negative")]
    #[test_case(Some("NaN"), Duration::ZERO ; "nan")]
    #[test_case(None, Duration::ZERO ; "absent")]
    fn seconds(input: Option<&str>, expected: Duration) {
        assert_eq!(parse_seconds(input), expected);
    }

    #[test]
    fn find_descends_into_children() {
        let mut parent = TestResult::new("NS.C.Case", TestExecutionStatus::Error);
        parent.children = vec![
            TestResult::new("NS.C.Case(1)", TestExecutionStatus::Successful),
            TestResult::new("NS.C.Case(2)", TestExecutionStatus::Error),
        ];
        let mut results = ExecutionResults::new();
        results.extend("a.dll", [parent]);

        let binary = Utf8Path::new("a.dll");
        assert_eq!(
            results.find(binary, "NS.C.Case(2)").map(|r| r.status),
            Some(TestExecutionStatus::Error)
        );
        assert!(results.find(binary, "NS.C.Case").is_some());
        assert!(results.find(Utf8Path::new("b.dll"), "NS.C.Case").is_none());
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn duplicate_binaries_merge() {
        let mut results = ExecutionResults::new();
        results.extend("a.dll", [TestResult::new("A", TestExecutionStatus::Successful)]);
        results.extend("a.dll", [TestResult::new("B", TestExecutionStatus::Successful)]);
        assert_eq!(results.results_for(Utf8Path::new("a.dll")).len(), 2);
    }

    #[test]
    fn missing_file() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("results.xml");
        let outcome = read_results(TestType::XUnit, &path);
        assert!(matches!(outcome, ResultsOutcome::Missing(_)));
        assert!(outcome.into_results().is_empty());
    }
}
