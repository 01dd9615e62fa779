// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{parse_status, xml::Element, ExecutionResults, TestResult};
use crate::errors::ResultsXmlError;
use std::{collections::HashMap, time::Duration};

struct TestDefinition<'a> {
    binary: &'a str,
    identity: String,
}

/// Parses a Visual Studio test results (`.trx`) file, as written by `MSTest.exe /resultsfile`.
///
/// Results are joined with their test definitions by test ID. The definition supplies the
/// binary (`codeBase`) and the identity (`className.name`); data-driven rows in `InnerResults`
/// become children.
pub fn parse_trx_results(xml: &str) -> Result<ExecutionResults, ResultsXmlError> {
    let root = Element::parse_document(xml)?.expect_root("TestRun")?;

    let mut definitions = HashMap::new();
    for unit_test in root
        .child("TestDefinitions")
        .into_iter()
        .flat_map(|defs| defs.children_named("UnitTest"))
    {
        let (Some(id), Some(method)) = (unit_test.attr("id"), unit_test.child("TestMethod")) else {
            continue;
        };
        // className may be assembly-qualified: `NS.Class, Assembly, Version=...`.
        let class_name = method
            .attr("className")
            .unwrap_or_default()
            .split(',')
            .next()
            .unwrap_or_default()
            .trim();
        let name = method
            .attr("name")
            .or_else(|| unit_test.attr("name"))
            .unwrap_or_default();
        let binary = method
            .attr("codeBase")
            .or_else(|| unit_test.attr("storage"))
            .unwrap_or_default();
        let identity = if class_name.is_empty() {
            name.to_owned()
        } else {
            format!("{class_name}.{name}")
        };
        definitions.insert(id, TestDefinition { binary, identity });
    }

    let mut results = ExecutionResults::new();
    for unit_result in root
        .child("Results")
        .into_iter()
        .flat_map(|r| r.children_named("UnitTestResult"))
    {
        let Some(definition) = unit_result
            .attr("testId")
            .and_then(|id| definitions.get(id))
        else {
            continue;
        };
        let mut result = read_unit_test_result(unit_result);
        result.method_name = definition.identity.clone();
        results.extend(definition.binary, [result]);
    }

    Ok(results)
}

fn read_unit_test_result(element: &Element) -> TestResult {
    let children = element
        .child("InnerResults")
        .into_iter()
        .flat_map(|inner| inner.children_named("UnitTestResult"))
        .map(read_unit_test_result)
        .collect();
    TestResult {
        method_name: element.attr("testName").unwrap_or_default().to_owned(),
        status: parse_status(element.attr("outcome").unwrap_or_default()),
        duration: element.attr("duration").map_or(Duration::ZERO, parse_timespan),
        failure_message: element.text_at(&["Output", "ErrorInfo", "Message"]),
        stack_trace: element.text_at(&["Output", "ErrorInfo", "StackTrace"]),
        children,
    }
}

/// Parses a .NET `TimeSpan` in `[d.]hh:mm:ss[.fffffff]` form. Anything else is zero.
fn parse_timespan(value: &str) -> Duration {
    let mut parts = value.trim().split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Duration::ZERO;
    };
    let hours = match hours.split_once('.') {
        Some((days, hours)) => days
            .parse::<u64>()
            .ok()
            .zip(hours.parse::<u64>().ok())
            .map(|(days, hours)| days * 24 + hours),
        None => hours.parse::<u64>().ok(),
    };
    let (Some(hours), Ok(minutes), Ok(seconds)) =
        (hours, minutes.parse::<u64>(), seconds.parse::<f64>())
    else {
        return Duration::ZERO;
    };
    Duration::try_from_secs_f64(seconds)
        .map(|seconds| Duration::from_secs(hours * 3600 + minutes * 60) + seconds)
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use clrtest_metadata::TestExecutionStatus;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("00:00:01.5000000", Duration::from_millis(1500) ; "fractional")]
    #[test_case("01:02:03", Duration::from_secs(3723) ; "whole seconds")]
    #[test_case("1.00:00:00", Duration::from_secs(86400) ; "days")]
    #[test_case("garbage", Duration::ZERO ; "garbage")]
    #[test_case("00:00:-1", Duration::ZERO ; "negative")]
    fn timespan(input: &str, expected: Duration) {
        assert_eq!(parse_timespan(input), expected);
    }

    #[test]
    fn joins_results_with_definitions() {
        let xml = indoc! {r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <TestRun id="1" name="run" xmlns="http://microsoft.com/schemas/VisualStudio/TeamTest/2010">
              <Results>
                <UnitTestResult testId="t1" testName="Adds" outcome="Passed" duration="00:00:00.2500000" />
                <UnitTestResult testId="t2" testName="Rows" outcome="Failed" duration="00:00:01">
                  <Output>
                    <ErrorInfo>
                      <Message>Assert.AreEqual failed.</Message>
                      <StackTrace>at NS.Calc.Rows()</StackTrace>
                    </ErrorInfo>
                  </Output>
                  <InnerResults>
                    <UnitTestResult testId="t2" testName="Rows (Data Row 0)" outcome="Passed" />
                    <UnitTestResult testId="t2" testName="Rows (Data Row 1)" outcome="Failed" />
                  </InnerResults>
                </UnitTestResult>
                <UnitTestResult testId="unknown" testName="Stray" outcome="Passed" />
              </Results>
              <TestDefinitions>
                <UnitTest name="Adds" storage="c:\tests\calc.dll" id="t1">
                  <TestMethod codeBase="C:\tests\calc.dll" className="NS.Calc, Calc, Version=1.0.0.0" name="Adds" />
                </UnitTest>
                <UnitTest name="Rows" storage="c:\tests\calc.dll" id="t2">
                  <TestMethod codeBase="C:\tests\calc.dll" className="NS.Calc" name="Rows" />
                </UnitTest>
              </TestDefinitions>
            </TestRun>
        "#};

        let results = parse_trx_results(xml).unwrap();
        assert_eq!(results.len(), 2);
        let binary = Utf8Path::new(r"C:\tests\calc.dll");
        let adds = results.find(binary, "NS.Calc.Adds").unwrap();
        assert_eq!(adds.status, TestExecutionStatus::Successful);
        assert_eq!(adds.duration, Duration::from_millis(250));

        let rows = results.find(binary, "NS.Calc.Rows").unwrap();
        assert_eq!(rows.status, TestExecutionStatus::Error);
        assert_eq!(rows.failure_message.as_deref(), Some("Assert.AreEqual failed."));
        assert_eq!(rows.stack_trace.as_deref(), Some("at NS.Calc.Rows()"));
        assert_eq!(rows.children.len(), 2);
        assert_eq!(rows.children[1].method_name, "Rows (Data Row 1)");
        assert_eq!(rows.children[1].status, TestExecutionStatus::Error);
    }
}
