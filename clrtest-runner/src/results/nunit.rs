// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{read_test_case, read_test_suite, xml::Element, ExecutionResults, TestResult};
use crate::errors::ResultsXmlError;

// Suite types whose cases are the parameterizations of a single test method.
const PARAMETERIZED_SUITE_TYPES: [&str; 2] = ["ParameterizedTest", "Theory"];

/// Parses an NUnit 2.x results file, as written by `nunit-console.exe /result`.
///
/// Each `test-suite` of type `Assembly` is named after a binary. Its nested namespace and
/// fixture suites are flattened; parameterized tests become hierarchical results.
pub fn parse_nunit_results(xml: &str) -> Result<ExecutionResults, ResultsXmlError> {
    let root = Element::parse_document(xml)?.expect_root("test-results")?;
    let mut results = ExecutionResults::new();

    for assembly in root
        .descendants_named("test-suite")
        .into_iter()
        .filter(|suite| suite.attr("type") == Some("Assembly"))
    {
        let binary = assembly.attr("name").unwrap_or_default();
        let mut cases = Vec::new();
        collect_cases(assembly, &mut cases);
        results.extend(binary, cases);
    }

    Ok(results)
}

fn collect_cases(suite: &Element, out: &mut Vec<TestResult>) {
    let Some(children) = suite.child("results") else {
        return;
    };
    for child in children.elements() {
        match child.name() {
            "test-case" => out.push(read_test_case(child)),
            "test-suite" if is_parameterized(child) => out.push(read_test_suite(child)),
            "test-suite" => collect_cases(child, out),
            _ => {}
        }
    }
}

fn is_parameterized(suite: &Element) -> bool {
    suite
        .attr("type")
        .is_some_and(|ty| PARAMETERIZED_SUITE_TYPES.contains(&ty))
}
