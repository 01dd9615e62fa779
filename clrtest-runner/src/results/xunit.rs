// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{read_test_case, read_test_suite, xml::Element, ExecutionResults};
use crate::errors::ResultsXmlError;

/// Parses the results file written by `xunit-console.exe`.
///
/// Each `Module` element names a binary and holds `Class` elements, whose `results` contain flat
/// `test-case` elements and `test-suite` elements for parameterized tests.
pub fn parse_xunit_results(xml: &str) -> Result<ExecutionResults, ResultsXmlError> {
    let root = Element::parse_document(xml)?;
    let mut results = ExecutionResults::new();

    let modules = if root.name() == "Module" {
        vec![&root]
    } else {
        root.descendants_named("Module")
    };
    for module in modules {
        let binary = module.attr("name").unwrap_or_default();
        let cases = module
            .descendants_named("Class")
            .into_iter()
            .filter_map(|class| class.child("results"))
            .flat_map(|results| results.elements())
            .filter_map(|element| match element.name() {
                "test-case" => Some(read_test_case(element)),
                "test-suite" => Some(read_test_suite(element)),
                _ => None,
            });
        results.extend(binary, cases.collect::<Vec<_>>());
    }

    Ok(results)
}
