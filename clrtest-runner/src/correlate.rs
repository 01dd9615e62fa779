// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Joining parsed results back onto the catalog.

use crate::{list::TestCatalog, results::ExecutionResults};
use camino::Utf8Path;
use std::collections::HashMap;
use tracing::debug;

/// Counts from a single [`correlate`] call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CorrelationSummary {
    /// Results that were attached to a catalog method.
    pub matched: usize,
    /// Results that didn't match any catalog method.
    pub unmatched: usize,
}

/// Attaches each top-level result to the method with the same binary path and identity.
///
/// Both keys are compared exactly. Results that match nothing are counted and otherwise
/// ignored, since runners may report on binaries outside the scanned set. If a method is matched
/// more than once, the last result wins.
pub fn correlate(catalog: &mut TestCatalog, results: &ExecutionResults) -> CorrelationSummary {
    let mut index: HashMap<(&Utf8Path, &str), (usize, usize)> = HashMap::new();
    for (class_ix, class) in catalog.classes().iter().enumerate() {
        for (method_ix, method) in class.methods.iter().enumerate() {
            index.insert(
                (
                    class.binary_path.as_path(),
                    method.fully_qualified_name.as_str(),
                ),
                (class_ix, method_ix),
            );
        }
    }

    let mut updates = Vec::new();
    let mut summary = CorrelationSummary::default();
    for (binary, binary_results) in results.iter() {
        for result in binary_results {
            match index.get(&(binary, result.method_name.as_str())) {
                Some(&position) => {
                    updates.push((position, result.clone()));
                    summary.matched += 1;
                }
                None => {
                    debug!("no test matches result `{}` in `{binary}`", result.method_name);
                    summary.unmatched += 1;
                }
            }
        }
    }

    let classes = catalog.classes_mut();
    for ((class_ix, method_ix), result) in updates {
        classes[class_ix].methods[method_ix].set_last_result(result);
    }
    summary
}
