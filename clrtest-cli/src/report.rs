// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable output for `clrtest run`.

use clrtest_metadata::TestExecutionStatus;
use clrtest_runner::{
    list::{TestCatalog, TestSelection},
    runner::RunReport,
};
use owo_colors::{OwoColorize, Style, style};
use std::io::{self, Write};

const STATUS_WIDTH: usize = 12;

#[derive(Clone, Debug, Default)]
pub(crate) struct RunStyles {
    pass: Style,
    fail: Style,
    inconclusive: Style,
    not_run: Style,
    name: Style,
    count: Style,
}

impl RunStyles {
    pub(crate) fn colorize(&mut self) {
        self.pass = style().green().bold();
        self.fail = style().red().bold();
        self.inconclusive = style().yellow().bold();
        self.not_run = style().dimmed();
        self.name = style().bold();
        self.count = style().bold();
    }

    fn status(&self, status: TestExecutionStatus) -> Style {
        match status {
            TestExecutionStatus::Successful => self.pass,
            TestExecutionStatus::Error => self.fail,
            TestExecutionStatus::Inconclusive => self.inconclusive,
            TestExecutionStatus::NotRun => self.not_run,
        }
    }
}

fn status_label(status: TestExecutionStatus) -> &'static str {
    match status {
        TestExecutionStatus::Successful => "PASS",
        TestExecutionStatus::Error => "FAIL",
        TestExecutionStatus::Inconclusive => "INCONCLUSIVE",
        TestExecutionStatus::NotRun => "NOT RUN",
    }
}

/// Counts of selected tests by status.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct StatusCounts {
    pub(crate) passed: usize,
    pub(crate) failed: usize,
    pub(crate) inconclusive: usize,
    pub(crate) not_run: usize,
}

impl StatusCounts {
    pub(crate) fn new(catalog: &TestCatalog, selection: &TestSelection) -> Self {
        let mut counts = Self::default();
        for (_, method) in catalog.selected(selection) {
            match method.status() {
                TestExecutionStatus::Successful => counts.passed += 1,
                TestExecutionStatus::Error => counts.failed += 1,
                TestExecutionStatus::Inconclusive => counts.inconclusive += 1,
                TestExecutionStatus::NotRun => counts.not_run += 1,
            }
        }
        counts
    }

    fn total(&self) -> usize {
        self.passed + self.failed + self.inconclusive + self.not_run
    }
}

/// Writes one line per selected test with its status, failure messages indented beneath, then a
/// line per runner and the totals.
pub(crate) fn write_run_human(
    catalog: &TestCatalog,
    selection: &TestSelection,
    report: &RunReport,
    styles: &RunStyles,
    mut writer: impl Write,
) -> io::Result<()> {
    for (_, method) in catalog.selected(selection) {
        let status = method.status();
        writeln!(
            writer,
            "{:>STATUS_WIDTH$} {}",
            status_label(status).style(styles.status(status)),
            method.fully_qualified_name.style(styles.name),
        )?;
        if status != TestExecutionStatus::Error {
            continue;
        }
        let message = method
            .last_result()
            .and_then(|result| result.failure_message.as_deref());
        for line in message.into_iter().flat_map(str::lines) {
            writeln!(writer, "{:STATUS_WIDTH$} {line}", "")?;
        }
    }

    for run in &report.runs {
        writeln!(
            writer,
            "{} runner {}: {} selected, {} results matched, {} unmatched",
            run.test_type,
            run.exit,
            run.selected,
            run.correlation.matched,
            run.correlation.unmatched,
        )?;
    }
    for not_found in &report.not_found {
        writeln!(writer, "{} runner not found, tests not run", not_found.test_type())?;
    }

    let counts = StatusCounts::new(catalog, selection);
    writeln!(
        writer,
        "{} tests: {} passed, {} failed, {} inconclusive, {} not run",
        counts.total().style(styles.count),
        counts.passed.style(styles.status(TestExecutionStatus::Successful)),
        counts.failed.style(styles.status(TestExecutionStatus::Error)),
        counts.inconclusive,
        counts.not_run,
    )
}
