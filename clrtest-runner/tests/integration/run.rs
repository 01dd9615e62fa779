// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end runs against shell scripts standing in for console runners.

use crate::fixtures::SampleWorkspace;
use camino::{Utf8Path, Utf8PathBuf};
use clrtest_metadata::{TestExecutionStatus, TestType};
use clrtest_runner::{
    config::{ClrTestConfig, ConfigOverrides},
    list::{ClassifyOptions, TestCatalog, TestSelection},
    runner::{RunContext, RunReport, RunnerExit, RunnerSource, TestOrchestrator, read_run_list},
    signal::{ShutdownEvent, SignalHandlerKind},
};
use color_eyre::eyre::Result;
use indoc::formatdoc;
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

/// A fake runner: copies the run list aside, writes `results_xml` to the `/result=` path (if
/// given), and exits with `exit_code`.
fn write_fake_runner(
    path: &Utf8Path,
    run_list_copy: &Utf8Path,
    results_xml: Option<&str>,
    exit_code: i32,
) -> Result<()> {
    let write_results = match results_xml {
        Some(xml) => format!("cat > \"$result\" <<'RESULTS'\n{xml}\nRESULTS\n"),
        None => String::new(),
    };
    let script = formatdoc! {r#"
        result=""
        for arg in "$@"; do
          case "$arg" in
            /runlist=*) cp "${{arg#/runlist=}}" "{run_list_copy}" ;;
            /result=*) result="${{arg#/result=}}" ;;
          esac
        done
        {write_results}exit {exit_code}
    "#};
    std::fs::write(path, script)?;
    Ok(())
}

struct RunFixture {
    workspace: SampleWorkspace,
    run_list_copy: Utf8PathBuf,
}

impl RunFixture {
    fn new() -> Result<Self> {
        let workspace = SampleWorkspace::new()?;
        std::fs::create_dir(workspace.path("runners"))?;
        std::fs::create_dir(workspace.path("empty"))?;
        let run_list_copy = workspace.path("run-list-copy.txt");
        Ok(Self {
            workspace,
            run_list_copy,
        })
    }

    fn runner(&self, name: &str) -> Utf8PathBuf {
        self.workspace.path("runners").join(name)
    }

    /// The scripts are launched through `/bin/sh`, so they don't need to be executable. No
    /// framework searches the real program directories.
    fn config(&self) -> Result<ClrTestConfig> {
        let empty = self.workspace.path("empty");
        self.workspace.config(&formatdoc! {r#"
            [runner]
            capture-output = true

            [frameworks.nunit]
            path = '{nunit}'
            search-roots = ['{empty}']
            launcher = "/bin/sh"

            [frameworks.xunit]
            search-roots = ['{empty}']

            [frameworks.mstest]
            path = '{mstest}'
            search-roots = ['{empty}']
            launcher = "/bin/sh"
        "#,
            nunit = self.runner("nunit-console.exe"),
            mstest = self.runner("MSTest.exe"),
        })
    }

    fn nunit_results(&self) -> String {
        let binaries = &self.workspace.binaries;
        formatdoc! {r#"
            <?xml version="1.0" encoding="utf-8"?>
            <test-results name="run" total="7">
              <test-suite type="Assembly" name="{nunit}" result="Failure">
                <results>
                  <test-suite type="Namespace" name="Sample">
                    <results>
                      <test-suite type="TestFixture" name="Arithmetic">
                        <results>
                          <test-case name="Sample.NUnit.Arithmetic.Adds" result="Success" time="0.01" />
                          <test-case name="Sample.NUnit.Arithmetic.Subtracts" result="Failure">
                            <failure>
                              <message><![CDATA[Expected: 1]]></message>
                              <stack-trace><![CDATA[at Arithmetic.Subtracts()]]></stack-trace>
                            </failure>
                          </test-case>
                          <test-suite type="ParameterizedTest" name="Divides" result="Success">
                            <results>
                              <test-case name="Sample.NUnit.Arithmetic.Divides(1)" result="Success" />
                              <test-case name="Sample.NUnit.Arithmetic.Divides(2)" result="Success" />
                            </results>
                          </test-suite>
                          <test-case name="Sample.NUnit.Arithmetic.Removed" result="Success" />
                        </results>
                      </test-suite>
                      <test-suite type="TestFixture" name="Inherited">
                        <results>
                          <test-case name="Sample.NUnit.Inherited.Works" result="Inconclusive" />
                        </results>
                      </test-suite>
                    </results>
                  </test-suite>
                </results>
              </test-suite>
              <test-suite type="Assembly" name="{mstest}" result="Success">
                <results>
                  <test-case name="Sample.MsTest.Ambiguous.ByNUnit" result="Success" />
                </results>
              </test-suite>
            </test-results>
        "#,
            nunit = binaries.nunit,
            mstest = binaries.mstest,
        }
    }

    fn discover(&self) -> Result<TestCatalog> {
        Ok(self.workspace.discover(ClassifyOptions::default())?.catalog)
    }
}

fn run(config: &ClrTestConfig, catalog: &mut TestCatalog) -> Result<RunReport> {
    let context = RunContext::new(config).with_signal_handler(SignalHandlerKind::Noop);
    Ok(TestOrchestrator::new(context).run(catalog, &TestSelection::all())?)
}

fn status_of(catalog: &TestCatalog, fully_qualified_name: &str) -> TestExecutionStatus {
    catalog
        .iter_methods()
        .find(|(_, method)| method.fully_qualified_name == fully_qualified_name)
        .map_or(TestExecutionStatus::NotRun, |(_, method)| method.status())
}

#[test]
fn runs_and_correlates() -> Result<()> {
    let fixture = RunFixture::new()?;
    write_fake_runner(
        &fixture.runner("nunit-console.exe"),
        &fixture.run_list_copy,
        Some(&fixture.nunit_results()),
        1,
    )?;
    write_fake_runner(&fixture.runner("MSTest.exe"), &fixture.run_list_copy, None, 0)?;
    let config = fixture.config()?;
    let mut catalog = fixture.discover()?;

    let report = run(&config, &mut catalog)?;
    assert_eq!(report.interrupted, None);

    // xUnit has tests but no runner; the other frameworks still run.
    let not_found: Vec<_> = report.not_found.iter().map(|e| e.test_type()).collect();
    assert_eq!(not_found, [TestType::XUnit]);

    let ran: Vec<_> = report.runs.iter().map(|run| run.test_type).collect();
    assert_eq!(ran, [TestType::NUnit, TestType::MsTest]);

    let nunit = &report.runs[0];
    assert_eq!(nunit.runner.path, fixture.runner("nunit-console.exe"));
    assert_eq!(nunit.runner.source, RunnerSource::Configured);
    // A failing test run isn't a failed runner.
    assert_eq!(nunit.exit, RunnerExit::Exited { code: Some(1) });
    assert_eq!(nunit.selected, 7);
    assert_eq!(nunit.correlation.matched, 5);
    assert_eq!(nunit.correlation.unmatched, 1);
    assert!(nunit.results_path.is_file());
    assert!(nunit.results_path.starts_with(fixture.workspace.path(".clrtest")));

    // The run list is removed once the runner exits, but the runner saw every selected test.
    let run_list_dir = nunit.results_path.parent().expect("results path has a parent");
    let leftover_lists: Vec<_> = run_list_dir
        .read_dir_utf8()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension() == Some("txt"))
        .collect();
    assert!(leftover_lists.is_empty(), "run lists left: {leftover_lists:?}");
    assert_eq!(
        read_run_list(&fixture.run_list_copy)?,
        [
            "Sample.NUnit.Arithmetic.Adds",
            "Sample.NUnit.Arithmetic.Subtracts",
            "Sample.NUnit.Arithmetic.Divides",
            "Sample.NUnit.Inherited.Works",
            "Sample.NUnit.GenericFixture`1.Generic",
            "Sample.NUnit.Closed.Closed",
            "Sample.MsTest.Ambiguous.ByNUnit",
        ]
    );

    for (name, status) in [
        ("Sample.NUnit.Arithmetic.Adds", TestExecutionStatus::Successful),
        ("Sample.NUnit.Arithmetic.Subtracts", TestExecutionStatus::Error),
        ("Sample.NUnit.Arithmetic.Divides", TestExecutionStatus::Successful),
        ("Sample.NUnit.Inherited.Works", TestExecutionStatus::Inconclusive),
        ("Sample.NUnit.Closed.Closed", TestExecutionStatus::NotRun),
        ("Sample.MsTest.Ambiguous.ByNUnit", TestExecutionStatus::Successful),
        ("Sample.XUnit.Facts.Passes", TestExecutionStatus::NotRun),
    ] {
        assert_eq!(status_of(&catalog, name), status, "status of {name}");
    }

    let subtracts = catalog
        .iter_methods()
        .find(|(_, m)| m.name == "Subtracts")
        .and_then(|(_, m)| m.last_result())
        .expect("Subtracts has a result");
    assert_eq!(subtracts.failure_message.as_deref(), Some("Expected: 1"));
    let divides = catalog
        .iter_methods()
        .find(|(_, m)| m.name == "Divides")
        .and_then(|(_, m)| m.last_result())
        .expect("Divides has a result");
    assert_eq!(divides.children.len(), 2);

    // MSTest exited cleanly without writing a results file.
    let mstest = &report.runs[1];
    assert_eq!(mstest.exit, RunnerExit::Exited { code: Some(0) });
    assert_eq!(mstest.selected, 3);
    assert_eq!(mstest.correlation.matched, 0);
    assert!(!mstest.results_path.exists());
    assert_eq!(mstest.results_path.extension(), Some("trx"));
    assert_eq!(
        status_of(&catalog, "Sample.MsTest.Checks.Passes"),
        TestExecutionStatus::NotRun
    );

    let summary = report.to_summary(&catalog);
    assert_eq!(summary.runs.len(), 2);
    assert_eq!(summary.runs[0].exit_code, Some(1));
    assert_eq!(summary.runs[0].matched, 5);
    assert_eq!(summary.test_list.test_count, catalog.test_count());

    Ok(())
}

#[test]
fn selection_limits_frameworks() -> Result<()> {
    let fixture = RunFixture::new()?;
    write_fake_runner(
        &fixture.runner("nunit-console.exe"),
        &fixture.run_list_copy,
        Some(&fixture.nunit_results()),
        0,
    )?;
    let config = fixture.config()?;
    let mut catalog = fixture.discover()?;

    let selection = TestSelection::all()
        .with_test_types([TestType::NUnit])
        .with_traits(["Fast"]);
    let context = RunContext::new(&config).with_signal_handler(SignalHandlerKind::Noop);
    let report = TestOrchestrator::new(context).run(&mut catalog, &selection)?;

    assert!(report.not_found.is_empty());
    assert_eq!(report.runs.len(), 1);
    assert_eq!(report.runs[0].selected, 1);
    assert_eq!(
        read_run_list(&fixture.run_list_copy)?,
        ["Sample.NUnit.Arithmetic.Subtracts"]
    );
    // Results for unselected tests in the same file are still correlated.
    assert_eq!(report.runs[0].correlation.matched, 5);
    Ok(())
}

#[test]
fn timed_out_runner_has_no_results() -> Result<()> {
    let fixture = RunFixture::new()?;
    std::fs::write(fixture.runner("nunit-console.exe"), "exec sleep 30\n")?;
    std::fs::write(fixture.runner("MSTest.exe"), "exit 0\n")?;
    let mut config = fixture.config()?;
    config.apply_overrides(&ConfigOverrides {
        timeout: Some(Duration::from_millis(200)),
        ..ConfigOverrides::default()
    });
    let mut catalog = fixture.discover()?;

    let report = run(&config, &mut catalog)?;
    let nunit = &report.runs[0];
    assert_eq!(nunit.test_type, TestType::NUnit);
    assert_eq!(nunit.exit, RunnerExit::TimedOut(Duration::from_millis(200)));
    assert_eq!(nunit.correlation.matched, 0);
    assert!(catalog.iter_methods().all(|(_, m)| m.last_result().is_none()));

    // A timeout doesn't stop the remaining frameworks.
    assert_eq!(report.runs.len(), 2);
    assert_eq!(report.interrupted, None);
    Ok(())
}

#[test]
fn signal_kills_runner_and_stops_run() -> Result<()> {
    let fixture = RunFixture::new()?;
    // The runner signals clrtest, then keeps running in a forked `sleep`.
    let script = formatdoc! {r#"
        for arg in "$@"; do
          case "$arg" in
            /runlist=*) cp "${{arg#/runlist=}}" "{run_list_copy}" ;;
          esac
        done
        kill -TERM $PPID
        sleep 30
    "#,
        run_list_copy = fixture.run_list_copy,
    };
    std::fs::write(fixture.runner("nunit-console.exe"), script)?;
    std::fs::write(fixture.runner("MSTest.exe"), "exit 0\n")?;
    let config = fixture.config()?;
    let mut catalog = fixture.discover()?;

    let start = Instant::now();
    let context = RunContext::new(&config).with_signal_handler(SignalHandlerKind::Standard);
    let report = TestOrchestrator::new(context).run(&mut catalog, &TestSelection::all())?;
    let elapsed = start.elapsed();
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");

    assert_eq!(report.interrupted, Some(ShutdownEvent::Term));
    // Nothing runs after the interrupted framework.
    assert_eq!(report.runs.len(), 1);
    assert!(report.not_found.is_empty());
    let nunit = &report.runs[0];
    assert_eq!(nunit.test_type, TestType::NUnit);
    assert_eq!(nunit.exit, RunnerExit::Interrupted(ShutdownEvent::Term));
    assert_eq!(nunit.correlation.matched, 0);
    assert!(catalog.iter_methods().all(|(_, m)| m.last_result().is_none()));

    // The runner got as far as reading its run list, which was removed after it was killed.
    assert_eq!(read_run_list(&fixture.run_list_copy)?.len(), 7);
    let run_list_dir = nunit.results_path.parent().expect("results path has a parent");
    let leftover_lists: Vec<_> = run_list_dir
        .read_dir_utf8()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension() == Some("txt"))
        .collect();
    assert!(leftover_lists.is_empty(), "run lists left: {leftover_lists:?}");
    Ok(())
}
