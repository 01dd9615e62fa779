// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{ClrTestConfig, RunnerPathStore},
    correlate::{CorrelationSummary, correlate},
    errors::{DisplayErrorChain, OrchestrateError, RunnerNotFound},
    list::{TestCatalog, TestSelection},
    results::{ExecutionResults, read_results},
    runner::{
        CoverageCommand, ExecuteOptions, LocatedRunner, NoResolver, RunArtifacts, RunnerCommand,
        RunnerExit, RunnerInvocation, RunnerLocator, RunnerResolver, exec::execute, strategy_for,
    },
    signal::{ShutdownEvent, SignalHandler, SignalHandlerKind},
};
use camino::Utf8PathBuf;
use chrono::Local;
use clrtest_metadata::{FrameworkRunSummary, RunSummary, TestType};
use indexmap::IndexSet;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// Everything a run needs from its host, passed in explicitly.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    config: &'a ClrTestConfig,
    store: Option<&'a RunnerPathStore>,
    resolver: &'a dyn RunnerResolver,
    signal_handler: SignalHandlerKind,
}

impl<'a> RunContext<'a> {
    /// Creates a context with no runner path store, no resolver and the standard signal handler.
    pub fn new(config: &'a ClrTestConfig) -> Self {
        Self {
            config,
            store: None,
            resolver: &NoResolver,
            signal_handler: SignalHandlerKind::Standard,
        }
    }

    /// Remembers runner locations in `store`.
    pub fn with_store(mut self, store: &'a RunnerPathStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Asks `resolver` for runners that can't be found.
    pub fn with_resolver(mut self, resolver: &'a dyn RunnerResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Sets the kind of signal handler used while runners are active.
    pub fn with_signal_handler(mut self, signal_handler: SignalHandlerKind) -> Self {
        self.signal_handler = signal_handler;
        self
    }
}

/// The selected tests of a single framework.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunPlan {
    /// The framework.
    pub test_type: TestType,
    /// Binaries containing selected tests, in catalog order.
    pub binaries: Vec<Utf8PathBuf>,
    /// Identities of the selected tests, in catalog order.
    pub tests: Vec<String>,
}

impl RunPlan {
    /// Collects the tests of `test_type` matched by `selection`. Returns `None` if there are none.
    pub fn new(
        catalog: &TestCatalog,
        selection: &TestSelection,
        test_type: TestType,
    ) -> Option<Self> {
        let mut binaries = IndexSet::new();
        let mut tests = Vec::new();
        for (class, method) in catalog.selected(selection) {
            if class.test_type == test_type {
                binaries.insert(class.binary_path.clone());
                tests.push(method.fully_qualified_name.clone());
            }
        }
        (!tests.is_empty()).then(|| Self {
            test_type,
            binaries: binaries.into_iter().collect(),
            tests,
        })
    }
}

/// A single framework's runner invocation.
#[derive(Clone, Debug)]
pub struct FrameworkRun {
    /// The framework.
    pub test_type: TestType,
    /// The runner that was used.
    pub runner: LocatedRunner,
    /// How the runner finished.
    pub exit: RunnerExit,
    /// The results artifact the runner was asked to write.
    pub results_path: Utf8PathBuf,
    /// The number of selected tests.
    pub selected: usize,
    /// How the results matched up with the catalog.
    pub correlation: CorrelationSummary,
}

impl FrameworkRun {
    fn to_summary(&self) -> FrameworkRunSummary {
        FrameworkRunSummary {
            test_type: self.test_type,
            runner_path: self.runner.path.clone(),
            exit_code: self.exit.exit_code(),
            results_path: self.results_path.clone(),
            selected: self.selected,
            matched: self.correlation.matched,
            unmatched: self.correlation.unmatched,
        }
    }
}

/// What happened during [`TestOrchestrator::run`].
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    /// Frameworks whose runner was invoked, in run order.
    pub runs: Vec<FrameworkRun>,
    /// Frameworks that had selected tests but no runner.
    pub not_found: Vec<RunnerNotFound>,
    /// Set if a signal stopped the run early.
    pub interrupted: Option<ShutdownEvent>,
}

impl RunReport {
    /// Returns the serializable form of this report, along with the correlated catalog.
    pub fn to_summary(&self, catalog: &TestCatalog) -> RunSummary {
        RunSummary::new(
            self.runs.iter().map(FrameworkRun::to_summary).collect(),
            catalog.to_summary(),
        )
    }
}

/// Runs selected tests through each framework's console runner and correlates the results.
///
/// Frameworks run one after another, in [`TestType::ALL`] order. A framework whose runner can't
/// be found is skipped and reported; the others still run.
pub struct TestOrchestrator<'a> {
    context: RunContext<'a>,
}

impl<'a> TestOrchestrator<'a> {
    /// Creates a new orchestrator.
    pub fn new(context: RunContext<'a>) -> Self {
        Self { context }
    }

    /// Runs the tests in `catalog` matched by `selection`, updating each matched method's last
    /// result.
    pub fn run(
        &self,
        catalog: &mut TestCatalog,
        selection: &TestSelection,
    ) -> Result<RunReport, OrchestrateError> {
        let runtime = Runtime::new().map_err(OrchestrateError::TokioRuntimeCreate)?;
        let mut signal_handler = {
            // Signal streams register with the runtime they're created in.
            let _guard = runtime.enter();
            self.context.signal_handler.build()?
        };

        let mut report = RunReport::default();
        for test_type in TestType::ALL {
            let Some(plan) = RunPlan::new(catalog, selection, test_type) else {
                debug!("no {test_type} tests selected");
                continue;
            };
            match self.run_plan(&runtime, &plan, &mut signal_handler)? {
                PlanOutcome::NotFound(error) => {
                    warn!("{}", DisplayErrorChain::new(&error));
                    report.not_found.push(error);
                }
                PlanOutcome::Ran {
                    runner,
                    exit,
                    results_path,
                    results,
                } => {
                    let correlation = correlate(catalog, &results);
                    info!(
                        "{test_type}: {} selected, {} results matched, {} unmatched",
                        plan.tests.len(),
                        correlation.matched,
                        correlation.unmatched,
                    );
                    report.runs.push(FrameworkRun {
                        test_type,
                        runner,
                        exit,
                        results_path,
                        selected: plan.tests.len(),
                        correlation,
                    });
                    if let RunnerExit::Interrupted(event) = exit {
                        warn!("stopping after {event}");
                        report.interrupted = Some(event);
                        break;
                    }
                }
            }
        }

        runtime.shutdown_background();
        Ok(report)
    }

    fn run_plan(
        &self,
        runtime: &Runtime,
        plan: &RunPlan,
        signal_handler: &mut SignalHandler,
    ) -> Result<PlanOutcome, OrchestrateError> {
        let config = self.context.config;
        let test_type = plan.test_type;
        let strategy = strategy_for(test_type);
        let framework = config.framework(test_type);

        let runner = match RunnerLocator::new(strategy, framework)
            .with_store(self.context.store)
            .locate(self.context.resolver)
        {
            Ok(runner) => runner,
            Err(error) => return Ok(PlanOutcome::NotFound(error)),
        };

        let store_dir = config.store_dir();
        let pruned = RunArtifacts::prune(&store_dir, strategy, config.keep_runs());
        if pruned > 0 {
            debug!("removed artifacts of {pruned} earlier {test_type} runs");
        }
        let mut artifacts = RunArtifacts::create(&store_dir, strategy, Local::now())
            .map_err(|error| OrchestrateError::Artifacts { test_type, error })?;
        artifacts
            .write_run_list(&plan.tests)
            .map_err(|error| OrchestrateError::RunList { test_type, error })?;

        let args = strategy.runner_args(&RunnerInvocation {
            binaries: &plan.binaries,
            tests: &plan.tests,
            run_list: artifacts.run_list_path(),
            results: artifacts.results_path(),
        });
        let coverage_tool = config.coverage_tool();
        let coverage = coverage_tool.as_deref().map(|tool| CoverageCommand {
            tool,
            template: config.coverage_template(),
            output: artifacts.coverage_output_path(),
        });
        let command = RunnerCommand::build(&runner.path, args, framework.launcher(), coverage)
            .map_err(|error| OrchestrateError::Command { test_type, error })?;

        let options = ExecuteOptions {
            timeout: config.runner_timeout(),
            capture_output: config.capture_output(),
        };
        info!("running {} {test_type} tests", plan.tests.len());
        let exit = runtime
            .block_on(execute(&command, options, signal_handler))
            .map_err(|error| OrchestrateError::Execute { test_type, error })?;

        // The runner has exited, so the run list is no longer in use.
        artifacts.cleanup();

        let results_path = artifacts.results_path().to_owned();
        let results = if exit.completed() {
            read_results(test_type, &results_path).into_results()
        } else {
            warn!("{test_type} runner {exit}, not reading results");
            ExecutionResults::new()
        };

        Ok(PlanOutcome::Ran {
            runner,
            exit,
            results_path,
            results,
        })
    }
}

enum PlanOutcome {
    NotFound(RunnerNotFound),
    Ran {
        runner: LocatedRunner,
        exit: RunnerExit,
        results_path: Utf8PathBuf,
        results: ExecutionResults,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::{NO_TRAITS, TestClass, TestMethod};

    fn class(binary: &str, name: &str, test_type: TestType, methods: &[&str]) -> TestClass {
        TestClass {
            binary_path: binary.into(),
            namespace: "NS".to_owned(),
            name: name.to_owned(),
            test_type,
            methods: methods
                .iter()
                .map(|m| TestMethod::new(*m, format!("NS.{name}.{m}"), [NO_TRAITS]))
                .collect(),
        }
    }

    #[test]
    fn plans_group_by_framework() {
        let catalog = TestCatalog::new([
            class("a.dll", "Fixture", TestType::NUnit, &["One", "Two"]),
            class("b.dll", "Facts", TestType::XUnit, &["Three"]),
            class("c.dll", "Other", TestType::NUnit, &["Four"]),
            class("a.dll", "Again", TestType::NUnit, &["Five"]),
        ]);
        let selection = TestSelection::all();

        let nunit = RunPlan::new(&catalog, &selection, TestType::NUnit).expect("nunit tests");
        assert_eq!(nunit.binaries, vec![Utf8PathBuf::from("a.dll"), "c.dll".into()]);
        assert_eq!(
            nunit.tests,
            vec!["NS.Fixture.One", "NS.Fixture.Two", "NS.Other.Four", "NS.Again.Five"]
        );

        let xunit = RunPlan::new(&catalog, &selection, TestType::XUnit).expect("xunit tests");
        assert_eq!(xunit.binaries, vec![Utf8PathBuf::from("b.dll")]);
        assert_eq!(RunPlan::new(&catalog, &selection, TestType::MsTest), None);

        let selection = TestSelection::all().with_patterns(["Two"]);
        let nunit = RunPlan::new(&catalog, &selection, TestType::NUnit).expect("nunit tests");
        assert_eq!(nunit.tests, vec!["NS.Fixture.Two"]);
        assert_eq!(nunit.binaries, vec![Utf8PathBuf::from("a.dll")]);
        assert_eq!(RunPlan::new(&catalog, &selection, TestType::XUnit), None);
    }
}
