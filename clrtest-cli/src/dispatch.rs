// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line parsing and command dispatch.

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, OutputWriter, StdoutWriter},
    report::{RunStyles, StatusCounts, write_run_human},
    resolver::PromptResolver,
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clrtest_metadata::{ClrTestExitCode, TestListSummary, TestType};
use clrtest_runner::{
    config::{ClrTestConfig, ConfigOverrides, RunnerPathStore},
    errors::{DisplayErrorChain, WriteTestListError},
    list::{
        CatalogBuilder, DiscoveryReport, OutputFormat, SerializableFormat, SkipReason,
        TestCatalog, TestClass, TestSelection,
    },
    runner::{RunContext, RunReport, RunnerExit, TestOrchestrator},
};
use std::{collections::BTreeSet, io::Write, time::Duration};
use tracing::{info, warn};

/// Discovers .NET tests and runs them through their framework's console runner.
#[derive(Debug, Parser)]
#[command(
    name = "clrtest",
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100
)]
pub struct ClrTestApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl ClrTestApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        match self.command {
            Command::List(opts) => opts.exec(&self.config_opts, output, output_writer),
            Command::Run(opts) => opts.exec(&self.config_opts, output, output_writer),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List tests in .NET binaries
    List(ListOpts),
    /// Run tests through their framework's console runner
    Run(RunOpts),
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
struct ConfigOpts {
    /// Config file [default: current-dir/.config/clrtest.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn load(&self) -> Result<ClrTestConfig> {
        let current_dir =
            std::env::current_dir().map_err(|err| ExpectedError::CurrentDir { err })?;
        let workspace_root = Utf8PathBuf::try_from(current_dir)
            .map_err(|err| ExpectedError::CurrentDirNotUtf8 { err })?;
        Ok(ClrTestConfig::from_sources(
            workspace_root,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Filter options")]
struct SelectionOpts {
    /// Only include tests whose fully qualified name contains this string
    #[arg(long = "filter", short = 'F', value_name = "SUBSTRING")]
    filters: Vec<String>,

    /// Only include tests with this trait, for example `Slow` or `Category=Slow`
    #[arg(long = "trait", value_name = "TRAIT")]
    traits: Vec<String>,

    /// Only include tests of this framework: xunit, nunit or mstest
    #[arg(long = "framework", value_name = "FRAMEWORK")]
    frameworks: Vec<TestType>,

    /// Test binaries to scan
    #[arg(value_name = "BINARIES", required = true)]
    binaries: Vec<Utf8PathBuf>,
}

impl SelectionOpts {
    fn is_unfiltered(&self) -> bool {
        self.filters.is_empty() && self.traits.is_empty() && self.frameworks.is_empty()
    }

    fn to_selection(&self) -> TestSelection {
        TestSelection::all()
            .with_patterns(self.filters.iter().cloned())
            .with_traits(self.traits.iter().cloned())
            .with_test_types(self.frameworks.iter().copied())
    }

    /// Scans the binaries. Fails only if none of them could be read at all.
    fn discover(&self, config: &ClrTestConfig) -> Result<DiscoveryReport> {
        let report = CatalogBuilder::new(config.classify_options())
            .scan_threads(config.scan_threads().compute())
            .build(self.binaries.iter().cloned())?;

        let unreadable: BTreeSet<_> = report
            .skipped
            .iter()
            .filter(|unit| {
                matches!(
                    unit.reason,
                    SkipReason::BinaryMissing
                        | SkipReason::UnreadableBinary(_)
                        | SkipReason::ScanPanicked
                )
            })
            .map(|unit| &unit.binary_path)
            .collect();
        let inputs: BTreeSet<_> = self.binaries.iter().collect();
        if inputs.is_subset(&unreadable) {
            return Err(ExpectedError::DiscoveryFailed {
                binaries: self.binaries.clone(),
            });
        }
        Ok(report)
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum MessageFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON on a single line
    Json,
    /// Indented JSON
    JsonPretty,
}

impl MessageFormat {
    fn serializable(self) -> Option<SerializableFormat> {
        match self {
            Self::Human => None,
            Self::Json => Some(SerializableFormat::Json),
            Self::JsonPretty => Some(SerializableFormat::JsonPretty),
        }
    }
}

#[derive(Debug, Args)]
struct ListOpts {
    #[clap(flatten)]
    selection: SelectionOpts,

    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FORMAT")]
    message_format: MessageFormat,
}

impl ListOpts {
    fn exec(
        self,
        config_opts: &ConfigOpts,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let config = config_opts.load()?;
        let report = self.selection.discover(&config)?;
        let catalog = if self.selection.is_unfiltered() {
            report.catalog.clone()
        } else {
            selected_catalog(&report.catalog, &self.selection.to_selection())
        };

        let mut stdout = output_writer.stdout_writer();
        match self.message_format.serializable() {
            None => {
                let colorize = output.color.should_colorize(supports_color::Stream::Stdout);
                let format = OutputFormat::Human {
                    verbose: output.verbose,
                };
                catalog.write(format, &mut stdout, colorize)?;
            }
            Some(format) => {
                let mut summary: TestListSummary = catalog.to_summary();
                summary.skipped = report.to_summary().skipped;
                write_json(format, &summary, &mut stdout)?;
            }
        }
        stdout.flush().map_err(WriteTestListError::Io)?;
        Ok(ClrTestExitCode::OK)
    }
}

/// Returns the classes with at least one selected method, keeping only the selected methods.
fn selected_catalog(catalog: &TestCatalog, selection: &TestSelection) -> TestCatalog {
    TestCatalog::new(catalog.classes().iter().filter_map(|class| {
        let methods: Vec<_> = class
            .methods
            .iter()
            .filter(|method| selection.matches(class, method))
            .cloned()
            .collect();
        (!methods.is_empty()).then(|| TestClass {
            methods,
            ..class.clone()
        })
    }))
}

fn write_json(
    format: SerializableFormat,
    value: &impl serde::Serialize,
    writer: &mut StdoutWriter<'_>,
) -> Result<(), WriteTestListError> {
    format
        .to_writer(value, &mut *writer)
        .map_err(WriteTestListError::Json)?;
    writeln!(writer).map_err(WriteTestListError::Io)
}

#[derive(Debug, Args)]
struct RunOpts {
    #[clap(flatten)]
    selection: SelectionOpts,

    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FORMAT")]
    message_format: MessageFormat,

    #[clap(flatten)]
    runner: RunnerOpts,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Runner options")]
struct RunnerOpts {
    /// Kill a runner that takes longer than this, for example `10m`
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Launch runners under this coverage tool
    #[arg(long, value_name = "PATH")]
    coverage_tool: Option<Utf8PathBuf>,

    /// Path to the xUnit console runner
    #[arg(long, value_name = "PATH")]
    xunit_path: Option<Utf8PathBuf>,

    /// Path to the NUnit console runner
    #[arg(long, value_name = "PATH")]
    nunit_path: Option<Utf8PathBuf>,

    /// Path to MSTest.exe
    #[arg(long, value_name = "PATH")]
    mstest_path: Option<Utf8PathBuf>,
}

impl RunnerOpts {
    fn to_overrides(&self) -> ConfigOverrides {
        let runner_paths = [
            (TestType::XUnit, &self.xunit_path),
            (TestType::NUnit, &self.nunit_path),
            (TestType::MsTest, &self.mstest_path),
        ]
        .into_iter()
        .filter_map(|(test_type, path)| Some((test_type, path.clone()?)))
        .collect();
        ConfigOverrides {
            timeout: self.timeout,
            coverage_tool: self.coverage_tool.clone(),
            runner_paths,
        }
    }
}

impl RunOpts {
    fn exec(
        self,
        config_opts: &ConfigOpts,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let mut config = config_opts.load()?;
        config.apply_overrides(&self.runner.to_overrides());

        let mut catalog = self.selection.discover(&config)?.catalog;
        let selection = self.selection.to_selection();
        let selected = catalog.selected(&selection).count();
        if selected == 0 {
            warn!("no tests to run");
            return Ok(ClrTestExitCode::NO_TESTS_RUN);
        }
        info!("running {selected} tests");

        let store = match RunnerPathStore::default_location() {
            Ok(store) => Some(store),
            Err(error) => {
                warn!("{}, runner paths won't be remembered", DisplayErrorChain::new(&error));
                None
            }
        };
        let resolver = PromptResolver::new(output);
        let mut context = RunContext::new(&config).with_resolver(&resolver);
        if let Some(store) = &store {
            context = context.with_store(store);
        }
        let report = TestOrchestrator::new(context).run(&mut catalog, &selection)?;

        let mut stdout = output_writer.stdout_writer();
        match self.message_format.serializable() {
            None => {
                let mut styles = RunStyles::default();
                if output.color.should_colorize(supports_color::Stream::Stdout) {
                    styles.colorize();
                }
                write_run_human(&catalog, &selection, &report, &styles, &mut stdout)
                    .map_err(WriteTestListError::Io)?;
            }
            Some(format) => write_json(format, &report.to_summary(&catalog), &mut stdout)?,
        }
        stdout.flush().map_err(WriteTestListError::Io)?;

        run_outcome(&catalog, &selection, &report)
    }
}

/// Turns a finished run into an exit code. Failed tests take precedence over an incomplete run,
/// which takes precedence over a missing runner.
fn run_outcome(
    catalog: &TestCatalog,
    selection: &TestSelection,
    report: &RunReport,
) -> Result<i32> {
    let counts = StatusCounts::new(catalog, selection);
    if counts.failed > 0 {
        return Err(ExpectedError::TestRunFailed {
            failed: counts.failed,
        });
    }

    let timed_out: Vec<_> = report
        .runs
        .iter()
        .filter(|run| matches!(run.exit, RunnerExit::TimedOut(_)))
        .map(|run| run.test_type)
        .collect();
    if report.interrupted.is_some() || !timed_out.is_empty() {
        return Err(ExpectedError::RunIncomplete {
            interrupted: report.interrupted,
            timed_out,
        });
    }

    if !report.not_found.is_empty() {
        return Err(ExpectedError::RunnerNotFound {
            test_types: report.not_found.iter().map(|e| e.test_type()).collect(),
        });
    }
    Ok(ClrTestExitCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use clap::CommandFactory;
    use fixture_data::sample_tests::{EXPECTED_CLASSES, SampleBinaries};
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_app() {
        ClrTestApp::command().debug_assert();
    }

    #[test]
    fn parse_run() {
        let app = ClrTestApp::try_parse_from([
            "clrtest",
            "run",
            "--framework",
            "NUnit",
            "--trait",
            "Slow",
            "-F",
            "Arithmetic",
            "--timeout",
            "90s",
            "--nunit-path",
            "tools/nunit-console.exe",
            "a.dll",
            "b.dll",
        ])
        .unwrap();
        let opts = match app.command {
            Command::Run(opts) => opts,
            other => panic!("expected run, found {other:?}"),
        };
        assert_eq!(opts.selection.frameworks, [TestType::NUnit]);
        assert_eq!(opts.selection.traits, ["Slow"]);
        assert_eq!(opts.selection.filters, ["Arithmetic"]);
        assert_eq!(
            opts.selection.binaries,
            [Utf8PathBuf::from("a.dll"), "b.dll".into()]
        );

        let overrides = opts.runner.to_overrides();
        assert_eq!(overrides.timeout, Some(Duration::from_secs(90)));
        assert_eq!(
            overrides.runner_paths,
            [(TestType::NUnit, Utf8PathBuf::from("tools/nunit-console.exe"))]
        );
    }

    #[test]
    fn parse_errors() {
        assert!(ClrTestApp::try_parse_from(["clrtest", "list"]).is_err());
        assert!(ClrTestApp::try_parse_from(["clrtest", "run", "--framework", "junit", "a.dll"])
            .is_err());
        assert!(ClrTestApp::try_parse_from(["clrtest", "run", "--timeout", "soon", "a.dll"])
            .is_err());
    }

    fn exec(args: &[&str]) -> (Result<i32>, String) {
        let args = std::iter::once("clrtest").chain(args.iter().copied());
        let app = ClrTestApp::try_parse_from(args).unwrap();
        let output = OutputContext {
            verbose: false,
            color: crate::output::Color::Never,
        };
        let mut writer = OutputWriter::Test { stdout: Vec::new() };
        let result = app.exec(output, &mut writer);
        let OutputWriter::Test { stdout } = writer else {
            unreachable!("writer is a test writer");
        };
        (result, String::from_utf8(stdout).unwrap())
    }

    struct Samples {
        _dir: Utf8TempDir,
        binaries: SampleBinaries,
        config_file: Utf8PathBuf,
    }

    fn samples() -> Samples {
        let dir = Utf8TempDir::new().unwrap();
        let binaries = SampleBinaries::write(dir.path()).unwrap();
        let config_file = dir.path().join("clrtest.toml");
        std::fs::write(&config_file, "[discovery]\nscan-threads = 2\n").unwrap();
        Samples {
            _dir: dir,
            binaries,
            config_file,
        }
    }

    #[test]
    fn list_json() {
        let samples = samples();
        let mut args = vec![
            "list",
            "--config-file",
            samples.config_file.as_str(),
            "--message-format",
            "json",
        ];
        let scanned = samples.binaries.scanned();
        args.extend(scanned.iter().map(|b| b.as_str()));

        let (result, stdout) = exec(&args);
        assert_eq!(result.unwrap(), ClrTestExitCode::OK);
        let summary: TestListSummary = serde_json::from_str(&stdout).unwrap();
        assert_eq!(summary.test_classes.len(), EXPECTED_CLASSES.len());
        assert_eq!(summary.skipped.len(), 4);
    }

    #[test]
    fn list_filtered() {
        let samples = samples();
        let (result, stdout) = exec(&[
            "list",
            "--config-file",
            samples.config_file.as_str(),
            "--trait",
            "Slow",
            samples.binaries.nunit.as_str(),
            samples.binaries.xunit.as_str(),
        ]);
        assert_eq!(result.unwrap(), ClrTestExitCode::OK);
        let methods: Vec<_> = stdout
            .lines()
            .filter(|line| line.starts_with("        "))
            .map(str::trim)
            .collect();
        assert_eq!(methods, ["Divides"]);
        assert!(stdout.contains("Sample.NUnit.Arithmetic (nunit)"), "{stdout}");
        assert!(!stdout.contains("Sample.XUnit"), "{stdout}");
    }

    #[test]
    fn unreadable_binaries_fail_discovery() {
        let samples = samples();
        let (result, _) = exec(&[
            "list",
            "--config-file",
            samples.config_file.as_str(),
            samples.binaries.missing.as_str(),
            samples.binaries.corrupt.as_str(),
        ]);
        let error = result.unwrap_err();
        assert_eq!(
            error.process_exit_code(),
            ClrTestExitCode::TEST_LIST_CREATION_FAILED
        );
    }

    #[test]
    fn run_without_selected_tests() {
        let samples = samples();
        let (result, stdout) = exec(&[
            "run",
            "--config-file",
            samples.config_file.as_str(),
            "--filter",
            "NoSuchTest",
            samples.binaries.nunit.as_str(),
        ]);
        assert_eq!(result.unwrap(), ClrTestExitCode::NO_TESTS_RUN);
        assert_eq!(stdout, "");
    }
}
