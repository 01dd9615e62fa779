// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::ScanThreads,
    errors::{ConfigParseError, ConfigParseErrorKind},
    list::ClassifyOptions,
    runner::CommandTemplate,
};
use camino::{Utf8Path, Utf8PathBuf};
use clrtest_metadata::TestType;
use config::{
    Config, ConfigError, Environment, File, FileFormat,
    builder::{ConfigBuilder, DefaultState},
};
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::warn;

/// Handles warnings produced while reading configuration.
pub trait ConfigWarnings {
    /// Called with the keys in `config_file` that weren't recognized.
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    );
}

/// Logs configuration warnings with `tracing`.
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    ) {
        let mut unknown_str = String::new();
        if let (1, Some(key)) = (unknown.len(), unknown.first()) {
            // Print this on the same line.
            unknown_str.push_str("key: ");
            unknown_str.push_str(key);
        } else {
            unknown_str.push_str("keys:\n");
            for ignored_key in unknown {
                unknown_str.push('\n');
                unknown_str.push_str("  - ");
                unknown_str.push_str(ignored_key);
            }
        }

        warn!(
            "in config file {}, ignoring unknown configuration {unknown_str}",
            config_file
                .strip_prefix(workspace_root)
                .unwrap_or(config_file),
        )
    }
}

/// Overall configuration for clrtest.
#[derive(Clone, Debug)]
pub struct ClrTestConfig {
    workspace_root: Utf8PathBuf,
    inner: ClrTestConfigDeserialize,
    coverage_template: CommandTemplate,
}

impl ClrTestConfig {
    /// The default location of the config within the path: `.config/clrtest.toml`, used to read the
    /// config from the given directory.
    pub const CONFIG_PATH: &'static str = ".config/clrtest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Environment configuration uses this prefix, plus a _.
    pub const ENVIRONMENT_PREFIX: &'static str = "CLRTEST";

    /// Reads the clrtest config from the given file, or if not specified from
    /// `.config/clrtest.toml` in the workspace root.
    ///
    /// Environment variables prefixed with `CLRTEST_` are layered on top, with `__` separating
    /// nested keys: for example, `CLRTEST_RUNNER__TIMEOUT=5m`.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_with_warnings(workspace_root, config_file, &mut DefaultConfigWarnings)
    }

    /// Like [`Self::from_sources`], but reports warnings to `warnings`.
    pub fn from_sources_with_warnings(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let environment = Environment::with_prefix(Self::ENVIRONMENT_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        Self::from_sources_impl(workspace_root.into(), config_file, environment, warnings)
    }

    fn from_sources_impl(
        workspace_root: Utf8PathBuf,
        file: Option<&Utf8Path>,
        environment: Environment,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        // Unknown keys are only reported for the file itself. The environment is shared with
        // unrelated variables like CLRTEST_LOG, so keys coming from it are ignored silently.
        let file_builder = Self::make_default_config().add_source(source.clone());
        let (_, unknown) = Self::build_and_deserialize_config(&file_builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, &workspace_root, &unknown);
        }

        let composite_builder = file_builder.add_source(environment);
        let (inner, _unknown) = Self::build_and_deserialize_config(&composite_builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        let coverage_template = CommandTemplate::new(&inner.coverage.template).map_err(|error| {
            ConfigParseError::new(
                &config_file,
                ConfigParseErrorKind::InvalidCommandTemplate(error),
            )
        })?;

        Ok(Self {
            workspace_root,
            inner,
            coverage_template,
        })
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(ClrTestConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: ClrTestConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already reports the key, so drop it from the config error.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }

    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(timeout) = overrides.timeout {
            self.inner.runner.timeout = Some(timeout);
        }
        if let Some(tool_path) = &overrides.coverage_tool {
            self.inner.coverage.tool_path = Some(tool_path.clone());
        }
        for (test_type, path) in &overrides.runner_paths {
            self.inner.frameworks.get_mut(*test_type).path = Some(path.clone());
        }
    }

    /// Returns the workspace root that relative paths are resolved against.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the directory that run lists and results artifacts are written to.
    pub fn store_dir(&self) -> Utf8PathBuf {
        self.workspace_root.join(&self.inner.store.dir)
    }

    /// Returns how many earlier runs of each framework keep their artifacts in the store.
    pub fn keep_runs(&self) -> usize {
        self.inner.store.keep_runs
    }

    /// Returns the number of binaries to scan at once.
    pub fn scan_threads(&self) -> ScanThreads {
        self.inner.discovery.scan_threads
    }

    /// Returns classification options.
    pub fn classify_options(&self) -> ClassifyOptions {
        ClassifyOptions {
            legacy_xunit_ancestor_check: self.inner.discovery.legacy_xunit_ancestor_check,
        }
    }

    /// Returns the runner timeout, if any.
    pub fn runner_timeout(&self) -> Option<Duration> {
        self.inner.runner.timeout
    }

    /// Returns true if runner output should be sent to the log rather than the terminal.
    pub fn capture_output(&self) -> bool {
        self.inner.runner.capture_output
    }

    /// Returns the coverage tool, if configured, resolved against the workspace root.
    pub fn coverage_tool(&self) -> Option<Utf8PathBuf> {
        self.inner
            .coverage
            .tool_path
            .as_ref()
            .map(|path| self.workspace_root.join(path))
    }

    /// Returns the coverage command template.
    pub fn coverage_template(&self) -> &CommandTemplate {
        &self.coverage_template
    }

    /// Returns the runner settings for `test_type`.
    pub fn framework(&self, test_type: TestType) -> &FrameworkConfig {
        self.inner.frameworks.get(test_type)
    }
}

/// Overrides passed in on the command line.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Overrides `runner.timeout`.
    pub timeout: Option<Duration>,
    /// Overrides `coverage.tool-path`.
    pub coverage_tool: Option<Utf8PathBuf>,
    /// Overrides `frameworks.<test-type>.path`.
    pub runner_paths: Vec<(TestType, Utf8PathBuf)>,
}

/// Runner settings for a single framework.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FrameworkConfig {
    #[serde(default)]
    path: Option<Utf8PathBuf>,
    #[serde(default)]
    search_roots: Vec<Utf8PathBuf>,
    #[serde(default)]
    launcher: Option<String>,
}

impl FrameworkConfig {
    /// Returns the configured runner executable, if any.
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// Returns the configured search roots. If empty, the program directories are searched.
    pub fn search_roots(&self) -> &[Utf8PathBuf] {
        &self.search_roots
    }

    /// Returns the launcher prefix, if any.
    pub fn launcher(&self) -> Option<&str> {
        self.launcher.as_deref()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClrTestConfigDeserialize {
    store: StoreConfig,
    discovery: DiscoveryConfig,
    runner: RunnerConfig,
    coverage: CoverageConfig,
    #[serde(default)]
    frameworks: FrameworksConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoreConfig {
    dir: Utf8PathBuf,
    keep_runs: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DiscoveryConfig {
    scan_threads: ScanThreads,
    legacy_xunit_ancestor_check: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunnerConfig {
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    capture_output: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CoverageConfig {
    #[serde(default)]
    tool_path: Option<Utf8PathBuf>,
    template: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FrameworksConfig {
    #[serde(default)]
    xunit: FrameworkConfig,
    #[serde(default)]
    nunit: FrameworkConfig,
    #[serde(default)]
    mstest: FrameworkConfig,
}

impl FrameworksConfig {
    fn get(&self, test_type: TestType) -> &FrameworkConfig {
        match test_type {
            TestType::XUnit => &self.xunit,
            TestType::NUnit => &self.nunit,
            TestType::MsTest => &self.mstest,
        }
    }

    fn get_mut(&mut self, test_type: TestType) -> &mut FrameworkConfig {
        match test_type {
            TestType::XUnit => &mut self.xunit,
            TestType::NUnit => &mut self.nunit,
            TestType::MsTest => &mut self.mstest,
        }
    }
}
