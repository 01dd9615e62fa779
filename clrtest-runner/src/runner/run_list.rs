// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{RunArtifactsError, RunListWriteError},
    runner::RunnerStrategy,
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local, NaiveDateTime};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
};
use tracing::{debug, warn};

/// The working files for a single runner invocation.
///
/// Names share a stem built from the framework and the current time, so that repeated runs and
/// concurrent runs of different frameworks don't collide. The run list is deleted by
/// [`cleanup`](Self::cleanup), or on drop if that wasn't called. The results and coverage
/// artifacts are kept until [`prune`](Self::prune) removes them.
#[derive(Debug)]
pub struct RunArtifacts {
    stem: String,
    run_list: Option<Utf8PathBuf>,
    results: Utf8PathBuf,
    coverage_output: Utf8PathBuf,
    cleaned_up: bool,
}

impl RunArtifacts {
    /// The format of the timestamp portion of the stem.
    pub const TIMESTAMP_FORMAT: &'static str = "%Y_%m_%d_%H_%M_%S_%3f";

    /// Picks names for a run of `strategy` in `dir`, creating `dir` if necessary.
    pub fn create(
        dir: &Utf8Path,
        strategy: &dyn RunnerStrategy,
        now: DateTime<Local>,
    ) -> Result<Self, RunArtifactsError> {
        std::fs::create_dir_all(dir).map_err(|error| RunArtifactsError::CreateDir {
            path: dir.to_owned(),
            error,
        })?;

        let base = format!(
            "{}_{}",
            strategy.test_type(),
            now.format(Self::TIMESTAMP_FORMAT)
        );
        let mut suffix = 0;
        loop {
            let stem = match suffix {
                0 => base.clone(),
                n => format!("{base}_{n}"),
            };
            let artifacts = Self::with_stem(dir, strategy, stem);
            if !artifacts.any_exists() {
                debug!("{} artifacts use stem `{}`", strategy.test_type(), artifacts.stem);
                return Ok(artifacts);
            }
            suffix += 1;
        }
    }

    /// Deletes the results and coverage artifacts of all but the `keep` most recent runs of
    /// `strategy` in `dir`. Run lists and files whose names clrtest didn't pick are left alone.
    ///
    /// Returns the number of runs whose artifacts were deleted. Failures are logged, not returned.
    pub fn prune(dir: &Utf8Path, strategy: &dyn RunnerStrategy, keep: usize) -> usize {
        let entries = match dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return 0,
            Err(error) => {
                warn!("failed to read store directory `{dir}`: {error}");
                return 0;
            }
        };

        let prefix = format!("{}_", strategy.test_type());
        let results_suffix = format!(".{}", strategy.results_extension());
        let mut runs: BTreeMap<(NaiveDateTime, u32), Vec<Utf8PathBuf>> = BTreeMap::new();
        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name();
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            // The coverage suffix is checked first: it ends in the results extension too.
            let Some(stem_rest) = rest
                .strip_suffix(COVERAGE_SUFFIX)
                .or_else(|| rest.strip_suffix(&results_suffix))
            else {
                continue;
            };
            if let Some(key) = parse_stem_key(stem_rest) {
                runs.entry(key).or_default().push(entry.into_path());
            }
        }

        let stale = runs.len().saturating_sub(keep);
        for paths in runs.into_values().take(stale) {
            for path in paths {
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!("removed old artifact `{path}`"),
                    Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                    Err(error) => warn!("failed to remove old artifact `{path}`: {error}"),
                }
            }
        }
        stale
    }

    fn with_stem(dir: &Utf8Path, strategy: &dyn RunnerStrategy, stem: String) -> Self {
        let run_list = strategy
            .uses_run_list()
            .then(|| dir.join(format!("{stem}.txt")));
        let results = dir.join(format!("{stem}.{}", strategy.results_extension()));
        let coverage_output = dir.join(format!("{stem}{COVERAGE_SUFFIX}"));
        Self {
            stem,
            run_list,
            results,
            coverage_output,
            cleaned_up: false,
        }
    }

    fn any_exists(&self) -> bool {
        self.run_list.iter().any(|path| path.exists())
            || self.results.exists()
            || self.coverage_output.exists()
    }

    /// Returns the shared stem.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Returns the run-list path, if the runner uses one.
    pub fn run_list_path(&self) -> Option<&Utf8Path> {
        self.run_list.as_deref()
    }

    /// Returns the path the runner writes results to.
    pub fn results_path(&self) -> &Utf8Path {
        &self.results
    }

    /// Returns the path the coverage tool writes to.
    pub fn coverage_output_path(&self) -> &Utf8Path {
        &self.coverage_output
    }

    /// Writes `tests` to the run list, one per line.
    ///
    /// The file is closed before this returns, whether or not writing succeeded. Does nothing if
    /// the runner doesn't use a run list.
    pub fn write_run_list(&self, tests: &[String]) -> Result<(), RunListWriteError> {
        let Some(path) = &self.run_list else {
            return Ok(());
        };
        write_lines(path, tests).map_err(|error| RunListWriteError::new(path, error))
    }

    /// Deletes the run list. Failures are logged, not returned. Calling this more than once is
    /// harmless.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        let Some(path) = &self.run_list else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => debug!("removed run list `{path}`"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!("failed to remove run list `{path}`: {error}"),
        }
    }
}

impl Drop for RunArtifacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}

const COVERAGE_SUFFIX: &str = "_coverage.xml";

/// Parses the part of a stem after the framework: a timestamp, then an optional `_<n>` suffix.
fn parse_stem_key(rest: &str) -> Option<(NaiveDateTime, u32)> {
    // Formatted timestamps are always 23 characters long.
    let (timestamp, suffix) = rest.split_at_checked(23)?;
    let timestamp = NaiveDateTime::parse_from_str(timestamp, RunArtifacts::TIMESTAMP_FORMAT).ok()?;
    let suffix = match suffix {
        "" => 0,
        suffix => suffix.strip_prefix('_')?.parse().ok()?,
    };
    Some((timestamp, suffix))
}

fn write_lines(path: &Utf8Path, lines: &[String]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for line in lines {
        writeln!(writer, "{line}")?;
    }
    writer.flush()
}

/// Reads a run list written by [`RunArtifacts::write_run_list`].
pub fn read_run_list(path: &Utf8Path) -> io::Result<Vec<String>> {
    BufReader::new(File::open(path)?).lines().collect()
}
