// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{FrameworkConfig, RunnerPathStore},
    errors::{DisplayErrorChain, RunnerNotFound},
    runner::RunnerStrategy,
};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobBuilder, GlobMatcher};
use std::{fmt, time::SystemTime};
use tracing::{debug, info, warn};

/// Asks someone else for a runner executable when the search comes up empty.
///
/// The CLI implements this with an interactive prompt.
pub trait RunnerResolver: Send + Sync {
    /// Returns a runner executable for `strategy`, or `None` to give up.
    fn resolve(
        &self,
        strategy: &dyn RunnerStrategy,
        searched: &[Utf8PathBuf],
    ) -> Option<Utf8PathBuf>;
}

/// A resolver that never finds anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoResolver;

impl RunnerResolver for NoResolver {
    fn resolve(&self, _: &dyn RunnerStrategy, _: &[Utf8PathBuf]) -> Option<Utf8PathBuf> {
        None
    }
}

/// Where a runner executable was found.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunnerSource {
    /// From configuration or the command line.
    Configured,
    /// The last runner used, from the [`RunnerPathStore`].
    Remembered,
    /// By searching install directories.
    Search,
    /// From the [`RunnerResolver`].
    Resolver,
}

impl fmt::Display for RunnerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured => write!(f, "configured"),
            Self::Remembered => write!(f, "remembered"),
            Self::Search => write!(f, "search"),
            Self::Resolver => write!(f, "resolver"),
        }
    }
}

/// A runner executable, and where it was found.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocatedRunner {
    /// The executable.
    pub path: Utf8PathBuf,
    /// Where it was found.
    pub source: RunnerSource,
}

/// Finds a framework's runner executable.
///
/// The order is: the configured path, the remembered path, the newest matching install
/// directory under the search roots, and finally the resolver. A runner found by the last two
/// is remembered for next time.
#[derive(Debug)]
pub struct RunnerLocator<'a> {
    strategy: &'a dyn RunnerStrategy,
    configured: Option<&'a Utf8Path>,
    search_roots: Vec<Utf8PathBuf>,
    store: Option<&'a RunnerPathStore>,
}

impl<'a> RunnerLocator<'a> {
    /// Creates a locator from a framework's configuration. If the configuration has no search
    /// roots, [`default_search_roots`] is used.
    pub fn new(strategy: &'a dyn RunnerStrategy, config: &'a FrameworkConfig) -> Self {
        let search_roots = if config.search_roots().is_empty() {
            default_search_roots()
        } else {
            config.search_roots().to_vec()
        };
        Self {
            strategy,
            configured: config.path(),
            search_roots,
            store: None,
        }
    }

    /// Uses `store` to look up and remember runners.
    pub fn with_store(mut self, store: Option<&'a RunnerPathStore>) -> Self {
        self.store = store;
        self
    }

    /// Finds the runner, falling back to `resolver`.
    pub fn locate(&self, resolver: &dyn RunnerResolver) -> Result<LocatedRunner, RunnerNotFound> {
        let test_type = self.strategy.test_type();

        if let Some(path) = self.configured {
            if path.is_file() {
                return Ok(LocatedRunner {
                    path: path.to_owned(),
                    source: RunnerSource::Configured,
                });
            }
            warn!("configured {test_type} runner `{path}` doesn't exist, searching instead");
        }

        if let Some(path) = self.remembered() {
            return Ok(LocatedRunner {
                path,
                source: RunnerSource::Remembered,
            });
        }

        let located = match self.search() {
            Some(path) => LocatedRunner {
                path,
                source: RunnerSource::Search,
            },
            None => match resolver.resolve(self.strategy, &self.search_roots) {
                Some(path) if path.is_file() => LocatedRunner {
                    path,
                    source: RunnerSource::Resolver,
                },
                Some(path) => {
                    warn!("{test_type} runner `{path}` doesn't exist");
                    return Err(self.not_found());
                }
                None => return Err(self.not_found()),
            },
        };
        info!(
            "using {test_type} runner `{}` ({})",
            located.path, located.source
        );
        self.remember(&located.path);
        Ok(located)
    }

    fn remembered(&self) -> Option<Utf8PathBuf> {
        let test_type = self.strategy.test_type();
        let store = self.store?;
        match store.get(test_type) {
            Ok(Some(path)) if path.is_file() => Some(path),
            Ok(Some(path)) => {
                debug!("remembered {test_type} runner `{path}` no longer exists");
                None
            }
            Ok(None) => None,
            Err(error) => {
                warn!("{}", DisplayErrorChain::new(&error));
                None
            }
        }
    }

    fn remember(&self, path: &Utf8Path) {
        if let Some(store) = self.store
            && let Err(error) = store.set(self.strategy.test_type(), path)
        {
            warn!("{}", DisplayErrorChain::new(&error));
        }
    }

    fn not_found(&self) -> RunnerNotFound {
        RunnerNotFound::new(
            self.strategy.test_type(),
            self.strategy.executable_name(),
            self.search_roots.clone(),
        )
    }

    /// Searches the roots for install directories, newest first, and returns the first one
    /// containing the executable.
    pub fn search(&self) -> Option<Utf8PathBuf> {
        let matcher = match install_dir_matcher(self.strategy.install_dir_pattern()) {
            Ok(matcher) => matcher,
            Err(error) => {
                warn!("invalid install directory pattern: {error}");
                return None;
            }
        };

        let mut candidates: Vec<(SystemTime, Utf8PathBuf)> = Vec::new();
        for root in &self.search_roots {
            let entries = match root.read_dir_utf8() {
                Ok(entries) => entries,
                Err(error) => {
                    debug!("skipping search root `{root}`: {error}");
                    continue;
                }
            };
            for entry in entries.flatten() {
                if !matcher.is_match(entry.file_name()) {
                    continue;
                }
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                if metadata.is_dir() {
                    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    candidates.push((modified, entry.into_path()));
                }
            }
        }
        // Newest first. The sort is stable, so ties keep search root order.
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        candidates.into_iter().find_map(|(_, dir)| {
            self.strategy.executable_subdirs().iter().find_map(|subdir| {
                let path = dir.join(subdir).join(self.strategy.executable_name());
                path.is_file().then_some(path)
            })
        })
    }
}

fn install_dir_matcher(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    let glob: Glob = GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(true)
        .build()?;
    Ok(glob.compile_matcher())
}

/// Returns the 64-bit and 32-bit program directories, from `ProgramW6432`, `ProgramFiles(x86)`
/// and `ProgramFiles`.
pub fn default_search_roots() -> Vec<Utf8PathBuf> {
    search_roots_from(|var| std::env::var(var).ok())
}

fn search_roots_from(get: impl Fn(&str) -> Option<String>) -> Vec<Utf8PathBuf> {
    let mut roots: Vec<Utf8PathBuf> = Vec::new();
    let mut push = |root: Utf8PathBuf| {
        if !roots.contains(&root) {
            roots.push(root);
        }
    };
    for var in ["ProgramW6432", "ProgramFiles(x86)", "ProgramFiles"] {
        let Some(value) = get(var).filter(|value| !value.is_empty()) else {
            continue;
        };
        // A 32-bit process only sees one of the two directories through ProgramFiles.
        if var == "ProgramFiles" {
            match value.strip_suffix(" (x86)") {
                Some(native) => push(Utf8PathBuf::from(native)),
                None => push(Utf8PathBuf::from(format!("{value} (x86)"))),
            }
        }
        push(Utf8PathBuf::from(value));
    }
    roots
}
