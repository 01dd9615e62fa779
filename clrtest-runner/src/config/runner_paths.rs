// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::RunnerPathStoreError;
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use clrtest_metadata::TestType;
use etcetera::{BaseStrategy, HomeDirError, base_strategy::choose_base_strategy};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io, io::Write};
use tracing::debug;

/// Remembers the last runner executable used for each framework.
///
/// The store is a small TOML file:
///
/// ```toml
/// [runners]
/// nunit = "C:/Program Files (x86)/NUnit 2.6.4/bin/nunit-console.exe"
/// ```
#[derive(Clone, Debug)]
pub struct RunnerPathStore {
    path: Utf8PathBuf,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RunnerPathsFile {
    #[serde(default)]
    runners: BTreeMap<String, Utf8PathBuf>,
}

impl RunnerPathStore {
    /// The file name of the store within the user's config directory.
    pub const FILE_NAME: &'static str = "runner-paths.toml";

    /// Creates a store backed by the file at `path`. The file doesn't need to exist.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store in the user's config directory, e.g. `~/.config/clrtest/runner-paths.toml`.
    pub fn default_location() -> Result<Self, RunnerPathStoreError> {
        let strategy = match choose_base_strategy() {
            Ok(strategy) => strategy,
            Err(HomeDirError) => return Err(RunnerPathStoreError::NoConfigDir),
        };
        let config_dir = Utf8PathBuf::try_from(strategy.config_dir().join("clrtest"))
            .map_err(RunnerPathStoreError::NonUtf8Path)?;
        Ok(Self::new(config_dir.join(Self::FILE_NAME)))
    }

    /// Returns the path to the backing file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the remembered runner for `test_type`, if any.
    pub fn get(&self, test_type: TestType) -> Result<Option<Utf8PathBuf>, RunnerPathStoreError> {
        let mut file = self.read()?;
        Ok(file.runners.remove(test_type.as_str()))
    }

    /// Remembers `runner` as the runner for `test_type`.
    pub fn set(&self, test_type: TestType, runner: &Utf8Path) -> Result<(), RunnerPathStoreError> {
        let mut file = self.read()?;
        file.runners
            .insert(test_type.as_str().to_owned(), runner.to_owned());
        let contents = toml::to_string_pretty(&file).map_err(RunnerPathStoreError::Serialize)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| RunnerPathStoreError::CreateDir {
                path: parent.to_owned(),
                error,
            })?;
        }
        AtomicFile::new(&self.path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(contents.as_bytes()))
            .map_err(|error| RunnerPathStoreError::Write {
                path: self.path.clone(),
                error,
            })?;
        debug!("remembered {test_type} runner `{runner}` in {}", self.path);
        Ok(())
    }

    fn read(&self) -> Result<RunnerPathsFile, RunnerPathStoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(RunnerPathsFile::default());
            }
            Err(error) => {
                return Err(RunnerPathStoreError::Read {
                    path: self.path.clone(),
                    error,
                });
            }
        };
        toml::from_str(&contents).map_err(|error| RunnerPathStoreError::Parse {
            path: self.path.clone(),
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn missing_store_is_empty() {
        let dir = Utf8TempDir::new().unwrap();
        let store = RunnerPathStore::new(dir.path().join("nested/runner-paths.toml"));
        assert_eq!(store.get(TestType::NUnit).unwrap(), None);
    }

    #[test]
    fn set_and_get() {
        let dir = Utf8TempDir::new().unwrap();
        let store = RunnerPathStore::new(dir.path().join("nested/runner-paths.toml"));
        store
            .set(TestType::NUnit, Utf8Path::new("/opt/nunit/nunit-console.exe"))
            .unwrap();
        store
            .set(TestType::XUnit, Utf8Path::new("/opt/xunit/xunit-console.exe"))
            .unwrap();
        store
            .set(TestType::NUnit, Utf8Path::new("/opt/nunit2/nunit-console.exe"))
            .unwrap();

        assert_eq!(
            store.get(TestType::NUnit).unwrap(),
            Some(Utf8PathBuf::from("/opt/nunit2/nunit-console.exe"))
        );
        assert_eq!(
            store.get(TestType::XUnit).unwrap(),
            Some(Utf8PathBuf::from("/opt/xunit/xunit-console.exe"))
        );
        assert_eq!(store.get(TestType::MsTest).unwrap(), None);
    }

    #[test]
    fn malformed_store() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("runner-paths.toml");
        std::fs::write(&path, "runners = 5").unwrap();
        let store = RunnerPathStore::new(&path);
        assert!(matches!(
            store.get(TestType::NUnit),
            Err(RunnerPathStoreError::Parse { .. })
        ));
    }
}
