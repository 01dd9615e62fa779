// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use clrtest_runner::{
    config::ClrTestConfig,
    list::{CatalogBuilder, ClassifyOptions, DiscoveryReport},
};
use color_eyre::eyre::Result;
use fixture_data::sample_tests::SampleBinaries;
use std::sync::Once;

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A temporary workspace containing the sample binaries under `bin/`.
pub(crate) struct SampleWorkspace {
    dir: Utf8TempDir,
    pub(crate) binaries: SampleBinaries,
}

impl SampleWorkspace {
    pub(crate) fn new() -> Result<Self> {
        test_init();
        let dir = Utf8TempDir::new()?;
        let bin_dir = dir.path().join("bin");
        std::fs::create_dir(&bin_dir)?;
        let binaries = SampleBinaries::write(&bin_dir)?;
        Ok(Self { dir, binaries })
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root().join(relative)
    }

    /// Writes `.config/clrtest.toml` and loads it.
    pub(crate) fn config(&self, contents: &str) -> Result<ClrTestConfig> {
        let config_dir = self.path(".config");
        std::fs::create_dir_all(&config_dir)?;
        std::fs::write(config_dir.join("clrtest.toml"), contents)?;
        Ok(ClrTestConfig::from_sources(self.root(), None)?)
    }

    pub(crate) fn discover(&self, options: ClassifyOptions) -> Result<DiscoveryReport> {
        Ok(CatalogBuilder::new(options).build(self.binaries.scanned())?)
    }
}
