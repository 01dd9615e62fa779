// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::AssemblyMetadata;
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

const ASSEMBLY_EXTENSIONS: [&str; 2] = ["dll", "exe"];

/// Resolves referenced assemblies from the directory of the binary being scanned.
///
/// Assemblies are loaded on first request. Both successes and failures are cached, so each
/// sibling is read at most once.
#[derive(Debug)]
pub struct AssemblyResolver {
    dir: Utf8PathBuf,
    cache: HashMap<String, Option<Arc<AssemblyMetadata>>>,
}

impl AssemblyResolver {
    /// Creates a resolver that searches `dir`.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    /// Creates a resolver for the siblings of `binary`.
    pub fn for_binary(binary: &Utf8Path) -> Self {
        Self::new(binary.parent().unwrap_or(Utf8Path::new(".")))
    }

    /// Registers an already loaded assembly so that references to it aren't read again.
    pub fn insert(&mut self, metadata: Arc<AssemblyMetadata>) {
        self.cache
            .insert(metadata.assembly_name().to_owned(), Some(metadata));
    }

    /// Returns the metadata for the assembly with the given simple name, if it can be found and
    /// read.
    pub fn resolve(&mut self, assembly_name: &str) -> Option<Arc<AssemblyMetadata>> {
        if let Some(cached) = self.cache.get(assembly_name) {
            return cached.clone();
        }
        let loaded = self.load(assembly_name).map(Arc::new);
        self.cache.insert(assembly_name.to_owned(), loaded.clone());
        loaded
    }

    fn load(&self, assembly_name: &str) -> Option<AssemblyMetadata> {
        for extension in ASSEMBLY_EXTENSIONS {
            let candidate = self.dir.join(format!("{assembly_name}.{extension}"));
            if !candidate.is_file() {
                continue;
            }
            match AssemblyMetadata::load(&candidate) {
                Ok(metadata) => return Some(metadata),
                Err(error) => {
                    debug!("failed to read referenced assembly {candidate}: {error}");
                }
            }
        }
        debug!(
            "referenced assembly `{assembly_name}` not found in {}",
            self.dir
        );
        None
    }
}
