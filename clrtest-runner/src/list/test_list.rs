// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{
        CreateTestListError, DisplayErrorChain, MetadataFormatError, MetadataReadError,
        MethodReadError, TypeReadError, WriteTestListError,
    },
    list::{AssemblyClassifier, ClassifyOptions, OutputFormat, Styles},
    metadata::{AssemblyMetadata, TypeDefinition},
    results::TestResult,
};
use camino::{Utf8Path, Utf8PathBuf};
use clrtest_metadata::{
    SkippedUnitSummary, TestClassSummary, TestExecutionStatus, TestListSummary, TestMethodSummary,
    TestType,
};
use futures::prelude::*;
use owo_colors::OwoColorize;
use std::{
    collections::{BTreeSet, HashSet},
    io::{self, Write},
    sync::Arc,
};
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

/// Index of a [`TestClass`] within its [`TestCatalog`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ClassId(usize);

/// A discovered test class.
#[derive(Clone, Debug)]
pub struct TestClass {
    /// The binary the class was found in, as passed to the catalog builder.
    pub binary_path: Utf8PathBuf,
    /// The namespace, empty for the global namespace.
    pub namespace: String,
    /// The simple name.
    pub name: String,
    /// The convention the class was classified under.
    pub test_type: TestType,
    /// Test methods in declaration order.
    pub methods: Vec<TestMethod>,
}

impl TestClass {
    /// Returns `Namespace.Name`, or just `Name` in the global namespace.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    fn to_summary(&self) -> TestClassSummary {
        TestClassSummary {
            binary_path: self.binary_path.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            test_type: self.test_type,
            test_methods: self.methods.iter().map(TestMethod::to_summary).collect(),
        }
    }
}

/// A discovered test method.
#[derive(Clone, Debug)]
pub struct TestMethod {
    /// The simple name.
    pub name: String,
    /// `Namespace.Class.Method`: the key results are matched on.
    pub fully_qualified_name: String,
    /// Declared traits, or just [`NO_TRAITS`](super::NO_TRAITS).
    pub traits: BTreeSet<String>,
    class_id: ClassId,
    last_result: Option<TestResult>,
}

impl TestMethod {
    /// Creates a method that hasn't been run. The class ID is assigned by [`TestCatalog::new`].
    pub fn new(
        name: impl Into<String>,
        fully_qualified_name: impl Into<String>,
        traits: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            fully_qualified_name: fully_qualified_name.into(),
            traits: traits.into_iter().map(Into::into).collect(),
            class_id: ClassId(0),
            last_result: None,
        }
    }

    /// Returns the owning class's index in the catalog.
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    /// Returns the last known result, if this method has been run.
    pub fn last_result(&self) -> Option<&TestResult> {
        self.last_result.as_ref()
    }

    /// Returns the status of the last known result.
    pub fn status(&self) -> TestExecutionStatus {
        self.last_result
            .as_ref()
            .map_or(TestExecutionStatus::NotRun, |result| result.status)
    }

    pub(crate) fn set_last_result(&mut self, result: TestResult) {
        self.last_result = Some(result);
    }

    fn to_summary(&self) -> TestMethodSummary {
        TestMethodSummary {
            name: self.name.clone(),
            fully_qualified_name: self.fully_qualified_name.clone(),
            traits: self.traits.clone(),
            last_result: self.last_result.as_ref().map(TestResult::to_summary),
        }
    }
}

/// Which discovered tests to run or list.
///
/// An empty criterion matches everything; a test must match every non-empty criterion.
#[derive(Clone, Debug, Default)]
pub struct TestSelection {
    patterns: Vec<String>,
    traits: BTreeSet<String>,
    test_types: BTreeSet<TestType>,
}

impl TestSelection {
    /// Selects every test.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only selects tests whose identity contains one of these substrings.
    pub fn with_patterns(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Only selects tests that declare one of these traits.
    pub fn with_traits(mut self, traits: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.traits.extend(traits.into_iter().map(Into::into));
        self
    }

    /// Only selects tests of these frameworks.
    pub fn with_test_types(mut self, test_types: impl IntoIterator<Item = TestType>) -> Self {
        self.test_types.extend(test_types);
        self
    }

    /// Returns true if the method is selected.
    pub fn matches(&self, class: &TestClass, method: &TestMethod) -> bool {
        (self.test_types.is_empty() || self.test_types.contains(&class.test_type))
            && (self.patterns.is_empty()
                || self
                    .patterns
                    .iter()
                    .any(|pattern| method.fully_qualified_name.contains(pattern.as_str())))
            && (self.traits.is_empty() || !self.traits.is_disjoint(&method.traits))
    }
}

/// The catalog of discovered test classes.
///
/// Classes are ordered by the position of their binary in the builder's input, then by
/// declaration order within the binary.
#[derive(Clone, Debug, Default)]
pub struct TestCatalog {
    classes: Vec<TestClass>,
}

impl TestCatalog {
    /// Creates a catalog from classes, fixing up each method's class ID.
    pub fn new(classes: impl IntoIterator<Item = TestClass>) -> Self {
        let mut catalog = Self::default();
        for class in classes {
            catalog.push(class);
        }
        catalog
    }

    fn push(&mut self, mut class: TestClass) {
        let class_id = ClassId(self.classes.len());
        for method in &mut class.methods {
            method.class_id = class_id;
        }
        self.classes.push(class);
    }

    /// Returns the classes in catalog order.
    pub fn classes(&self) -> &[TestClass] {
        &self.classes
    }

    /// Returns the class with the given ID.
    pub fn class(&self, id: ClassId) -> Option<&TestClass> {
        self.classes.get(id.0)
    }

    /// Returns the total number of test methods.
    pub fn test_count(&self) -> usize {
        self.classes.iter().map(|class| class.methods.len()).sum()
    }

    /// Iterates over every method along with its class.
    pub fn iter_methods(&self) -> impl Iterator<Item = (&TestClass, &TestMethod)> + '_ {
        self.classes
            .iter()
            .flat_map(|class| class.methods.iter().map(move |method| (class, method)))
    }

    /// Returns the selected methods, in catalog order.
    pub fn selected<'a>(
        &'a self,
        selection: &'a TestSelection,
    ) -> impl Iterator<Item = (&'a TestClass, &'a TestMethod)> + 'a {
        self.iter_methods()
            .filter(move |(class, method)| selection.matches(class, method))
    }

    pub(crate) fn classes_mut(&mut self) -> &mut [TestClass] {
        &mut self.classes
    }

    /// Returns the serializable form of this catalog.
    pub fn to_summary(&self) -> TestListSummary {
        let mut summary = TestListSummary::new();
        summary.test_count = self.test_count();
        summary.test_classes = self.classes.iter().map(TestClass::to_summary).collect();
        summary
    }

    /// Outputs this catalog in the given format.
    pub fn write(
        &self,
        output_format: OutputFormat,
        writer: impl Write,
        colorize: bool,
    ) -> Result<(), WriteTestListError> {
        match output_format {
            OutputFormat::Human { verbose } => self
                .write_human(writer, verbose, colorize)
                .map_err(WriteTestListError::Io),
            OutputFormat::Serializable(format) => format
                .to_writer(&self.to_summary(), writer)
                .map_err(WriteTestListError::Json),
        }
    }

    fn write_human(&self, mut writer: impl Write, verbose: bool, colorize: bool) -> io::Result<()> {
        let mut styles = Styles::default();
        if colorize {
            styles.colorize();
        }

        let mut current_binary: Option<&Utf8Path> = None;
        for class in &self.classes {
            if current_binary != Some(class.binary_path.as_path()) {
                writeln!(writer, "{}:", class.binary_path.style(styles.binary))?;
                current_binary = Some(class.binary_path.as_path());
            }
            writeln!(
                writer,
                "    {} ({})",
                class.full_name().style(styles.class_name),
                class.test_type,
            )?;
            if class.methods.is_empty() {
                writeln!(writer, "        (no tests)")?;
            }
            for method in &class.methods {
                write!(writer, "        {}", method.name.style(styles.method_name))?;
                if verbose {
                    let traits: Vec<_> = method.traits.iter().map(String::as_str).collect();
                    write!(
                        writer,
                        " {} {}",
                        "traits:".style(styles.field),
                        traits.join(", ")
                    )?;
                    if let Some(result) = &method.last_result {
                        write!(writer, " {} {}", "last:".style(styles.field), result.status)?;
                    }
                }
                writeln!(writer)?;
            }
        }
        Ok(())
    }
}

/// Why a unit was left out of the catalog.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SkipReason {
    /// The binary doesn't exist.
    #[error("binary does not exist")]
    BinaryMissing,

    /// The binary's metadata couldn't be read.
    #[error("failed to read binary")]
    UnreadableBinary(#[source] MetadataReadError),

    /// A type's metadata couldn't be decoded.
    #[error("failed to read type")]
    UnreadableType(#[source] TypeReadError),

    /// A method's metadata couldn't be decoded.
    #[error("failed to read method")]
    UnreadableMethod(#[source] MethodReadError),

    /// A method's trait attributes couldn't be decoded.
    #[error("failed to read traits")]
    UnreadableTraits(#[source] MetadataFormatError),

    /// Another method of the same class has the same identity.
    #[error("a test with identity `{identity}` was already found, skipping overload")]
    DuplicateIdentity {
        /// The duplicated identity.
        identity: String,
    },

    /// Scanning the binary panicked.
    #[error("scanning the binary panicked")]
    ScanPanicked,
}

/// A unit that was skipped during discovery.
#[derive(Debug)]
pub struct SkippedUnit {
    /// The binary being scanned.
    pub binary_path: Utf8PathBuf,
    /// The type's full name, if the unit is a type or a method.
    pub type_name: Option<String>,
    /// The method's name, if the unit is a method.
    pub method_name: Option<String>,
    /// Why the unit was skipped.
    pub reason: SkipReason,
}

impl SkippedUnit {
    fn binary(binary_path: &Utf8Path, reason: SkipReason) -> Self {
        Self {
            binary_path: binary_path.to_owned(),
            type_name: None,
            method_name: None,
            reason,
        }
    }

    fn log(&self) {
        let mut unit = self.binary_path.to_string();
        for part in [&self.type_name, &self.method_name].into_iter().flatten() {
            unit.push_str("::");
            unit.push_str(part);
        }
        let reason = DisplayErrorChain::new(&self.reason).to_string();
        match self.reason {
            SkipReason::BinaryMissing | SkipReason::DuplicateIdentity { .. } => {
                debug!("skipping {unit}: {reason}")
            }
            _ => warn!("skipping {unit}: {reason}"),
        }
    }

    fn to_summary(&self) -> SkippedUnitSummary {
        SkippedUnitSummary {
            binary_path: self.binary_path.clone(),
            type_name: self.type_name.clone(),
            method_name: self.method_name.clone(),
            reason: DisplayErrorChain::new(&self.reason).to_string(),
        }
    }
}

/// The result of discovery: a catalog, and everything that was skipped along the way.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// The discovered tests.
    pub catalog: TestCatalog,
    /// Skipped units, in input order.
    pub skipped: Vec<SkippedUnit>,
}

impl DiscoveryReport {
    /// Returns the serializable form of this report.
    pub fn to_summary(&self) -> TestListSummary {
        let mut summary = self.catalog.to_summary();
        summary.skipped = self.skipped.iter().map(SkippedUnit::to_summary).collect();
        summary
    }
}

/// Builds a [`TestCatalog`] from a list of candidate binaries.
#[derive(Clone, Debug)]
pub struct CatalogBuilder {
    options: ClassifyOptions,
    scan_threads: usize,
}

impl CatalogBuilder {
    /// Creates a new builder. Binaries are scanned on as many threads as there are CPUs.
    pub fn new(options: ClassifyOptions) -> Self {
        let scan_threads = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            options,
            scan_threads,
        }
    }

    /// Sets the number of binaries scanned at once.
    pub fn scan_threads(mut self, scan_threads: usize) -> Self {
        self.scan_threads = scan_threads.max(1);
        self
    }

    /// Scans `binaries` and classifies the types within them.
    ///
    /// Binaries that don't exist or can't be read contribute nothing; that isn't an error. The
    /// only error is failing to start the scanning threads.
    pub fn build<I>(&self, binaries: I) -> Result<DiscoveryReport, CreateTestListError>
    where
        I: IntoIterator<Item = Utf8PathBuf>,
    {
        let runtime = Runtime::new().map_err(CreateTestListError::TokioRuntimeCreate)?;

        let options = self.options;
        let stream = futures::stream::iter(binaries.into_iter().enumerate()).map(
            |(index, binary)| async move {
                let path = binary.clone();
                let scan = tokio::task::spawn_blocking(move || scan_binary(&path, options))
                    .await
                    .unwrap_or_else(|_| BinaryScan {
                        classes: Vec::new(),
                        skipped: vec![SkippedUnit::binary(&binary, SkipReason::ScanPanicked)],
                    });
                (index, scan)
            },
        );
        let mut scans: Vec<(usize, BinaryScan)> =
            runtime.block_on(stream.buffer_unordered(self.scan_threads).collect());
        runtime.shutdown_background();

        // Completion order is arbitrary; restore input order.
        scans.sort_by_key(|(index, _)| *index);
        let mut report = DiscoveryReport::default();
        for (_, scan) in scans {
            for class in scan.classes {
                report.catalog.push(class);
            }
            report.skipped.extend(scan.skipped);
        }
        debug!(
            "discovered {} tests in {} classes ({} units skipped)",
            report.catalog.test_count(),
            report.catalog.classes().len(),
            report.skipped.len(),
        );
        Ok(report)
    }
}

/// Classes found in, and units skipped from, a single binary.
#[derive(Debug, Default)]
pub struct BinaryScan {
    /// Classes in declaration order. Class IDs are assigned when added to a catalog.
    pub classes: Vec<TestClass>,
    /// Units that were skipped.
    pub skipped: Vec<SkippedUnit>,
}

/// Scans a single binary.
pub fn scan_binary(binary: &Utf8Path, options: ClassifyOptions) -> BinaryScan {
    let mut scan = BinaryScan::default();
    if !binary.is_file() {
        scan.skip(SkippedUnit::binary(binary, SkipReason::BinaryMissing));
        return scan;
    }
    let metadata = match AssemblyMetadata::load(binary) {
        Ok(metadata) => Arc::new(metadata),
        Err(error) => {
            scan.skip(SkippedUnit::binary(binary, SkipReason::UnreadableBinary(error)));
            return scan;
        }
    };

    let mut classifier = AssemblyClassifier::new(metadata.clone(), options);
    for ty in metadata.types() {
        match ty {
            Ok(ty) => {
                if let Some(class) = scan.classify_type(binary, ty, &mut classifier) {
                    scan.classes.push(class);
                }
            }
            Err(error) => scan.skip(SkippedUnit {
                binary_path: binary.to_owned(),
                type_name: error.type_name().map(str::to_owned),
                method_name: None,
                reason: SkipReason::UnreadableType(error.clone()),
            }),
        }
    }
    scan
}

impl BinaryScan {
    fn skip(&mut self, unit: SkippedUnit) {
        unit.log();
        self.skipped.push(unit);
    }

    fn classify_type(
        &mut self,
        binary: &Utf8Path,
        ty: &TypeDefinition,
        classifier: &mut AssemblyClassifier,
    ) -> Option<TestClass> {
        let convention = classifier.classify(ty)?;
        let type_name = ty.name.full_name();
        let skipped = |method_name: Option<&str>, reason| SkippedUnit {
            binary_path: binary.to_owned(),
            type_name: Some(type_name.clone()),
            method_name: method_name.map(str::to_owned),
            reason,
        };

        let mut seen = HashSet::new();
        let mut methods = Vec::new();
        for method in &ty.methods {
            let method = match method {
                Ok(method) => method,
                Err(error) => {
                    self.skip(skipped(None, SkipReason::UnreadableMethod(error.clone())));
                    continue;
                }
            };
            if !convention.is_test_method(method) {
                continue;
            }
            let traits = match convention.method_traits(method) {
                Ok(traits) => traits,
                Err(error) => {
                    self.skip(skipped(Some(&method.name), SkipReason::UnreadableTraits(error)));
                    continue;
                }
            };
            let identity = format!("{type_name}.{}", method.name);
            if !seen.insert(identity.clone()) {
                self.skip(skipped(
                    Some(&method.name),
                    SkipReason::DuplicateIdentity { identity },
                ));
                continue;
            }
            methods.push(TestMethod::new(&method.name, identity, traits));
        }

        Some(TestClass {
            binary_path: binary.to_owned(),
            namespace: ty.name.namespace.clone(),
            name: ty.name.name.clone(),
            test_type: convention.test_type,
            methods,
        })
    }
}
