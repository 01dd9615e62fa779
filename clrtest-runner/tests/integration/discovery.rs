// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::SampleWorkspace;
use clrtest_metadata::{TestExecutionStatus, TestListSummary};
use clrtest_runner::{
    errors::{MetadataFormatError, MetadataReadError},
    list::{
        CatalogBuilder, ClassifyOptions, DiscoveryReport, OutputFormat, SerializableFormat,
        SkipReason,
    },
};
use color_eyre::eyre::Result;
use fixture_data::sample_tests::{EXPECTED_CLASSES, LEGACY_DROPPED_CLASS};
use pretty_assertions::assert_eq;

fn class_names(report: &DiscoveryReport) -> Vec<String> {
    report
        .catalog
        .classes()
        .iter()
        .map(|class| class.full_name())
        .collect()
}

#[test]
fn discovers_sample_binaries() -> Result<()> {
    let workspace = SampleWorkspace::new()?;
    let report = workspace.discover(ClassifyOptions::default())?;
    let classes = report.catalog.classes();

    assert_eq!(
        class_names(&report),
        EXPECTED_CLASSES
            .iter()
            .map(|class| class.full_name.to_owned())
            .collect::<Vec<_>>(),
    );
    for (class, expected) in classes.iter().zip(EXPECTED_CLASSES) {
        assert_eq!(
            class.binary_path.file_name(),
            Some(expected.binary_name),
            "binary for {}",
            expected.full_name
        );
        assert_eq!(class.test_type, expected.test_type, "{}", expected.full_name);

        let methods: Vec<_> = class.methods.iter().map(|m| m.name.as_str()).collect();
        let expected_methods: Vec<_> = expected.methods.iter().map(|m| m.name).collect();
        assert_eq!(methods, expected_methods, "methods of {}", expected.full_name);

        for (method, expected_method) in class.methods.iter().zip(expected.methods) {
            let traits: Vec<_> = method.traits.iter().map(String::as_str).collect();
            assert_eq!(traits, expected_method.traits, "traits of {}", method.name);
            assert_eq!(
                method.fully_qualified_name,
                format!("{}.{}", expected.full_name, method.name)
            );
            assert_eq!(method.status(), TestExecutionStatus::NotRun);
            assert_eq!(
                report.catalog.class(method.class_id()).map(|c| c.full_name()),
                Some(class.full_name())
            );
        }
    }
    let expected_count: usize = EXPECTED_CLASSES.iter().map(|c| c.methods.len()).sum();
    assert_eq!(report.catalog.test_count(), expected_count);

    Ok(())
}

#[test]
fn skips_are_reported_in_input_order() -> Result<()> {
    let workspace = SampleWorkspace::new()?;
    let report = workspace.discover(ClassifyOptions::default())?;
    let binaries = &workspace.binaries;

    assert_eq!(report.skipped.len(), 4, "skipped: {:?}", report.skipped);

    let duplicate = &report.skipped[0];
    assert_eq!(duplicate.binary_path, binaries.nunit);
    assert_eq!(duplicate.type_name.as_deref(), Some("Sample.NUnit.Arithmetic"));
    assert_eq!(duplicate.method_name.as_deref(), Some("Adds"));
    assert!(
        matches!(
            &duplicate.reason,
            SkipReason::DuplicateIdentity { identity } if identity == "Sample.NUnit.Arithmetic.Adds"
        ),
        "unexpected reason: {:?}",
        duplicate.reason
    );

    let native = &report.skipped[1];
    assert_eq!(native.binary_path, binaries.native);
    assert!(
        matches!(
            &native.reason,
            SkipReason::UnreadableBinary(MetadataReadError::Format {
                error: MetadataFormatError::NoCliHeader,
                ..
            })
        ),
        "unexpected reason: {:?}",
        native.reason
    );

    let corrupt = &report.skipped[2];
    assert_eq!(corrupt.binary_path, binaries.corrupt);
    assert!(matches!(corrupt.reason, SkipReason::UnreadableBinary(_)));
    assert_eq!(corrupt.type_name, None);

    let missing = &report.skipped[3];
    assert_eq!(missing.binary_path, binaries.missing);
    assert!(matches!(missing.reason, SkipReason::BinaryMissing));

    Ok(())
}

#[test]
fn legacy_ancestor_check_drops_inherited_facts() -> Result<()> {
    let workspace = SampleWorkspace::new()?;
    let report = workspace.discover(ClassifyOptions {
        legacy_xunit_ancestor_check: true,
    })?;

    let expected: Vec<_> = EXPECTED_CLASSES
        .iter()
        .filter(|class| class.full_name != LEGACY_DROPPED_CLASS)
        .map(|class| class.full_name.to_owned())
        .collect();
    assert_eq!(class_names(&report), expected);
    Ok(())
}

#[test]
fn scan_threads_do_not_change_output() -> Result<()> {
    let workspace = SampleWorkspace::new()?;
    let summaries = [1, 8]
        .into_iter()
        .map(|threads| {
            let report = CatalogBuilder::new(ClassifyOptions::default())
                .scan_threads(threads)
                .build(workspace.binaries.scanned())?;
            Ok(report.to_summary())
        })
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(summaries[0], summaries[1]);
    Ok(())
}

#[test]
fn json_output_round_trips() -> Result<()> {
    let workspace = SampleWorkspace::new()?;
    let report = workspace.discover(ClassifyOptions::default())?;

    let mut out = Vec::new();
    report.catalog.write(
        OutputFormat::Serializable(SerializableFormat::Json),
        &mut out,
        false,
    )?;
    let summary: TestListSummary = serde_json::from_slice(&out)?;
    assert_eq!(summary, report.catalog.to_summary());
    assert_eq!(summary.test_classes.len(), EXPECTED_CLASSES.len());
    assert!(summary.skipped.is_empty());

    let xunit = summary
        .test_classes
        .iter()
        .find(|class| class.name == "Facts")
        .expect("Facts is listed");
    assert_eq!(xunit.namespace, "Sample.XUnit");
    let theory = &xunit.test_methods[2];
    assert_eq!(theory.fully_qualified_name, "Sample.XUnit.Facts.Theory");
    assert!(theory.traits.contains("Owner=QA"));
    assert_eq!(theory.last_result, None);

    // The report summary carries skips, the catalog's doesn't.
    assert_eq!(report.to_summary().skipped.len(), report.skipped.len());
    Ok(())
}
