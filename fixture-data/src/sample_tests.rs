// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The sample binaries: one per framework, a shared base-class assembly they reference, and a
//! few binaries that discovery has to skip.

use crate::{
    assembly::{AssemblyBuilder, AttributeArg, MethodFixture, TypeFixture, TypeId, native_image},
    models::{ExpectedClass, ExpectedMethod},
};
use camino::{Utf8Path, Utf8PathBuf};
use clrtest_metadata::TestType;
use std::io;

const NUNIT: &str = "NUnit.Framework";
const XUNIT: &str = "Xunit";
const MSTEST: &str = "Microsoft.VisualStudio.TestTools.UnitTesting";

/// Paths to the sample binaries written by [`SampleBinaries::write`].
#[derive(Clone, Debug)]
pub struct SampleBinaries {
    /// `Shared.Base.dll`, which holds base classes and is only reached through references.
    pub shared: Utf8PathBuf,
    /// `Sample.NUnit.dll`.
    pub nunit: Utf8PathBuf,
    /// `Sample.XUnit.dll`.
    pub xunit: Utf8PathBuf,
    /// `Sample.MsTest.dll`.
    pub mstest: Utf8PathBuf,
    /// `native.dll`, a PE image without CLI metadata.
    pub native: Utf8PathBuf,
    /// `corrupt.dll`, which isn't a PE image at all.
    pub corrupt: Utf8PathBuf,
    /// `missing.dll`, which isn't written.
    pub missing: Utf8PathBuf,
}

impl SampleBinaries {
    /// Writes the sample binaries to `dir`.
    pub fn write(dir: &Utf8Path) -> io::Result<Self> {
        let binaries = Self {
            shared: dir.join("Shared.Base.dll"),
            nunit: dir.join("Sample.NUnit.dll"),
            xunit: dir.join("Sample.XUnit.dll"),
            mstest: dir.join("Sample.MsTest.dll"),
            native: dir.join("native.dll"),
            corrupt: dir.join("corrupt.dll"),
            missing: dir.join("missing.dll"),
        };
        shared_assembly().write_to(&binaries.shared)?;
        nunit_assembly().write_to(&binaries.nunit)?;
        xunit_assembly().write_to(&binaries.xunit)?;
        mstest_assembly().write_to(&binaries.mstest)?;
        std::fs::write(&binaries.native, native_image())?;
        std::fs::write(&binaries.corrupt, b"MZ this is not a portable executable image")?;
        Ok(binaries)
    }

    /// The binaries passed to discovery, in order. The shared assembly isn't among them.
    pub fn scanned(&self) -> Vec<Utf8PathBuf> {
        vec![
            self.nunit.clone(),
            self.xunit.clone(),
            self.mstest.clone(),
            self.native.clone(),
            self.corrupt.clone(),
            self.missing.clone(),
        ]
    }
}

/// Classes expected from [`SampleBinaries::scanned`] with default options, in catalog order.
pub static EXPECTED_CLASSES: &[ExpectedClass] = &[
    ExpectedClass {
        binary_name: "Sample.NUnit.dll",
        full_name: "Sample.NUnit.Arithmetic",
        test_type: TestType::NUnit,
        methods: &[
            ExpectedMethod::new("Adds", &["No Traits"]),
            ExpectedMethod::new("Subtracts", &["Fast"]),
            ExpectedMethod::new("Divides", &["Math", "Slow"]),
        ],
    },
    ExpectedClass {
        binary_name: "Sample.NUnit.dll",
        full_name: "Sample.NUnit.Inherited",
        test_type: TestType::NUnit,
        methods: &[ExpectedMethod::new("Works", &["No Traits"])],
    },
    ExpectedClass {
        binary_name: "Sample.NUnit.dll",
        full_name: "Sample.NUnit.GenericFixture`1",
        test_type: TestType::NUnit,
        methods: &[ExpectedMethod::new("Generic", &["No Traits"])],
    },
    ExpectedClass {
        binary_name: "Sample.NUnit.dll",
        full_name: "Sample.NUnit.Closed",
        test_type: TestType::NUnit,
        methods: &[ExpectedMethod::new("Closed", &["No Traits"])],
    },
    ExpectedClass {
        binary_name: "Sample.XUnit.dll",
        full_name: "Sample.XUnit.Facts",
        test_type: TestType::XUnit,
        methods: &[
            ExpectedMethod::new("Passes", &["No Traits"]),
            ExpectedMethod::new("Fails", &["Category=Slow"]),
            ExpectedMethod::new("Theory", &["Category=Slow", "Owner=QA"]),
        ],
    },
    ExpectedClass {
        binary_name: "Sample.XUnit.dll",
        full_name: "Sample.XUnit.InheritedFacts",
        test_type: TestType::XUnit,
        methods: &[],
    },
    ExpectedClass {
        binary_name: "Sample.XUnit.dll",
        full_name: "GlobalFacts",
        test_type: TestType::XUnit,
        methods: &[ExpectedMethod::new("Runs", &["No Traits"])],
    },
    ExpectedClass {
        binary_name: "Sample.MsTest.dll",
        full_name: "Sample.MsTest.Checks",
        test_type: TestType::MsTest,
        methods: &[
            ExpectedMethod::new("Passes", &["No Traits"]),
            ExpectedMethod::new("Nightly", &["Nightly"]),
            ExpectedMethod::new("Data", &["No Traits"]),
        ],
    },
    ExpectedClass {
        binary_name: "Sample.MsTest.dll",
        full_name: "Sample.MsTest.Ambiguous",
        test_type: TestType::NUnit,
        methods: &[ExpectedMethod::new("ByNUnit", &["No Traits"])],
    },
];

/// The class that the legacy xUnit ancestor check drops.
pub const LEGACY_DROPPED_CLASS: &str = "Sample.XUnit.InheritedFacts";

fn string(value: &str) -> [AttributeArg; 1] {
    [AttributeArg::string(value)]
}

fn shared_assembly() -> AssemblyBuilder {
    let mut asm = AssemblyBuilder::new("Shared.Base");
    let mscorlib = asm.assembly_ref("mscorlib");
    let nunit = asm.assembly_ref("nunit.framework");
    let xunit = asm.assembly_ref("xunit.core");
    let object = asm.type_ref(mscorlib, "System", "Object");
    let fixture = asm.type_ref(nunit, NUNIT, "TestFixtureAttribute");
    let fact = asm.type_ref(xunit, XUNIT, "FactAttribute");

    asm.add_type(
        TypeFixture::new("Shared", "FixtureBase")
            .extends(object)
            .attribute(fixture, [])
            .method(MethodFixture::new("SetUp")),
    );
    asm.add_type(
        TypeFixture::new("Shared", "FactBase")
            .extends(object)
            .method(MethodFixture::new("BaseFact").attribute(fact, [])),
    );
    asm
}

fn nunit_assembly() -> AssemblyBuilder {
    let mut asm = AssemblyBuilder::new("Sample.NUnit");
    let mscorlib = asm.assembly_ref("mscorlib");
    let nunit = asm.assembly_ref("nunit.framework");
    let shared = asm.assembly_ref("Shared.Base");
    let object = asm.type_ref(mscorlib, "System", "Object");
    let fixture = asm.type_ref(nunit, NUNIT, "TestFixtureAttribute");
    let test = asm.type_ref(nunit, NUNIT, "TestAttribute");
    let test_case = asm.type_ref(nunit, NUNIT, "TestCaseAttribute");
    let category = asm.type_ref(nunit, NUNIT, "CategoryAttribute");
    let fixture_base = asm.type_ref(shared, "Shared", "FixtureBase");

    let arithmetic = asm.add_type(
        TypeFixture::new("Sample.NUnit", "Arithmetic")
            .extends(object)
            .attribute(fixture, [])
            .method(MethodFixture::new("Adds").attribute(test, []))
            .method(
                MethodFixture::new("Subtracts")
                    .attribute(test, [])
                    .attribute(category, string("Fast")),
            )
            .method(
                MethodFixture::new("Divides")
                    .attribute(test_case, [AttributeArg::Int(1)])
                    .attribute(test_case, [AttributeArg::Int(2)])
                    .attribute(category, string("Slow"))
                    .attribute(category, string("Math")),
            )
            .method(MethodFixture::new("Helper"))
            // An overload: same identity as the first Adds.
            .method(MethodFixture::new("Adds").attribute(test, [])),
    );
    asm.add_type(
        TypeFixture::new("Sample.NUnit", "Inherited")
            .extends(fixture_base)
            .method(MethodFixture::new("Works").attribute(test, [])),
    );
    let generic = asm.add_type(
        TypeFixture::new("Sample.NUnit", "GenericFixture`1")
            .extends(object)
            .attribute(fixture, [])
            .method(MethodFixture::new("Generic").attribute(test, [])),
    );
    asm.add_type(
        TypeFixture::new("Sample.NUnit", "Closed")
            .extends_generic(generic, 1)
            .method(MethodFixture::new("Closed").attribute(test, [])),
    );
    asm.add_type(
        TypeFixture::new("", "Nested")
            .extends(object)
            .attribute(fixture, [])
            .method(MethodFixture::new("Hidden").attribute(test, []))
            .nested_in(arithmetic),
    );
    asm.add_type(
        TypeFixture::new("Sample.NUnit", "NotATest")
            .extends(object)
            .method(MethodFixture::new("Test")),
    );
    asm
}

fn xunit_assembly() -> AssemblyBuilder {
    let mut asm = AssemblyBuilder::new("Sample.XUnit");
    let mscorlib = asm.assembly_ref("mscorlib");
    let xunit = asm.assembly_ref("xunit.core");
    let shared = asm.assembly_ref("Shared.Base");
    let object = asm.type_ref(mscorlib, "System", "Object");
    let fact = asm.type_ref(xunit, XUNIT, "FactAttribute");
    let theory = asm.type_ref(xunit, XUNIT, "TheoryAttribute");
    let trait_attr = asm.type_ref(xunit, XUNIT, "TraitAttribute");
    let fact_base = asm.type_ref(shared, "Shared", "FactBase");

    let name_value =
        |name: &str, value: &str| [AttributeArg::string(name), AttributeArg::string(value)];
    asm.add_type(
        TypeFixture::new("Sample.XUnit", "Facts")
            .extends(object)
            .method(MethodFixture::new("Passes").attribute(fact, []))
            .method(
                MethodFixture::new("Fails")
                    .attribute(fact, [])
                    .attribute(trait_attr, name_value("Category", "Slow")),
            )
            .method(
                MethodFixture::new("Theory")
                    .attribute(theory, [])
                    .attribute(trait_attr, name_value("Owner", "QA"))
                    .attribute(trait_attr, name_value("Category", "Slow")),
            ),
    );
    asm.add_type(
        TypeFixture::new("Sample.XUnit", "InheritedFacts")
            .extends(fact_base)
            .method(MethodFixture::new("Plain")),
    );
    asm.add_type(
        TypeFixture::new("", "GlobalFacts")
            .extends(object)
            .method(MethodFixture::new("Runs").attribute(fact, [])),
    );
    asm
}

fn mstest_assembly() -> AssemblyBuilder {
    let mut asm = AssemblyBuilder::new("Sample.MsTest");
    let mscorlib = asm.assembly_ref("mscorlib");
    let mstest = asm.assembly_ref("Microsoft.VisualStudio.QualityTools.UnitTestFramework");
    let nunit = asm.assembly_ref("nunit.framework");
    let object = asm.type_ref(mscorlib, "System", "Object");
    let test_class = asm.type_ref(mstest, MSTEST, "TestClassAttribute");
    let test_method = asm.type_ref(mstest, MSTEST, "TestMethodAttribute");
    let data_test_method = asm.type_ref(mstest, MSTEST, "DataTestMethodAttribute");
    let category = asm.type_ref(mstest, MSTEST, "TestCategoryAttribute");
    let fixture = asm.type_ref(nunit, NUNIT, "TestFixtureAttribute");
    let test = asm.type_ref(nunit, NUNIT, "TestAttribute");

    let checks: TypeId = asm.add_type(
        TypeFixture::new("Sample.MsTest", "Checks")
            .extends(object)
            .attribute(test_class, [])
            .method(MethodFixture::new("Passes").attribute(test_method, []))
            .method(
                MethodFixture::new("Nightly")
                    .attribute(test_method, [])
                    .attribute(category, string("Nightly")),
            )
            .method(MethodFixture::new("Data").attribute(data_test_method, []))
            .method(MethodFixture::new("Helper")),
    );
    // MSTest doesn't look at ancestors.
    asm.add_type(
        TypeFixture::new("Sample.MsTest", "DerivedChecks")
            .extends(checks)
            .method(MethodFixture::new("Extra").attribute(test_method, [])),
    );
    // Both markers: NUnit takes precedence.
    asm.add_type(
        TypeFixture::new("Sample.MsTest", "Ambiguous")
            .extends(object)
            .attribute(fixture, [])
            .attribute(test_class, [])
            .method(MethodFixture::new("ByNUnit").attribute(test, []))
            .method(MethodFixture::new("ByMsTest").attribute(test_method, [])),
    );
    asm
}
