// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Framework classification of types and methods.
//!
//! Each supported framework is described by a static [`FrameworkConvention`] that maps marker
//! attribute names to their effect. Inherited markers are found by walking a [`TypeHierarchy`]
//! lookup table built from the scanned assembly and, on demand, its sibling assemblies.

use crate::{
    errors::MetadataFormatError,
    metadata::{
        AssemblyMetadata, AssemblyResolver, AttributeArgument, BaseTypeRef, MethodDefinition,
        TypeDefinition,
    },
};
use bitflags::bitflags;
use clrtest_metadata::TestType;
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};
use tracing::debug;

/// The trait assigned to test methods that declare no traits.
pub const NO_TRAITS: &str = "No Traits";

bitflags! {
    /// Markers a type carries directly, as recorded in the [`TypeHierarchy`].
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct Capabilities: u8 {
        /// The type carries the NUnit fixture marker.
        const FIXTURE = 1 << 0;
        /// One of the type's methods carries an xUnit fact marker.
        const FACT_METHOD = 1 << 1;
        /// The type carries the MSTest test class marker.
        const TEST_CLASS = 1 << 2;
    }
}

/// How a trait marker's constructor arguments become a trait string.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TraitStyle {
    /// The first argument's text.
    FirstArgument,
    /// `name=value` from the first two arguments, or the first argument alone.
    NameValue,
}

/// Marker attribute rules for one test framework.
#[derive(Clone, Debug)]
pub struct FrameworkConvention {
    /// The test type assigned to classes matched by this convention.
    pub test_type: TestType,
    /// Markers on the type itself that make it a test class.
    pub class_markers: &'static [&'static str],
    /// Whether a marker on any method makes the type a test class.
    pub class_from_methods: bool,
    /// The capability recorded for types that match this convention directly.
    pub capability: Capabilities,
    /// The capability looked for on ancestors when the type doesn't match directly, if
    /// ancestors are consulted at all.
    pub ancestor_capability: Option<Capabilities>,
    /// Markers that make a method a test.
    pub method_markers: &'static [&'static str],
    /// The category marker.
    pub trait_marker: &'static str,
    /// How category marker arguments are rendered.
    pub trait_style: TraitStyle,
}

impl FrameworkConvention {
    /// NUnit: `[TestFixture]` on the class or an ancestor.
    pub const NUNIT: Self = Self {
        test_type: TestType::NUnit,
        class_markers: &["NUnit.Framework.TestFixtureAttribute"],
        class_from_methods: false,
        capability: Capabilities::FIXTURE,
        ancestor_capability: Some(Capabilities::FIXTURE),
        method_markers: &[
            "NUnit.Framework.TestAttribute",
            "NUnit.Framework.TestCaseAttribute",
            "NUnit.Framework.TestCaseSourceAttribute",
        ],
        trait_marker: "NUnit.Framework.CategoryAttribute",
        trait_style: TraitStyle::FirstArgument,
    };

    /// xUnit: `[Fact]` or `[Theory]` on any method of the class or an ancestor.
    pub const XUNIT: Self = Self {
        test_type: TestType::XUnit,
        class_markers: &[],
        class_from_methods: true,
        capability: Capabilities::FACT_METHOD,
        ancestor_capability: Some(Capabilities::FACT_METHOD),
        method_markers: &["Xunit.FactAttribute", "Xunit.TheoryAttribute"],
        trait_marker: "Xunit.TraitAttribute",
        trait_style: TraitStyle::NameValue,
    };

    /// MSTest: `[TestClass]` on the class itself.
    pub const MSTEST: Self = Self {
        test_type: TestType::MsTest,
        class_markers: &["Microsoft.VisualStudio.TestTools.UnitTesting.TestClassAttribute"],
        class_from_methods: false,
        capability: Capabilities::TEST_CLASS,
        ancestor_capability: None,
        method_markers: &[
            "Microsoft.VisualStudio.TestTools.UnitTesting.TestMethodAttribute",
            "Microsoft.VisualStudio.TestTools.UnitTesting.DataTestMethodAttribute",
        ],
        trait_marker: "Microsoft.VisualStudio.TestTools.UnitTesting.TestCategoryAttribute",
        trait_style: TraitStyle::FirstArgument,
    };

    /// The built-in conventions, in tie-breaking order.
    pub const BUILT_IN: &'static [Self] = &[Self::NUNIT, Self::XUNIT, Self::MSTEST];

    /// Returns the built-in convention for a test type.
    pub fn for_test_type(test_type: TestType) -> &'static Self {
        match test_type {
            TestType::NUnit => &Self::NUNIT,
            TestType::XUnit => &Self::XUNIT,
            TestType::MsTest => &Self::MSTEST,
        }
    }

    fn matches_directly(&self, ty: &TypeDefinition) -> bool {
        let on_type = self
            .class_markers
            .iter()
            .any(|marker| ty.has_attribute(marker));
        on_type
            || (self.class_from_methods
                && ty
                    .methods
                    .iter()
                    .flatten()
                    .any(|method| self.is_test_method(method)))
    }

    /// Returns true if the method carries one of this convention's test markers.
    pub fn is_test_method(&self, method: &MethodDefinition) -> bool {
        method
            .attributes
            .iter()
            .any(|attr| self.method_markers.contains(&attr.full_name().as_str()))
    }

    /// Collects the traits declared on a method, or [`NO_TRAITS`] if there are none.
    pub fn method_traits(
        &self,
        method: &MethodDefinition,
    ) -> Result<BTreeSet<String>, MetadataFormatError> {
        let mut traits = BTreeSet::new();
        for attr in &method.attributes {
            if attr.full_name() != self.trait_marker {
                continue;
            }
            let args = attr.fixed_args()?;
            let value = match (self.trait_style, args.as_slice()) {
                (_, []) => continue,
                // A null category or trait name declares nothing.
                (_, [AttributeArgument::String(None) | AttributeArgument::Type(None), ..]) => {
                    continue;
                }
                (TraitStyle::NameValue, [name, value, ..]) => format!("{name}={value}"),
                (_, [first, ..]) => first.to_string(),
            };
            traits.insert(value);
        }
        if traits.is_empty() {
            traits.insert(NO_TRAITS.to_owned());
        }
        Ok(traits)
    }
}

/// Options that change classification behavior.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ClassifyOptions {
    /// Check xUnit ancestors for the NUnit fixture marker instead of for fact methods.
    pub legacy_xunit_ancestor_check: bool,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct TypeKey {
    assembly: String,
    full_name: String,
}

impl TypeKey {
    fn base_of(assembly: &str, base: &BaseTypeRef) -> Self {
        match base {
            BaseTypeRef::Local(name) => Self {
                assembly: assembly.to_owned(),
                full_name: name.full_name(),
            },
            BaseTypeRef::External { assembly, name } => Self {
                assembly: assembly.clone(),
                full_name: name.full_name(),
            },
        }
    }
}

#[derive(Clone, Debug)]
struct HierarchyEntry {
    capabilities: Capabilities,
    base: Option<TypeKey>,
}

/// A lookup table from type identity to the markers the type carries and its base type.
///
/// Assemblies are added as the walk reaches them; an assembly that can't be resolved simply has
/// no entries, which ends any walk that reaches it.
#[derive(Debug)]
pub struct TypeHierarchy {
    conventions: &'static [FrameworkConvention],
    entries: HashMap<TypeKey, HierarchyEntry>,
    loaded: HashSet<String>,
    resolver: AssemblyResolver,
}

impl TypeHierarchy {
    /// Creates a table seeded with the types of `metadata`, resolving other assemblies from its
    /// directory.
    pub fn new(
        conventions: &'static [FrameworkConvention],
        metadata: Arc<AssemblyMetadata>,
    ) -> Self {
        let mut resolver = AssemblyResolver::for_binary(metadata.path());
        resolver.insert(metadata.clone());
        let mut hierarchy = Self {
            conventions,
            entries: HashMap::new(),
            loaded: HashSet::new(),
            resolver,
        };
        hierarchy.add_assembly(&metadata);
        hierarchy
    }

    fn add_assembly(&mut self, metadata: &AssemblyMetadata) {
        let assembly = metadata.assembly_name();
        self.loaded.insert(assembly.to_owned());
        for ty in metadata.types().iter().flatten() {
            let capabilities = self
                .conventions
                .iter()
                .filter(|convention| convention.matches_directly(ty))
                .fold(Capabilities::empty(), |acc, convention| {
                    acc | convention.capability
                });
            let key = TypeKey {
                assembly: assembly.to_owned(),
                full_name: ty.name.full_name(),
            };
            let base = ty.base.as_ref().map(|base| TypeKey::base_of(assembly, base));
            self.entries.insert(key, HierarchyEntry { capabilities, base });
        }
    }

    fn entry(&mut self, key: &TypeKey) -> Option<&HierarchyEntry> {
        if !self.loaded.contains(&key.assembly) {
            self.loaded.insert(key.assembly.clone());
            if let Some(metadata) = self.resolver.resolve(&key.assembly) {
                self.add_assembly(&metadata);
            }
        }
        self.entries.get(key)
    }

    /// Walks the base type chain of `ty` (not including `ty` itself) looking for an ancestor
    /// with any of `wanted`.
    ///
    /// The walk ends at a type without a base, at a type with no entry in the table, or when a
    /// type is revisited.
    pub fn ancestor_has(
        &mut self,
        assembly: &str,
        ty: &TypeDefinition,
        wanted: Capabilities,
    ) -> bool {
        let mut next = ty.base.as_ref().map(|base| TypeKey::base_of(assembly, base));
        let mut visited = HashSet::new();
        while let Some(key) = next {
            if !visited.insert(key.clone()) {
                debug!("cycle in base types of {} at {}", ty.name, key.full_name);
                return false;
            }
            let Some(entry) = self.entry(&key) else {
                return false;
            };
            if entry.capabilities.intersects(wanted) {
                return true;
            }
            next = entry.base.clone();
        }
        false
    }
}

/// Classifies the types of one assembly.
#[derive(Debug)]
pub struct AssemblyClassifier {
    metadata: Arc<AssemblyMetadata>,
    options: ClassifyOptions,
    hierarchy: TypeHierarchy,
}

impl AssemblyClassifier {
    /// Creates a classifier for the built-in conventions.
    pub fn new(metadata: Arc<AssemblyMetadata>, options: ClassifyOptions) -> Self {
        let hierarchy = TypeHierarchy::new(FrameworkConvention::BUILT_IN, metadata.clone());
        Self {
            metadata,
            options,
            hierarchy,
        }
    }

    /// Returns the convention under which `ty` is a test class, if any.
    ///
    /// Conventions are tried in tie-breaking order; the first match wins.
    pub fn classify(&mut self, ty: &TypeDefinition) -> Option<&'static FrameworkConvention> {
        let conventions = self.hierarchy.conventions;
        conventions
            .iter()
            .find(|convention| self.matches(convention, ty))
    }

    fn matches(&mut self, convention: &FrameworkConvention, ty: &TypeDefinition) -> bool {
        if convention.matches_directly(ty) {
            return true;
        }
        let Some(wanted) = convention.ancestor_capability else {
            return false;
        };
        let assembly = self.metadata.assembly_name();
        if convention.test_type != TestType::XUnit {
            return self.hierarchy.ancestor_has(assembly, ty, wanted);
        }

        let own = self.hierarchy.ancestor_has(assembly, ty, wanted);
        let legacy = self
            .hierarchy
            .ancestor_has(assembly, ty, Capabilities::FIXTURE);
        if own != legacy {
            debug!(
                "{}: xUnit ancestor check gives {own}, legacy check gives {legacy} (using {})",
                ty.name,
                if self.options.legacy_xunit_ancestor_check {
                    "legacy"
                } else {
                    "fact-method"
                },
            );
        }
        if self.options.legacy_xunit_ancestor_check {
            legacy
        } else {
            own
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use fixture_data::assembly::{AssemblyBuilder, AttributeArg, MethodFixture, TypeFixture};
    use pretty_assertions::assert_eq;

    const NUNIT: &str = "NUnit.Framework";
    const XUNIT: &str = "Xunit";
    const MSTEST: &str = "Microsoft.VisualStudio.TestTools.UnitTesting";

    fn sample() -> Arc<AssemblyMetadata> {
        let mut asm = AssemblyBuilder::new("Classify");
        let mscorlib = asm.assembly_ref("mscorlib");
        let nunit = asm.assembly_ref("nunit.framework");
        let xunit = asm.assembly_ref("xunit.core");
        let mstest = asm.assembly_ref("Microsoft.VisualStudio.TestPlatform.TestFramework");
        let object = asm.type_ref(mscorlib, "System", "Object");
        let fixture = asm.type_ref(nunit, NUNIT, "TestFixtureAttribute");
        let test = asm.type_ref(nunit, NUNIT, "TestAttribute");
        let category = asm.type_ref(nunit, NUNIT, "CategoryAttribute");
        let fact = asm.type_ref(xunit, XUNIT, "FactAttribute");
        let trait_attr = asm.type_ref(xunit, XUNIT, "TraitAttribute");
        let test_class = asm.type_ref(mstest, MSTEST, "TestClassAttribute");
        let test_method = asm.type_ref(mstest, MSTEST, "TestMethodAttribute");

        let fixture_base = asm.add_type(
            TypeFixture::new("NS", "FixtureBase")
                .extends(object)
                .attribute(fixture, []),
        );
        let middle = asm.add_type(TypeFixture::new("NS", "Middle").extends(fixture_base));
        asm.add_type(
            TypeFixture::new("NS", "Derived")
                .extends(middle)
                .method(MethodFixture::new("Works").attribute(test, [])),
        );
        let fact_base = asm.add_type(
            TypeFixture::new("NS", "FactBase")
                .extends(object)
                .method(
                    MethodFixture::new("BaseFact")
                        .attribute(fact, [])
                        .attribute(trait_attr, [AttributeArg::string("Kind")]),
                ),
        );
        asm.add_type(TypeFixture::new("NS", "FactDerived").extends(fact_base));
        asm.add_type(
            TypeFixture::new("NS", "Both")
                .extends(object)
                .attribute(fixture, [])
                .method(
                    MethodFixture::new("Smoke")
                        .attribute(test, [])
                        .attribute(category, [AttributeArg::string("Smoke")]),
                )
                .method(MethodFixture::new("Plain").attribute(fact, []))
                .method(
                    MethodFixture::new("NullCategory")
                        .attribute(test, [])
                        .attribute(category, [AttributeArg::String(None)]),
                ),
        );
        let ms_base = asm.add_type(
            TypeFixture::new("NS", "MsBase")
                .extends(object)
                .attribute(test_class, []),
        );
        asm.add_type(
            TypeFixture::new("NS", "MsDerived")
                .extends(ms_base)
                .method(MethodFixture::new("Check").attribute(test_method, [])),
        );
        asm.add_type(TypeFixture::new("NS", "Plain").extends(object));

        let path = Utf8Path::new("/nonexistent/Classify.dll");
        Arc::new(AssemblyMetadata::parse(path, &asm.build()).expect("sample assembly parses"))
    }

    fn classify_all(
        metadata: &Arc<AssemblyMetadata>,
        options: ClassifyOptions,
    ) -> Vec<(String, Option<TestType>)> {
        let mut classifier = AssemblyClassifier::new(metadata.clone(), options);
        metadata
            .types()
            .iter()
            .flatten()
            .map(|ty| {
                let test_type = classifier.classify(ty).map(|c| c.test_type);
                (ty.name.full_name(), test_type)
            })
            .collect()
    }

    fn find<'a>(metadata: &'a AssemblyMetadata, name: &str) -> &'a TypeDefinition {
        metadata
            .types()
            .iter()
            .flatten()
            .find(|ty| ty.name.full_name() == name)
            .expect("type exists")
    }

    #[test]
    fn conventions_and_inheritance() {
        let metadata = sample();
        let expected = vec![
            ("NS.FixtureBase".to_owned(), Some(TestType::NUnit)),
            ("NS.Middle".to_owned(), Some(TestType::NUnit)),
            ("NS.Derived".to_owned(), Some(TestType::NUnit)),
            ("NS.FactBase".to_owned(), Some(TestType::XUnit)),
            ("NS.FactDerived".to_owned(), Some(TestType::XUnit)),
            // The fixture marker wins over the fact method.
            ("NS.Both".to_owned(), Some(TestType::NUnit)),
            ("NS.MsBase".to_owned(), Some(TestType::MsTest)),
            // MSTest only looks at the type itself.
            ("NS.MsDerived".to_owned(), None),
            ("NS.Plain".to_owned(), None),
        ];
        let first = classify_all(&metadata, ClassifyOptions::default());
        assert_eq!(first, expected);

        // Classification doesn't depend on what was classified before.
        let mut classifier = AssemblyClassifier::new(metadata.clone(), ClassifyOptions::default());
        let derived = find(&metadata, "NS.Derived");
        for _ in 0..2 {
            let test_type = classifier.classify(derived).map(|c| c.test_type);
            assert_eq!(test_type, Some(TestType::NUnit));
        }
    }

    #[test]
    fn legacy_xunit_ancestor_check() {
        let metadata = sample();
        let options = ClassifyOptions {
            legacy_xunit_ancestor_check: true,
        };
        let classified = classify_all(&metadata, options);
        let fact_derived = classified
            .iter()
            .find(|(name, _)| name == "NS.FactDerived")
            .map(|(_, test_type)| *test_type);
        assert_eq!(fact_derived, Some(None));

        // Types matched directly aren't affected.
        let fact_base = classified
            .iter()
            .find(|(name, _)| name == "NS.FactBase")
            .map(|(_, test_type)| *test_type);
        assert_eq!(fact_base, Some(Some(TestType::XUnit)));
    }

    #[test]
    fn method_traits() {
        let metadata = sample();
        let both = find(&metadata, "NS.Both");
        let methods: Vec<_> = both.methods.iter().flatten().collect();

        let nunit = &FrameworkConvention::NUNIT;
        assert!(nunit.is_test_method(methods[0]));
        assert!(!nunit.is_test_method(methods[1]));
        assert_eq!(
            nunit.method_traits(methods[0]).expect("traits decode"),
            BTreeSet::from(["Smoke".to_owned()])
        );
        assert_eq!(
            nunit.method_traits(methods[1]).expect("traits decode"),
            BTreeSet::from([NO_TRAITS.to_owned()])
        );
        assert_eq!(
            nunit.method_traits(methods[2]).expect("traits decode"),
            BTreeSet::from([NO_TRAITS.to_owned()]),
            "a null category counts as no traits"
        );

        let fact_base = find(&metadata, "NS.FactBase");
        let base_fact = fact_base.methods[0].as_ref().expect("method decodes");
        assert_eq!(
            FrameworkConvention::XUNIT
                .method_traits(base_fact)
                .expect("traits decode"),
            BTreeSet::from(["Kind".to_owned()])
        );
    }
}
