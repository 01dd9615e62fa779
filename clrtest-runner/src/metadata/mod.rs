// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static reading of .NET assembly metadata.
//!
//! [`AssemblyMetadata`] reads the PE container and the ECMA-335 metadata tables of a compiled
//! assembly without loading or running any of its code. Everything needed for test discovery is
//! decoded up front into owned values: the top-level types, their base types, their methods and
//! the custom attributes on each. Attribute arguments are decoded on demand through
//! [`CustomAttribute::fixed_args`].
//!
//! Failures are reported at the smallest possible scope: a corrupt binary fails
//! [`AssemblyMetadata::load`], while a single undecodable type or method shows up as an `Err`
//! entry next to its healthy siblings.

mod heaps;
mod pe;
mod reader;
mod resolve;
mod signature;
mod tables;

pub use resolve::AssemblyResolver;
pub use signature::AttributeArgument;

use crate::errors::{MetadataFormatError, MetadataReadError, MethodReadError, TypeReadError};
use camino::{Utf8Path, Utf8PathBuf};
use heaps::{BlobHeap, MetadataStreams, StringHeap};
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
};
use tables::{CodedIndex, TableId, Tables};

const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
const ELEMENT_TYPE_CLASS: u8 = 0x12;
const ELEMENT_TYPE_GENERICINST: u8 = 0x15;

/// A namespace-qualified type name.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TypeName {
    /// The namespace, empty for the global namespace.
    pub namespace: String,
    /// The simple name. Nested types are `Outer/Inner`.
    pub name: String,
}

impl TypeName {
    /// Creates a new type name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns `Namespace.Name`, or just `Name` in the global namespace.
    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// Where a type's base type is defined.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BaseTypeRef {
    /// Defined in the same assembly.
    Local(TypeName),

    /// Defined in another assembly, referenced by its simple assembly name.
    External {
        /// The referenced assembly's simple name, e.g. `nunit.framework`.
        assembly: String,
        /// The type's name.
        name: TypeName,
    },
}

impl BaseTypeRef {
    /// Returns the base type's name.
    pub fn name(&self) -> &TypeName {
        match self {
            Self::Local(name) | Self::External { name, .. } => name,
        }
    }
}

/// A custom attribute applied to a type or method.
#[derive(Clone, Debug)]
pub struct CustomAttribute {
    attribute_type: TypeName,
    constructor_signature: Vec<u8>,
    value: Vec<u8>,
}

impl CustomAttribute {
    /// Returns the attribute's type name.
    pub fn type_name(&self) -> &TypeName {
        &self.attribute_type
    }

    /// Returns the attribute's full type name, e.g. `NUnit.Framework.TestFixtureAttribute`.
    pub fn full_name(&self) -> String {
        self.attribute_type.full_name()
    }

    /// Decodes the attribute's positional (constructor) arguments.
    pub fn fixed_args(&self) -> Result<Vec<AttributeArgument>, MetadataFormatError> {
        signature::decode_fixed_args(&self.constructor_signature, &self.value)
    }
}

/// A method defined on a type.
#[derive(Clone, Debug)]
pub struct MethodDefinition {
    /// The method's name.
    pub name: String,
    /// Custom attributes applied to the method.
    pub attributes: Vec<CustomAttribute>,
}

/// A top-level type defined in an assembly.
#[derive(Clone, Debug)]
pub struct TypeDefinition {
    /// The type's name.
    pub name: TypeName,
    /// The base type, if any. Interfaces and `System.Object` have none.
    pub base: Option<BaseTypeRef>,
    /// Custom attributes applied to the type.
    pub attributes: Vec<CustomAttribute>,
    /// Methods in declaration order. Methods that could not be decoded are errors.
    pub methods: Vec<Result<MethodDefinition, MethodReadError>>,
}

impl TypeDefinition {
    /// Returns true if the type carries an attribute with the given full name.
    pub fn has_attribute(&self, full_name: &str) -> bool {
        self.attributes
            .iter()
            .any(|attr| attr.full_name() == full_name)
    }
}

/// The metadata of one assembly.
#[derive(Clone, Debug)]
pub struct AssemblyMetadata {
    path: Utf8PathBuf,
    assembly_name: String,
    types: Vec<Result<TypeDefinition, TypeReadError>>,
}

impl AssemblyMetadata {
    /// Reads and decodes the assembly at `path`.
    pub fn load(path: &Utf8Path) -> Result<Self, MetadataReadError> {
        let data = std::fs::read(path).map_err(|error| MetadataReadError::Io {
            path: path.to_owned(),
            error,
        })?;
        Self::parse(path, &data)
    }

    /// Decodes an assembly image that has already been read into memory.
    pub fn parse(path: &Utf8Path, data: &[u8]) -> Result<Self, MetadataReadError> {
        let format_error = |error| MetadataReadError::Format {
            path: path.to_owned(),
            error,
        };
        let root = pe::metadata_root(data).map_err(format_error)?;
        let streams = MetadataStreams::parse(root).map_err(format_error)?;
        let tables = Tables::parse(streams.tables).map_err(format_error)?;
        let view = MetadataView::new(tables, streams.strings, streams.blobs);

        let assembly_name = view
            .assembly_name()
            .map_err(format_error)?
            .unwrap_or_else(|| path.file_stem().unwrap_or_default().to_owned());
        let types = view.types().map_err(format_error)?;

        Ok(Self {
            path: path.to_owned(),
            assembly_name,
            types,
        })
    }

    /// Returns the path this assembly was read from.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the assembly's simple name.
    pub fn assembly_name(&self) -> &str {
        &self.assembly_name
    }

    /// Returns the top-level types in declaration order, excluding the `<Module>` pseudo-type.
    pub fn types(&self) -> &[Result<TypeDefinition, TypeReadError>] {
        &self.types
    }

    /// Looks up a successfully decoded type by its full name.
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDefinition> {
        self.types
            .iter()
            .flatten()
            .find(|ty| ty.name.full_name() == full_name)
    }
}

// Column indexes for the tables that are read.
const TYPE_REF_SCOPE: usize = 0;
const TYPE_REF_NAME: usize = 1;
const TYPE_REF_NAMESPACE: usize = 2;
const TYPE_DEF_NAME: usize = 1;
const TYPE_DEF_NAMESPACE: usize = 2;
const TYPE_DEF_EXTENDS: usize = 3;
const TYPE_DEF_METHOD_LIST: usize = 5;
const METHOD_DEF_NAME: usize = 3;
const METHOD_DEF_SIGNATURE: usize = 4;
const MEMBER_REF_CLASS: usize = 0;
const MEMBER_REF_SIGNATURE: usize = 2;
const CUSTOM_ATTRIBUTE_PARENT: usize = 0;
const CUSTOM_ATTRIBUTE_TYPE: usize = 1;
const CUSTOM_ATTRIBUTE_VALUE: usize = 2;
const TYPE_SPEC_SIGNATURE: usize = 0;
const ASSEMBLY_NAME: usize = 7;
const ASSEMBLY_REF_NAME: usize = 6;
const NESTED_CLASS_NESTED: usize = 0;
const NESTED_CLASS_ENCLOSING: usize = 1;

struct MetadataView<'a> {
    tables: Tables<'a>,
    strings: StringHeap<'a>,
    blobs: BlobHeap<'a>,
}

impl<'a> MetadataView<'a> {
    fn new(tables: Tables<'a>, strings: StringHeap<'a>, blobs: BlobHeap<'a>) -> Self {
        Self {
            tables,
            strings,
            blobs,
        }
    }

    fn string(
        &self,
        table: TableId,
        row: u32,
        column: usize,
    ) -> Result<&'a str, MetadataFormatError> {
        self.strings.get(self.tables.cell(table, row, column)?)
    }

    fn blob(
        &self,
        table: TableId,
        row: u32,
        column: usize,
    ) -> Result<&'a [u8], MetadataFormatError> {
        self.blobs.get(self.tables.cell(table, row, column)?)
    }

    fn assembly_name(&self) -> Result<Option<String>, MetadataFormatError> {
        if self.tables.row_count(TableId::ASSEMBLY) == 0 {
            return Ok(None);
        }
        Ok(Some(self.string(TableId::ASSEMBLY, 1, ASSEMBLY_NAME)?.to_owned()))
    }

    fn types(&self) -> Result<Vec<Result<TypeDefinition, TypeReadError>>, MetadataFormatError> {
        let type_count = self.tables.row_count(TableId::TYPE_DEF);
        let method_count = self.tables.row_count(TableId::METHOD_DEF);

        let mut nested = HashSet::new();
        let mut enclosing = BTreeMap::new();
        for row in 1..=self.tables.row_count(TableId::NESTED_CLASS) {
            let inner = self.tables.cell(TableId::NESTED_CLASS, row, NESTED_CLASS_NESTED)?;
            let outer = self
                .tables
                .cell(TableId::NESTED_CLASS, row, NESTED_CLASS_ENCLOSING)?;
            nested.insert(inner);
            enclosing.insert(inner, outer);
        }

        // Custom attributes grouped by the TypeDef or MethodDef row they're applied to, in table
        // order.
        let mut type_attributes: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        let mut method_attributes: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for row in 1..=self.tables.row_count(TableId::CUSTOM_ATTRIBUTE) {
            let parent = self
                .tables
                .cell(TableId::CUSTOM_ATTRIBUTE, row, CUSTOM_ATTRIBUTE_PARENT)?;
            match CodedIndex::HAS_CUSTOM_ATTRIBUTE.decode(parent)? {
                (TableId::TYPE_DEF, owner) => type_attributes.entry(owner).or_default().push(row),
                (TableId::METHOD_DEF, owner) => {
                    method_attributes.entry(owner).or_default().push(row)
                }
                _ => {}
            }
        }

        let mut method_starts = Vec::with_capacity(type_count as usize);
        for row in 1..=type_count {
            method_starts.push(self.tables.cell(TableId::TYPE_DEF, row, TYPE_DEF_METHOD_LIST)?);
        }
        let ranges = MethodRanges {
            starts: method_starts,
            method_count,
        };

        let context = TypeContext {
            ranges: &ranges,
            enclosing: &enclosing,
            method_attributes: &method_attributes,
        };
        let mut types = Vec::new();
        for row in 1..=type_count {
            if nested.contains(&row) {
                continue;
            }
            let attributes = type_attributes.get(&row).map_or(&[][..], Vec::as_slice);
            match self.type_definition(row, attributes, &context) {
                Ok(Some(ty)) => types.push(Ok(ty)),
                Ok(None) => {}
                Err((name, error)) => types.push(Err(TypeReadError::new(row, name, error))),
            }
        }
        Ok(types)
    }

    fn type_definition(
        &self,
        row: u32,
        attribute_rows: &[u32],
        context: &TypeContext<'_>,
    ) -> Result<Option<TypeDefinition>, (Option<String>, MetadataFormatError)> {
        let name = self
            .type_def_name(row, context.enclosing)
            .map_err(|error| (None, error))?;
        if name.namespace.is_empty() && name.name == "<Module>" {
            return Ok(None);
        }
        let with_name = |error| (Some(name.full_name()), error);

        let extends = self
            .tables
            .cell(TableId::TYPE_DEF, row, TYPE_DEF_EXTENDS)
            .map_err(with_name)?;
        let base = self
            .base_type(extends, context.enclosing)
            .map_err(with_name)?;
        let attributes = self
            .attributes(attribute_rows, context)
            .map_err(with_name)?;

        let methods = context
            .ranges
            .range(row)
            .map(|method_row| {
                self.method_definition(method_row, context)
                    .map_err(|error| MethodReadError::new(method_row, error))
            })
            .collect();

        Ok(Some(TypeDefinition {
            name,
            base,
            attributes,
            methods,
        }))
    }

    fn method_definition(
        &self,
        row: u32,
        context: &TypeContext<'_>,
    ) -> Result<MethodDefinition, MetadataFormatError> {
        let name = self.string(TableId::METHOD_DEF, row, METHOD_DEF_NAME)?.to_owned();
        let attribute_rows = context
            .method_attributes
            .get(&row)
            .map_or(&[][..], Vec::as_slice);
        let attributes = self.attributes(attribute_rows, context)?;
        Ok(MethodDefinition { name, attributes })
    }

    fn attributes(
        &self,
        rows: &[u32],
        context: &TypeContext<'_>,
    ) -> Result<Vec<CustomAttribute>, MetadataFormatError> {
        rows.iter()
            .map(|&row| self.custom_attribute(row, context))
            .collect()
    }

    fn custom_attribute(
        &self,
        row: u32,
        context: &TypeContext<'_>,
    ) -> Result<CustomAttribute, MetadataFormatError> {
        let constructor = self
            .tables
            .cell(TableId::CUSTOM_ATTRIBUTE, row, CUSTOM_ATTRIBUTE_TYPE)?;
        let (attribute_type, constructor_signature) =
            match CodedIndex::CUSTOM_ATTRIBUTE_TYPE.decode(constructor)? {
                (TableId::METHOD_DEF, method_row) => {
                    let owner = context.ranges.owner(method_row).ok_or(
                        MetadataFormatError::InvalidIndex {
                            what: "attribute constructor",
                            index: method_row,
                        },
                    )?;
                    (
                        self.type_def_name(owner, context.enclosing)?,
                        self.blob(TableId::METHOD_DEF, method_row, METHOD_DEF_SIGNATURE)?,
                    )
                }
                (_, member_row) => {
                    let class = self
                        .tables
                        .cell(TableId::MEMBER_REF, member_row, MEMBER_REF_CLASS)?;
                    let ty = match CodedIndex::MEMBER_REF_PARENT.decode(class)? {
                        (TableId::TYPE_DEF, type_row) => {
                            self.type_def_name(type_row, context.enclosing)?
                        }
                        (TableId::TYPE_REF, type_row) => self.type_ref(type_row)?.1,
                        (TableId::TYPE_SPEC, spec_row) => {
                            self.type_spec(spec_row, context.enclosing)?.name().clone()
                        }
                        _ => {
                            return Err(MetadataFormatError::InvalidIndex {
                                what: "attribute constructor parent",
                                index: class,
                            });
                        }
                    };
                    (
                        ty,
                        self.blob(TableId::MEMBER_REF, member_row, MEMBER_REF_SIGNATURE)?,
                    )
                }
            };
        let value = self.blob(TableId::CUSTOM_ATTRIBUTE, row, CUSTOM_ATTRIBUTE_VALUE)?;

        Ok(CustomAttribute {
            attribute_type,
            constructor_signature: constructor_signature.to_vec(),
            value: value.to_vec(),
        })
    }

    fn type_def_name(
        &self,
        row: u32,
        enclosing: &BTreeMap<u32, u32>,
    ) -> Result<TypeName, MetadataFormatError> {
        // Nested types take the namespace of their outermost enclosing type.
        let mut names = vec![self.string(TableId::TYPE_DEF, row, TYPE_DEF_NAME)?];
        let mut visited = HashSet::from([row]);
        let mut outermost = row;
        while let Some(&outer) = enclosing.get(&outermost) {
            if outer == outermost {
                break;
            }
            if !visited.insert(outer) {
                return Err(MetadataFormatError::InvalidIndex {
                    what: "enclosing type (cycle)",
                    index: outer,
                });
            }
            names.push(self.string(TableId::TYPE_DEF, outer, TYPE_DEF_NAME)?);
            outermost = outer;
        }
        let namespace = self.string(TableId::TYPE_DEF, outermost, TYPE_DEF_NAMESPACE)?;
        names.reverse();
        Ok(TypeName::new(namespace, names.join("/")))
    }

    /// Returns the assembly that defines a TypeRef (`None` for the current assembly) and its
    /// name.
    fn type_ref(&self, row: u32) -> Result<(Option<String>, TypeName), MetadataFormatError> {
        let mut names = Vec::new();
        let mut visited = HashSet::new();
        let mut current = row;
        loop {
            if !visited.insert(current) {
                return Err(MetadataFormatError::InvalidIndex {
                    what: "type reference scope (cycle)",
                    index: current,
                });
            }
            names.push(self.string(TableId::TYPE_REF, current, TYPE_REF_NAME)?);
            let scope = self.tables.cell(TableId::TYPE_REF, current, TYPE_REF_SCOPE)?;
            let assembly = match CodedIndex::RESOLUTION_SCOPE.decode(scope)? {
                (TableId::ASSEMBLY_REF, assembly_row) => Some(
                    self.string(TableId::ASSEMBLY_REF, assembly_row, ASSEMBLY_REF_NAME)?
                        .to_owned(),
                ),
                // A type nested in another referenced type.
                (TableId::TYPE_REF, outer_row) if outer_row != current => {
                    current = outer_row;
                    continue;
                }
                _ => None,
            };
            let namespace = self.string(TableId::TYPE_REF, current, TYPE_REF_NAMESPACE)?;
            names.reverse();
            return Ok((assembly, TypeName::new(namespace, names.join("/"))));
        }
    }

    fn base_type(
        &self,
        extends: u32,
        enclosing: &BTreeMap<u32, u32>,
    ) -> Result<Option<BaseTypeRef>, MetadataFormatError> {
        let (table, row) = CodedIndex::TYPE_DEF_OR_REF.decode(extends)?;
        if row == 0 {
            return Ok(None);
        }
        self.type_def_or_ref(table, row, enclosing).map(Some)
    }

    fn type_def_or_ref(
        &self,
        table: TableId,
        row: u32,
        enclosing: &BTreeMap<u32, u32>,
    ) -> Result<BaseTypeRef, MetadataFormatError> {
        match table {
            TableId::TYPE_DEF => Ok(BaseTypeRef::Local(self.type_def_name(row, enclosing)?)),
            TableId::TYPE_REF => match self.type_ref(row)? {
                (Some(assembly), name) => Ok(BaseTypeRef::External { assembly, name }),
                (None, name) => Ok(BaseTypeRef::Local(name)),
            },
            _ => self.type_spec(row, enclosing),
        }
    }

    // Only generic instantiations are meaningful as base or attribute types; they resolve to the
    // generic type itself.
    fn type_spec(
        &self,
        row: u32,
        enclosing: &BTreeMap<u32, u32>,
    ) -> Result<BaseTypeRef, MetadataFormatError> {
        let signature = self.blob(TableId::TYPE_SPEC, row, TYPE_SPEC_SIGNATURE)?;
        let mut reader = reader::ByteReader::new(signature);
        if reader.u8("type spec")? != ELEMENT_TYPE_GENERICINST
            || !matches!(
                reader.u8("type spec")?,
                ELEMENT_TYPE_CLASS | ELEMENT_TYPE_VALUETYPE
            )
        {
            return Err(MetadataFormatError::InvalidSignature {
                what: "type spec",
            });
        }
        let encoded = reader.compressed_u32("type spec")?;
        let (table, generic_row) = CodedIndex::TYPE_DEF_OR_REF.decode(encoded)?;
        if table == TableId::TYPE_SPEC {
            return Err(MetadataFormatError::InvalidSignature {
                what: "type spec",
            });
        }
        self.type_def_or_ref(table, generic_row, enclosing)
    }
}

struct TypeContext<'c> {
    ranges: &'c MethodRanges,
    enclosing: &'c BTreeMap<u32, u32>,
    method_attributes: &'c BTreeMap<u32, Vec<u32>>,
}

// TypeDef rows own the run of MethodDef rows from their MethodList up to the next type's.
struct MethodRanges {
    starts: Vec<u32>,
    method_count: u32,
}

impl MethodRanges {
    fn range(&self, type_row: u32) -> std::ops::Range<u32> {
        let index = type_row as usize - 1;
        let start = self.starts[index];
        let end = self
            .starts
            .get(index + 1)
            .copied()
            .unwrap_or(self.method_count + 1);
        start..end.max(start).min(self.method_count + 1)
    }

    fn owner(&self, method_row: u32) -> Option<u32> {
        // The last type whose run starts at or before the method.
        let index = self.starts.partition_point(|&start| start <= method_row);
        (index > 0 && method_row <= self.method_count).then_some(index as u32)
    }
}
