// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `#~` table stream (ECMA-335 II.22 and II.24.2.6).
//!
//! Only a handful of tables are read, but every table's row size has to be known to find where
//! the interesting ones start, so the full schema is described here.

use super::reader::ByteReader;
use crate::errors::MetadataFormatError;

/// A metadata table identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) struct TableId(pub(super) u8);

#[allow(dead_code)]
impl TableId {
    pub(super) const MODULE: Self = Self(0x00);
    pub(super) const TYPE_REF: Self = Self(0x01);
    pub(super) const TYPE_DEF: Self = Self(0x02);
    pub(super) const FIELD_PTR: Self = Self(0x03);
    pub(super) const FIELD: Self = Self(0x04);
    pub(super) const METHOD_PTR: Self = Self(0x05);
    pub(super) const METHOD_DEF: Self = Self(0x06);
    pub(super) const PARAM_PTR: Self = Self(0x07);
    pub(super) const PARAM: Self = Self(0x08);
    pub(super) const INTERFACE_IMPL: Self = Self(0x09);
    pub(super) const MEMBER_REF: Self = Self(0x0A);
    pub(super) const CONSTANT: Self = Self(0x0B);
    pub(super) const CUSTOM_ATTRIBUTE: Self = Self(0x0C);
    pub(super) const FIELD_MARSHAL: Self = Self(0x0D);
    pub(super) const DECL_SECURITY: Self = Self(0x0E);
    pub(super) const CLASS_LAYOUT: Self = Self(0x0F);
    pub(super) const FIELD_LAYOUT: Self = Self(0x10);
    pub(super) const STAND_ALONE_SIG: Self = Self(0x11);
    pub(super) const EVENT_MAP: Self = Self(0x12);
    pub(super) const EVENT_PTR: Self = Self(0x13);
    pub(super) const EVENT: Self = Self(0x14);
    pub(super) const PROPERTY_MAP: Self = Self(0x15);
    pub(super) const PROPERTY_PTR: Self = Self(0x16);
    pub(super) const PROPERTY: Self = Self(0x17);
    pub(super) const METHOD_SEMANTICS: Self = Self(0x18);
    pub(super) const METHOD_IMPL: Self = Self(0x19);
    pub(super) const MODULE_REF: Self = Self(0x1A);
    pub(super) const TYPE_SPEC: Self = Self(0x1B);
    pub(super) const IMPL_MAP: Self = Self(0x1C);
    pub(super) const FIELD_RVA: Self = Self(0x1D);
    pub(super) const ENC_LOG: Self = Self(0x1E);
    pub(super) const ENC_MAP: Self = Self(0x1F);
    pub(super) const ASSEMBLY: Self = Self(0x20);
    pub(super) const ASSEMBLY_PROCESSOR: Self = Self(0x21);
    pub(super) const ASSEMBLY_OS: Self = Self(0x22);
    pub(super) const ASSEMBLY_REF: Self = Self(0x23);
    pub(super) const ASSEMBLY_REF_PROCESSOR: Self = Self(0x24);
    pub(super) const ASSEMBLY_REF_OS: Self = Self(0x25);
    pub(super) const FILE: Self = Self(0x26);
    pub(super) const EXPORTED_TYPE: Self = Self(0x27);
    pub(super) const MANIFEST_RESOURCE: Self = Self(0x28);
    pub(super) const NESTED_CLASS: Self = Self(0x29);
    pub(super) const GENERIC_PARAM: Self = Self(0x2A);
    pub(super) const METHOD_SPEC: Self = Self(0x2B);
    pub(super) const GENERIC_PARAM_CONSTRAINT: Self = Self(0x2C);

    const COUNT: usize = 0x2D;
}

/// A coded index kind (ECMA-335 II.24.2.6): a tag in the low bits selects the table.
#[derive(Clone, Copy, Debug)]
pub(super) struct CodedIndex {
    name: &'static str,
    tables: &'static [Option<TableId>],
}

impl CodedIndex {
    pub(super) const TYPE_DEF_OR_REF: Self = Self::new(
        "TypeDefOrRef",
        &[Some(TableId::TYPE_DEF), Some(TableId::TYPE_REF), Some(TableId::TYPE_SPEC)],
    );
    const HAS_CONSTANT: Self = Self::new(
        "HasConstant",
        &[Some(TableId::FIELD), Some(TableId::PARAM), Some(TableId::PROPERTY)],
    );
    pub(super) const HAS_CUSTOM_ATTRIBUTE: Self = Self::new(
        "HasCustomAttribute",
        &[
            Some(TableId::METHOD_DEF),
            Some(TableId::FIELD),
            Some(TableId::TYPE_REF),
            Some(TableId::TYPE_DEF),
            Some(TableId::PARAM),
            Some(TableId::INTERFACE_IMPL),
            Some(TableId::MEMBER_REF),
            Some(TableId::MODULE),
            Some(TableId::DECL_SECURITY),
            Some(TableId::PROPERTY),
            Some(TableId::EVENT),
            Some(TableId::STAND_ALONE_SIG),
            Some(TableId::MODULE_REF),
            Some(TableId::TYPE_SPEC),
            Some(TableId::ASSEMBLY),
            Some(TableId::ASSEMBLY_REF),
            Some(TableId::FILE),
            Some(TableId::EXPORTED_TYPE),
            Some(TableId::MANIFEST_RESOURCE),
            Some(TableId::GENERIC_PARAM),
            Some(TableId::GENERIC_PARAM_CONSTRAINT),
            Some(TableId::METHOD_SPEC),
        ],
    );
    const HAS_FIELD_MARSHAL: Self =
        Self::new("HasFieldMarshal", &[Some(TableId::FIELD), Some(TableId::PARAM)]);
    const HAS_DECL_SECURITY: Self = Self::new(
        "HasDeclSecurity",
        &[Some(TableId::TYPE_DEF), Some(TableId::METHOD_DEF), Some(TableId::ASSEMBLY)],
    );
    pub(super) const MEMBER_REF_PARENT: Self = Self::new(
        "MemberRefParent",
        &[
            Some(TableId::TYPE_DEF),
            Some(TableId::TYPE_REF),
            Some(TableId::MODULE_REF),
            Some(TableId::METHOD_DEF),
            Some(TableId::TYPE_SPEC),
        ],
    );
    const HAS_SEMANTICS: Self =
        Self::new("HasSemantics", &[Some(TableId::EVENT), Some(TableId::PROPERTY)]);
    const METHOD_DEF_OR_REF: Self = Self::new(
        "MethodDefOrRef",
        &[Some(TableId::METHOD_DEF), Some(TableId::MEMBER_REF)],
    );
    const MEMBER_FORWARDED: Self =
        Self::new("MemberForwarded", &[Some(TableId::FIELD), Some(TableId::METHOD_DEF)]);
    const IMPLEMENTATION: Self = Self::new(
        "Implementation",
        &[Some(TableId::FILE), Some(TableId::ASSEMBLY_REF), Some(TableId::EXPORTED_TYPE)],
    );
    pub(super) const CUSTOM_ATTRIBUTE_TYPE: Self = Self::new(
        "CustomAttributeType",
        &[None, None, Some(TableId::METHOD_DEF), Some(TableId::MEMBER_REF), None],
    );
    pub(super) const RESOLUTION_SCOPE: Self = Self::new(
        "ResolutionScope",
        &[
            Some(TableId::MODULE),
            Some(TableId::MODULE_REF),
            Some(TableId::ASSEMBLY_REF),
            Some(TableId::TYPE_REF),
        ],
    );
    const TYPE_OR_METHOD_DEF: Self = Self::new(
        "TypeOrMethodDef",
        &[Some(TableId::TYPE_DEF), Some(TableId::METHOD_DEF)],
    );

    const fn new(name: &'static str, tables: &'static [Option<TableId>]) -> Self {
        Self { name, tables }
    }

    fn tag_bits(&self) -> u32 {
        usize::BITS - (self.tables.len() - 1).leading_zeros()
    }

    /// Splits a raw coded index into its table and 1-based row.
    ///
    /// A row of 0 is a null reference.
    pub(super) fn decode(&self, raw: u32) -> Result<(TableId, u32), MetadataFormatError> {
        let bits = self.tag_bits();
        let tag = (raw & ((1 << bits) - 1)) as usize;
        match self.tables.get(tag).copied().flatten() {
            Some(table) => Ok((table, raw >> bits)),
            None => Err(MetadataFormatError::InvalidIndex {
                what: self.name,
                index: raw,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Table(TableId),
    Coded(CodedIndex),
}

use Column::*;

// Column layouts from ECMA-335 II.22, indexed by table ID.
static SCHEMA: [&[Column]; TableId::COUNT] = [
    // Module: Generation, Name, Mvid, EncId, EncBaseId
    &[U16, Str, Guid, Guid, Guid],
    // TypeRef: ResolutionScope, TypeName, TypeNamespace
    &[Coded(CodedIndex::RESOLUTION_SCOPE), Str, Str],
    // TypeDef: Flags, TypeName, TypeNamespace, Extends, FieldList, MethodList
    &[
        U32,
        Str,
        Str,
        Coded(CodedIndex::TYPE_DEF_OR_REF),
        Table(TableId::FIELD),
        Table(TableId::METHOD_DEF),
    ],
    // FieldPtr
    &[Table(TableId::FIELD)],
    // Field: Flags, Name, Signature
    &[U16, Str, Blob],
    // MethodPtr
    &[Table(TableId::METHOD_DEF)],
    // MethodDef: RVA, ImplFlags, Flags, Name, Signature, ParamList
    &[U32, U16, U16, Str, Blob, Table(TableId::PARAM)],
    // ParamPtr
    &[Table(TableId::PARAM)],
    // Param: Flags, Sequence, Name
    &[U16, U16, Str],
    // InterfaceImpl: Class, Interface
    &[Table(TableId::TYPE_DEF), Coded(CodedIndex::TYPE_DEF_OR_REF)],
    // MemberRef: Class, Name, Signature
    &[Coded(CodedIndex::MEMBER_REF_PARENT), Str, Blob],
    // Constant: Type (+ padding byte), Parent, Value
    &[U16, Coded(CodedIndex::HAS_CONSTANT), Blob],
    // CustomAttribute: Parent, Type, Value
    &[
        Coded(CodedIndex::HAS_CUSTOM_ATTRIBUTE),
        Coded(CodedIndex::CUSTOM_ATTRIBUTE_TYPE),
        Blob,
    ],
    // FieldMarshal: Parent, NativeType
    &[Coded(CodedIndex::HAS_FIELD_MARSHAL), Blob],
    // DeclSecurity: Action, Parent, PermissionSet
    &[U16, Coded(CodedIndex::HAS_DECL_SECURITY), Blob],
    // ClassLayout: PackingSize, ClassSize, Parent
    &[U16, U32, Table(TableId::TYPE_DEF)],
    // FieldLayout: Offset, Field
    &[U32, Table(TableId::FIELD)],
    // StandAloneSig: Signature
    &[Blob],
    // EventMap: Parent, EventList
    &[Table(TableId::TYPE_DEF), Table(TableId::EVENT)],
    // EventPtr
    &[Table(TableId::EVENT)],
    // Event: EventFlags, Name, EventType
    &[U16, Str, Coded(CodedIndex::TYPE_DEF_OR_REF)],
    // PropertyMap: Parent, PropertyList
    &[Table(TableId::TYPE_DEF), Table(TableId::PROPERTY)],
    // PropertyPtr
    &[Table(TableId::PROPERTY)],
    // Property: Flags, Name, Type
    &[U16, Str, Blob],
    // MethodSemantics: Semantics, Method, Association
    &[U16, Table(TableId::METHOD_DEF), Coded(CodedIndex::HAS_SEMANTICS)],
    // MethodImpl: Class, MethodBody, MethodDeclaration
    &[
        Table(TableId::TYPE_DEF),
        Coded(CodedIndex::METHOD_DEF_OR_REF),
        Coded(CodedIndex::METHOD_DEF_OR_REF),
    ],
    // ModuleRef: Name
    &[Str],
    // TypeSpec: Signature
    &[Blob],
    // ImplMap: MappingFlags, MemberForwarded, ImportName, ImportScope
    &[
        U16,
        Coded(CodedIndex::MEMBER_FORWARDED),
        Str,
        Table(TableId::MODULE_REF),
    ],
    // FieldRVA: RVA, Field
    &[U32, Table(TableId::FIELD)],
    // EncLog: Token, FuncCode
    &[U32, U32],
    // EncMap: Token
    &[U32],
    // Assembly: HashAlgId, Major, Minor, Build, Revision, Flags, PublicKey, Name, Culture
    &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
    // AssemblyProcessor: Processor
    &[U32],
    // AssemblyOS: OSPlatformId, OSMajorVersion, OSMinorVersion
    &[U32, U32, U32],
    // AssemblyRef: Major, Minor, Build, Revision, Flags, PublicKeyOrToken, Name, Culture,
    // HashValue
    &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
    // AssemblyRefProcessor: Processor, AssemblyRef
    &[U32, Table(TableId::ASSEMBLY_REF)],
    // AssemblyRefOS: OSPlatformId, OSMajorVersion, OSMinorVersion, AssemblyRef
    &[U32, U32, U32, Table(TableId::ASSEMBLY_REF)],
    // File: Flags, Name, HashValue
    &[U32, Str, Blob],
    // ExportedType: Flags, TypeDefId, TypeName, TypeNamespace, Implementation
    &[U32, U32, Str, Str, Coded(CodedIndex::IMPLEMENTATION)],
    // ManifestResource: Offset, Flags, Name, Implementation
    &[U32, U32, Str, Coded(CodedIndex::IMPLEMENTATION)],
    // NestedClass: NestedClass, EnclosingClass
    &[Table(TableId::TYPE_DEF), Table(TableId::TYPE_DEF)],
    // GenericParam: Number, Flags, Owner, Name
    &[U16, U16, Coded(CodedIndex::TYPE_OR_METHOD_DEF), Str],
    // MethodSpec: Method, Instantiation
    &[Coded(CodedIndex::METHOD_DEF_OR_REF), Blob],
    // GenericParamConstraint: Owner, Constraint
    &[Table(TableId::GENERIC_PARAM), Coded(CodedIndex::TYPE_DEF_OR_REF)],
];

const WIDE_STRINGS: u8 = 0x01;
const WIDE_GUIDS: u8 = 0x02;
const WIDE_BLOBS: u8 = 0x04;
const EXTRA_DATA: u8 = 0x40;

#[derive(Clone, Debug, Default)]
struct TableLayout {
    rows: u32,
    offset: usize,
    row_size: usize,
    // Byte offset and width of each column within a row.
    columns: Vec<(usize, usize)>,
}

/// Decoded layout of the `#~` stream, with row access.
#[derive(Clone, Debug)]
pub(super) struct Tables<'a> {
    data: &'a [u8],
    layouts: Vec<TableLayout>,
}

impl<'a> Tables<'a> {
    pub(super) fn parse(data: &'a [u8]) -> Result<Self, MetadataFormatError> {
        let mut reader = ByteReader::new(data);
        reader.skip(6, "table stream header")?;
        let heap_sizes = reader.u8("table stream header")?;
        reader.skip(1, "table stream header")?;
        let valid = reader.u64("table stream header")?;
        let _sorted = reader.u64("table stream header")?;

        let mut layouts = vec![TableLayout::default(); TableId::COUNT];
        for id in 0..64 {
            if valid & (1 << id) == 0 {
                continue;
            }
            let rows = reader.u32("table row counts")?;
            match layouts.get_mut(id) {
                Some(layout) => layout.rows = rows,
                // Tables past GenericParamConstraint aren't defined; their data can't be skipped.
                None if rows > 0 => {
                    return Err(MetadataFormatError::InvalidIndex {
                        what: "table",
                        index: id as u32,
                    });
                }
                None => {}
            }
        }
        if heap_sizes & EXTRA_DATA != 0 {
            reader.skip(4, "table stream extra data")?;
        }

        for (id, name) in [
            (TableId::FIELD_PTR, "FieldPtr"),
            (TableId::METHOD_PTR, "MethodPtr"),
            (TableId::PARAM_PTR, "ParamPtr"),
            (TableId::EVENT_PTR, "EventPtr"),
            (TableId::PROPERTY_PTR, "PropertyPtr"),
        ] {
            if layouts[id.0 as usize].rows > 0 {
                return Err(MetadataFormatError::IndirectionTable { table: name });
            }
        }

        let row_counts: Vec<u32> = layouts.iter().map(|layout| layout.rows).collect();
        let index_width = |wide: bool| if wide { 4 } else { 2 };
        let table_width = |table: TableId| index_width(row_counts[table.0 as usize] > 0xFFFF);
        let coded_width = |coded: CodedIndex| {
            let max_rows = coded
                .tables
                .iter()
                .flatten()
                .map(|table| row_counts[table.0 as usize])
                .max()
                .unwrap_or(0);
            index_width(max_rows >= 1 << (16 - coded.tag_bits()))
        };

        let mut offset = reader.pos();
        for (id, layout) in layouts.iter_mut().enumerate() {
            let mut row_size = 0;
            for column in SCHEMA[id] {
                let width = match *column {
                    U16 => 2,
                    U32 => 4,
                    Str => index_width(heap_sizes & WIDE_STRINGS != 0),
                    Guid => index_width(heap_sizes & WIDE_GUIDS != 0),
                    Blob => index_width(heap_sizes & WIDE_BLOBS != 0),
                    Table(table) => table_width(table),
                    Coded(coded) => coded_width(coded),
                };
                layout.columns.push((row_size, width));
                row_size += width;
            }
            layout.row_size = row_size;
            layout.offset = offset;
            offset += row_size * layout.rows as usize;
        }
        if offset > data.len() {
            return Err(MetadataFormatError::Truncated {
                what: "metadata tables",
                offset: data.len(),
            });
        }

        Ok(Self { data, layouts })
    }

    pub(super) fn row_count(&self, table: TableId) -> u32 {
        self.layouts[table.0 as usize].rows
    }

    /// Reads column `column` of the 1-based row `row` of `table`.
    pub(super) fn cell(
        &self,
        table: TableId,
        row: u32,
        column: usize,
    ) -> Result<u32, MetadataFormatError> {
        let layout = &self.layouts[table.0 as usize];
        if row == 0 || row > layout.rows {
            return Err(MetadataFormatError::InvalidIndex {
                what: "table row",
                index: row,
            });
        }
        let (column_offset, width) = layout.columns[column];
        let offset = layout.offset + (row as usize - 1) * layout.row_size + column_offset;
        ByteReader::at(self.data, offset).index(width == 4, "table cell")
    }
}
