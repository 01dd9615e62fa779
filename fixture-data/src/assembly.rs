// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A writer for minimal .NET assemblies.
//!
//! The images produced here carry just enough of a PE container and of the ECMA-335 metadata
//! tables for static discovery: types, base types, methods, custom attributes and the
//! references they need. They contain no IL and can't be run.
//!
//! All heap and table indexes are written 2 bytes wide, so fixtures must stay small. [`build`]
//! panics if they don't.
//!
//! [`build`]: AssemblyBuilder::build

use camino::Utf8Path;
use std::io;

/// A reference to another assembly, returned by [`AssemblyBuilder::assembly_ref`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AssemblyRefId(usize);

/// A type defined in or referenced by the assembly being built.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TypeId {
    /// The nth type added with [`AssemblyBuilder::add_type`].
    Def(usize),
    /// The nth type added with [`AssemblyBuilder::type_ref`].
    Ref(usize),
}

/// A constructor argument of a custom attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttributeArg {
    /// A string, or `null`.
    String(Option<String>),
    /// An `int`.
    Int(i32),
    /// A `bool`.
    Bool(bool),
}

impl AttributeArg {
    /// A non-null string argument.
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(Some(value.into()))
    }

    fn element_type(&self) -> u8 {
        match self {
            Self::String(_) => ELEMENT_TYPE_STRING,
            Self::Int(_) => ELEMENT_TYPE_I4,
            Self::Bool(_) => ELEMENT_TYPE_BOOLEAN,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::String(None) => out.push(0xFF),
            Self::String(Some(value)) => {
                put_compressed(out, value.len() as u32);
                out.extend_from_slice(value.as_bytes());
            }
            Self::Int(value) => out.extend_from_slice(&value.to_le_bytes()),
            Self::Bool(value) => out.push(u8::from(*value)),
        }
    }
}

#[derive(Clone, Debug)]
struct AttributeFixture {
    ty: TypeId,
    args: Vec<AttributeArg>,
}

impl AttributeFixture {
    fn constructor_signature(&self) -> Vec<u8> {
        let mut sig = vec![CALLING_CONVENTION_HASTHIS];
        put_compressed(&mut sig, self.args.len() as u32);
        sig.push(ELEMENT_TYPE_VOID);
        sig.extend(self.args.iter().map(AttributeArg::element_type));
        sig
    }

    fn value(&self) -> Vec<u8> {
        let mut value = vec![0x01, 0x00];
        for arg in &self.args {
            arg.encode(&mut value);
        }
        // No named arguments.
        value.extend_from_slice(&[0x00, 0x00]);
        value
    }
}

/// A method to add to a [`TypeFixture`].
#[derive(Clone, Debug)]
pub struct MethodFixture {
    name: String,
    attributes: Vec<AttributeFixture>,
}

impl MethodFixture {
    /// Creates a method without attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Applies an attribute to the method.
    pub fn attribute(mut self, ty: TypeId, args: impl IntoIterator<Item = AttributeArg>) -> Self {
        self.attributes.push(AttributeFixture {
            ty,
            args: args.into_iter().collect(),
        });
        self
    }
}

#[derive(Clone, Copy, Debug)]
enum BaseType {
    Plain(TypeId),
    // A closed generic instantiation of the type, with `object` as every argument.
    Generic(TypeId, u32),
}

/// A type to add with [`AssemblyBuilder::add_type`].
#[derive(Clone, Debug)]
pub struct TypeFixture {
    namespace: String,
    name: String,
    base: Option<BaseType>,
    attributes: Vec<AttributeFixture>,
    methods: Vec<MethodFixture>,
    enclosing: Option<TypeId>,
}

impl TypeFixture {
    /// Creates a type with no base type, attributes or methods.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            base: None,
            attributes: Vec::new(),
            methods: Vec::new(),
            enclosing: None,
        }
    }

    /// Sets the base type.
    pub fn extends(mut self, base: TypeId) -> Self {
        self.base = Some(BaseType::Plain(base));
        self
    }

    /// Sets the base type to an instantiation of the generic type `base`.
    pub fn extends_generic(mut self, base: TypeId, arity: u32) -> Self {
        self.base = Some(BaseType::Generic(base, arity));
        self
    }

    /// Applies an attribute to the type.
    pub fn attribute(mut self, ty: TypeId, args: impl IntoIterator<Item = AttributeArg>) -> Self {
        self.attributes.push(AttributeFixture {
            ty,
            args: args.into_iter().collect(),
        });
        self
    }

    /// Adds a method.
    pub fn method(mut self, method: MethodFixture) -> Self {
        self.methods.push(method);
        self
    }

    /// Makes this a nested type of `outer`. Any defined type is accepted, so cyclic nesting can be
    /// built too.
    pub fn nested_in(mut self, outer: TypeId) -> Self {
        self.enclosing = Some(outer);
        self
    }
}

#[derive(Clone, Debug)]
struct TypeRefFixture {
    scope: AssemblyRefId,
    namespace: String,
    name: String,
}

/// Builds the image of a .NET assembly.
#[derive(Clone, Debug)]
pub struct AssemblyBuilder {
    name: Option<String>,
    assembly_refs: Vec<String>,
    type_refs: Vec<TypeRefFixture>,
    types: Vec<TypeFixture>,
}

impl AssemblyBuilder {
    /// Creates a builder for an assembly with the given simple name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            assembly_refs: Vec::new(),
            type_refs: Vec::new(),
            types: Vec::new(),
        }
    }

    /// Creates a builder for a module without an assembly manifest.
    pub fn module() -> Self {
        Self {
            name: None,
            assembly_refs: Vec::new(),
            type_refs: Vec::new(),
            types: Vec::new(),
        }
    }

    /// Adds a reference to another assembly.
    pub fn assembly_ref(&mut self, name: impl Into<String>) -> AssemblyRefId {
        self.assembly_refs.push(name.into());
        AssemblyRefId(self.assembly_refs.len() - 1)
    }

    /// Adds a reference to a type defined in `scope`.
    pub fn type_ref(
        &mut self,
        scope: AssemblyRefId,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> TypeId {
        self.type_refs.push(TypeRefFixture {
            scope,
            namespace: namespace.into(),
            name: name.into(),
        });
        TypeId::Ref(self.type_refs.len() - 1)
    }

    /// Adds a type definition.
    pub fn add_type(&mut self, ty: TypeFixture) -> TypeId {
        self.types.push(ty);
        TypeId::Def(self.types.len() - 1)
    }

    /// Writes the image to `path`.
    pub fn write_to(&self, path: &Utf8Path) -> io::Result<()> {
        std::fs::write(path, self.build())
    }

    /// Returns the image's bytes.
    pub fn build(&self) -> Vec<u8> {
        pe_image(Some(&self.metadata()))
    }

    fn metadata(&self) -> Vec<u8> {
        let mut strings = Heap::strings();
        let mut blobs = Heap::blobs();

        // Row numbers: TypeDef 1 is <Module>, so defined type n is row n + 2.
        let type_def_row = |index: usize| index as u32 + 2;
        let type_def_or_ref = |ty: TypeId| match ty {
            TypeId::Def(index) => type_def_row(index) << 2,
            TypeId::Ref(index) => ((index as u32 + 1) << 2) | 1,
        };

        let mut type_specs: Vec<Vec<u8>> = Vec::new();
        let mut member_refs: Vec<(TypeId, Vec<u8>)> = Vec::new();
        // (parent, constructor, value) for each attribute.
        let mut custom_attributes: Vec<(u32, u32, u32)> = Vec::new();
        let mut add_attribute =
            |parent: u32, attr: &AttributeFixture, blobs: &mut Heap| {
                let signature = attr.constructor_signature();
                let member_row = match member_refs
                    .iter()
                    .position(|(ty, sig)| *ty == attr.ty && *sig == signature)
                {
                    Some(index) => index + 1,
                    None => {
                        member_refs.push((attr.ty, signature));
                        member_refs.len()
                    }
                };
                let value = blobs.blob(&attr.value());
                custom_attributes.push((parent, ((member_row as u32) << 3) | 3, value));
            };

        let mut type_def_rows = Vec::new();
        let mut method_rows = Vec::new();
        let mut nested_rows = Vec::new();
        let method_signature = blobs.blob(&[CALLING_CONVENTION_HASTHIS, 0, ELEMENT_TYPE_VOID]);
        for (index, ty) in self.types.iter().enumerate() {
            let row = type_def_row(index);
            let extends = match ty.base {
                None => 0,
                Some(BaseType::Plain(base)) => type_def_or_ref(base),
                Some(BaseType::Generic(base, arity)) => {
                    let mut sig = vec![ELEMENT_TYPE_GENERICINST, ELEMENT_TYPE_CLASS];
                    put_compressed(&mut sig, type_def_or_ref(base));
                    put_compressed(&mut sig, arity);
                    sig.extend(std::iter::repeat_n(ELEMENT_TYPE_OBJECT, arity as usize));
                    type_specs.push(sig);
                    ((type_specs.len() as u32) << 2) | 2
                }
            };
            let flags = if ty.enclosing.is_some() {
                TYPE_NESTED_PUBLIC
            } else {
                TYPE_PUBLIC
            };
            type_def_rows.push([
                flags,
                strings.string(&ty.name),
                strings.string(&ty.namespace),
                extends,
                1,
                method_rows.len() as u32 + 1,
            ]);
            for attr in &ty.attributes {
                add_attribute((row << 5) | 3, attr, &mut blobs);
            }
            for method in &ty.methods {
                method_rows.push(strings.string(&method.name));
                let method_row = method_rows.len() as u32;
                for attr in &method.attributes {
                    add_attribute(method_row << 5, attr, &mut blobs);
                }
            }
            if let Some(TypeId::Def(outer)) = ty.enclosing {
                nested_rows.push([row, type_def_row(outer)]);
            }
        }
        custom_attributes.sort_by_key(|&(parent, _, _)| parent);

        let type_ref_rows: Vec<[u32; 3]> = self
            .type_refs
            .iter()
            .map(|type_ref| {
                [
                    ((type_ref.scope.0 as u32 + 1) << 2) | 2,
                    strings.string(&type_ref.name),
                    strings.string(&type_ref.namespace),
                ]
            })
            .collect();
        let member_ref_rows: Vec<[u32; 3]> = member_refs
            .iter()
            .map(|(ty, signature)| {
                let class = match *ty {
                    TypeId::Def(index) => type_def_row(index) << 3,
                    TypeId::Ref(index) => ((index as u32 + 1) << 3) | 1,
                };
                [class, strings.string(".ctor"), blobs.blob(signature)]
            })
            .collect();
        let type_spec_rows: Vec<u32> = type_specs.iter().map(|sig| blobs.blob(sig)).collect();
        let module_name = match &self.name {
            Some(name) => format!("{name}.dll"),
            None => "module.netmodule".to_owned(),
        };
        let module_name = strings.string(&module_name);
        let assembly_name = self.name.as_deref().map(|name| strings.string(name));
        let assembly_ref_rows: Vec<u32> = self
            .assembly_refs
            .iter()
            .map(|name| strings.string(name))
            .collect();
        let module_type_name = strings.string("<Module>");

        assert!(
            self.types.len() + method_rows.len() + custom_attributes.len() < 2048,
            "fixture assembly is too large"
        );
        assert!(strings.data.len() < 0x1_0000 && blobs.data.len() < 0x1_0000);

        let mut tables = TableStream::default();
        // Module: Generation, Name, Mvid, EncId, EncBaseId
        tables.table(TABLE_MODULE, 1, |out| {
            put_u16s(out, &[0, module_name as u16, 1, 0, 0]);
        });
        tables.table(TABLE_TYPE_REF, type_ref_rows.len(), |out| {
            for row in &type_ref_rows {
                put_u16s(out, &row.map(|cell| cell as u16));
            }
        });
        tables.table(TABLE_TYPE_DEF, type_def_rows.len() + 1, |out| {
            out.extend_from_slice(&0u32.to_le_bytes());
            put_u16s(out, &[module_type_name as u16, 0, 0, 1, 1]);
            for row in &type_def_rows {
                out.extend_from_slice(&row[0].to_le_bytes());
                put_u16s(out, &row[1..].iter().map(|&cell| cell as u16).collect::<Vec<_>>());
            }
        });
        tables.table(TABLE_METHOD_DEF, method_rows.len(), |out| {
            for &name in &method_rows {
                // RVA
                out.extend_from_slice(&0u32.to_le_bytes());
                // ImplFlags, Flags (public), Name, Signature, ParamList
                put_u16s(out, &[0, 0x0006, name as u16, method_signature as u16, 1]);
            }
        });
        tables.table(TABLE_MEMBER_REF, member_ref_rows.len(), |out| {
            for row in &member_ref_rows {
                put_u16s(out, &row.map(|cell| cell as u16));
            }
        });
        tables.table(TABLE_CUSTOM_ATTRIBUTE, custom_attributes.len(), |out| {
            for &(parent, constructor, value) in &custom_attributes {
                put_u16s(out, &[parent as u16, constructor as u16, value as u16]);
            }
        });
        tables.table(TABLE_TYPE_SPEC, type_spec_rows.len(), |out| {
            for &sig in &type_spec_rows {
                put_u16s(out, &[sig as u16]);
            }
        });
        if let Some(name) = assembly_name {
            tables.table(TABLE_ASSEMBLY, 1, |out| {
                // HashAlgId (SHA1), then the version.
                out.extend_from_slice(&0x8004u32.to_le_bytes());
                put_u16s(out, &[1, 0, 0, 0]);
                // Flags, PublicKey, Name, Culture
                out.extend_from_slice(&0u32.to_le_bytes());
                put_u16s(out, &[0, name as u16, 0]);
            });
        }
        tables.table(TABLE_ASSEMBLY_REF, assembly_ref_rows.len(), |out| {
            for &name in &assembly_ref_rows {
                put_u16s(out, &[1, 0, 0, 0]);
                out.extend_from_slice(&0u32.to_le_bytes());
                // PublicKeyOrToken, Name, Culture, HashValue
                put_u16s(out, &[0, name as u16, 0, 0]);
            }
        });
        tables.table(TABLE_NESTED_CLASS, nested_rows.len(), |out| {
            for row in &nested_rows {
                put_u16s(out, &row.map(|cell| cell as u16));
            }
        });

        metadata_root(&[
            ("#~", tables.finish()),
            ("#Strings", strings.data),
            ("#US", vec![0]),
            ("#GUID", vec![0x5A; 16]),
            ("#Blob", blobs.data),
        ])
    }
}

/// Returns the image of a native (non-.NET) executable.
pub fn native_image() -> Vec<u8> {
    pe_image(None)
}

const CALLING_CONVENTION_HASTHIS: u8 = 0x20;
const ELEMENT_TYPE_VOID: u8 = 0x01;
const ELEMENT_TYPE_BOOLEAN: u8 = 0x02;
const ELEMENT_TYPE_I4: u8 = 0x08;
const ELEMENT_TYPE_STRING: u8 = 0x0E;
const ELEMENT_TYPE_CLASS: u8 = 0x12;
const ELEMENT_TYPE_GENERICINST: u8 = 0x15;
const ELEMENT_TYPE_OBJECT: u8 = 0x1C;

// Public | BeforeFieldInit, and NestedPublic | BeforeFieldInit.
const TYPE_PUBLIC: u32 = 0x0010_0001;
const TYPE_NESTED_PUBLIC: u32 = 0x0010_0002;

const TABLE_MODULE: u8 = 0x00;
const TABLE_TYPE_REF: u8 = 0x01;
const TABLE_TYPE_DEF: u8 = 0x02;
const TABLE_METHOD_DEF: u8 = 0x06;
const TABLE_MEMBER_REF: u8 = 0x0A;
const TABLE_CUSTOM_ATTRIBUTE: u8 = 0x0C;
const TABLE_TYPE_SPEC: u8 = 0x1B;
const TABLE_ASSEMBLY: u8 = 0x20;
const TABLE_ASSEMBLY_REF: u8 = 0x23;
const TABLE_NESTED_CLASS: u8 = 0x29;

fn put_compressed(out: &mut Vec<u8>, value: u32) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.extend_from_slice(&((value as u16) | 0x8000).to_be_bytes());
    } else {
        out.extend_from_slice(&(value | 0xC000_0000).to_be_bytes());
    }
}

fn put_u16s(out: &mut Vec<u8>, values: &[u16]) {
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn pad_to(out: &mut Vec<u8>, alignment: usize) {
    while out.len() % alignment != 0 {
        out.push(0);
    }
}

// The #Strings or #Blob heap. Index 0 is the empty entry.
struct Heap {
    data: Vec<u8>,
    is_blob: bool,
}

impl Heap {
    fn strings() -> Self {
        Self {
            data: vec![0],
            is_blob: false,
        }
    }

    fn blobs() -> Self {
        Self {
            data: vec![0],
            is_blob: true,
        }
    }

    fn string(&mut self, value: &str) -> u32 {
        debug_assert!(!self.is_blob);
        if value.is_empty() {
            return 0;
        }
        let index = self.data.len() as u32;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        index
    }

    fn blob(&mut self, value: &[u8]) -> u32 {
        debug_assert!(self.is_blob);
        let index = self.data.len() as u32;
        put_compressed(&mut self.data, value.len() as u32);
        self.data.extend_from_slice(value);
        index
    }
}

#[derive(Default)]
struct TableStream {
    valid: u64,
    row_counts: Vec<u32>,
    rows: Vec<u8>,
}

impl TableStream {
    // Tables must be added in ascending ID order.
    fn table(&mut self, id: u8, rows: usize, write: impl FnOnce(&mut Vec<u8>)) {
        if rows == 0 {
            return;
        }
        self.valid |= 1 << id;
        self.row_counts.push(rows as u32);
        write(&mut self.rows);
    }

    fn finish(self) -> Vec<u8> {
        let mut out = Vec::new();
        // Reserved, major and minor version.
        out.extend_from_slice(&[0, 0, 0, 0, 2, 0]);
        // Heap sizes (all narrow), reserved.
        out.extend_from_slice(&[0, 1]);
        out.extend_from_slice(&self.valid.to_le_bytes());
        let sorted = (1u64 << TABLE_CUSTOM_ATTRIBUTE) | (1u64 << TABLE_NESTED_CLASS);
        out.extend_from_slice(&sorted.to_le_bytes());
        for count in self.row_counts {
            out.extend_from_slice(&count.to_le_bytes());
        }
        out.extend_from_slice(&self.rows);
        out
    }
}

fn metadata_root(streams: &[(&str, Vec<u8>)]) -> Vec<u8> {
    const VERSION: &[u8] = b"v4.0.30319\0\0";

    let header_len = 32
        + streams
            .iter()
            .map(|(name, _)| 8 + (name.len() + 4) / 4 * 4)
            .sum::<usize>();

    let mut out = Vec::new();
    out.extend_from_slice(&0x424A_5342u32.to_le_bytes());
    put_u16s(&mut out, &[1, 1]);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(VERSION.len() as u32).to_le_bytes());
    out.extend_from_slice(VERSION);
    put_u16s(&mut out, &[0, streams.len() as u16]);

    let mut offset = header_len;
    for (name, data) in streams {
        let size = data.len().div_ceil(4) * 4;
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&(size as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        pad_to(&mut out, 4);
        offset += size;
    }
    debug_assert_eq!(out.len(), header_len);

    for (_, data) in streams {
        out.extend_from_slice(data);
        pad_to(&mut out, 4);
    }
    out
}

const PE_HEADER_OFFSET: usize = 0x80;
const OPTIONAL_HEADER_SIZE: usize = 224;
const SECTION_RAW_OFFSET: usize = 0x200;
const SECTION_RVA: u32 = 0x2000;
const CLI_HEADER_SIZE: usize = 72;
const FILE_ALIGNMENT: usize = 0x200;

// A PE32 image with a single section holding the CLI header followed by the metadata.
fn pe_image(metadata: Option<&[u8]>) -> Vec<u8> {
    let mut section = Vec::new();
    if let Some(metadata) = metadata {
        // CLI header: cb, runtime version 2.5, metadata directory, flags (IL only), entry point,
        // then six empty directories.
        section.extend_from_slice(&(CLI_HEADER_SIZE as u32).to_le_bytes());
        put_u16s(&mut section, &[2, 5]);
        section.extend_from_slice(&(SECTION_RVA + CLI_HEADER_SIZE as u32).to_le_bytes());
        section.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
        section.extend_from_slice(&1u32.to_le_bytes());
        section.extend_from_slice(&0u32.to_le_bytes());
        section.extend_from_slice(&[0; 48]);
        section.extend_from_slice(metadata);
    } else {
        section.extend_from_slice(&[0xC3; 16]);
    }
    let virtual_size = section.len() as u32;
    pad_to(&mut section, FILE_ALIGNMENT);

    let mut out = Vec::with_capacity(SECTION_RAW_OFFSET + section.len());
    out.extend_from_slice(b"MZ");
    out.resize(0x3C, 0);
    out.extend_from_slice(&(PE_HEADER_OFFSET as u32).to_le_bytes());
    out.resize(PE_HEADER_OFFSET, 0);

    out.extend_from_slice(b"PE\0\0");
    // COFF header: machine (i386), one section, timestamp, no symbols.
    put_u16s(&mut out, &[0x014C, 1]);
    out.extend_from_slice(&[0; 12]);
    // Optional header size, characteristics (executable, 32-bit, DLL).
    put_u16s(&mut out, &[OPTIONAL_HEADER_SIZE as u16, 0x2102]);

    let optional_header = out.len();
    put_u16s(&mut out, &[0x10B]);
    out.resize(optional_header + 92, 0);
    // Data directory count, then the directories.
    out.extend_from_slice(&16u32.to_le_bytes());
    for directory in 0..16 {
        let (rva, size) = match (directory, metadata) {
            (14, Some(_)) => (SECTION_RVA, CLI_HEADER_SIZE as u32),
            _ => (0, 0),
        };
        out.extend_from_slice(&rva.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
    }
    debug_assert_eq!(out.len(), optional_header + OPTIONAL_HEADER_SIZE);

    // Section header.
    out.extend_from_slice(b".text\0\0\0");
    out.extend_from_slice(&virtual_size.to_le_bytes());
    out.extend_from_slice(&SECTION_RVA.to_le_bytes());
    out.extend_from_slice(&(section.len() as u32).to_le_bytes());
    out.extend_from_slice(&(SECTION_RAW_OFFSET as u32).to_le_bytes());
    out.extend_from_slice(&[0; 12]);
    // Code | execute | read.
    out.extend_from_slice(&0x6000_0020u32.to_le_bytes());

    out.resize(SECTION_RAW_OFFSET, 0);
    out.extend_from_slice(&section);
    out
}
