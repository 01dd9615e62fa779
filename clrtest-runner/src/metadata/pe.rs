// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating CLI metadata inside a PE image.

use super::reader::ByteReader;
use crate::errors::MetadataFormatError;

const DOS_SIGNATURE: &[u8; 2] = b"MZ";
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const CLI_HEADER_DIRECTORY: usize = 14;
const SECTION_HEADER_SIZE: usize = 40;

#[derive(Clone, Copy, Debug)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_offset: u32,
}

impl Section {
    fn contains(&self, rva: u32) -> bool {
        let size = self.virtual_size.max(self.raw_size);
        rva >= self.virtual_address && rva - self.virtual_address < size
    }
}

/// Returns the bytes of the metadata root (the blob starting with `BSJB`).
pub(super) fn metadata_root(data: &[u8]) -> Result<&[u8], MetadataFormatError> {
    if data.len() < 0x40 || &data[..2] != DOS_SIGNATURE {
        return Err(MetadataFormatError::NotPortableExecutable);
    }
    let mut reader = ByteReader::at(data, 0x3C);
    let pe_offset = reader.u32("e_lfanew")? as usize;

    let mut reader = ByteReader::at(data, pe_offset);
    if reader.bytes(4, "PE signature")? != PE_SIGNATURE {
        return Err(MetadataFormatError::NotPortableExecutable);
    }

    // COFF file header.
    let _machine = reader.u16("COFF header")?;
    let section_count = reader.u16("COFF header")?;
    reader.skip(12, "COFF header")?;
    let optional_header_size = reader.u16("COFF header")? as usize;
    let _characteristics = reader.u16("COFF header")?;

    let optional_header = reader.pos();
    let (rva_count_offset, directories_offset) = match reader.u16("optional header magic")? {
        PE32_MAGIC => (92, 96),
        PE32_PLUS_MAGIC => (108, 112),
        _ => return Err(MetadataFormatError::NotPortableExecutable),
    };

    let rva_count = ByteReader::at(data, optional_header + rva_count_offset)
        .u32("optional header")? as usize;
    if rva_count <= CLI_HEADER_DIRECTORY {
        return Err(MetadataFormatError::NoCliHeader);
    }
    let mut reader =
        ByteReader::at(data, optional_header + directories_offset + CLI_HEADER_DIRECTORY * 8);
    let cli_rva = reader.u32("CLI header directory")?;
    let cli_size = reader.u32("CLI header directory")?;
    if cli_rva == 0 || cli_size == 0 {
        return Err(MetadataFormatError::NoCliHeader);
    }

    let mut sections = Vec::with_capacity(section_count as usize);
    let mut reader = ByteReader::at(data, optional_header + optional_header_size);
    for _ in 0..section_count {
        let header = reader.bytes(SECTION_HEADER_SIZE, "section header")?;
        let mut header = ByteReader::at(header, 8);
        sections.push(Section {
            virtual_size: header.u32("section header")?,
            virtual_address: header.u32("section header")?,
            raw_size: header.u32("section header")?,
            raw_offset: header.u32("section header")?,
        });
    }

    // CLI header (ECMA-335 II.25.3.3): cb, runtime version, then the metadata directory.
    let cli_offset = rva_to_offset(&sections, cli_rva)?;
    let mut reader = ByteReader::at(data, cli_offset + 8);
    let metadata_rva = reader.u32("CLI header")?;
    let metadata_size = reader.u32("CLI header")? as usize;

    let metadata_offset = rva_to_offset(&sections, metadata_rva)?;
    ByteReader::at(data, metadata_offset).bytes(metadata_size, "metadata root")
}

fn rva_to_offset(sections: &[Section], rva: u32) -> Result<usize, MetadataFormatError> {
    sections
        .iter()
        .find(|section| section.contains(rva))
        .and_then(|section| section.raw_offset.checked_add(rva - section.virtual_address))
        .map(|offset| offset as usize)
        .ok_or(MetadataFormatError::UnmappedRva { rva })
}
