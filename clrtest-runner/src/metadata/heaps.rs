// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The metadata root, its stream headers and the `#Strings` and `#Blob` heaps.

use super::reader::ByteReader;
use crate::errors::MetadataFormatError;

const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// The streams named by the metadata root (ECMA-335 II.24.2.1).
#[derive(Clone, Debug)]
pub(super) struct MetadataStreams<'a> {
    pub(super) tables: &'a [u8],
    pub(super) strings: StringHeap<'a>,
    pub(super) blobs: BlobHeap<'a>,
}

impl<'a> MetadataStreams<'a> {
    pub(super) fn parse(root: &'a [u8]) -> Result<Self, MetadataFormatError> {
        let mut reader = ByteReader::new(root);
        if reader.u32("metadata root")? != METADATA_SIGNATURE {
            return Err(MetadataFormatError::BadMetadataSignature);
        }
        // Major and minor version, reserved.
        reader.skip(8, "metadata root")?;
        let version_len = reader.u32("metadata root")? as usize;
        reader.skip(version_len, "metadata version string")?;
        // Flags.
        reader.skip(2, "metadata root")?;
        let stream_count = reader.u16("metadata root")?;

        let mut tables = None;
        let mut strings = StringHeap { data: &[] };
        let mut blobs = BlobHeap { data: &[] };
        for _ in 0..stream_count {
            let offset = reader.u32("stream header")? as usize;
            let size = reader.u32("stream header")? as usize;
            let name = read_stream_name(root, &mut reader)?;
            let data = ByteReader::at(root, offset).bytes(size, "metadata stream")?;
            match name {
                b"#~" => tables = Some(data),
                b"#-" => return Err(MetadataFormatError::UncompressedTables),
                b"#Strings" => strings = StringHeap { data },
                b"#Blob" => blobs = BlobHeap { data },
                // #GUID and #US aren't consulted.
                _ => {}
            }
        }

        let tables = tables.ok_or(MetadataFormatError::MissingStream { name: "#~" })?;
        Ok(Self {
            tables,
            strings,
            blobs,
        })
    }
}

// Stream names are NUL-terminated and padded to a 4-byte boundary, at most 32 bytes long.
fn read_stream_name<'a>(
    root: &'a [u8],
    reader: &mut ByteReader<'a>,
) -> Result<&'a [u8], MetadataFormatError> {
    let start = reader.pos();
    let mut len = 0;
    while reader.u8("stream name")? != 0 {
        len += 1;
        if len >= 32 {
            return Err(MetadataFormatError::Truncated {
                what: "stream name",
                offset: start,
            });
        }
    }
    let padding = (4 - (len + 1) % 4) % 4;
    reader.skip(padding, "stream name padding")?;
    Ok(&root[start..start + len])
}

/// The `#Strings` heap: NUL-terminated UTF-8 strings addressed by byte offset.
#[derive(Clone, Copy, Debug)]
pub(super) struct StringHeap<'a> {
    data: &'a [u8],
}

impl<'a> StringHeap<'a> {
    pub(super) fn get(&self, index: u32) -> Result<&'a str, MetadataFormatError> {
        let start = index as usize;
        if start == 0 && self.data.is_empty() {
            return Ok("");
        }
        let tail = self
            .data
            .get(start..)
            .ok_or(MetadataFormatError::InvalidIndex {
                what: "#Strings",
                index,
            })?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(MetadataFormatError::InvalidString { index })?;
        std::str::from_utf8(&tail[..len]).map_err(|_| MetadataFormatError::InvalidString { index })
    }
}

/// The `#Blob` heap: length-prefixed byte strings addressed by byte offset.
#[derive(Clone, Copy, Debug)]
pub(super) struct BlobHeap<'a> {
    data: &'a [u8],
}

impl<'a> BlobHeap<'a> {
    pub(super) fn get(&self, index: u32) -> Result<&'a [u8], MetadataFormatError> {
        if index == 0 {
            return Ok(&[]);
        }
        let mut reader = ByteReader::at(self.data, index as usize);
        let len = reader.compressed_u32("#Blob length")?;
        reader.bytes(len as usize, "#Blob")
    }
}
