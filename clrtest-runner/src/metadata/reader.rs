// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Little-endian cursor over metadata bytes.

use crate::errors::MetadataFormatError;

#[derive(Clone, Debug)]
pub(super) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(super) fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(super) fn pos(&self) -> usize {
        self.pos
    }

    pub(super) fn bytes(
        &mut self,
        len: usize,
        what: &'static str,
    ) -> Result<&'a [u8], MetadataFormatError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(MetadataFormatError::Truncated {
                what,
                offset: self.pos,
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(super) fn skip(
        &mut self,
        len: usize,
        what: &'static str,
    ) -> Result<(), MetadataFormatError> {
        self.bytes(len, what).map(|_| ())
    }

    fn array<const N: usize>(
        &mut self,
        what: &'static str,
    ) -> Result<[u8; N], MetadataFormatError> {
        let bytes = self.bytes(N, what)?;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub(super) fn peek_u8(&self, what: &'static str) -> Result<u8, MetadataFormatError> {
        self.clone().u8(what)
    }

    pub(super) fn u8(&mut self, what: &'static str) -> Result<u8, MetadataFormatError> {
        self.array::<1>(what).map(|[b]| b)
    }

    pub(super) fn u16(&mut self, what: &'static str) -> Result<u16, MetadataFormatError> {
        self.array(what).map(u16::from_le_bytes)
    }

    pub(super) fn u32(&mut self, what: &'static str) -> Result<u32, MetadataFormatError> {
        self.array(what).map(u32::from_le_bytes)
    }

    pub(super) fn u64(&mut self, what: &'static str) -> Result<u64, MetadataFormatError> {
        self.array(what).map(u64::from_le_bytes)
    }

    pub(super) fn f32(&mut self, what: &'static str) -> Result<f32, MetadataFormatError> {
        self.array(what).map(f32::from_le_bytes)
    }

    pub(super) fn f64(&mut self, what: &'static str) -> Result<f64, MetadataFormatError> {
        self.array(what).map(f64::from_le_bytes)
    }

    /// Reads an index that is either 2 or 4 bytes wide.
    pub(super) fn index(
        &mut self,
        wide: bool,
        what: &'static str,
    ) -> Result<u32, MetadataFormatError> {
        if wide {
            self.u32(what)
        } else {
            self.u16(what).map(u32::from)
        }
    }

    /// Reads a compressed unsigned integer (ECMA-335 II.23.2).
    pub(super) fn compressed_u32(
        &mut self,
        what: &'static str,
    ) -> Result<u32, MetadataFormatError> {
        let offset = self.pos;
        let first = self.u8(what)?;
        if first & 0x80 == 0 {
            Ok(u32::from(first))
        } else if first & 0xC0 == 0x80 {
            let second = self.u8(what)?;
            Ok((u32::from(first & 0x3F) << 8) | u32::from(second))
        } else if first & 0xE0 == 0xC0 {
            let rest = self.bytes(3, what)?;
            Ok((u32::from(first & 0x1F) << 24)
                | (u32::from(rest[0]) << 16)
                | (u32::from(rest[1]) << 8)
                | u32::from(rest[2]))
        } else {
            Err(MetadataFormatError::InvalidCompressedInteger { offset })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    // Examples from ECMA-335 II.23.2.
    #[test_case(&[0x03], 0x03 ; "one byte")]
    #[test_case(&[0x7F], 0x7F ; "one byte max")]
    #[test_case(&[0x80, 0x80], 0x80 ; "two bytes min")]
    #[test_case(&[0xAE, 0x57], 0x2E57 ; "two bytes")]
    #[test_case(&[0xBF, 0xFF], 0x3FFF ; "two bytes max")]
    #[test_case(&[0xC0, 0x00, 0x40, 0x00], 0x4000 ; "four bytes min")]
    #[test_case(&[0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF ; "four bytes max")]
    fn compressed_u32(input: &[u8], expected: u32) {
        let mut reader = ByteReader::new(input);
        assert_eq!(reader.compressed_u32("test").unwrap(), expected);
        assert_eq!(reader.pos(), input.len());
    }

    #[test]
    fn compressed_u32_invalid() {
        let mut reader = ByteReader::new(&[0xFF]);
        assert_eq!(
            reader.compressed_u32("test"),
            Err(MetadataFormatError::InvalidCompressedInteger { offset: 0 })
        );
    }

    #[test]
    fn truncated() {
        let mut reader = ByteReader::at(&[1, 2, 3], 2);
        assert_eq!(
            reader.u32("header"),
            Err(MetadataFormatError::Truncated {
                what: "header",
                offset: 2
            })
        );
    }
}
