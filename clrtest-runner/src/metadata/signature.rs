// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Custom attribute constructor signatures and value blobs (ECMA-335 II.23.2 and II.23.3).

use super::reader::ByteReader;
use crate::errors::MetadataFormatError;
use itertools::Itertools;
use std::fmt;

const ELEMENT_TYPE_VOID: u8 = 0x01;
const ELEMENT_TYPE_BOOLEAN: u8 = 0x02;
const ELEMENT_TYPE_CHAR: u8 = 0x03;
const ELEMENT_TYPE_I1: u8 = 0x04;
const ELEMENT_TYPE_U1: u8 = 0x05;
const ELEMENT_TYPE_I2: u8 = 0x06;
const ELEMENT_TYPE_U2: u8 = 0x07;
const ELEMENT_TYPE_I4: u8 = 0x08;
const ELEMENT_TYPE_U4: u8 = 0x09;
const ELEMENT_TYPE_I8: u8 = 0x0A;
const ELEMENT_TYPE_U8: u8 = 0x0B;
const ELEMENT_TYPE_R4: u8 = 0x0C;
const ELEMENT_TYPE_R8: u8 = 0x0D;
const ELEMENT_TYPE_STRING: u8 = 0x0E;
const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
const ELEMENT_TYPE_CLASS: u8 = 0x12;
const ELEMENT_TYPE_OBJECT: u8 = 0x1C;
const ELEMENT_TYPE_SZARRAY: u8 = 0x1D;
const ELEMENT_TYPE_CMOD_REQD: u8 = 0x1F;
const ELEMENT_TYPE_CMOD_OPT: u8 = 0x20;
const SERIALIZATION_TYPE_TYPE: u8 = 0x50;
const SERIALIZATION_TYPE_BOXED: u8 = 0x51;
const SERIALIZATION_TYPE_ENUM: u8 = 0x55;

const CALLING_CONVENTION_GENERIC: u8 = 0x10;
const ATTRIBUTE_PROLOG: u16 = 0x0001;
const NULL_STRING: u8 = 0xFF;
const NULL_ARRAY: u32 = 0xFFFF_FFFF;

/// The deepest array or boxed-value nesting accepted in signatures and value blobs.
const MAX_NESTING: usize = 8;

/// A decoded positional argument of a custom attribute.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum AttributeArgument {
    /// A `bool`.
    Bool(bool),
    /// A `char`.
    Char(char),
    /// Any signed integer type.
    Int(i64),
    /// Any unsigned integer type.
    UInt(u64),
    /// `float` or `double`.
    Float(f64),
    /// A string, `None` when the attribute passed `null`.
    String(Option<String>),
    /// A `System.Type`, serialized as its assembly-qualified name.
    Type(Option<String>),
    /// An enum value. Enums are decoded as 32-bit integers.
    Enum {
        /// The enum's type name, known only when the value was boxed.
        type_name: Option<String>,
        /// The underlying value.
        value: i64,
    },
    /// A single-dimensional array, `None` when the attribute passed `null`.
    Array(Option<Vec<AttributeArgument>>),
}

impl AttributeArgument {
    /// Returns the string value, if this argument is a non-null string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(Some(s)) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Char(c) => write!(f, "{c}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::UInt(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) | Self::Type(s) => f.write_str(s.as_deref().unwrap_or("")),
            Self::Enum { value, .. } => write!(f, "{value}"),
            Self::Array(Some(items)) => write!(f, "{}", items.iter().join(", ")),
            Self::Array(None) => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum ParamType {
    Bool,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Type,
    Object,
    Enum(Option<String>),
    SzArray(Box<ParamType>),
}

/// Decodes the fixed arguments of a custom attribute value blob, driven by the parameter types
/// of the attribute's constructor signature.
pub(super) fn decode_fixed_args(
    constructor_signature: &[u8],
    value: &[u8],
) -> Result<Vec<AttributeArgument>, MetadataFormatError> {
    let params = constructor_params(constructor_signature)?;
    if params.is_empty() && value.is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = ByteReader::new(value);
    if reader.u16("attribute prolog")? != ATTRIBUTE_PROLOG {
        return Err(MetadataFormatError::InvalidAttributeBlob {
            what: "attribute prolog",
        });
    }
    params
        .iter()
        .map(|param| read_value(&mut reader, param, 0))
        .collect()
}

fn constructor_params(signature: &[u8]) -> Result<Vec<ParamType>, MetadataFormatError> {
    let mut reader = ByteReader::new(signature);
    let calling_convention = reader.u8("method signature")?;
    if calling_convention & CALLING_CONVENTION_GENERIC != 0 {
        reader.compressed_u32("generic parameter count")?;
    }
    let count = reader.compressed_u32("parameter count")?;
    skip_custom_modifiers(&mut reader)?;
    if reader.u8("return type")? != ELEMENT_TYPE_VOID {
        return Err(MetadataFormatError::InvalidSignature {
            what: "constructor return type",
        });
    }
    (0..count).map(|_| read_param_type(&mut reader)).collect()
}

fn skip_custom_modifiers(reader: &mut ByteReader<'_>) -> Result<(), MetadataFormatError> {
    while matches!(
        reader.peek_u8("custom modifier")?,
        ELEMENT_TYPE_CMOD_REQD | ELEMENT_TYPE_CMOD_OPT
    ) {
        reader.skip(1, "custom modifier")?;
        reader.compressed_u32("custom modifier type")?;
    }
    Ok(())
}

fn read_param_type(reader: &mut ByteReader<'_>) -> Result<ParamType, MetadataFormatError> {
    let mut arrays = 0;
    loop {
        skip_custom_modifiers(reader)?;
        if reader.peek_u8("parameter type")? != ELEMENT_TYPE_SZARRAY {
            break;
        }
        reader.skip(1, "parameter type")?;
        arrays += 1;
        if arrays > MAX_NESTING {
            return Err(MetadataFormatError::InvalidSignature {
                what: "array parameter nested too deeply",
            });
        }
    }
    let ty = match reader.u8("parameter type")? {
        ELEMENT_TYPE_VALUETYPE => {
            reader.compressed_u32("value type token")?;
            ParamType::Enum(None)
        }
        // System.Type is the only class, other than string and object, allowed here.
        ELEMENT_TYPE_CLASS => {
            reader.compressed_u32("class token")?;
            ParamType::Type
        }
        element => primitive(element).ok_or(MetadataFormatError::InvalidSignature {
            what: "attribute parameter type",
        })?,
    };
    Ok(wrap_arrays(ty, arrays))
}

fn wrap_arrays(mut ty: ParamType, arrays: usize) -> ParamType {
    for _ in 0..arrays {
        ty = ParamType::SzArray(Box::new(ty));
    }
    ty
}

fn primitive(element: u8) -> Option<ParamType> {
    let ty = match element {
        ELEMENT_TYPE_BOOLEAN => ParamType::Bool,
        ELEMENT_TYPE_CHAR => ParamType::Char,
        ELEMENT_TYPE_I1 => ParamType::I1,
        ELEMENT_TYPE_U1 => ParamType::U1,
        ELEMENT_TYPE_I2 => ParamType::I2,
        ELEMENT_TYPE_U2 => ParamType::U2,
        ELEMENT_TYPE_I4 => ParamType::I4,
        ELEMENT_TYPE_U4 => ParamType::U4,
        ELEMENT_TYPE_I8 => ParamType::I8,
        ELEMENT_TYPE_U8 => ParamType::U8,
        ELEMENT_TYPE_R4 => ParamType::R4,
        ELEMENT_TYPE_R8 => ParamType::R8,
        ELEMENT_TYPE_STRING => ParamType::String,
        ELEMENT_TYPE_OBJECT => ParamType::Object,
        _ => return None,
    };
    Some(ty)
}

// A FieldOrPropType (II.23.3), which prefixes boxed values.
fn read_boxed_type(reader: &mut ByteReader<'_>) -> Result<ParamType, MetadataFormatError> {
    let mut arrays = 0;
    while reader.peek_u8("boxed value type")? == ELEMENT_TYPE_SZARRAY {
        reader.skip(1, "boxed value type")?;
        arrays += 1;
        if arrays > MAX_NESTING {
            return Err(MetadataFormatError::InvalidAttributeBlob {
                what: "boxed array nested too deeply",
            });
        }
    }
    let ty = match reader.u8("boxed value type")? {
        SERIALIZATION_TYPE_TYPE => ParamType::Type,
        SERIALIZATION_TYPE_BOXED => ParamType::Object,
        SERIALIZATION_TYPE_ENUM => ParamType::Enum(read_ser_string(reader)?),
        element => primitive(element).ok_or(MetadataFormatError::InvalidAttributeBlob {
            what: "boxed value type",
        })?,
    };
    Ok(wrap_arrays(ty, arrays))
}

fn read_value(
    reader: &mut ByteReader<'_>,
    ty: &ParamType,
    depth: usize,
) -> Result<AttributeArgument, MetadataFormatError> {
    if depth > MAX_NESTING {
        return Err(MetadataFormatError::InvalidAttributeBlob {
            what: "value nested too deeply",
        });
    }
    let value = match ty {
        ParamType::Bool => AttributeArgument::Bool(reader.u8("bool argument")? != 0),
        ParamType::Char => {
            let unit = reader.u16("char argument")?;
            AttributeArgument::Char(
                char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER),
            )
        }
        ParamType::I1 => AttributeArgument::Int(i64::from(reader.u8("sbyte argument")? as i8)),
        ParamType::U1 => AttributeArgument::UInt(u64::from(reader.u8("byte argument")?)),
        ParamType::I2 => AttributeArgument::Int(i64::from(reader.u16("short argument")? as i16)),
        ParamType::U2 => AttributeArgument::UInt(u64::from(reader.u16("ushort argument")?)),
        ParamType::I4 => AttributeArgument::Int(i64::from(reader.u32("int argument")? as i32)),
        ParamType::U4 => AttributeArgument::UInt(u64::from(reader.u32("uint argument")?)),
        ParamType::I8 => AttributeArgument::Int(reader.u64("long argument")? as i64),
        ParamType::U8 => AttributeArgument::UInt(reader.u64("ulong argument")?),
        ParamType::R4 => AttributeArgument::Float(f64::from(reader.f32("float argument")?)),
        ParamType::R8 => AttributeArgument::Float(reader.f64("double argument")?),
        ParamType::String => AttributeArgument::String(read_ser_string(reader)?),
        ParamType::Type => AttributeArgument::Type(read_ser_string(reader)?),
        ParamType::Enum(type_name) => AttributeArgument::Enum {
            type_name: type_name.clone(),
            value: i64::from(reader.u32("enum argument")? as i32),
        },
        ParamType::Object => {
            let boxed = read_boxed_type(reader)?;
            read_value(reader, &boxed, depth + 1)?
        }
        ParamType::SzArray(element) => {
            let count = reader.u32("array length")?;
            if count == NULL_ARRAY {
                AttributeArgument::Array(None)
            } else {
                let items = (0..count)
                    .map(|_| read_value(reader, element, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                AttributeArgument::Array(Some(items))
            }
        }
    };
    Ok(value)
}

fn read_ser_string(reader: &mut ByteReader<'_>) -> Result<Option<String>, MetadataFormatError> {
    if reader.peek_u8("string argument")? == NULL_STRING {
        reader.skip(1, "string argument")?;
        return Ok(None);
    }
    let len = reader.compressed_u32("string length")?;
    let bytes = reader.bytes(len as usize, "string argument")?;
    let s = std::str::from_utf8(bytes).map_err(|_| MetadataFormatError::InvalidAttributeBlob {
        what: "string argument",
    })?;
    Ok(Some(s.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctor(params: &[&[u8]]) -> Vec<u8> {
        let mut sig = vec![0x20, params.len() as u8, ELEMENT_TYPE_VOID];
        for param in params {
            sig.extend_from_slice(param);
        }
        sig
    }

    fn ser_string(s: &str) -> Vec<u8> {
        let mut out = vec![s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn no_arguments() {
        let none: Vec<AttributeArgument> = Vec::new();
        assert_eq!(decode_fixed_args(&ctor(&[]), &[0x01, 0x00, 0x00, 0x00]).unwrap(), none);
        assert_eq!(decode_fixed_args(&ctor(&[]), &[]).unwrap(), none);
    }

    #[test]
    fn string_arguments() {
        let sig = ctor(&[&[ELEMENT_TYPE_STRING], &[ELEMENT_TYPE_STRING]]);
        let mut blob = vec![0x01, 0x00];
        blob.extend(ser_string("Category"));
        blob.push(NULL_STRING);
        blob.extend_from_slice(&[0x00, 0x00]);

        let args = decode_fixed_args(&sig, &blob).unwrap();
        assert_eq!(
            args,
            vec![
                AttributeArgument::String(Some("Category".to_owned())),
                AttributeArgument::String(None),
            ]
        );
        assert_eq!(args[0].to_string(), "Category");
        assert_eq!(args[1].to_string(), "");
    }

    #[test]
    fn primitive_and_enum_arguments() {
        let sig = ctor(&[
            &[ELEMENT_TYPE_I4],
            &[ELEMENT_TYPE_BOOLEAN],
            &[ELEMENT_TYPE_VALUETYPE, 0x09],
            &[ELEMENT_TYPE_R8],
        ]);
        let mut blob = vec![0x01, 0x00];
        blob.extend_from_slice(&(-7i32).to_le_bytes());
        blob.push(1);
        blob.extend_from_slice(&2i32.to_le_bytes());
        blob.extend_from_slice(&1.5f64.to_le_bytes());

        let args = decode_fixed_args(&sig, &blob).unwrap();
        let text: Vec<_> = args.iter().map(ToString::to_string).collect();
        assert_eq!(text, vec!["-7", "True", "2", "1.5"]);
    }

    #[test]
    fn boxed_and_array_arguments() {
        let sig = ctor(&[
            &[ELEMENT_TYPE_OBJECT],
            &[ELEMENT_TYPE_SZARRAY, ELEMENT_TYPE_STRING],
        ]);
        let mut blob = vec![0x01, 0x00, ELEMENT_TYPE_STRING];
        blob.extend(ser_string("boxed"));
        blob.extend_from_slice(&2u32.to_le_bytes());
        blob.extend(ser_string("a"));
        blob.extend(ser_string("b"));

        let args = decode_fixed_args(&sig, &blob).unwrap();
        assert_eq!(args[0].as_str(), Some("boxed"));
        assert_eq!(args[1].to_string(), "a, b");
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut param = vec![ELEMENT_TYPE_SZARRAY; 10_000];
        param.push(ELEMENT_TYPE_STRING);
        assert_eq!(
            decode_fixed_args(&ctor(&[param.as_slice()]), &[0x01, 0x00]).unwrap_err(),
            MetadataFormatError::InvalidSignature {
                what: "array parameter nested too deeply"
            }
        );

        let mut blob = vec![0x01, 0x00];
        blob.extend(std::iter::repeat_n(ELEMENT_TYPE_SZARRAY, 10_000));
        assert_eq!(
            decode_fixed_args(&ctor(&[&[ELEMENT_TYPE_OBJECT]]), &blob).unwrap_err(),
            MetadataFormatError::InvalidAttributeBlob {
                what: "boxed array nested too deeply"
            }
        );

        // object[] holding a boxed object[] holding a boxed object[] ...
        let mut blob = vec![0x01, 0x00];
        for _ in 0..10_000 {
            blob.extend_from_slice(&[ELEMENT_TYPE_SZARRAY, SERIALIZATION_TYPE_BOXED]);
            blob.extend_from_slice(&1u32.to_le_bytes());
        }
        assert_eq!(
            decode_fixed_args(&ctor(&[&[ELEMENT_TYPE_OBJECT]]), &blob).unwrap_err(),
            MetadataFormatError::InvalidAttributeBlob {
                what: "value nested too deeply"
            }
        );
    }

    #[test]
    fn bad_prolog() {
        let sig = ctor(&[&[ELEMENT_TYPE_STRING]]);
        assert_eq!(
            decode_fixed_args(&sig, &[0x02, 0x00, 0x00]).unwrap_err(),
            MetadataFormatError::InvalidAttributeBlob {
                what: "attribute prolog"
            }
        );
    }

    #[test]
    fn truncated_value() {
        let sig = ctor(&[&[ELEMENT_TYPE_I4]]);
        assert!(matches!(
            decode_fixed_args(&sig, &[0x01, 0x00, 0x01]),
            Err(MetadataFormatError::Truncated { .. })
        ));
    }
}
