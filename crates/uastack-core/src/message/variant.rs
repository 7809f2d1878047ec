//! The builtin `Variant` value union.
//!
//! Carries the scalar builtin types the transport tests and echo services
//! exercise. Encoded as a one-byte type tag followed by the value in the
//! standard little-endian layouts; tag 0 is the null variant.

use crate::binary::{BinaryReader, BinaryWriter};
use crate::error::UaError;
use crate::status::{self, StatusCode};

#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Null,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    ByteString(Vec<u8>),
    StatusCode(StatusCode),
}

impl Variant {
    fn type_tag(&self) -> u8 {
        match self {
            Variant::Null => 0,
            Variant::Boolean(_) => 1,
            Variant::SByte(_) => 2,
            Variant::Byte(_) => 3,
            Variant::Int16(_) => 4,
            Variant::UInt16(_) => 5,
            Variant::Int32(_) => 6,
            Variant::UInt32(_) => 7,
            Variant::Int64(_) => 8,
            Variant::UInt64(_) => 9,
            Variant::Float(_) => 10,
            Variant::Double(_) => 11,
            Variant::String(_) => 12,
            Variant::ByteString(_) => 15,
            Variant::StatusCode(_) => 19,
        }
    }

    pub fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.type_tag());
        match self {
            Variant::Null => {}
            Variant::Boolean(v) => writer.write_u8(u8::from(*v)),
            Variant::SByte(v) => writer.write_u8(*v as u8),
            Variant::Byte(v) => writer.write_u8(*v),
            Variant::Int16(v) => writer.write_i16(*v),
            Variant::UInt16(v) => writer.write_u16(*v),
            Variant::Int32(v) => writer.write_i32(*v),
            Variant::UInt32(v) => writer.write_u32(*v),
            Variant::Int64(v) => writer.write_i64(*v),
            Variant::UInt64(v) => writer.write_u64(*v),
            Variant::Float(v) => writer.write_f32(*v),
            Variant::Double(v) => writer.write_f64(*v),
            Variant::String(v) => writer.write_string(Some(v)),
            Variant::ByteString(v) => writer.write_byte_string(Some(v)),
            Variant::StatusCode(v) => writer.write_u32(v.0),
        }
    }

    pub fn decode(reader: &mut BinaryReader<'_>) -> Result<Self, UaError> {
        let tag = reader.read_u8()?;
        let variant = match tag {
            0 => Variant::Null,
            1 => Variant::Boolean(reader.read_u8()? != 0),
            2 => Variant::SByte(reader.read_u8()? as i8),
            3 => Variant::Byte(reader.read_u8()?),
            4 => Variant::Int16(reader.read_i16()?),
            5 => Variant::UInt16(reader.read_u16()?),
            6 => Variant::Int32(reader.read_i32()?),
            7 => Variant::UInt32(reader.read_u32()?),
            8 => Variant::Int64(reader.read_i64()?),
            9 => Variant::UInt64(reader.read_u64()?),
            10 => Variant::Float(reader.read_f32()?),
            11 => Variant::Double(reader.read_f64()?),
            12 => Variant::String(reader.read_string()?.unwrap_or_default()),
            15 => Variant::ByteString(reader.read_byte_string()?.unwrap_or_default()),
            19 => Variant::StatusCode(StatusCode(reader.read_u32()?)),
            _ => {
                return Err(UaError::new(
                    status::BAD_DECODING_ERROR,
                    format!("unknown variant type tag: {tag}"),
                ));
            }
        };
        Ok(variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: &Variant) -> Variant {
        let mut writer = BinaryWriter::new();
        v.encode(&mut writer);
        let bytes = writer.into_vec();
        let mut reader = BinaryReader::new(&bytes);
        let decoded = Variant::decode(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0, "trailing bytes after {v:?}");
        decoded
    }

    #[test]
    fn all_variants_roundtrip() {
        let values = [
            Variant::Null,
            Variant::Boolean(true),
            Variant::SByte(-1),
            Variant::Byte(1),
            Variant::Int16(-300),
            Variant::UInt16(300),
            Variant::Int32(42),
            Variant::UInt32(42),
            Variant::Int64(-1_000_000_000_000),
            Variant::UInt64(1_000_000_000_000),
            Variant::Float(3.14),
            Variant::Double(6.12),
            Variant::String("hello, world".to_string()),
            Variant::ByteString(vec![1, 2, 3, 4]),
            Variant::StatusCode(status::GOOD),
        ];
        for v in &values {
            assert_eq!(&roundtrip(v), v);
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut reader = BinaryReader::new(&[0xEE]);
        assert!(Variant::decode(&mut reader).is_err());
    }

    #[test]
    fn truncated_value_rejected() {
        // Int32 tag but only two value bytes.
        let mut reader = BinaryReader::new(&[6, 0x01, 0x02]);
        assert!(Variant::decode(&mut reader).is_err());
    }
}
