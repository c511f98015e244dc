use serde::Serialize;

/// Payload field type codes from event metadata definitions.
///
/// The numbering follows `System.TypeCode`, with 17 (unused there) carrying
/// GUID fields and 19 carrying V2 arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeCode {
    Empty,
    Object,
    DbNull,
    Boolean,
    Char,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
    Decimal,
    DateTime,
    Guid,
    String,
    Array,
}

impl TypeCode {
    pub fn from_wire(code: i32) -> Option<TypeCode> {
        Some(match code {
            0 => TypeCode::Empty,
            1 => TypeCode::Object,
            2 => TypeCode::DbNull,
            3 => TypeCode::Boolean,
            4 => TypeCode::Char,
            5 => TypeCode::SByte,
            6 => TypeCode::Byte,
            7 => TypeCode::Int16,
            8 => TypeCode::UInt16,
            9 => TypeCode::Int32,
            10 => TypeCode::UInt32,
            11 => TypeCode::Int64,
            12 => TypeCode::UInt64,
            13 => TypeCode::Single,
            14 => TypeCode::Double,
            15 => TypeCode::Decimal,
            16 => TypeCode::DateTime,
            17 => TypeCode::Guid,
            18 => TypeCode::String,
            19 => TypeCode::Array,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> i32 {
        match self {
            TypeCode::Empty => 0,
            TypeCode::Object => 1,
            TypeCode::DbNull => 2,
            TypeCode::Boolean => 3,
            TypeCode::Char => 4,
            TypeCode::SByte => 5,
            TypeCode::Byte => 6,
            TypeCode::Int16 => 7,
            TypeCode::UInt16 => 8,
            TypeCode::Int32 => 9,
            TypeCode::UInt32 => 10,
            TypeCode::Int64 => 11,
            TypeCode::UInt64 => 12,
            TypeCode::Single => 13,
            TypeCode::Double => 14,
            TypeCode::Decimal => 15,
            TypeCode::DateTime => 16,
            TypeCode::Guid => 17,
            TypeCode::String => 18,
            TypeCode::Array => 19,
        }
    }
}
