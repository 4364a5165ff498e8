//! The typed value model: one byte of type code per wire value, and a
//! sealed trait over the closed set of Rust types those codes map to.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::wire::{Cell, WireError};

/// Wire-visible value types, tagged by a single byte.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeCode {
    Call = 0x00,
    Bool = 0x01,
    Str = 0x02,
    File = 0x03,
    I8 = 0x08,
    I16 = 0x09,
    I32 = 0x0A,
    I64 = 0x0B,
    U8 = 0x10,
    U16 = 0x11,
    U32 = 0x12,
    U64 = 0x13,
    F32 = 0x1A,
    F64 = 0x1B,
    I8A = 0x20,
    I16A = 0x21,
    I32A = 0x22,
    I64A = 0x23,
    U8A = 0x28,
    U16A = 0x29,
    U32A = 0x2A,
    U64A = 0x2B,
    V2F32 = 0x32,
    V2F64 = 0x33,
    V3F32 = 0x3A,
    V3F64 = 0x3B,
}

impl TypeCode {
    /// Element width of an array type, if this is one.
    fn array_elem_size(self) -> Option<usize> {
        match self {
            TypeCode::I8A | TypeCode::U8A => Some(1),
            TypeCode::I16A | TypeCode::U16A => Some(2),
            TypeCode::I32A | TypeCode::U32A => Some(4),
            TypeCode::I64A | TypeCode::U64A => Some(8),
            _ => None,
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A value that can cross the wire.
///
/// Implemented for the closed set of primitive types the protocol knows;
/// the trait carries the type code, the schema tag, the default used in
/// structured error replies, the big-endian cell codec, and the textual
/// form used by configuration export/import.
pub trait WireValue:
    sealed::Sealed + Sized + Clone + PartialEq + Send + Sync + 'static
{
    const CODE: TypeCode;
    /// Schema element tag for a scalar of this type.
    const TAG: &'static str;

    fn default_value() -> Self;
    fn put(&self, cell: &mut Cell) -> Result<(), WireError>;
    fn take(cell: &mut Cell) -> Result<Self, WireError>;
    fn to_text(&self) -> String;
    fn parse_text(s: &str) -> Option<Self>;
}

macro_rules! wire_int {
    ($t:ty, $code:ident, $tag:literal, $put:ident, $take:ident) => {
        impl sealed::Sealed for $t {}
        impl WireValue for $t {
            const CODE: TypeCode = TypeCode::$code;
            const TAG: &'static str = $tag;

            fn default_value() -> Self {
                0 as $t
            }

            fn put(&self, cell: &mut Cell) -> Result<(), WireError> {
                cell.$put(*self)
            }

            fn take(cell: &mut Cell) -> Result<Self, WireError> {
                cell.$take()
            }

            fn to_text(&self) -> String {
                self.to_string()
            }

            fn parse_text(s: &str) -> Option<Self> {
                if let Some(hex) = s.strip_prefix("0x") {
                    return <$t>::from_str_radix(hex, 16).ok();
                }
                s.parse().ok()
            }
        }
    };
}

wire_int!(i8, I8, "s8", put_i8, take_i8);
wire_int!(i16, I16, "s16", put_i16, take_i16);
wire_int!(i32, I32, "s32", put_i32, take_i32);
wire_int!(i64, I64, "s64", put_i64, take_i64);
wire_int!(u8, U8, "u8", put_u8, take_u8);
wire_int!(u16, U16, "u16", put_u16, take_u16);
wire_int!(u32, U32, "u32", put_u32, take_u32);
wire_int!(u64, U64, "u64", put_u64, take_u64);

macro_rules! wire_float {
    ($t:ty, $code:ident, $tag:literal, $put:ident, $take:ident) => {
        impl sealed::Sealed for $t {}
        impl WireValue for $t {
            const CODE: TypeCode = TypeCode::$code;
            const TAG: &'static str = $tag;

            fn default_value() -> Self {
                0.0
            }

            fn put(&self, cell: &mut Cell) -> Result<(), WireError> {
                cell.$put(*self)
            }

            fn take(cell: &mut Cell) -> Result<Self, WireError> {
                cell.$take()
            }

            fn to_text(&self) -> String {
                self.to_string()
            }

            fn parse_text(s: &str) -> Option<Self> {
                s.parse().ok()
            }
        }
    };
}

wire_float!(f32, F32, "f32", put_f32, take_f32);
wire_float!(f64, F64, "f64", put_f64, take_f64);

impl sealed::Sealed for bool {}
impl WireValue for bool {
    const CODE: TypeCode = TypeCode::Bool;
    const TAG: &'static str = "bool";

    fn default_value() -> Self {
        false
    }

    fn put(&self, cell: &mut Cell) -> Result<(), WireError> {
        cell.put_bool(*self)
    }

    fn take(cell: &mut Cell) -> Result<Self, WireError> {
        cell.take_bool()
    }

    fn to_text(&self) -> String {
        if *self { "1" } else { "0" }.to_string()
    }

    fn parse_text(s: &str) -> Option<Self> {
        match s {
            "0" | "false" => Some(false),
            "1" | "true" => Some(true),
            _ => None,
        }
    }
}

impl sealed::Sealed for String {}
impl WireValue for String {
    const CODE: TypeCode = TypeCode::Str;
    const TAG: &'static str = "str";

    fn default_value() -> Self {
        String::new()
    }

    fn put(&self, cell: &mut Cell) -> Result<(), WireError> {
        cell.put_str(self)
    }

    fn take(cell: &mut Cell) -> Result<Self, WireError> {
        cell.take_str()
    }

    fn to_text(&self) -> String {
        format!("\"{}\"", self)
    }

    fn parse_text(s: &str) -> Option<Self> {
        let s = s
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(s);
        Some(s.to_string())
    }
}

macro_rules! wire_array {
    ($t:ty, $code:ident, $tag:literal) => {
        impl sealed::Sealed for Vec<$t> {}
        impl WireValue for Vec<$t> {
            const CODE: TypeCode = TypeCode::$code;
            const TAG: &'static str = $tag;

            fn default_value() -> Self {
                Vec::new()
            }

            fn put(&self, cell: &mut Cell) -> Result<(), WireError> {
                if self.len() > u16::MAX as usize {
                    return Err(WireError::Overflow);
                }
                cell.put_u16(self.len() as u16)?;
                for v in self {
                    v.put(cell)?;
                }
                Ok(())
            }

            fn take(cell: &mut Cell) -> Result<Self, WireError> {
                let len = cell.take_u16()? as usize;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(<$t>::take(cell)?);
                }
                Ok(out)
            }

            fn to_text(&self) -> String {
                self.iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            }

            fn parse_text(s: &str) -> Option<Self> {
                if s.is_empty() {
                    return Some(Vec::new());
                }
                s.split(',')
                    .map(|p| <$t as WireValue>::parse_text(p.trim()))
                    .collect()
            }
        }
    };
}

wire_array!(i8, I8A, "s8a");
wire_array!(i16, I16A, "s16a");
wire_array!(i32, I32A, "s32a");
wire_array!(i64, I64A, "s64a");
wire_array!(u8, U8A, "u8a");
wire_array!(u16, U16A, "u16a");
wire_array!(u32, U32A, "u32a");
wire_array!(u64, U64A, "u64a");

macro_rules! wire_vec {
    ($t:ty, $n:literal, $code:ident, $tag:literal) => {
        impl sealed::Sealed for [$t; $n] {}
        impl WireValue for [$t; $n] {
            const CODE: TypeCode = TypeCode::$code;
            const TAG: &'static str = $tag;

            fn default_value() -> Self {
                [0.0; $n]
            }

            fn put(&self, cell: &mut Cell) -> Result<(), WireError> {
                for v in self {
                    v.put(cell)?;
                }
                Ok(())
            }

            fn take(cell: &mut Cell) -> Result<Self, WireError> {
                let mut out = [0.0; $n];
                for v in out.iter_mut() {
                    *v = <$t>::take(cell)?;
                }
                Ok(out)
            }

            fn to_text(&self) -> String {
                self.iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            }

            fn parse_text(s: &str) -> Option<Self> {
                let parts: Vec<$t> = s
                    .split(',')
                    .map(|p| p.trim().parse().ok())
                    .collect::<Option<_>>()?;
                parts.try_into().ok()
            }
        }
    };
}

wire_vec!(f32, 2, V2F32, "v2f32");
wire_vec!(f64, 2, V2F64, "v2f64");
wire_vec!(f32, 3, V3F32, "v3f32");
wire_vec!(f64, 3, V3F64, "v3f64");

/// Drain an inbound value of the given type so cell framing stays aligned
/// on mismatch paths. Unknown codes fail the cell.
pub fn skip_value(cell: &mut Cell, raw_type: u8) -> Result<(), WireError> {
    let code = TypeCode::try_from(raw_type).map_err(|_| WireError::BadType(raw_type))?;
    match code {
        TypeCode::Call => Ok(()),
        TypeCode::Bool => cell.take_bool().map(drop),
        TypeCode::Str => cell.take_str().map(drop),
        TypeCode::File => cell.take_bytes().map(drop),
        TypeCode::I8 | TypeCode::U8 => cell.take_u8().map(drop),
        TypeCode::I16 | TypeCode::U16 => cell.take_u16().map(drop),
        TypeCode::I32 | TypeCode::U32 | TypeCode::F32 => cell.take_u32().map(drop),
        TypeCode::I64 | TypeCode::U64 | TypeCode::F64 => cell.take_u64().map(drop),
        TypeCode::V2F32 => cell.take_u64().map(drop),
        TypeCode::V2F64 | TypeCode::V3F64 => {
            let n = if code == TypeCode::V2F64 { 2 } else { 3 };
            for _ in 0..n {
                cell.take_u64()?;
            }
            Ok(())
        }
        TypeCode::V3F32 => {
            for _ in 0..3 {
                cell.take_u32()?;
            }
            Ok(())
        }
        _ => {
            // length-prefixed arrays
            let elem = code.array_elem_size().ok_or(WireError::BadType(raw_type))?;
            let len = cell.take_u16()? as usize;
            for _ in 0..len * elem {
                cell.take_u8()?;
            }
            Ok(())
        }
    }
}

/// Write the default value for a requested type code. Used for the
/// structured unknown-PID reply on get-family verbs.
pub fn put_default(cell: &mut Cell, raw_type: u8) -> Result<(), WireError> {
    let code = TypeCode::try_from(raw_type).map_err(|_| WireError::BadType(raw_type))?;
    match code {
        TypeCode::Call => Ok(()),
        TypeCode::Bool => cell.put_bool(false),
        TypeCode::Str => cell.put_str(""),
        TypeCode::File => cell.put_bytes(&[]),
        TypeCode::I8 | TypeCode::U8 => cell.put_u8(0),
        TypeCode::I16 | TypeCode::U16 => cell.put_u16(0),
        TypeCode::I32 | TypeCode::U32 | TypeCode::F32 => cell.put_u32(0),
        TypeCode::I64 | TypeCode::U64 | TypeCode::F64 => cell.put_u64(0),
        TypeCode::V2F32 => cell.put_u64(0),
        TypeCode::V2F64 => {
            cell.put_u64(0)?;
            cell.put_u64(0)
        }
        TypeCode::V3F32 => {
            for _ in 0..3 {
                cell.put_u32(0)?;
            }
            Ok(())
        }
        TypeCode::V3F64 => {
            for _ in 0..3 {
                cell.put_u64(0)?;
            }
            Ok(())
        }
        _ => {
            code.array_elem_size().ok_or(WireError::BadType(raw_type))?;
            cell.put_u16(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::OpCode;

    #[test]
    fn text_round_trip() {
        assert_eq!(u32::parse_text("0xdead"), Some(0xdead));
        assert_eq!(i16::parse_text("-7"), Some(-7));
        assert_eq!(bool::parse_text("true"), Some(true));
        assert_eq!(String::parse_text("\"abc\""), Some("abc".to_string()));
        assert_eq!(<[f32; 2]>::parse_text("1.5, 2"), Some([1.5, 2.0]));
        assert_eq!(Vec::<u8>::parse_text("1,2,3"), Some(vec![1, 2, 3]));
        assert_eq!(Vec::<u8>::parse_text(""), Some(vec![]));
    }

    #[test]
    fn skip_matches_put() {
        let vals: Vec<(u8, Box<dyn Fn(&mut Cell)>)> = vec![
            (
                TypeCode::U32.into(),
                Box::new(|c: &mut Cell| c.put_u32(7).unwrap()),
            ),
            (
                TypeCode::Str.into(),
                Box::new(|c: &mut Cell| c.put_str("hello").unwrap()),
            ),
            (
                TypeCode::U16A.into(),
                Box::new(|c: &mut Cell| vec![1u16, 2, 3].put(c).unwrap()),
            ),
            (
                TypeCode::V3F64.into(),
                Box::new(|c: &mut Cell| [1.0f64, 2.0, 3.0].put(c).unwrap()),
            ),
        ];
        for (code, put) in vals {
            let mut cell = Cell::new(OpCode::SetCmd);
            put(&mut cell);
            cell.put_u8(0xEE).unwrap();
            skip_value(&mut cell, code).unwrap();
            // the sentinel is the next byte after the skipped value
            assert_eq!(cell.take_u8().unwrap(), 0xEE);
        }
    }
}
