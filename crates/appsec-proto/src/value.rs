//! MessagePack value tree with limit-enforcing decoding.
//!
//! Decoding walks the raw bytes with [`rmp::Marker`] and checks every
//! container and string against [`Limits`] before allocating for it, so a
//! hostile length prefix never turns into a large allocation.

use rmp::Marker;

use crate::codec::Limits;
use crate::error::{DecodeError, ProtocolError};

/// A decoded MessagePack value.
///
/// Maps keep their wire order and only admit string keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// `nil`.
    #[default]
    Nil,
    /// Boolean.
    Bool(bool),
    /// Negative (or explicitly signed) integer.
    Int(i64),
    /// Non-negative integer.
    UInt(u64),
    /// 32 or 64-bit float, widened to `f64`.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes. Never accepted inside a request.
    Bin(Vec<u8>),
    /// Extension type and data. Never accepted inside a request.
    Ext(i8, Vec<u8>),
    /// Array.
    Array(Vec<Value>),
    /// Map with string keys, in wire order.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Returns a short name for the value's type, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bin(_) => "bin",
            Self::Ext(..) => "ext",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    #[must_use]
    pub const fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as `u64` if it is a non-negative integer.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as `f64` if it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::UInt(v) => Some(*v as f64),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up `key` in a map. Returns `None` for non-maps.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Inserts or replaces `key` in a map. Does nothing for non-maps.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        if let Self::Map(entries) = self {
            let key = key.into();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, slot)) => *slot = value,
                None => entries.push((key, value)),
            }
        }
    }

    #[must_use]
    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_map(self) -> Option<Vec<(String, Value)>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Renders a scalar as text. Containers, binary data and `nil` yield `None`.
    #[must_use]
    pub fn to_scalar_string(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::UInt(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        if v >= 0 {
            Self::UInt(v.unsigned_abs())
        } else {
            Self::Int(v)
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Nil, Into::into)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self::Map(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Decodes exactly one value from `bytes`, enforcing `limits` while walking.
pub fn decode(bytes: &[u8], limits: &Limits) -> Result<Value, DecodeError> {
    let mut reader = Reader {
        buf: bytes,
        pos: 0,
        limits,
    };
    let value = reader.read_value(0)?;
    let remaining = bytes.len() - reader.pos;
    if remaining > 0 {
        return Err(DecodeError::TrailingBytes(remaining));
    }
    Ok(value)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    limits: &'a Limits,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        let byte = self.read_u8()?;
        let value = match Marker::from_u8(byte) {
            Marker::Null => Value::Nil,
            Marker::True => Value::Bool(true),
            Marker::False => Value::Bool(false),
            Marker::FixPos(v) => Value::UInt(u64::from(v)),
            Marker::FixNeg(v) => Value::Int(i64::from(v)),
            Marker::U8 => Value::UInt(u64::from(self.read_u8()?)),
            Marker::U16 => Value::UInt(u64::from(self.read_u16()?)),
            Marker::U32 => Value::UInt(u64::from(self.read_u32()?)),
            Marker::U64 => Value::UInt(self.read_u64()?),
            Marker::I8 => Value::Int(i64::from(i8::from_be_bytes(self.take_array()?))),
            Marker::I16 => Value::Int(i64::from(i16::from_be_bytes(self.take_array()?))),
            Marker::I32 => Value::Int(i64::from(i32::from_be_bytes(self.take_array()?))),
            Marker::I64 => Value::Int(i64::from_be_bytes(self.take_array()?)),
            Marker::F32 => Value::Float(f64::from(f32::from_bits(self.read_u32()?))),
            Marker::F64 => Value::Float(f64::from_bits(self.read_u64()?)),
            Marker::FixStr(len) => self.read_str(usize::from(len))?,
            Marker::Str8 => {
                let len = usize::from(self.read_u8()?);
                self.read_str(len)?
            }
            Marker::Str16 => {
                let len = usize::from(self.read_u16()?);
                self.read_str(len)?
            }
            Marker::Str32 => {
                let len = self.read_u32()? as usize;
                self.read_str(len)?
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
                return Err(DecodeError::UnsupportedType("bin"));
            }
            Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
            | Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32 => return Err(DecodeError::UnsupportedType("ext")),
            Marker::FixArray(len) => self.read_array(usize::from(len), depth)?,
            Marker::Array16 => {
                let len = usize::from(self.read_u16()?);
                self.read_array(len, depth)?
            }
            Marker::Array32 => {
                let len = self.read_u32()? as usize;
                self.read_array(len, depth)?
            }
            Marker::FixMap(len) => self.read_map(usize::from(len), depth)?,
            Marker::Map16 => {
                let len = usize::from(self.read_u16()?);
                self.read_map(len, depth)?
            }
            Marker::Map32 => {
                let len = self.read_u32()? as usize;
                self.read_map(len, depth)?
            }
            Marker::Reserved => return Err(DecodeError::InvalidMarker(byte)),
        };
        Ok(value)
    }

    fn read_str(&mut self, len: usize) -> Result<Value, DecodeError> {
        if len > self.limits.max_string_length {
            return Err(DecodeError::StringTooLong {
                len,
                max: self.limits.max_string_length,
            });
        }
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok(Value::Str(s.to_owned()))
    }

    fn enter(&self, depth: usize) -> Result<usize, DecodeError> {
        if depth >= self.limits.max_depth {
            return Err(DecodeError::TooDeep {
                max: self.limits.max_depth,
            });
        }
        Ok(depth + 1)
    }

    fn read_array(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        if len > self.limits.max_array_size {
            return Err(DecodeError::ArrayTooLarge {
                len,
                max: self.limits.max_array_size,
            });
        }
        let depth = self.enter(depth)?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_value(depth)?);
        }
        Ok(Value::Array(items))
    }

    fn read_map(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        if len > self.limits.max_map_size {
            return Err(DecodeError::MapTooLarge {
                len,
                max: self.limits.max_map_size,
            });
        }
        let depth = self.enter(depth)?;
        let mut entries = Vec::with_capacity(len);
        for _ in 0..len {
            let Value::Str(key) = self.read_value(depth)? else {
                return Err(DecodeError::NonStringKey);
            };
            let value = self.read_value(depth)?;
            entries.push((key, value));
        }
        Ok(Value::Map(entries))
    }
}

fn ser_err(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Serialisation(e.to_string())
}

fn len_u32(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::Serialisation(format!("length {len} overflows u32")))
}

/// Appends the MessagePack encoding of `value` to `buf`.
pub fn encode(value: &Value, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    match value {
        Value::Nil => rmp::encode::write_nil(buf).map_err(ser_err)?,
        Value::Bool(b) => rmp::encode::write_bool(buf, *b).map_err(ser_err)?,
        Value::Int(v) => {
            rmp::encode::write_sint(buf, *v).map_err(ser_err)?;
        }
        Value::UInt(v) => {
            rmp::encode::write_uint(buf, *v).map_err(ser_err)?;
        }
        Value::Float(v) => rmp::encode::write_f64(buf, *v).map_err(ser_err)?,
        Value::Str(s) => rmp::encode::write_str(buf, s).map_err(ser_err)?,
        Value::Bin(data) => rmp::encode::write_bin(buf, data).map_err(ser_err)?,
        Value::Ext(ty, data) => {
            rmp::encode::write_ext_meta(buf, len_u32(data.len())?, *ty).map_err(ser_err)?;
            buf.extend_from_slice(data);
        }
        Value::Array(items) => {
            rmp::encode::write_array_len(buf, len_u32(items.len())?).map_err(ser_err)?;
            for item in items {
                encode(item, buf)?;
            }
        }
        Value::Map(entries) => {
            rmp::encode::write_map_len(buf, len_u32(entries.len())?).map_err(ser_err)?;
            for (key, item) in entries {
                rmp::encode::write_str(buf, key).map_err(ser_err)?;
                encode(item, buf)?;
            }
        }
    }
    Ok(())
}

/// Encodes `value` into a fresh buffer.
pub fn to_vec(value: &Value) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    encode(value, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits::default()
    }

    fn nested_arrays(levels: usize) -> Vec<u8> {
        let mut bytes = vec![0x91; levels - 1];
        bytes.push(0x90);
        bytes
    }

    #[test]
    fn decodes_scalars() {
        let cases: Vec<(Vec<u8>, Value)> = vec![
            (vec![0xc0], Value::Nil),
            (vec![0xc3], Value::Bool(true)),
            (vec![0x2a], Value::UInt(42)),
            (vec![0xff], Value::Int(-1)),
            (vec![0xcd, 0x01, 0x00], Value::UInt(256)),
            (vec![0xd1, 0xff, 0x00], Value::Int(-256)),
            (vec![0xa3, b'a', b'b', b'c'], Value::from("abc")),
        ];
        for (bytes, expected) in cases {
            assert_eq!(decode(&bytes, &limits()).unwrap(), expected);
        }
    }

    #[test]
    fn encode_then_decode_preserves_tree() {
        let value: Value = [
            ("server.request.query", Value::from(vec![Value::from("a"), Value::UInt(7)])),
            ("http.client_ip", Value::from("192.168.1.1")),
            ("ratio", Value::Float(0.25)),
            ("neg", Value::Int(-40000)),
        ]
        .into_iter()
        .collect();

        let bytes = to_vec(&value).unwrap();
        assert_eq!(decode(&bytes, &limits()).unwrap(), value);
    }

    #[test]
    fn rejects_bin_and_ext() {
        let bin = [0xc4, 0x01, 0x00];
        assert_eq!(
            decode(&bin, &limits()),
            Err(DecodeError::UnsupportedType("bin"))
        );

        let ext = [0xd4, 0x01, 0x00];
        assert_eq!(
            decode(&ext, &limits()),
            Err(DecodeError::UnsupportedType("ext"))
        );

        // nested inside an array is still rejected
        let nested = [0x92, 0xc0, 0xc4, 0x00];
        assert!(decode(&nested, &limits()).is_err());
    }

    #[test]
    fn enforces_string_limit() {
        let limits = limits();
        let ok = to_vec(&Value::Str("x".repeat(limits.max_string_length))).unwrap();
        assert!(decode(&ok, &limits).is_ok());

        let too_long = to_vec(&Value::Str("x".repeat(limits.max_string_length + 1))).unwrap();
        assert!(matches!(
            decode(&too_long, &limits),
            Err(DecodeError::StringTooLong { .. })
        ));
    }

    #[test]
    fn enforces_container_limits() {
        let limits = limits();

        let array = Value::Array(vec![Value::Nil; limits.max_array_size + 1]);
        assert!(matches!(
            decode(&to_vec(&array).unwrap(), &limits),
            Err(DecodeError::ArrayTooLarge { .. })
        ));

        let map: Value = (0..=limits.max_map_size)
            .map(|i| (format!("k{i}"), Value::Nil))
            .collect();
        assert!(matches!(
            decode(&to_vec(&map).unwrap(), &limits),
            Err(DecodeError::MapTooLarge { .. })
        ));
    }

    #[test]
    fn enforces_depth_limit() {
        let limits = limits();
        assert!(decode(&nested_arrays(limits.max_depth), &limits).is_ok());
        assert_eq!(
            decode(&nested_arrays(limits.max_depth + 1), &limits),
            Err(DecodeError::TooDeep {
                max: limits.max_depth
            })
        );
    }

    #[test]
    fn rejects_corrupt_input() {
        assert_eq!(decode(&[0xc1], &limits()), Err(DecodeError::InvalidMarker(0xc1)));
        assert_eq!(decode(&[0xa5, b'a'], &limits()), Err(DecodeError::Truncated));
        assert_eq!(decode(&[0xc0, 0xc0], &limits()), Err(DecodeError::TrailingBytes(1)));
        assert_eq!(decode(&[0x81, 0x01, 0xc0], &limits()), Err(DecodeError::NonStringKey));
        assert_eq!(decode(&[0xa2, 0xff, 0xfe], &limits()), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn map_helpers() {
        let mut value: Value = [("a", Value::UInt(1))].into_iter().collect();
        value.insert("b", Value::Bool(true));
        value.insert("a", Value::UInt(2));

        assert_eq!(value.get("a"), Some(&Value::UInt(2)));
        assert_eq!(value.get("b").and_then(Value::as_bool), Some(true));
        assert_eq!(value.as_map().map(<[_]>::len), Some(2));
        assert!(Value::Nil.get("a").is_none());
    }
}
