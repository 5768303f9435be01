use super::encoder::canonical_float_bits;
use super::*;
use crate::error::{CodecError, CodecErrorKind};
use crate::model::{Cid, Value, CID_LEN};
use bytes::Bytes;
use std::collections::BTreeMap;

/// Decode canonical bytes back into a value
///
/// Fails at the first byte that `encode` could not have produced.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut reader = Reader { bytes, pos: 0 };
    let value = reader.value(0)?;
    if reader.pos != bytes.len() {
        return Err(CodecError::new(reader.pos, CodecErrorKind::TrailingBytes));
    }
    Ok(value)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::new(self.pos, CodecErrorKind::UnexpectedEof));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    fn str(&mut self) -> Result<&'a str, CodecError> {
        let len = self.u32()? as usize;
        let start = self.pos;
        let raw = self.take(len)?;
        std::str::from_utf8(raw).map_err(|_| CodecError::new(start, CodecErrorKind::InvalidUtf8))
    }

    /// Each item takes at least one byte, so a count larger than the input
    /// is malformed before anything is allocated.
    fn count(&mut self) -> Result<usize, CodecError> {
        let start = self.pos;
        let count = self.u32()? as usize;
        // Every element takes at least one byte
        if count > self.remaining() {
            return Err(CodecError::new(start, CodecErrorKind::UnexpectedEof));
        }
        Ok(count)
    }

    fn value(&mut self, depth: usize) -> Result<Value, CodecError> {
        let type_pos = self.pos;
        let tag = self.u8()?;
        match tag {
            T_NULL => Ok(Value::Null),
            T_FALSE => Ok(Value::Bool(false)),
            T_TRUE => Ok(Value::Bool(true)),
            T_INT => Ok(Value::Int(self.u64()? as i64)),
            T_FLOAT => {
                let start = self.pos;
                let bits = self.u64()?;
                let f = f64::from_bits(bits);
                if canonical_float_bits(f) != bits {
                    return Err(CodecError::new(start, CodecErrorKind::NonCanonicalFloat));
                }
                Ok(Value::Float(f))
            }
            T_STRING => Ok(Value::String(self.str()?.to_string())),
            T_BYTES => {
                let len = self.u32()? as usize;
                Ok(Value::Bytes(Bytes::copy_from_slice(self.take(len)?)))
            }
            T_ARRAY => {
                if depth >= MAX_DEPTH {
                    return Err(CodecError::new(type_pos, CodecErrorKind::TooDeep));
                }
                let count = self.count()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            T_MAP => {
                if depth >= MAX_DEPTH {
                    return Err(CodecError::new(type_pos, CodecErrorKind::TooDeep));
                }
                let count = self.count()?;
                let mut map = BTreeMap::new();
                let mut prev: Option<&str> = None;
                for _ in 0..count {
                    let key_pos = self.pos;
                    let key = self.str()?;
                    if prev.is_some_and(|p| p.as_bytes() >= key.as_bytes()) {
                        return Err(CodecError::new(key_pos, CodecErrorKind::UnsortedKey));
                    }
                    prev = Some(key);
                    let item = self.value(depth + 1)?;
                    map.insert(key.to_string(), item);
                }
                Ok(Value::Map(map))
            }
            T_LINK => {
                let start = self.pos;
                let raw = self.take(CID_LEN)?;
                let cid = Cid::from_bytes(raw)
                    .map_err(|_| CodecError::new(start, CodecErrorKind::InvalidLink))?;
                Ok(Value::Link(cid))
            }
            other => Err(CodecError::new(type_pos, CodecErrorKind::UnknownType(other))),
        }
    }
}
