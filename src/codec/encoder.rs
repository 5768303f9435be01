use super::*;
use crate::model::Value;

/// Encode a value to its canonical bytes
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(T_NULL),
        Value::Bool(false) => out.push(T_FALSE),
        Value::Bool(true) => out.push(T_TRUE),
        Value::Int(i) => {
            out.push(T_INT);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(T_FLOAT);
            out.extend_from_slice(&canonical_float_bits(*f).to_be_bytes());
        }
        Value::String(s) => {
            out.push(T_STRING);
            write_len_prefixed(out, s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(T_BYTES);
            write_len_prefixed(out, b);
        }
        Value::Array(items) => {
            out.push(T_ARRAY);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                write_value(out, item);
            }
        }
        Value::Map(map) => {
            out.push(T_MAP);
            out.extend_from_slice(&(map.len() as u32).to_be_bytes());
            // BTreeMap<String, _> iterates in byte order already
            for (key, item) in map {
                write_len_prefixed(out, key.as_bytes());
                write_value(out, item);
            }
        }
        Value::Link(cid) => {
            out.push(T_LINK);
            out.extend_from_slice(&cid.to_bytes());
        }
    }
}

fn write_len_prefixed(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

pub(crate) fn canonical_float_bits(f: f64) -> u64 {
    if f.is_nan() {
        CANONICAL_NAN
    } else if f == 0.0 {
        0
    } else {
        f.to_bits()
    }
}
