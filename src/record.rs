// The record codec boundary: `MakeRecord` produces an opaque blob, `Column`
// consumes it. Uses a varint-length-prefixed serial-type-header-then-content
// layout covering the full `Value` tag set.

use std::rc::Rc;

use num_bigint::{BigInt, Sign};
use uuid::Uuid;

use crate::error::{Result, VdbeError};
use crate::value::{Decimal, Value};

/// Writes an unsigned LEB128 varint, the pager's on-disk varint encoding.
fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *buf.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    Some(result)
}

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[repr(u8)]
enum Tag {
    Null = 0,
    Int = 1,
    Float = 2,
    Text = 3,
    Blob = 4,
    Guid = 5,
    Decimal = 6,
    Date = 7,
    Time = 8,
    TimeTz = 9,
    Timestamp = 10,
    TimestampTz = 11,
    Interval = 12,
    Json = 13,
    Vector = 14,
    Varchar = 15,
    Char = 16,
}

/// Returns the kind name used in `CompileError::UnsupportedLiteralType`
/// messages; every current `Value` variant is representable, but this keeps
/// `MakeRecord` ready to reject a future tag addition safely instead of
/// silently mis-encoding it.
pub fn literal_kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "Null",
        Value::Int64(_)
        | Value::SmallInt(_)
        | Value::Int32(_)
        | Value::BigInt(_)
        | Value::Serial(_)
        | Value::BigSerial(_) => "Integer",
        Value::Float(_) => "Float",
        Value::Text(_) => "Text",
        Value::Varchar { .. } => "Varchar",
        Value::Char { .. } => "Char",
        Value::Blob(_) => "Blob",
        Value::Guid(_) => "Guid",
        Value::Decimal(_) => "Decimal",
        Value::Date(_) => "Date",
        Value::Time(_) => "Time",
        Value::TimeTz { .. } => "TimeTz",
        Value::Timestamp(_) => "Timestamp",
        Value::TimestampTz { .. } => "TimestampTz",
        Value::Interval { .. } => "Interval",
        Value::Json(_) => "Json",
        Value::Vector(_) => "Vector",
    }
}

/// `MakeRecord`'s compile-time gate: every current kind is representable, so
/// this always succeeds today, but it is the seam where a future
/// non-representable kind would be rejected rather than mis-encoded.
pub fn check_representable(v: &Value) -> Result<()> {
    let _ = literal_kind_name(v);
    Ok(())
}

pub fn encode(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, values.len() as u64);
    for v in values {
        encode_one(&mut out, v);
    }
    out
}

fn encode_one(out: &mut Vec<u8>, v: &Value) {
    match v {
        Value::Null => out.push(Tag::Null as u8),
        Value::Float(f) => {
            out.push(Tag::Float as u8);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Text(s) => encode_str(out, Tag::Text, s),
        Value::Varchar { s, max_len } => {
            out.push(Tag::Varchar as u8);
            write_varint(out, *max_len as u64);
            write_varint(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Char { s, fixed_len } => {
            out.push(Tag::Char as u8);
            write_varint(out, *fixed_len as u64);
            write_varint(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Blob(b) => {
            out.push(Tag::Blob as u8);
            write_varint(out, b.len() as u64);
            out.extend_from_slice(b);
        }
        Value::Guid(g) => {
            out.push(Tag::Guid as u8);
            out.extend_from_slice(g.as_bytes());
        }
        Value::Decimal(d) => {
            out.push(Tag::Decimal as u8);
            out.push(d.precision);
            out.push(d.scale);
            let (sign, bytes) = d.coefficient.to_bytes_be();
            out.push(if sign == Sign::Minus { 1 } else { 0 });
            write_varint(out, bytes.len() as u64);
            out.extend_from_slice(&bytes);
        }
        Value::Date(days) => {
            out.push(Tag::Date as u8);
            write_varint(out, zigzag_encode(*days as i64));
        }
        Value::Time(us) => {
            out.push(Tag::Time as u8);
            write_varint(out, zigzag_encode(*us));
        }
        Value::TimeTz { micros, tz_offset_s } => {
            out.push(Tag::TimeTz as u8);
            write_varint(out, zigzag_encode(*micros));
            write_varint(out, zigzag_encode(*tz_offset_s as i64));
        }
        Value::Timestamp(us) => {
            out.push(Tag::Timestamp as u8);
            write_varint(out, zigzag_encode(*us));
        }
        Value::TimestampTz { micros, tz_offset_s } => {
            out.push(Tag::TimestampTz as u8);
            write_varint(out, zigzag_encode(*micros));
            write_varint(out, zigzag_encode(*tz_offset_s as i64));
        }
        Value::Interval { months, micros } => {
            out.push(Tag::Interval as u8);
            write_varint(out, zigzag_encode(*months as i64));
            write_varint(out, zigzag_encode(*micros));
        }
        Value::Json(s) => encode_str(out, Tag::Json, s),
        Value::Vector(vec) => {
            out.push(Tag::Vector as u8);
            write_varint(out, vec.len() as u64);
            for x in vec.iter() {
                out.extend_from_slice(&x.to_be_bytes());
            }
        }
        other => {
            // Integer family: widen and zigzag-encode; accessors narrow on read.
            if let Some(i) = widen_int_for_encode(other) {
                out.push(Tag::Int as u8);
                write_varint(out, zigzag_encode(i));
            }
        }
    }
}

fn widen_int_for_encode(v: &Value) -> Option<i64> {
    match v {
        Value::Int64(i) => Some(*i),
        Value::SmallInt(i) => Some(*i as i64),
        Value::Int32(i) => Some(*i as i64),
        Value::BigInt(i) => Some(*i),
        Value::Serial(i) => Some(*i as i64),
        Value::BigSerial(i) => Some(*i),
        _ => None,
    }
}

fn encode_str(out: &mut Vec<u8>, tag: Tag, s: &str) {
    out.push(tag as u8);
    write_varint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

/// Decodes a record produced by `encode`. Always returns as many values as
/// were encoded; `Column`'s "fewer values than requested -> NULL" tolerance
/// is implemented by the caller indexing past the end of this vector.
pub fn decode(bytes: &[u8]) -> Result<Vec<Value>> {
    let mut pos = 0;
    let count = read_varint(bytes, &mut pos)
        .ok_or_else(|| VdbeError::Storage("truncated record header".into()))?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(decode_one(bytes, &mut pos)?);
    }
    Ok(values)
}

fn decode_one(bytes: &[u8], pos: &mut usize) -> Result<Value> {
    let tag = *bytes
        .get(*pos)
        .ok_or_else(|| VdbeError::Storage("truncated record".into()))?;
    *pos += 1;
    let err = || VdbeError::Storage("truncated record".into());
    match tag {
        t if t == Tag::Null as u8 => Ok(Value::Null),
        t if t == Tag::Int as u8 => {
            let v = read_varint(bytes, pos).ok_or_else(err)?;
            Ok(Value::Int64(zigzag_decode(v)))
        }
        t if t == Tag::Float as u8 => {
            let slice = bytes.get(*pos..*pos + 8).ok_or_else(err)?;
            *pos += 8;
            Ok(Value::Float(f64::from_be_bytes(slice.try_into().unwrap())))
        }
        t if t == Tag::Text as u8 => Ok(Value::Text(decode_string(bytes, pos)?)),
        t if t == Tag::Json as u8 => Ok(Value::Json(decode_string(bytes, pos)?)),
        t if t == Tag::Varchar as u8 => {
            let max_len = read_varint(bytes, pos).ok_or_else(err)? as usize;
            let s = decode_string(bytes, pos)?;
            Ok(Value::Varchar { s, max_len })
        }
        t if t == Tag::Char as u8 => {
            let fixed_len = read_varint(bytes, pos).ok_or_else(err)? as usize;
            let s = decode_string(bytes, pos)?;
            Ok(Value::Char { s, fixed_len })
        }
        t if t == Tag::Blob as u8 => {
            let len = read_varint(bytes, pos).ok_or_else(err)? as usize;
            let slice = bytes.get(*pos..*pos + len).ok_or_else(err)?;
            *pos += len;
            Ok(Value::Blob(slice.to_vec()))
        }
        t if t == Tag::Guid as u8 => {
            let slice = bytes.get(*pos..*pos + 16).ok_or_else(err)?;
            *pos += 16;
            Ok(Value::Guid(Uuid::from_slice(slice).map_err(|e| {
                VdbeError::Storage(format!("bad guid: {e}"))
            })?))
        }
        t if t == Tag::Decimal as u8 => {
            let precision = *bytes.get(*pos).ok_or_else(err)?;
            *pos += 1;
            let scale = *bytes.get(*pos).ok_or_else(err)?;
            *pos += 1;
            let sign_byte = *bytes.get(*pos).ok_or_else(err)?;
            *pos += 1;
            let len = read_varint(bytes, pos).ok_or_else(err)? as usize;
            let slice = bytes.get(*pos..*pos + len).ok_or_else(err)?;
            *pos += len;
            let sign = if sign_byte == 1 { Sign::Minus } else { Sign::Plus };
            let coefficient = BigInt::from_bytes_be(sign, slice);
            Ok(Value::Decimal(Decimal {
                coefficient,
                precision,
                scale,
            }))
        }
        t if t == Tag::Date as u8 => {
            let v = read_varint(bytes, pos).ok_or_else(err)?;
            Ok(Value::Date(zigzag_decode(v) as i32))
        }
        t if t == Tag::Time as u8 => {
            let v = read_varint(bytes, pos).ok_or_else(err)?;
            Ok(Value::Time(zigzag_decode(v)))
        }
        t if t == Tag::TimeTz as u8 => {
            let micros = zigzag_decode(read_varint(bytes, pos).ok_or_else(err)?);
            let tz_offset_s = zigzag_decode(read_varint(bytes, pos).ok_or_else(err)?) as i32;
            Ok(Value::TimeTz { micros, tz_offset_s })
        }
        t if t == Tag::Timestamp as u8 => {
            let v = read_varint(bytes, pos).ok_or_else(err)?;
            Ok(Value::Timestamp(zigzag_decode(v)))
        }
        t if t == Tag::TimestampTz as u8 => {
            let micros = zigzag_decode(read_varint(bytes, pos).ok_or_else(err)?);
            let tz_offset_s = zigzag_decode(read_varint(bytes, pos).ok_or_else(err)?) as i32;
            Ok(Value::TimestampTz { micros, tz_offset_s })
        }
        t if t == Tag::Interval as u8 => {
            let months = zigzag_decode(read_varint(bytes, pos).ok_or_else(err)?) as i32;
            let micros = zigzag_decode(read_varint(bytes, pos).ok_or_else(err)?);
            Ok(Value::Interval { months, micros })
        }
        t if t == Tag::Vector as u8 => {
            let len = read_varint(bytes, pos).ok_or_else(err)? as usize;
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                let slice = bytes.get(*pos..*pos + 8).ok_or_else(err)?;
                *pos += 8;
                v.push(f64::from_be_bytes(slice.try_into().unwrap()));
            }
            Ok(Value::Vector(Rc::new(v)))
        }
        other => Err(VdbeError::Storage(format!("unknown record tag {other}"))),
    }
}

fn decode_string(bytes: &[u8], pos: &mut usize) -> Result<String> {
    let err = || VdbeError::Storage("truncated record".into());
    let len = read_varint(bytes, pos).ok_or_else(err)? as usize;
    let slice = bytes.get(*pos..*pos + len).ok_or_else(err)?;
    *pos += len;
    String::from_utf8(slice.to_vec()).map_err(|e| VdbeError::Storage(format!("bad utf8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_kinds() {
        let values = vec![
            Value::Null,
            Value::Int64(42),
            Value::SmallInt(-7),
            Value::Float(3.5),
            Value::Text("hello".into()),
            Value::Blob(vec![1, 2, 3]),
            Value::Json("{\"a\":1}".into()),
            Value::vector(&[1.0, 2.0, 3.0]),
            Value::Date(100),
            Value::Interval { months: 3, micros: 500 },
        ];
        let encoded = encode(&values);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.len(), values.len());
        for (a, b) in values.iter().zip(decoded.iter()) {
            assert_eq!(a.compare(b), std::cmp::Ordering::Equal, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn decimal_round_trips() {
        let d = Decimal::new(BigInt::from(-12345), 7, 2).unwrap();
        let encoded = encode(&[Value::Decimal(d.clone())]);
        let decoded = decode(&encoded).unwrap();
        match &decoded[0] {
            Value::Decimal(d2) => assert_eq!(d, *d2),
            _ => panic!("expected decimal"),
        }
    }

    #[test]
    fn column_tolerates_short_records() {
        let encoded = encode(&[Value::Int64(1)]);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded.get(5).is_none());
    }

    #[quickcheck_macros::quickcheck]
    fn int_and_text_round_trip(i: i64, s: String) -> bool {
        let values = vec![Value::Int64(i), Value::Text(s)];
        let encoded = encode(&values);
        let decoded = decode(&encoded).unwrap();
        decoded.len() == values.len()
            && values
                .iter()
                .zip(decoded.iter())
                .all(|(a, b)| a.compare(b) == std::cmp::Ordering::Equal)
    }
}
