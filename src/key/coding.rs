//! Order-preserving key encoding.
//!
//! Encoded keys compare bytewise (`memcmp`) in the same order as
//! [`KeyData::compare`], so SQLite can sort and range-filter the `key`
//! BLOB columns directly.
//!
//! Layout:
//!
//! ```text
//! Min     0x00
//! Number  0x10 | ordered f64 (8 bytes, big-endian)
//! Date    0x20 | ordered f64 (8 bytes, big-endian)
//! String  0x30 | escaped UTF-8 | 0x00
//! Binary  0x40 | escaped bytes | 0x00
//! Array   0x50 | element* | 0x00
//! Max     0xFF
//! ```
//!
//! Inside strings and binaries a `0x00` byte is written as `0x00 0xFF`,
//! so the bare `0x00` terminator sorts below any continuation.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::KeyData;
use crate::{Error, Result};

const TAG_MIN: u8 = 0x00;
const TAG_NUMBER: u8 = 0x10;
const TAG_DATE: u8 = 0x20;
const TAG_STRING: u8 = 0x30;
const TAG_BINARY: u8 = 0x40;
const TAG_ARRAY: u8 = 0x50;
const TAG_MAX: u8 = 0xFF;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

const SIGN_BIT: u64 = 1 << 63;

/// Encode a key.
pub fn encode_key(key: &KeyData) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    encode_into(&mut buf, key);
    buf.freeze()
}

fn encode_into(buf: &mut BytesMut, key: &KeyData) {
    match key {
        KeyData::Min => buf.put_u8(TAG_MIN),
        KeyData::Max => buf.put_u8(TAG_MAX),
        KeyData::Number(v) => {
            buf.put_u8(TAG_NUMBER);
            encode_f64(buf, *v);
        }
        KeyData::Date(v) => {
            buf.put_u8(TAG_DATE);
            encode_f64(buf, *v);
        }
        KeyData::String(s) => {
            buf.put_u8(TAG_STRING);
            encode_escaped(buf, s.as_bytes());
        }
        KeyData::Binary(b) => {
            buf.put_u8(TAG_BINARY);
            encode_escaped(buf, b);
        }
        KeyData::Array(items) => {
            buf.put_u8(TAG_ARRAY);
            for item in items {
                encode_into(buf, item);
            }
            buf.put_u8(TERMINATOR);
        }
    }
}

fn encode_f64(buf: &mut BytesMut, value: f64) {
    // -0.0 and 0.0 are the same key
    let value = if value == 0.0 { 0.0 } else { value };
    let bits = value.to_bits();
    let ordered = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits | SIGN_BIT
    };
    buf.put_u64(ordered);
}

fn encode_escaped(buf: &mut BytesMut, data: &[u8]) {
    for &byte in data {
        buf.put_u8(byte);
        if byte == TERMINATOR {
            buf.put_u8(ESCAPE);
        }
    }
    buf.put_u8(TERMINATOR);
}

/// Decode a key previously produced by [`encode_key`].
pub fn decode_key(data: &[u8]) -> Result<KeyData> {
    let mut input = data;
    let key = decode_one(&mut input, true)?;
    if !input.is_empty() {
        return Err(Error::corruption(format!(
            "{} trailing bytes after encoded key",
            input.len()
        )));
    }
    Ok(key)
}

fn decode_one(input: &mut &[u8], top_level: bool) -> Result<KeyData> {
    if input.is_empty() {
        return Err(Error::corruption("truncated key"));
    }

    match input.get_u8() {
        TAG_MIN if top_level => Ok(KeyData::Min),
        TAG_MAX if top_level => Ok(KeyData::Max),
        TAG_NUMBER => Ok(KeyData::Number(decode_f64(input)?)),
        TAG_DATE => Ok(KeyData::Date(decode_f64(input)?)),
        TAG_STRING => {
            let raw = decode_escaped(input)?;
            String::from_utf8(raw)
                .map(KeyData::String)
                .map_err(|_| Error::corruption("string key is not valid UTF-8"))
        }
        TAG_BINARY => Ok(KeyData::Binary(Bytes::from(decode_escaped(input)?))),
        TAG_ARRAY => {
            let mut items = Vec::new();
            loop {
                match input.first() {
                    None => return Err(Error::corruption("unterminated array key")),
                    Some(&TERMINATOR) => {
                        input.advance(1);
                        break;
                    }
                    Some(_) => items.push(decode_one(input, false)?),
                }
            }
            Ok(KeyData::Array(items))
        }
        tag => Err(Error::corruption(format!("unknown key tag {:#04x}", tag))),
    }
}

fn decode_f64(input: &mut &[u8]) -> Result<f64> {
    if input.len() < 8 {
        return Err(Error::corruption("truncated numeric key"));
    }
    let ordered = input.get_u64();
    let bits = if ordered & SIGN_BIT != 0 {
        ordered & !SIGN_BIT
    } else {
        !ordered
    };
    Ok(f64::from_bits(bits))
}

fn decode_escaped(input: &mut &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        if input.is_empty() {
            return Err(Error::corruption("unterminated key component"));
        }
        let byte = input.get_u8();
        if byte != TERMINATOR {
            out.push(byte);
            continue;
        }
        if input.first() == Some(&ESCAPE) {
            input.advance(1);
            out.push(TERMINATOR);
        } else {
            return Ok(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn sample_keys() -> Vec<KeyData> {
        vec![
            KeyData::Min,
            KeyData::number(f64::NEG_INFINITY),
            KeyData::number(-1e10),
            KeyData::number(-1.5),
            KeyData::number(0.0),
            KeyData::number(1e-300),
            KeyData::number(1.0),
            KeyData::number(42.0),
            KeyData::number(f64::INFINITY),
            KeyData::date(-1.0),
            KeyData::date(1_600_000_000_000.0),
            KeyData::string(""),
            KeyData::string("a"),
            KeyData::string("a\0"),
            KeyData::string("a\0b"),
            KeyData::string("ab"),
            KeyData::string("\u{e9}"),
            KeyData::binary(Bytes::new()),
            KeyData::binary(vec![0u8]),
            KeyData::binary(vec![0u8, 0]),
            KeyData::binary(vec![1u8]),
            KeyData::binary(vec![0xffu8, 0xff]),
            KeyData::array(vec![]),
            KeyData::array(vec![KeyData::from(1i64)]),
            KeyData::array(vec![KeyData::from(1i64), KeyData::from("x")]),
            KeyData::array(vec![KeyData::from(2i64)]),
            KeyData::array(vec![KeyData::array(vec![])]),
            KeyData::Max,
        ]
    }

    #[test]
    fn test_encoding_preserves_order() {
        let keys = sample_keys();
        for (i, a) in keys.iter().enumerate() {
            for (j, b) in keys.iter().enumerate() {
                let expected = i.cmp(&j);
                assert_eq!(a.compare(b), expected, "compare {} vs {}", a, b);
                assert_eq!(
                    encode_key(a).as_ref().cmp(encode_key(b).as_ref()),
                    expected,
                    "encoded {} vs {}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_decode_inverts_encode() {
        for key in sample_keys() {
            let decoded = decode_key(&encode_key(&key)).unwrap();
            assert_eq!(decoded.compare(&key), Ordering::Equal, "{}", key);
        }
    }

    #[test]
    fn test_negative_zero_encodes_as_zero() {
        assert_eq!(
            encode_key(&KeyData::number(-0.0)),
            encode_key(&KeyData::number(0.0))
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_key(&[]).unwrap_err().is_corruption());
        assert!(decode_key(&[0x99]).unwrap_err().is_corruption());
        assert!(decode_key(&[TAG_NUMBER, 1, 2]).unwrap_err().is_corruption());
        assert!(decode_key(&[TAG_STRING, b'a']).unwrap_err().is_corruption());
        assert!(decode_key(&[TAG_ARRAY, TAG_MAX, TERMINATOR])
            .unwrap_err()
            .is_corruption());

        let mut trailing = encode_key(&KeyData::from(1i64)).to_vec();
        trailing.push(0);
        assert!(decode_key(&trailing).unwrap_err().is_corruption());
    }
}
