//! AMF0 encoder and decoder
//!
//! AMF0 is the original Action Message Format used in Flash/RTMP.
//! Reference: AMF0 File Format Specification
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x08 - ECMA Array (associative array)
//! 0x09 - Object End (0x000009 sequence)
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (double + timezone)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::value::AmfValue;
use crate::error::AmfError;

// AMF0 type markers
const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// AMF0 decoder with lenient parsing mode
pub struct Amf0Decoder {
    /// Enable lenient parsing for encoder quirks
    lenient: bool,
    /// Current nesting depth
    depth: usize,
}

impl Amf0Decoder {
    /// Create a new decoder. Lenient by default, real-world encoders take
    /// liberties with object end markers.
    pub fn new() -> Self {
        Self {
            lenient: true,
            depth: 0,
        }
    }

    /// Create decoder with explicit lenient mode setting
    pub fn with_lenient(lenient: bool) -> Self {
        Self { lenient, depth: 0 }
    }

    /// Decode a single AMF0 value from the buffer
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        let marker = buf.get_u8();
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode all values from buffer until exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => {
                if buf.remaining() < 8 {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_BOOLEAN => {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
            MARKER_LONG_STRING => Ok(AmfValue::String(read_utf8_long(buf)?)),
            MARKER_OBJECT => Ok(AmfValue::Object(self.decode_properties(buf)?)),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED => Ok(AmfValue::Undefined),
            MARKER_ECMA_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                // Length hint only, not always accurate
                let _count = buf.get_u32();
                Ok(AmfValue::EcmaArray(self.decode_properties(buf)?))
            }
            MARKER_STRICT_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                let count = buf.get_u32() as usize;
                let mut elements = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    elements.push(self.decode(buf)?);
                }
                Ok(AmfValue::Array(elements))
            }
            MARKER_DATE => {
                if buf.remaining() < 10 {
                    return Err(AmfError::UnexpectedEof);
                }
                let timestamp = buf.get_f64();
                let _timezone = buf.get_i16(); // deprecated, usually 0
                Ok(AmfValue::Date(timestamp))
            }
            MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            _ => {
                if self.lenient {
                    Ok(AmfValue::Undefined)
                } else {
                    Err(AmfError::UnknownMarker(marker))
                }
            }
        }
    }

    /// Decode key-value pairs until the object end marker
    fn decode_properties(&mut self, buf: &mut Bytes) -> Result<HashMap<String, AmfValue>, AmfError> {
        let mut properties = HashMap::new();

        loop {
            let key = read_utf8(buf)?;

            if key.is_empty() {
                if buf.is_empty() {
                    if self.lenient {
                        // Some encoders omit the end marker entirely
                        break;
                    }
                    return Err(AmfError::UnexpectedEof);
                }
                let end_marker = buf.get_u8();
                if end_marker == MARKER_OBJECT_END || self.lenient {
                    break;
                }
                return Err(AmfError::InvalidObjectEnd);
            }

            let value = self.decode(buf)?;
            properties.insert(key, value);
        }

        Ok(properties)
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read UTF-8 string with 16-bit length prefix
fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }

    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }

    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// Read UTF-8 string with 32-bit length prefix
fn read_utf8_long(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 4 {
        return Err(AmfError::UnexpectedEof);
    }

    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }

    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the encoded bytes and reset encoder
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a single AMF0 value
    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Null => {
                self.buf.put_u8(MARKER_NULL);
            }
            AmfValue::Undefined => {
                self.buf.put_u8(MARKER_UNDEFINED);
            }
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(if *b { 1 } else { 0 });
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::String(s) => {
                if s.len() > 0xFFFF {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props);
            }
            AmfValue::Array(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem);
                }
            }
            AmfValue::Date(timestamp) => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*timestamp);
                self.buf.put_i16(0); // timezone (deprecated)
            }
        }
    }

    /// Encode multiple values
    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    fn write_properties(&mut self, props: &HashMap<String, AmfValue>) {
        for (key, val) in props {
            self.write_utf8(key);
            self.encode(val);
        }
        // Object end marker: empty key + 0x09
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    /// Write UTF-8 string with 16-bit length prefix (no type marker)
    fn write_utf8(&mut self, s: &str) {
        let len = s.len().min(0xFFFF);
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode a single value
pub fn encode(value: &AmfValue) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value);
    encoder.finish()
}

/// Convenience function to encode multiple values
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

/// Convenience function to decode a single value
pub fn decode(data: &[u8]) -> Result<AmfValue, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode(&mut buf)
}

/// Convenience function to decode all values
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode_all(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_roundtrip() {
        let value = AmfValue::Number(42.5);
        let encoded = encode(&value);
        assert_eq!(encoded[0], MARKER_NUMBER);
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_string_roundtrip() {
        let value = AmfValue::String("hello world".into());
        let encoded = encode(&value);
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_boolean_roundtrip() {
        let value = AmfValue::Boolean(true);
        let encoded = encode(&value);
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_null_and_undefined_roundtrip() {
        assert_eq!(decode(&encode(&AmfValue::Null)).unwrap(), AmfValue::Null);
        assert_eq!(
            decode(&encode(&AmfValue::Undefined)).unwrap(),
            AmfValue::Undefined
        );
    }

    #[test]
    fn test_object_roundtrip() {
        let mut props = HashMap::new();
        props.insert("name".to_string(), AmfValue::String("test".into()));
        props.insert("value".to_string(), AmfValue::Number(123.0));
        let value = AmfValue::Object(props);

        let decoded = decode(&encode(&value)).unwrap();
        if let (AmfValue::Object(orig), AmfValue::Object(dec)) = (&value, &decoded) {
            assert_eq!(orig.len(), dec.len());
            for (k, v) in orig {
                assert_eq!(dec.get(k), Some(v));
            }
        } else {
            panic!("Expected objects");
        }
    }

    #[test]
    fn test_ecma_array_roundtrip() {
        let mut props = HashMap::new();
        props.insert("duration".to_string(), AmfValue::Number(0.0));
        let value = AmfValue::EcmaArray(props);

        let decoded = decode(&encode(&value)).unwrap();
        assert!(matches!(decoded, AmfValue::EcmaArray(_)));
        assert_eq!(decoded.get_number("duration").unwrap(), 0.0);
    }

    #[test]
    fn test_array_roundtrip() {
        let value = AmfValue::Array(vec![
            AmfValue::Number(1.0),
            AmfValue::String("two".into()),
            AmfValue::Boolean(true),
        ]);
        let encoded = encode(&value);
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_date_roundtrip() {
        let value = AmfValue::Date(1_700_000_000_000.0);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn test_multiple_values() {
        let values = vec![
            AmfValue::String("connect".into()),
            AmfValue::Number(1.0),
            AmfValue::Null,
        ];

        let encoded = encode_all(&values);
        assert_eq!(decode_all(&encoded).unwrap(), values);
    }

    #[test]
    fn test_long_string_marker() {
        let long_str = "x".repeat(70000);
        let value = AmfValue::String(long_str.clone());
        let encoded = encode(&value);
        assert_eq!(encoded[0], MARKER_LONG_STRING);
        assert_eq!(decode(&encoded).unwrap(), AmfValue::String(long_str));
    }

    #[test]
    fn test_truncated_input_is_eof() {
        let encoded = encode(&AmfValue::Number(1.0));
        assert!(matches!(
            decode(&encoded[..4]).unwrap_err(),
            AmfError::UnexpectedEof
        ));

        // Truncated string body
        let encoded = encode(&AmfValue::String("hello".into()));
        assert!(matches!(
            decode(&encoded[..3]).unwrap_err(),
            AmfError::UnexpectedEof
        ));
    }

    #[test]
    fn test_unknown_marker_strict_vs_lenient() {
        let data = [0x42u8, 0x00];

        let mut strict = Amf0Decoder::with_lenient(false);
        let mut buf = Bytes::copy_from_slice(&data);
        assert!(matches!(
            strict.decode(&mut buf).unwrap_err(),
            AmfError::UnknownMarker(0x42)
        ));

        let mut lenient = Amf0Decoder::new();
        let mut buf = Bytes::copy_from_slice(&data);
        assert_eq!(lenient.decode(&mut buf).unwrap(), AmfValue::Undefined);
    }

    #[test]
    fn test_missing_object_end_lenient() {
        // Object with one property and no trailing end marker
        let mut body = BytesMut::new();
        body.put_u8(MARKER_OBJECT);
        body.put_u16(4);
        body.put_slice(b"code");
        body.put_u8(MARKER_STRING);
        body.put_u16(2);
        body.put_slice(b"ok");
        body.put_u16(0); // empty key, then EOF instead of 0x09

        let decoded = decode(&body).unwrap();
        assert_eq!(decoded.get_str("code").unwrap(), "ok");
    }

    #[test]
    fn test_nesting_depth_bound() {
        // 100 nested single-property objects exceed the bound
        let mut body = BytesMut::new();
        for _ in 0..100 {
            body.put_u8(MARKER_OBJECT);
            body.put_u16(1);
            body.put_slice(b"a");
        }
        body.put_u8(MARKER_NULL);

        assert!(matches!(
            decode(&body).unwrap_err(),
            AmfError::NestingTooDeep
        ));
    }
}
