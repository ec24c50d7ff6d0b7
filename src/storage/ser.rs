use crate::error::{ArrayError, Result};
use crate::model::Value;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_ARRAY: u8 = 0x06;

/// Encoder/decoder pair for values stored through the `SERIALIZED` tag.
///
/// The encoder must be injective over the value domain; the decoder consumes
/// exactly the bytes the encoder produced. Reading a file requires the codec
/// that wrote it. A non-deterministic encoder is tolerated but defeats the
/// in-place block reuse optimization.
pub trait ValueCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// Default codec: tag-prefixed little-endian framing with length-prefixed
/// strings, byte strings, and arrays.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl ValueCodec for BinaryCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        write_value(&mut buf, value)?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let mut cursor = Cursor::new(bytes);
        let value = cursor.read_value()?;
        cursor.ensure_consumed()?;
        Ok(value)
    }
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(v) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*v));
        }
        Value::Int(v) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(s) => {
            buf.push(TAG_STRING);
            write_len_prefixed(buf, s.as_bytes())?;
        }
        Value::Bytes(b) => {
            buf.push(TAG_BYTES);
            write_len_prefixed(buf, b)?;
        }
        Value::Array(items) => {
            buf.push(TAG_ARRAY);
            let count: u32 = items.len().try_into().map_err(|_| {
                ArrayError::Serialization("array length exceeds u32::MAX".into())
            })?;
            buf.extend_from_slice(&count.to_le_bytes());
            for item in items {
                write_value(buf, item)?;
            }
        }
    }
    Ok(())
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| ArrayError::Serialization("length exceeds u32::MAX".into()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.index + len > self.data.len() {
            return Err(ArrayError::Serialization(
                "unexpected end of payload".into(),
            ));
        }
        let start = self.index;
        self.index += len;
        Ok(&self.data[start..start + len])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self
            .read_exact(4)?
            .try_into()
            .expect("slice has exactly 4 bytes");
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_exact(1)?[0];
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => match self.read_exact(1)?[0] {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(ArrayError::Serialization(format!(
                    "invalid boolean encoding: {other}"
                ))),
            },
            TAG_INT => {
                let bytes: [u8; 8] = self
                    .read_exact(8)?
                    .try_into()
                    .expect("slice has exactly 8 bytes");
                Ok(Value::Int(i64::from_le_bytes(bytes)))
            }
            TAG_FLOAT => {
                let bytes: [u8; 8] = self
                    .read_exact(8)?
                    .try_into()
                    .expect("slice has exactly 8 bytes");
                Ok(Value::Float(f64::from_le_bytes(bytes)))
            }
            TAG_STRING => {
                let len = self.read_u32()? as usize;
                let bytes = self.read_exact(len)?;
                String::from_utf8(bytes.to_vec())
                    .map(Value::Str)
                    .map_err(|_| ArrayError::Serialization("invalid UTF-8 string".into()))
            }
            TAG_BYTES => {
                let len = self.read_u32()? as usize;
                Ok(Value::Bytes(self.read_exact(len)?.to_vec()))
            }
            TAG_ARRAY => {
                let count = self.read_u32()? as usize;
                let mut items = Vec::with_capacity(count.min(self.data.len()));
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(Value::Array(items))
            }
            other => Err(ArrayError::Serialization(format!(
                "unknown value tag: 0x{other:02X}"
            ))),
        }
    }

    fn ensure_consumed(&self) -> Result<()> {
        if self.index != self.data.len() {
            return Err(ArrayError::Serialization(
                "unexpected trailing bytes in payload".into(),
            ));
        }
        Ok(())
    }
}
