// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Thrift compact binary protocol, the subset the Parquet footer and page
//! headers need.
//!
//! The writer emits structs field-by-field with delta-encoded field ids; the
//! reader tolerates (skips) fields it does not know about so footers written
//! by other implementations can still be merged.

use snafu::location;

use crate::error::{Error, Result};

/// Compact protocol wire types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    BooleanTrue = 1,
    BooleanFalse = 2,
    Byte = 3,
    I16 = 4,
    I32 = 5,
    I64 = 6,
    Double = 7,
    Binary = 8,
    List = 9,
    Set = 10,
    Map = 11,
    Struct = 12,
}

impl FieldType {
    fn from_nibble(b: u8) -> Result<Self> {
        Ok(match b {
            1 => Self::BooleanTrue,
            2 => Self::BooleanFalse,
            3 => Self::Byte,
            4 => Self::I16,
            5 => Self::I32,
            6 => Self::I64,
            7 => Self::Double,
            8 => Self::Binary,
            9 => Self::List,
            10 => Self::Set,
            11 => Self::Map,
            12 => Self::Struct,
            other => {
                return Err(Error::Internal {
                    message: format!("unknown compact protocol type {other}"),
                    location: location!(),
                })
            }
        })
    }
}

fn zigzag_i64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag_i64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Serializes one struct at a time into an owned byte buffer.
#[derive(Debug, Default)]
pub struct CompactWriter {
    buf: Vec<u8>,
    // One entry per open struct: the previously written field id.
    last_field_id: Vec<i16>,
}

impl CompactWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        debug_assert!(self.last_field_id.is_empty());
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn write_varint(&mut self, mut v: u64) {
        loop {
            let b = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(b);
                break;
            }
            self.buf.push(b | 0x80);
        }
    }

    pub fn struct_begin(&mut self) {
        self.last_field_id.push(0);
    }

    pub fn struct_end(&mut self) {
        self.buf.push(0);
        self.last_field_id.pop();
    }

    fn field_header(&mut self, id: i16, ty: FieldType) {
        let last = *self.last_field_id.last().expect("field outside struct");
        let delta = id - last;
        if (1..=15).contains(&delta) {
            self.buf.push(((delta as u8) << 4) | ty as u8);
        } else {
            self.buf.push(ty as u8);
            let zz = zigzag_i64(id as i64);
            self.write_varint(zz);
        }
        *self.last_field_id.last_mut().expect("field outside struct") = id;
    }

    pub fn field_bool(&mut self, id: i16, v: bool) {
        let ty = if v {
            FieldType::BooleanTrue
        } else {
            FieldType::BooleanFalse
        };
        self.field_header(id, ty);
    }

    pub fn field_i32(&mut self, id: i16, v: i32) {
        self.field_header(id, FieldType::I32);
        self.write_varint(zigzag_i64(v as i64));
    }

    pub fn field_i64(&mut self, id: i16, v: i64) {
        self.field_header(id, FieldType::I64);
        self.write_varint(zigzag_i64(v));
    }

    pub fn field_binary(&mut self, id: i16, v: &[u8]) {
        self.field_header(id, FieldType::Binary);
        self.write_varint(v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    pub fn field_string(&mut self, id: i16, v: &str) {
        self.field_binary(id, v.as_bytes());
    }

    /// Begins a list-typed field; the caller writes `len` elements next.
    pub fn field_list(&mut self, id: i16, elem: FieldType, len: usize) {
        self.field_header(id, FieldType::List);
        self.list_header(elem, len);
    }

    fn list_header(&mut self, elem: FieldType, len: usize) {
        if len < 15 {
            self.buf.push(((len as u8) << 4) | elem as u8);
        } else {
            self.buf.push(0xf0 | elem as u8);
            self.write_varint(len as u64);
        }
    }

    /// Begins a struct-typed field; pair with `struct_begin`/`struct_end`.
    pub fn field_struct(&mut self, id: i16) {
        self.field_header(id, FieldType::Struct);
    }

    pub fn elem_i32(&mut self, v: i32) {
        self.write_varint(zigzag_i64(v as i64));
    }

    pub fn elem_string(&mut self, v: &str) {
        self.write_varint(v.len() as u64);
        self.buf.extend_from_slice(v.as_bytes());
    }
}

/// Streaming reader over a footer byte slice.
pub struct CompactReader<'a> {
    buf: &'a [u8],
    pos: usize,
    last_field_id: Vec<i16>,
}

/// A decoded field header: `None` marks the end of the current struct.
pub type FieldHeader = Option<(i16, FieldType)>;

impl<'a> CompactReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            last_field_id: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn truncated(&self) -> Error {
        Error::InvalidInput {
            source: "truncated metadata while decoding footer".into(),
            location: location!(),
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(b)
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut v: u64 = 0;
        let mut shift = 0u32;
        loop {
            let b = self.read_byte()?;
            v |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(v);
            }
            shift += 7;
            if shift > 63 {
                return Err(Error::InvalidInput {
                    source: "varint overflow in footer".into(),
                    location: location!(),
                });
            }
        }
    }

    pub fn struct_begin(&mut self) {
        self.last_field_id.push(0);
    }

    pub fn struct_end(&mut self) {
        self.last_field_id.pop();
    }

    /// Reads the next field header of the current struct.
    pub fn field_header(&mut self) -> Result<FieldHeader> {
        let b = self.read_byte()?;
        if b == 0 {
            return Ok(None);
        }
        let ty = FieldType::from_nibble(b & 0x0f)?;
        let delta = (b >> 4) as i16;
        let id = if delta == 0 {
            unzigzag_i64(self.read_varint()?) as i16
        } else {
            self.last_field_id.last().copied().unwrap_or(0) + delta
        };
        if let Some(last) = self.last_field_id.last_mut() {
            *last = id;
        }
        Ok(Some((id, ty)))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(unzigzag_i64(self.read_varint()?) as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(unzigzag_i64(self.read_varint()?))
    }

    pub fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint()? as usize;
        let end = self.pos.checked_add(len).ok_or_else(|| self.truncated())?;
        if end > self.buf.len() {
            return Err(self.truncated());
        }
        let out = self.buf[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }

    pub fn read_string(&mut self) -> Result<String> {
        String::from_utf8(self.read_binary()?).map_err(|e| Error::InvalidInput {
            source: format!("invalid UTF-8 in footer string: {e}").into(),
            location: location!(),
        })
    }

    /// Reads a list header, returning `(element type, length)`.
    pub fn list_header(&mut self) -> Result<(FieldType, usize)> {
        let b = self.read_byte()?;
        let ty = FieldType::from_nibble(b & 0x0f)?;
        let len = (b >> 4) as usize;
        let len = if len == 15 {
            self.read_varint()? as usize
        } else {
            len
        };
        Ok((ty, len))
    }

    /// Skips over a value of the given type, recursively for containers.
    pub fn skip(&mut self, ty: FieldType) -> Result<()> {
        match ty {
            FieldType::BooleanTrue | FieldType::BooleanFalse => Ok(()),
            FieldType::Byte => self.read_byte().map(|_| ()),
            FieldType::I16 | FieldType::I32 | FieldType::I64 => self.read_varint().map(|_| ()),
            FieldType::Double => {
                if self.pos + 8 > self.buf.len() {
                    return Err(self.truncated());
                }
                self.pos += 8;
                Ok(())
            }
            FieldType::Binary => self.read_binary().map(|_| ()),
            FieldType::List | FieldType::Set => {
                let (elem, len) = self.list_header()?;
                for _ in 0..len {
                    self.skip(elem)?;
                }
                Ok(())
            }
            FieldType::Map => {
                let b = self.read_byte()?;
                if b == 0 {
                    return Ok(());
                }
                // Non-empty map: byte was the first size varint byte.
                self.pos -= 1;
                let len = self.read_varint()? as usize;
                let kv = self.read_byte()?;
                let key = FieldType::from_nibble(kv >> 4)?;
                let val = FieldType::from_nibble(kv & 0x0f)?;
                for _ in 0..len {
                    self.skip(key)?;
                    self.skip(val)?;
                }
                Ok(())
            }
            FieldType::Struct => {
                self.struct_begin();
                while let Some((_, fty)) = self.field_header()? {
                    self.skip(fty)?;
                }
                self.struct_end();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_zigzag_roundtrip() {
        for v in [0i64, 1, -1, 63, -64, 1 << 20, -(1 << 40), i64::MAX, i64::MIN] {
            assert_eq!(unzigzag_i64(zigzag_i64(v)), v);
        }
    }

    #[test]
    fn test_struct_roundtrip_with_unknown_field() {
        let mut w = CompactWriter::new();
        w.struct_begin();
        w.field_i32(1, 42);
        w.field_string(4, "name");
        w.field_i64(20, -7);
        w.field_bool(21, true);
        w.struct_end();
        let bytes = w.into_bytes();

        let mut r = CompactReader::new(&bytes);
        r.struct_begin();
        let mut seen = Vec::new();
        while let Some((id, ty)) = r.field_header().unwrap() {
            match id {
                1 => seen.push(r.read_i32().unwrap() as i64),
                20 => seen.push(r.read_i64().unwrap()),
                // Field 4 and 21 are "unknown" to this reader.
                _ => r.skip(ty).unwrap(),
            }
        }
        r.struct_end();
        assert_eq!(seen, vec![42, -7]);
        assert_eq!(r.position(), bytes.len());
    }

    #[test]
    fn test_long_list_header() {
        let mut w = CompactWriter::new();
        w.struct_begin();
        w.field_list(2, FieldType::I32, 300);
        for i in 0..300 {
            w.elem_i32(i);
        }
        w.struct_end();
        let bytes = w.into_bytes();

        let mut r = CompactReader::new(&bytes);
        r.struct_begin();
        let (id, ty) = r.field_header().unwrap().unwrap();
        assert_eq!(id, 2);
        assert_eq!(ty, FieldType::List);
        let (elem, len) = r.list_header().unwrap();
        assert_eq!(elem, FieldType::I32);
        assert_eq!(len, 300);
        for i in 0..300 {
            assert_eq!(r.read_i32().unwrap(), i);
        }
        assert!(r.field_header().unwrap().is_none());
    }
}
