//! Bytecode buffer and binary IO
//!
//! The parser emits bytecode through a [`BinaryWriter`], which supports
//! `tell`/`seek` so forward jump targets can be backfilled once known without
//! disturbing the append position. The VM reads the same stream back through
//! a [`BinaryReader`]. All multi-byte values are little-endian.

use crate::error::ScriptError;

/// Magic bytes identifying a Jinx bytecode buffer.
pub const BYTECODE_MAGIC: [u8; 8] = *b"JinxByte";

/// Current bytecode format version.
pub const BYTECODE_VERSION: u32 = 1;

/// Size in bytes of the serialized [`BytecodeHeader`].
pub const BYTECODE_HEADER_SIZE: usize = 16;

/// Fixed-size header at the front of every bytecode buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytecodeHeader {
    pub magic: [u8; 8],
    pub version: u32,
    /// Total buffer size in bytes, including this header.
    pub size: u32,
}

impl Default for BytecodeHeader {
    fn default() -> Self {
        BytecodeHeader {
            magic: BYTECODE_MAGIC,
            version: BYTECODE_VERSION,
            size: 0,
        }
    }
}

impl BytecodeHeader {
    pub fn write(&self, writer: &mut BinaryWriter<'_>) {
        writer.write_bytes(&self.magic);
        writer.write_u32(self.version);
        writer.write_u32(self.size);
    }

    pub fn read(reader: &mut BinaryReader<'_>) -> Result<BytecodeHeader, ScriptError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        let version = reader.read_u32()?;
        let size = reader.read_u32()?;
        if magic != BYTECODE_MAGIC || version != BYTECODE_VERSION {
            return Err(ScriptError::InvalidBytecode);
        }
        Ok(BytecodeHeader { magic, version, size })
    }
}

/// Growable byte buffer underlying bytecode emission.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    bytes: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Buffer { bytes: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Position-addressable writer over a [`Buffer`].
///
/// Writing past the end appends; writing inside the buffer overwrites in
/// place, which is how jump placeholders get their final targets.
pub struct BinaryWriter<'a> {
    buffer: &'a mut Buffer,
    pos: usize,
}

impl<'a> BinaryWriter<'a> {
    pub fn new(buffer: &'a mut Buffer) -> Self {
        let pos = buffer.len();
        BinaryWriter { buffer, pos }
    }

    /// Current write position.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Move the write position. Seeking past the end is a logic error and
    /// clamps to the end of the buffer.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buffer.len());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        if self.pos == self.buffer.bytes.len() {
            self.buffer.bytes.extend_from_slice(bytes);
        } else {
            if end > self.buffer.bytes.len() {
                self.buffer.bytes.resize(end, 0);
            }
            self.buffer.bytes[self.pos..end].copy_from_slice(bytes);
        }
        self.pos = end;
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Length-prefixed UTF-8 string (4-byte length + bytes).
    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }
}

/// Sequential reader over a byte slice.
pub struct BinaryReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        BinaryReader { bytes, pos: 0 }
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<(), ScriptError> {
        let end = self.pos + out.len();
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ScriptError::InvalidBytecode)?;
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(())
    }

    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, ScriptError> {
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ScriptError::InvalidBytecode)?;
        self.pos = end;
        Ok(slice.to_vec())
    }

    pub fn read_u8(&mut self) -> Result<u8, ScriptError> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, ScriptError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_i32(&mut self) -> Result<i32, ScriptError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    pub fn read_u64(&mut self) -> Result<u64, ScriptError> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    pub fn read_i64(&mut self) -> Result<i64, ScriptError> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }

    pub fn read_f64(&mut self) -> Result<f64, ScriptError> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }

    /// Length-prefixed UTF-8 string written by [`BinaryWriter::write_str`].
    pub fn read_str(&mut self) -> Result<String, ScriptError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_vec(len)?;
        String::from_utf8(bytes).map_err(|_| ScriptError::InvalidBytecode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let mut buffer = Buffer::new();
        let mut writer = BinaryWriter::new(&mut buffer);
        writer.write_u8(0xAB);
        writer.write_u32(0xDEADBEEF);
        writer.write_i64(-12345);
        writer.write_f64(6.5);
        writer.write_str("héllo");

        let bytes = buffer.into_bytes();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_i64().unwrap(), -12345);
        assert_eq!(reader.read_f64().unwrap(), 6.5);
        assert_eq!(reader.read_str().unwrap(), "héllo");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_seek_overwrites_in_place() {
        let mut buffer = Buffer::new();
        let mut writer = BinaryWriter::new(&mut buffer);
        writer.write_u8(1);
        let placeholder = writer.tell();
        writer.write_u32(0);
        writer.write_u8(2);

        let end = writer.tell();
        writer.seek(placeholder);
        writer.write_u32(0x11223344);
        writer.seek(end);
        writer.write_u8(3);

        let bytes = buffer.into_bytes();
        assert_eq!(bytes, [1, 0x44, 0x33, 0x22, 0x11, 2, 3]);
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buffer = Buffer::new();
        let mut writer = BinaryWriter::new(&mut buffer);
        let header = BytecodeHeader {
            size: 64,
            ..Default::default()
        };
        header.write(&mut writer);
        assert_eq!(buffer.len(), BYTECODE_HEADER_SIZE);

        let bytes = buffer.into_bytes();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(BytecodeHeader::read(&mut reader).unwrap(), header);
    }

    #[test]
    fn test_reader_out_of_bounds() {
        let mut reader = BinaryReader::new(&[1, 2]);
        assert!(reader.read_u32().is_err());
    }
}
