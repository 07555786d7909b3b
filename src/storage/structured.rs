//! Checksummed structured file I/O.
//!
//! Small metadata files (barrel vocabularies) are written through
//! [`StructWriter`], which keeps a running CRC32 of every byte and appends it
//! on close. [`StructReader`] recomputes the checksum while reading so the
//! caller can verify the footer once the payload has been consumed.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{QuiverError, Result};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint;

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_raw(&[value])
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; varint::MAX_VARINT64_LEN];
        let len = varint::encode_u64_into(value, &mut buf);
        self.write_raw(&buf[..len])
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value.as_bytes())
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append the checksum footer, then flush and close the writer.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.hasher.clone().finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        if file_size < 4 {
            return Err(QuiverError::corruption("File too short for checksum"));
        }

        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            file_size,
        })
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut buf = [0u8; varint::MAX_VARINT64_LEN];
        for i in 0..buf.len() {
            self.read_exact(&mut buf[i..=i])?;
            if buf[i] & 0x80 == 0 {
                return Ok(varint::decode_u64(&buf[..=i])?.0);
            }
        }
        Err(QuiverError::corruption("VarInt overflows u64"))
    }

    /// Read a string with length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let length = self.read_varint()? as usize;
        if self.position + length as u64 > self.payload_size() {
            return Err(QuiverError::corruption("String runs past end of file"));
        }
        let mut bytes = vec![0u8; length];
        self.read_exact(&mut bytes)?;

        String::from_utf8(bytes).map_err(|e| QuiverError::corruption(format!("Invalid UTF-8: {e}")))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.position + buf.len() as u64 > self.payload_size() {
            return Err(QuiverError::corruption("Read past end of payload"));
        }
        self.reader.read_exact(buf)?;
        self.hasher.update(buf);
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Size of the file without the checksum footer.
    pub fn payload_size(&self) -> u64 {
        self.file_size - 4
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Check if the payload has been fully consumed.
    pub fn is_eof(&self) -> bool {
        self.position >= self.payload_size()
    }

    /// Verify the footer against the checksum of everything read so far.
    ///
    /// Must be called after the whole payload has been read.
    pub fn verify_checksum(&mut self) -> Result<bool> {
        if !self.is_eof() {
            return Err(QuiverError::contract(
                "Checksum verified before payload was consumed",
            ));
        }

        let stored_checksum = self.reader.read_u32::<LittleEndian>()?;
        Ok(stored_checksum == self.hasher.clone().finalize())
    }

    /// Close the reader.
    pub fn close(mut self) -> Result<()> {
        self.reader.close()
    }
}
