//! TFRecord container framing.
//!
//! Each record on disk is
//! `{ length: u64 LE, masked_crc32c(length): u32 LE, payload, masked_crc32c(payload): u32 LE }`
//! using the CRC-32C (Castagnoli) polynomial and TensorFlow's CRC mask.

use std::io::{ErrorKind, Read, Write};

use anyhow::{bail, Context, Result};

const MASK_DELTA: u32 = 0xa282_ead8;

fn masked_crc32c(bytes: &[u8]) -> u32 {
    crc32c::crc32c(bytes).rotate_right(15).wrapping_add(MASK_DELTA)
}

pub fn write_record<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let length = (payload.len() as u64).to_le_bytes();
    writer.write_all(&length)?;
    writer.write_all(&masked_crc32c(&length).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.write_all(&masked_crc32c(payload).to_le_bytes())?;
    Ok(())
}

/// Read the next record payload. Returns `Ok(None)` at a clean end of file;
/// a file truncated mid-record or a checksum mismatch is an error.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut length_bytes = [0u8; 8];
    match reader.read_exact(&mut length_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("reading record length"),
    }

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes).context("truncated record header")?;
    if u32::from_le_bytes(crc_bytes) != masked_crc32c(&length_bytes) {
        bail!("record length checksum mismatch");
    }

    let length = u64::from_le_bytes(length_bytes) as usize;
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).context("truncated record payload")?;

    reader.read_exact(&mut crc_bytes).context("truncated record checksum")?;
    if u32::from_le_bytes(crc_bytes) != masked_crc32c(&payload) {
        bail!("record payload checksum mismatch");
    }

    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_crc32c_check_value() {
        // Castagnoli check value for "123456789"
        assert_eq!(crc32c::crc32c(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn test_record_round_trip() {
        let mut buffer = vec![];
        write_record(&mut buffer, b"hello").unwrap();
        write_record(&mut buffer, b"").unwrap();
        write_record(&mut buffer, &[7u8; 1024]).unwrap();

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_record(&mut cursor).unwrap().unwrap(), b"hello");
        assert_eq!(read_record(&mut cursor).unwrap().unwrap(), b"");
        assert_eq!(read_record(&mut cursor).unwrap().unwrap(), vec![7u8; 1024]);
        assert!(read_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut buffer = vec![];
        write_record(&mut buffer, b"hello world").unwrap();
        // flip one payload byte
        buffer[12] ^= 0xff;
        let mut cursor = Cursor::new(buffer);
        assert!(read_record(&mut cursor).is_err());
    }

    #[test]
    fn test_truncated_record_detected() {
        let mut buffer = vec![];
        write_record(&mut buffer, b"hello world").unwrap();
        buffer.truncate(buffer.len() - 6);
        let mut cursor = Cursor::new(buffer);
        assert!(read_record(&mut cursor).is_err());
    }
}
