//! Browser native-messaging framing (spec.md §4.1): a 4-byte
//! little-endian length prefix followed by that many bytes of UTF-8 JSON,
//! over standard input/output.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde_json::Value;
use thiserror::Error;

/// Frames larger than this are a fatal decode error (spec.md §4.1).
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("I/O error reading frame: {0}")]
    Io(#[from] io::Error),
    #[error("frame length {0} exceeds the {MAX_FRAME_LEN}-byte maximum")]
    TooLarge(u32),
    #[error("frame body is not valid UTF-8 JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("end of input")]
    Eof,
}

/// Reads one frame from `reader`. `Err(FramingError::Eof)` on a clean
/// EOF at a frame boundary is the normal shutdown signal, not a fault.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Value, FramingError> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(FramingError::Eof),
        Err(e) => return Err(e.into()),
    };
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(FramingError::TooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Writes one frame to `writer` and flushes it — the bridge reads
/// synchronously and will stall if the length prefix sits in a buffer.
pub fn write_frame<W: Write>(writer: &mut W, value: &Value) -> Result<(), FramingError> {
    let body = serde_json::to_vec(value)?;
    if body.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(FramingError::TooLarge(body.len() as u32));
    }
    writer.write_u32::<LittleEndian>(body.len() as u32)?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_frame() {
        let original = serde_json::json!({"id": 1, "command": "ping", "params": {}});
        let mut buf = Vec::new();
        write_frame(&mut buf, &original).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(MAX_FRAME_LEN + 1).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor), Err(FramingError::TooLarge(_))));
    }

    #[test]
    fn clean_eof_is_reported_distinctly() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(read_frame(&mut cursor), Err(FramingError::Eof)));
    }
}
