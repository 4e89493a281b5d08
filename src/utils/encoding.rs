use std::io::{self, Read, Write};

/// Write a u32 in little-endian format
pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u32 in little-endian format
pub fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Write a u64 in little-endian format
pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u64 in little-endian format
pub fn read_u64_le<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a little-endian u64 at `pos`, None if it runs past the slice
#[inline]
pub fn u64_at(buf: &[u8], pos: usize) -> Option<u64> {
    let bytes = buf.get(pos..pos.checked_add(8)?)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Read a little-endian u32 at `pos`, None if it runs past the slice
#[inline]
pub fn u32_at(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Read the next little-endian u64, or None at a clean EOF
pub fn read_u64_or_eof<R: Read>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated u64",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_slice_readers_bounds() {
        let mut buf = Vec::new();
        write_u64_le(&mut buf, 42).unwrap();
        write_u32_le(&mut buf, 7).unwrap();

        assert_eq!(u64_at(&buf, 0), Some(42));
        assert_eq!(u32_at(&buf, 8), Some(7));
        assert_eq!(u64_at(&buf, 8), None);
        assert_eq!(u32_at(&buf, usize::MAX - 1), None);
    }

    #[test]
    fn test_read_u64_or_eof() {
        let mut buf = Vec::new();
        write_u64_le(&mut buf, 9).unwrap();
        buf.push(1);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_u64_or_eof(&mut cursor).unwrap(), Some(9));
        assert!(read_u64_or_eof(&mut cursor).is_err());

        let mut empty = Cursor::new(Vec::<u8>::new());
        assert_eq!(read_u64_or_eof(&mut empty).unwrap(), None);
    }
}
