use std::io::{self, Read};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("end of stream after {0} bytes")]
    Eof(u64),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Sequential reader of fixed-width primitives.
///
/// Wraps any `Read` (a byte slice, a transport stream) and tracks how many bytes have
/// been consumed. Characters are one byte wide.
pub struct ByteCursor<R> {
    inner: R,
    order: ByteOrder,
    pos: u64,
}

macro_rules! next_num {
    ($name:ident, $ty:ty, $n:expr) => {
        pub fn $name(&mut self) -> Result<$ty, CursorError> {
            let b = self.take::<$n>()?;
            Ok(match self.order {
                ByteOrder::Big => <$ty>::from_be_bytes(b),
                ByteOrder::Little => <$ty>::from_le_bytes(b),
            })
        }
    };
}

impl<R: Read> ByteCursor<R> {
    pub fn new(inner: R) -> Self {
        Self::with_order(inner, ByteOrder::Big)
    }

    pub fn with_order(inner: R, order: ByteOrder) -> Self {
        Self {
            inner,
            order,
            pos: 0,
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CursorError> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Fill `buf`, counting every byte consumed even when the stream ends part way, so
    /// `Eof` reports where the stream actually stopped.
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), CursorError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(CursorError::Eof(self.pos)),
                Ok(n) => {
                    filled += n;
                    self.pos += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CursorError::Io(e)),
            }
        }
        Ok(())
    }

    pub fn next_u8(&mut self) -> Result<u8, CursorError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn next_i8(&mut self) -> Result<i8, CursorError> {
        Ok(self.next_u8()? as i8)
    }

    next_num!(next_i16, i16, 2);
    next_num!(next_i32, i32, 4);
    next_num!(next_i64, i64, 8);
    next_num!(next_f32, f32, 4);
    next_num!(next_f64, f64, 8);

    /// Read exactly `n` characters.
    pub fn next_chars(&mut self, n: usize) -> Result<String, CursorError> {
        // Grow with the data actually read; `n` comes from configuration.
        let mut buf = Vec::new();
        let got = (&mut self.inner).take(n as u64).read_to_end(&mut buf)?;
        self.pos += got as u64;
        if got < n {
            return Err(CursorError::Eof(self.pos));
        }
        Ok(buf.iter().map(|&b| b as char).collect())
    }

    /// Read a NUL-terminated string; the terminator is consumed but not returned.
    pub fn next_string(&mut self) -> Result<String, CursorError> {
        let mut out = String::new();
        loop {
            match self.next_u8()? {
                0 => return Ok(out),
                b => out.push(b as char),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_default() {
        let data = [0x01, 0x02, 0x00, 0x00, 0x00, 0x2A];
        let mut c = ByteCursor::new(&data[..]);
        assert_eq!(c.next_i16().unwrap(), 0x0102);
        assert_eq!(c.next_i32().unwrap(), 42);
        assert_eq!(c.position(), 6);
    }

    #[test]
    fn test_little_endian() {
        let data = 1.5f32.to_le_bytes();
        let mut c = ByteCursor::with_order(&data[..], ByteOrder::Little);
        assert_eq!(c.next_f32().unwrap(), 1.5);
    }

    #[test]
    fn test_strings() {
        let data = b"abcdhello\0rest";
        let mut c = ByteCursor::new(&data[..]);
        assert_eq!(c.next_chars(4).unwrap(), "abcd");
        assert_eq!(c.next_string().unwrap(), "hello");
        assert_eq!(c.position(), 10);
    }

    #[test]
    fn test_short_read_is_eof() {
        let data = [0x01, 0x02, 0x03];
        let mut c = ByteCursor::new(&data[..]);
        assert!(matches!(c.next_i32(), Err(CursorError::Eof(3))));
        assert_eq!(c.position(), 3);
    }

    #[test]
    fn test_short_chars_is_eof_without_reserving() {
        let mut c = ByteCursor::new(&b"ab"[..]);
        assert!(matches!(c.next_chars(usize::MAX), Err(CursorError::Eof(2))));
    }

    /// Hands out one byte per read call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match (self.0.split_first(), buf.first_mut()) {
                (Some((b, rest)), Some(slot)) => {
                    *slot = *b;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_short_reads_are_reassembled() {
        let data = 0x0102_0304i32.to_be_bytes();
        let mut c = ByteCursor::new(Trickle(&data));
        assert_eq!(c.next_i32().unwrap(), 0x0102_0304);
        assert_eq!(c.position(), 4);
    }
}
