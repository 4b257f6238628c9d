use super::ByteRange;
use crate::error::Error;
use std::io::{self, Read};

/// Reader yielding only the bytes selected by a [`ByteRange`].
///
/// Everything before `start1`, the gap, and everything after the second
/// interval is skipped. An inner reader that runs short simply ends the
/// stream early. After [`close`](Self::close) every read fails.
pub struct ByteRangeInputStream<R> {
    inner: Option<R>,
    range: ByteRange,
    position: u64,
    exhausted: bool,
}

impl<R: Read> ByteRangeInputStream<R> {
    /// Filter `inner` through `range`.
    pub fn new(inner: R, range: ByteRange) -> Self {
        Self {
            inner: Some(inner),
            range,
            position: 0,
            exhausted: false,
        }
    }

    /// The range being applied.
    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// Release the underlying reader. Calling this twice is a no-op.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            log::trace!("Closed byte-range stream over {}", self.range);
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// The interval containing or following the current position.
    fn next_segment(&self) -> Option<(u64, u64)> {
        self.range
            .segments()
            .into_iter()
            .map(|(start, len)| (start, start + len))
            .find(|&(start, end)| end > start && self.position < end)
    }
}

impl<R: Read> Read for ByteRangeInputStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inner.is_none() {
            return Err(io::Error::new(io::ErrorKind::Other, Error::StreamClosed));
        }
        if buf.is_empty() || self.exhausted {
            return Ok(0);
        }

        let Some((start, end)) = self.next_segment() else {
            return Ok(0);
        };
        let Some(inner) = self.inner.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, Error::StreamClosed));
        };

        if self.position < start {
            let wanted = start - self.position;
            let skipped = io::copy(&mut inner.by_ref().take(wanted), &mut io::sink())?;
            self.position += skipped;
            if skipped < wanted {
                self.exhausted = true;
                return Ok(0);
            }
        }

        let remaining = usize::try_from(end - self.position).unwrap_or(usize::MAX);
        let want = buf.len().min(remaining);
        let n = inner.read(&mut buf[..want])?;
        if n == 0 {
            self.exhausted = true;
        }
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    fn read_all(range: ByteRange) -> Vec<u8> {
        let mut out = Vec::new();
        ByteRangeInputStream::new(Cursor::new(ALPHABET), range)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_two_intervals() {
        assert_eq!(read_all(ByteRange::new(0, 4, 10, 5).unwrap()), b"0123abcde");
    }

    #[test]
    fn test_both_intervals_empty() {
        assert_eq!(read_all(ByteRange::new(0, 0, 10, 0).unwrap()), b"");
    }

    #[test]
    fn test_empty_first_interval() {
        assert_eq!(read_all(ByteRange::new(0, 0, 10, 3).unwrap()), b"abc");
    }

    #[test]
    fn test_skips_before_first_interval() {
        assert_eq!(read_all(ByteRange::new(2, 2, 30, 2).unwrap()), b"23uv");
    }

    #[test]
    fn test_clamped_at_end_of_source() {
        assert_eq!(read_all(ByteRange::new(0, 2, 34, 100).unwrap()), b"01yz");
        assert_eq!(read_all(ByteRange::new(40, 2, 50, 2).unwrap()), b"");
    }

    #[test]
    fn test_byte_at_a_time_matches_bulk() {
        let range = ByteRange::new(3, 7, 20, 9).unwrap();
        let mut stream = ByteRangeInputStream::new(Cursor::new(ALPHABET), range);
        let mut single = Vec::new();
        let mut byte = [0u8; 1];
        while stream.read(&mut byte).unwrap() == 1 {
            single.push(byte[0]);
        }
        assert_eq!(single, read_all(range));
    }

    #[test]
    fn test_read_after_close_fails() {
        let mut stream =
            ByteRangeInputStream::new(Cursor::new(ALPHABET), ByteRange::new(0, 4, 10, 5).unwrap());
        let mut buf = [0u8; 2];
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        stream.close();
        stream.close();
        assert!(stream.is_closed());
        let err = stream.read(&mut buf).unwrap_err();
        assert!(err.to_string().contains("Stream closed"));
    }
}
