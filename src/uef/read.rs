/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
use std::io::Read;

use crate::{Error, ReadExactEx, Result};
use super::{Chunk, UefVersion, UEF_SIGNATURE};

/// Implements a reader of UEF chunks from any byte stream.
///
/// The preamble is read and validated on construction; chunk records follow
/// sequentially via [UefChunkReader::next_chunk].
#[derive(Debug)]
pub struct UefChunkReader<R> {
    version: UefVersion,
    offset: usize,
    inner: R,
}

/// Implements an iterator of [Chunk]s over a [UefChunkReader].
#[derive(Debug)]
pub struct UefChunkIter<R> {
    reader: UefChunkReader<R>,
    done: bool,
}

impl<R> UefChunkReader<R> {
    /// Returns the version from the file preamble.
    pub fn version(&self) -> UefVersion {
        self.version
    }
    /// Returns the byte offset of the next chunk record.
    pub fn offset(&self) -> usize {
        self.offset
    }
    /// Returns a shared reference to the inner reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }
    /// Returns a mutable reference to the inner reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> UefChunkReader<R> {
    /// Creates a new `UefChunkReader`, reading and validating the UEF preamble.
    pub fn new(mut rd: R) -> Result<Self> {
        let mut preamble = [0u8; 12];
        if rd.read_exact_or_to_end(&mut preamble)? != preamble.len()
                || &preamble[..10] != &UEF_SIGNATURE[..] {
            return Err(Error::InvalidSignature);
        }
        let version = UefVersion { minor: preamble[10], major: preamble[11] };
        Ok(UefChunkReader { version, offset: preamble.len(), inner: rd })
    }

    /// Reads the next chunk record.
    ///
    /// Returns `Ok(None)` at a clean end of the stream. A stream ending in the
    /// middle of a record yields [Error::TruncatedHeader] or [Error::Truncated]
    /// identifying the byte offset of the fault.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let offset = self.offset;
        let mut head = [0u8; 6];
        let read = self.inner.read_exact_or_to_end(&mut head)?;
        if read == 0 {
            return Ok(None);
        }
        if read < head.len() {
            return Err(Error::TruncatedHeader { offset });
        }
        let kind = u16::from_le_bytes([head[0], head[1]]);
        let expected = u32::from_le_bytes([head[2], head[3], head[4], head[5]]) as usize;
        let mut data = vec![0u8; expected];
        let remaining = self.inner.read_exact_or_to_end(&mut data)?;
        if remaining < expected {
            return Err(Error::Truncated { offset, kind, expected, remaining });
        }
        self.offset = offset + head.len() + expected;
        Ok(Some(Chunk { kind, data }))
    }

    /// Converts this reader into an iterator of chunk results.
    pub fn chunks(self) -> UefChunkIter<R> {
        UefChunkIter { reader: self, done: false }
    }
}

impl<R: Read> Iterator for UefChunkIter<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::uef::{kind, UefFile};

    #[test]
    fn read_uef_works() {
        let file = UefFile::from_chunks(vec![
            Chunk::new(kind::CARRIER, 600u16.to_le_bytes().to_vec()),
            Chunk::new(kind::INTEGER_GAP, 600u16.to_le_bytes().to_vec()),
        ]);
        let mut reader = UefChunkReader::new(Cursor::new(file.to_bytes())).unwrap();
        assert_eq!(UefVersion { minor: 10, major: 0 }, reader.version());
        assert_eq!(12, reader.offset());
        let chunks: Vec<_> = reader.chunks().collect::<Result<_>>().unwrap();
        assert_eq!(file.chunks, chunks);
    }

    #[test]
    fn read_empty_stream_fails() {
        assert!(matches!(UefChunkReader::new(Cursor::new(Vec::<u8>::new())),
                         Err(Error::InvalidSignature)));
    }

    #[test]
    fn read_truncated_stream_fails() {
        let bytes = UefFile::from_chunks(vec![
            Chunk::new(kind::CARRIER, 600u16.to_le_bytes().to_vec()),
        ]).to_bytes();
        let mut reader = UefChunkReader::new(Cursor::new(&bytes[..bytes.len() - 1])).unwrap();
        match reader.next_chunk() {
            Err(Error::Truncated { offset: 12, kind: kind::CARRIER, expected: 2, remaining: 1 }) => {}
            res => panic!("unexpected result: {:?}", res)
        }
    }
}
