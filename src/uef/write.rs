/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
use core::convert::TryFrom;
use std::io::{Error, ErrorKind, Result, Write};

use super::{Chunk, UefVersion, UEF_SIGNATURE};

/// A tool for writing UEF chunk records to byte streams.
///
/// Unlike tape formats that only learn a block's length when it has been
/// written, every UEF chunk knows its payload size up front, so records are
/// emitted in a single forward pass and no [Seek][std::io::Seek] bound is
/// required of the stream.
#[derive(Debug)]
pub struct UefChunkWriter<W> {
    inner: W,
}

impl<W> UefChunkWriter<W> {
    /// Returns a shared reference to the inner writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }
    /// Returns a mutable reference to the inner writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> UefChunkWriter<W> {
    /// Returns a new instance of `UefChunkWriter` after writing the UEF preamble.
    pub fn new(mut wr: W, version: UefVersion) -> Result<Self> {
        wr.write_all(UEF_SIGNATURE)?;
        wr.write_all(&[version.minor, version.major])?;
        Ok(UefChunkWriter { inner: wr })
    }

    /// Writes a single chunk record.
    pub fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        let length = u32::try_from(chunk.data.len()).map_err(|_|
                        Error::new(ErrorKind::InvalidData, "UEF chunk too large."))?;
        self.inner.write_all(&chunk.kind.to_le_bytes())?;
        self.inner.write_all(&length.to_le_bytes())?;
        self.inner.write_all(&chunk.data)
    }

    /// Flushes the underlying writer (invokes [Write::flush]).
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uef::{kind, parse_uef};

    #[test]
    fn write_uef_works() {
        let chunks = vec![
            Chunk::new(kind::BASE_FREQUENCY, 1000.0f32.to_le_bytes().to_vec()),
            Chunk::new(0x0005, vec![1]),
        ];
        let mut writer = UefChunkWriter::new(Vec::new(), UefVersion::default()).unwrap();
        for chunk in &chunks {
            writer.write_chunk(chunk).unwrap();
        }
        let bytes = writer.into_inner();
        assert_eq!(chunks, parse_uef(&bytes).unwrap().chunks);
    }
}
