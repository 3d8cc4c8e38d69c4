/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
/*! **UEF** container format utilities.

# UEF format

A *UEF* file begins with the 10 byte signature `b"UEF File!\0"` and two
version bytes (minor before major), followed by a sequence of chunk records:

| offset | size | description                        |
|--------|------|------------------------------------|
|    0   |    2 | chunk kind code (LSB first)        |
|    2   |    4 | payload length in bytes (LSB first)|
|    6   |  ... | payload                            |

This module performs purely structural parsing: any kind code is accepted and
its payload preserved byte for byte. Giving meaning to the supported kinds is
the job of the [tape][crate::tape] module.

## Reading byte containers

[parse_uef] interprets a whole byte slice:

```no_run
use uef_cassette::uef::parse_uef;

let bytes = std::fs::read("some.uef")?;
let file = parse_uef(&bytes)?;
for chunk in &file.chunks {
    println!("{}", chunk);
}
# Ok::<(), uef_cassette::Error>(())
```

## Directly from readers

[UefChunkReader] reads chunks from any byte stream implementing [Read]:

```no_run
use uef_cassette::uef::UefChunkReader;

let file = std::fs::File::open("some.uef")?;
let mut reader = UefChunkReader::new(std::io::BufReader::new(file))?;
while let Some(chunk) = reader.next_chunk()? {
    println!("{}", chunk);
}
# Ok::<(), uef_cassette::Error>(())
```

[Read]: std::io::Read
*/
use core::fmt;
use std::io::Write;

use nom::Offset;
use nom::bytes::complete::tag;
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::sequence::pair;
use nom::IResult;

use crate::{Error, Result};

mod read;
mod write;
pub use read::*;
pub use write::*;

/// The UEF file signature, including the terminating `NUL`.
pub const UEF_SIGNATURE: &[u8; 10] = b"UEF File!\0";

/// Kind codes of the chunk kinds this crate gives meaning to.
pub mod kind {
    /// Implicit start/stop bit tape data block.
    pub const DATA_IMPLICIT: u16   = 0x0100;
    /// Defined tape format data block.
    pub const DATA_DEFINED: u16    = 0x0104;
    /// Carrier tone.
    pub const CARRIER: u16         = 0x0110;
    /// Carrier tone with dummy byte.
    pub const CARRIER_DUMMY: u16   = 0x0111;
    /// Integer gap.
    pub const INTEGER_GAP: u16     = 0x0112;
    /// Change of base frequency.
    pub const BASE_FREQUENCY: u16  = 0x0113;
    /// Security cycles.
    pub const SECURITY_CYCLES: u16 = 0x0114;
    /// Phase change.
    pub const PHASE_CHANGE: u16    = 0x0115;
    /// Floating point gap.
    pub const FLOAT_GAP: u16       = 0x0116;
}

/// The UEF format version carried in the file preamble.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UefVersion {
    pub minor: u8,
    pub major: u8
}

/// A single UEF chunk: a 16-bit kind code and its raw payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub kind: u16,
    pub data: Vec<u8>
}

/// A structurally parsed UEF container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UefFile {
    pub version: UefVersion,
    pub chunks: Vec<Chunk>
}

impl Default for UefVersion {
    fn default() -> Self {
        UefVersion { minor: 10, major: 0 }
    }
}

impl fmt::Display for UefVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

impl Chunk {
    /// Creates a chunk from a kind code and payload bytes.
    pub fn new<D: Into<Vec<u8>>>(kind: u16, data: D) -> Self {
        Chunk { kind, data: data.into() }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{:04x} {} bytes:", self.kind, self.data.len())?;
        for byte in self.data.iter().take(10) {
            write!(f, " {:02x}", byte)?;
        }
        if self.data.len() > 10 {
            write!(f, " ..")?;
        }
        Ok(())
    }
}

fn preamble(i: &[u8]) -> IResult<&[u8], UefVersion> {
    let (i, _) = tag(&UEF_SIGNATURE[..])(i)?;
    let (i, (minor, major)) = pair(le_u8, le_u8)(i)?;
    Ok((i, UefVersion { minor, major }))
}

fn chunk_header(i: &[u8]) -> IResult<&[u8], (u16, u32)> {
    pair(le_u16, le_u32)(i)
}

/// Parses a whole byte slice as a UEF container.
///
/// Fails with [Error::InvalidSignature] if the preamble does not match and
/// with [Error::Truncated]/[Error::TruncatedHeader], identifying the byte
/// offset of the fault, if the input ends in the middle of a record.
/// Unknown chunk kinds are preserved verbatim.
pub fn parse_uef(input: &[u8]) -> Result<UefFile> {
    let (mut rest, version) = preamble(input).map_err(|_| Error::InvalidSignature)?;
    let mut chunks = Vec::new();
    while !rest.is_empty() {
        let offset = input.offset(rest);
        let (after, (kind, length)) = chunk_header(rest).map_err(|_|
                                        Error::TruncatedHeader { offset })?;
        let expected = length as usize;
        if after.len() < expected {
            return Err(Error::Truncated { offset, kind, expected, remaining: after.len() });
        }
        let (payload, after) = after.split_at(expected);
        chunks.push(Chunk { kind, data: payload.to_vec() });
        rest = after;
    }
    Ok(UefFile { version, chunks })
}

impl UefFile {
    /// Creates a UEF container with the default version from the given chunks.
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        UefFile { version: UefVersion::default(), chunks }
    }

    /// Serializes the container, the exact inverse of [parse_uef].
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = 12 + self.chunks.iter().map(|c| 6 + c.data.len()).sum::<usize>();
        let mut bytes = Vec::with_capacity(size);
        self.write(&mut bytes).expect("writing to a vec never fails");
        bytes
    }

    /// Writes the container to the given writer.
    pub fn write<W: Write>(&self, wr: W) -> Result<()> {
        let mut writer = UefChunkWriter::new(wr, self.version)?;
        for chunk in &self.chunks {
            writer.write_chunk(chunk)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Unwraps the raw bytes of a possibly gzip-compressed or zip-archived UEF file.
///
/// A gzip stream is decompressed; from a zip archive the first member with a
/// `.uef` extension is extracted. Anything else is passed through untouched.
/// The result still needs to be parsed with [parse_uef].
#[cfg(feature = "compression")]
pub fn extract_uef_bytes(raw: Vec<u8>) -> Result<Vec<u8>> {
    use std::io::{Cursor, Error as IoError, ErrorKind, Read};
    use compression::prelude::*;

    if raw.starts_with(&[0x1f, 0x8b]) {
        return raw.iter().copied()
                  .decode(&mut GZipDecoder::new())
                  .collect::<core::result::Result<Vec<_>, _>>()
                  .map_err(|e| IoError::new(ErrorKind::InvalidData,
                                format!("gzip: {}", e)).into());
    }
    if raw.starts_with(b"PK\x03\x04") {
        let mut archive = zip::ZipArchive::new(Cursor::new(&raw)).map_err(|e|
                            IoError::new(ErrorKind::InvalidData, format!("zip: {}", e)))?;
        for index in 0..archive.len() {
            let mut file = archive.by_index(index).map_err(|e|
                            IoError::new(ErrorKind::InvalidData, format!("zip: {}", e)))?;
            if file.name().to_ascii_lowercase().ends_with(".uef") {
                let mut bytes = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut bytes)?;
                return Ok(bytes);
            }
        }
        return Err(IoError::new(ErrorKind::InvalidData,
                    "no UEF files found in ZIP archive").into());
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> UefFile {
        UefFile::from_chunks(vec![
            Chunk::new(kind::CARRIER, 1500u16.to_le_bytes().to_vec()),
            Chunk::new(kind::DATA_IMPLICIT, vec![0xdc]),
            Chunk::new(0x0000, b"origin".to_vec()),
            Chunk::new(0x7fff, Vec::new()),
        ])
    }

    #[test]
    fn uef_round_trip_works() {
        let file = sample_file();
        let bytes = file.to_bytes();
        assert_eq!(&bytes[..10], &UEF_SIGNATURE[..]);
        assert_eq!(&bytes[10..12], &[10, 0]);
        let parsed = parse_uef(&bytes).unwrap();
        assert_eq!(file, parsed);
    }

    #[test]
    fn unknown_chunks_survive_byte_for_byte() {
        let bytes = sample_file().to_bytes();
        let parsed = parse_uef(&bytes).unwrap();
        assert_eq!(parsed.chunks[2].data, b"origin".to_vec());
        assert_eq!(parsed.chunks[3].data, Vec::<u8>::new());
        assert_eq!(bytes, parsed.to_bytes());
    }

    #[test]
    fn invalid_signature_is_detected() {
        assert!(matches!(parse_uef(b"TAP File!\0\x0a\x00"), Err(Error::InvalidSignature)));
        assert!(matches!(parse_uef(b"UEF"), Err(Error::InvalidSignature)));
    }

    #[test]
    fn truncated_input_is_detected() {
        // preamble: 12 bytes, then chunks of 8, 7, 12 and 6 bytes
        let mut bytes = sample_file().to_bytes();
        assert_eq!(45, bytes.len());
        // cut into the payload of the third chunk
        bytes.truncate(35);
        match parse_uef(&bytes) {
            Err(Error::Truncated { offset: 27, kind: 0x0000, expected: 6, remaining: 2 }) => {}
            res => panic!("unexpected result: {:?}", res)
        }
        // cut into the header of the first chunk
        bytes.truncate(15);
        match parse_uef(&bytes) {
            Err(Error::TruncatedHeader { offset: 12 }) => {}
            res => panic!("unexpected result: {:?}", res)
        }
    }

    #[test]
    fn chunk_display_works() {
        let chunk = Chunk::new(kind::DATA_IMPLICIT, vec![0x2a; 12]);
        assert_eq!("&0100 12 bytes: 2a 2a 2a 2a 2a 2a 2a 2a 2a 2a ..",
                   format!("{}", chunk));
    }
}
