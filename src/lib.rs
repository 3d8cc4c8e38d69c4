/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    UEF-CASSETTE is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    UEF-CASSETTE is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
/*! Acorn cassette tape conversion utilities.

The crate bridges two representations of the same cassette recording:

* the **UEF** container format - a chunked binary file describing the logical
  events recorded on tape ([uef], [tape]),
* a sampled **PCM waveform** that physically reproduces those events as sound
  ([tape::signal]).

The [tape::TapeEvent] sum type is the intermediate representation both sides
agree on. The encode direction reads chunks, translates them to events and
[modulates][tape::signal::Modulator] them into samples. The decode direction
[demodulates][tape::signal::Demodulator] samples back into events which can be
re-serialized as chunks or scanned for [catalog] markers.

```no_run
use uef_cassette::{uef, tape, tape::signal::Modulator};

let bytes = std::fs::read("some.uef")?;
let file = uef::parse_uef(&bytes)?;
let (events, _stats) = tape::chunks_to_events(&file.chunks)?;
let samples: Vec<i16> = Modulator::new(44100).modulate(&events);
# Ok::<(), uef_cassette::Error>(())
```
*/
use std::io::{self, Read};

use thiserror::Error;

pub mod catalog;
pub mod sample;
pub mod tape;
pub mod uef;
#[cfg(feature = "wav")]
pub mod wav;

pub use sample::TapeSample;

/// The error type of fallible operations in this crate.
///
/// Only structural faults of the container are fatal. Signal-level decoding
/// imperfections are counted as anomalies by the
/// [Demodulator][tape::signal::Demodulator] and never abort a conversion;
/// unsupported chunk kinds are passed through opaque and reported via
/// [ChunkStats][tape::ChunkStats].
#[derive(Debug, Error)]
pub enum Error {
    /// The input does not begin with the UEF signature.
    #[error("not a UEF file: invalid signature")]
    InvalidSignature,
    /// The input ended in the middle of a chunk header.
    #[error("UEF stream truncated at byte {offset}: chunk header cut short")]
    TruncatedHeader { offset: usize },
    /// A chunk payload extends past the end of the input.
    #[error("UEF stream truncated at byte {offset}: chunk &{kind:04X} declares \
             {expected} payload bytes, only {remaining} available")]
    Truncated { offset: usize, kind: u16, expected: usize, remaining: usize },
    /// A supported chunk kind carries a payload of the wrong shape.
    #[error("malformed chunk &{kind:04X}: {reason}")]
    MalformedChunk { kind: u16, reason: &'static str },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[cfg(feature = "wav")]
    #[error(transparent)]
    Wav(#[from] hound::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

/// A trait that extends [Read] with methods that ease reading from chunked files.
pub trait ReadExactEx: Read {
    /// Reads bytes to fill `buf` until EOF, returning the total number of bytes read.
    ///
    /// Unlike [Read::read_exact] reaching the end of the stream before the whole
    /// `buf` has been filled is not an error.
    fn read_exact_or_to_end(&mut self, mut buf: &mut [u8]) -> io::Result<usize> {
        let orig_len = buf.len();
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => break,
                Ok(n) => buf = &mut buf[n..],
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(orig_len - buf.len())
    }
}

impl<R: Read> ReadExactEx for R {}
