/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
/*! The semantic model of recorded tape content.

A [TapeEvent] describes one logical unit of a cassette recording - a data
block, a span of carrier tone, a gap of silence - independently of both the
[UEF container][crate::uef] and the waveform representation. The supported
chunk kinds translate 1:1 to event variants via [chunks_to_events] and back
via [events_to_chunks]; everything else rides along as [TapeEvent::Opaque].

The [signal] module turns events into samples and samples back into events.
*/
use core::fmt;
use std::collections::BTreeSet;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use crate::uef::{kind, Chunk};
use crate::{Error, Result};

pub mod signal;

/// The parity mode of a defined-format data block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd
}

/// Determines how the outermost cycle of a security-cycles run is rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PulseMarker {
    /// A complete cycle.
    Whole,
    /// Only half of the cycle: the trailing pulse for the first cycle,
    /// the leading pulse for the last one.
    PulseOnly
}

/// A single event recorded on tape.
///
/// Every variant except [TapeEvent::Opaque] has a well defined duration at a
/// given base frequency. The base frequency itself is not global state: it is
/// threaded through a traversal and mutated only by
/// [TapeEvent::BaseFrequency] events, scoping each change to the remainder of
/// the sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum TapeEvent {
    /// A data block with implicit framing: one start bit, 8 data bits LSB
    /// first and one stop bit per byte.
    Data(Vec<u8>),
    /// A data block with explicitly defined framing.
    DefinedData {
        /// Data bits per byte, 1 to 8.
        bit_count: u8,
        parity: Parity,
        /// The number of stop bits per byte.
        stop_bits: u8,
        /// Appends one extra cycle at twice the base frequency after the
        /// stop bits of every byte.
        extra_wave: bool,
        data: Vec<u8>
    },
    /// A span of carrier tone measured in carrier cycles.
    Carrier {
        cycles: u32
    },
    /// Two spans of carrier tone with a single dummy byte (`0xAA`) between them.
    CarrierDummy {
        before: u32,
        after: u32
    },
    /// Silence lasting `cycles` cycle periods at the current base frequency.
    Gap {
        cycles: u32
    },
    /// Changes the base frequency for all subsequent events. Emits no samples.
    BaseFrequency(f32),
    /// A run of raw cycles, one per bit, outside any byte framing.
    SecurityCycles {
        /// The number of cycles to render from `data`.
        cycles: u32,
        first: PulseMarker,
        last: PulseMarker,
        /// Bit source, LSB first per byte.
        data: Vec<u8>
    },
    /// Changes the phase of every subsequently synthesized cycle, in degrees.
    PhaseChange(u16),
    /// Silence measured in seconds, independent of the base frequency.
    FloatGap(f32),
    /// A chunk this crate assigns no meaning to; carries no audio
    /// representation and re-serializes byte for byte.
    Opaque {
        kind: u16,
        data: Vec<u8>
    },
}

/// Chunk kind codes seen by [chunks_to_events], for diagnostic reporting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkStats {
    /// Kinds that were encountered and decoded.
    pub encountered: BTreeSet<u16>,
    /// Kinds that were encountered but passed through opaque.
    pub ignored: BTreeSet<u16>,
}

impl Parity {
    fn try_from_byte(byte: u8, kind: u16) -> Result<Self> {
        match byte {
            b'N' => Ok(Parity::None),
            b'E' => Ok(Parity::Even),
            b'O' => Ok(Parity::Odd),
            _ => Err(Error::MalformedChunk { kind, reason: "unknown parity mode" })
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Parity::None => b'N',
            Parity::Even => b'E',
            Parity::Odd  => b'O'
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_byte() as char)
    }
}

impl PulseMarker {
    fn try_from_byte(byte: u8, kind: u16) -> Result<Self> {
        match byte {
            b'W' => Ok(PulseMarker::Whole),
            b'P' => Ok(PulseMarker::PulseOnly),
            _ => Err(Error::MalformedChunk { kind, reason: "unknown pulse marker" })
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            PulseMarker::Whole => b'W',
            PulseMarker::PulseOnly => b'P'
        }
    }
}

/// Iterates the bits of `data` the way they are shifted onto tape:
/// least significant first within each byte.
pub(crate) fn data_bits(data: &[u8]) -> impl Iterator<Item=bool> + '_ {
    data.iter().flat_map(|&byte| (0..8).map(move |bit| byte & 1 << bit != 0))
}

fn expect_len(chunk: &Chunk, expected: usize) -> Result<&[u8]> {
    if chunk.data.len() != expected {
        return Err(Error::MalformedChunk {
            kind: chunk.kind,
            reason: "unexpected payload length"
        });
    }
    Ok(&chunk.data)
}

fn le_u16(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

fn le_f32(chunk: &Chunk) -> Result<f32> {
    let data = expect_len(chunk, 4)?;
    Ok(f32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

/// Translates a single chunk into a tape event.
///
/// Returns `None` for chunk kinds this crate assigns no meaning to.
/// Fails with [Error::MalformedChunk] if the payload of a supported kind has
/// the wrong shape.
pub fn chunk_to_event(chunk: &Chunk) -> Result<Option<TapeEvent>> {
    let event = match chunk.kind {
        kind::DATA_IMPLICIT => TapeEvent::Data(chunk.data.clone()),
        kind::DATA_DEFINED => {
            if chunk.data.len() < 3 {
                return Err(Error::MalformedChunk {
                    kind: chunk.kind,
                    reason: "missing format definition"
                });
            }
            let bit_count = chunk.data[0];
            if !(1..=8).contains(&bit_count) {
                return Err(Error::MalformedChunk {
                    kind: chunk.kind,
                    reason: "data bit count out of range"
                });
            }
            let parity = Parity::try_from_byte(chunk.data[1], chunk.kind)?;
            let stop = chunk.data[2] as i8;
            TapeEvent::DefinedData {
                bit_count,
                parity,
                stop_bits: stop.unsigned_abs(),
                extra_wave: stop < 0,
                data: chunk.data[3..].to_vec()
            }
        }
        kind::CARRIER => {
            let data = expect_len(chunk, 2)?;
            TapeEvent::Carrier { cycles: le_u16(data).into() }
        }
        kind::CARRIER_DUMMY => {
            let data = expect_len(chunk, 4)?;
            TapeEvent::CarrierDummy {
                before: le_u16(&data[0..]).into(),
                after: le_u16(&data[2..]).into()
            }
        }
        kind::INTEGER_GAP => {
            let data = expect_len(chunk, 2)?;
            TapeEvent::Gap { cycles: le_u16(data).into() }
        }
        kind::BASE_FREQUENCY => {
            let frequency = le_f32(chunk)?;
            if !frequency.is_finite() || frequency <= 0.0 {
                return Err(Error::MalformedChunk {
                    kind: chunk.kind,
                    reason: "base frequency not a positive number"
                });
            }
            TapeEvent::BaseFrequency(frequency)
        }
        kind::SECURITY_CYCLES => {
            if chunk.data.len() < 5 {
                return Err(Error::MalformedChunk {
                    kind: chunk.kind,
                    reason: "missing cycle count or pulse markers"
                });
            }
            let cycles = u32::from_le_bytes([chunk.data[0], chunk.data[1], chunk.data[2], 0]);
            TapeEvent::SecurityCycles {
                cycles,
                first: PulseMarker::try_from_byte(chunk.data[3], chunk.kind)?,
                last: PulseMarker::try_from_byte(chunk.data[4], chunk.kind)?,
                data: chunk.data[5..].to_vec()
            }
        }
        kind::PHASE_CHANGE => {
            let data = expect_len(chunk, 2)?;
            TapeEvent::PhaseChange(le_u16(data))
        }
        kind::FLOAT_GAP => {
            let seconds = le_f32(chunk)?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(Error::MalformedChunk {
                    kind: chunk.kind,
                    reason: "gap length not a non-negative number"
                });
            }
            TapeEvent::FloatGap(seconds)
        }
        _ => return Ok(None)
    };
    Ok(Some(event))
}

/// Translates a chunk sequence into tape events.
///
/// Unsupported kinds become [TapeEvent::Opaque] and are recorded in the
/// returned [ChunkStats] next to the kinds that were decoded.
pub fn chunks_to_events(chunks: &[Chunk]) -> Result<(Vec<TapeEvent>, ChunkStats)> {
    let mut events = Vec::with_capacity(chunks.len());
    let mut stats = ChunkStats::default();
    for chunk in chunks {
        match chunk_to_event(chunk)? {
            Some(event) => {
                stats.encountered.insert(chunk.kind);
                events.push(event);
            }
            None => {
                debug!("passing through unsupported chunk {}", chunk);
                stats.ignored.insert(chunk.kind);
                events.push(TapeEvent::Opaque { kind: chunk.kind, data: chunk.data.clone() });
            }
        }
    }
    Ok((events, stats))
}

/// Serializes tape events back into chunks, the inverse of [chunks_to_events]
/// for decodable variants. [TapeEvent::Opaque] re-emits its stored kind and
/// payload verbatim.
pub fn events_to_chunks(events: &[TapeEvent]) -> Vec<Chunk> {
    events.iter().map(|event| match event {
        TapeEvent::Data(data) => Chunk::new(kind::DATA_IMPLICIT, data.clone()),
        TapeEvent::DefinedData { bit_count, parity, stop_bits, extra_wave, data } => {
            let stop = if *extra_wave { stop_bits.wrapping_neg() } else { *stop_bits };
            let mut payload = vec![*bit_count, parity.to_byte(), stop];
            payload.extend_from_slice(data);
            Chunk::new(kind::DATA_DEFINED, payload)
        }
        TapeEvent::Carrier { cycles } => {
            Chunk::new(kind::CARRIER, (*cycles as u16).to_le_bytes().to_vec())
        }
        TapeEvent::CarrierDummy { before, after } => {
            let mut payload = (*before as u16).to_le_bytes().to_vec();
            payload.extend_from_slice(&(*after as u16).to_le_bytes());
            Chunk::new(kind::CARRIER_DUMMY, payload)
        }
        TapeEvent::Gap { cycles } => {
            Chunk::new(kind::INTEGER_GAP, (*cycles as u16).to_le_bytes().to_vec())
        }
        TapeEvent::BaseFrequency(frequency) => {
            Chunk::new(kind::BASE_FREQUENCY, frequency.to_le_bytes().to_vec())
        }
        TapeEvent::SecurityCycles { cycles, first, last, data } => {
            let count = cycles.to_le_bytes();
            let mut payload = vec![count[0], count[1], count[2],
                                   first.to_byte(), last.to_byte()];
            payload.extend_from_slice(data);
            Chunk::new(kind::SECURITY_CYCLES, payload)
        }
        TapeEvent::PhaseChange(degrees) => {
            Chunk::new(kind::PHASE_CHANGE, degrees.to_le_bytes().to_vec())
        }
        TapeEvent::FloatGap(seconds) => {
            Chunk::new(kind::FLOAT_GAP, seconds.to_le_bytes().to_vec())
        }
        TapeEvent::Opaque { kind, data } => Chunk::new(*kind, data.clone()),
    }).collect()
}

impl TapeEvent {
    /// Returns the duration of this event in seconds.
    ///
    /// `base_hz` is the current base frequency; `carrier_multiplier` the
    /// number of recorded cycles per carrier cycle unit (see
    /// [Modulator][signal::Modulator]). [TapeEvent::BaseFrequency],
    /// [TapeEvent::PhaseChange] and [TapeEvent::Opaque] take no time.
    ///
    /// The catalog scanner and the modulator share this arithmetic, keeping
    /// marker timestamps consistent with the synthesized waveform.
    pub fn duration(&self, base_hz: f64, carrier_multiplier: u32) -> f64 {
        // a bit of either value always lasts one slow period: a zero is one
        // cycle at the base frequency, a one is two cycles at twice that
        let slow = 1.0 / base_hz;
        let fast = 0.5 / base_hz;
        match self {
            TapeEvent::Data(data) => data.len() as f64 * 10.0 * slow,
            TapeEvent::DefinedData { bit_count, parity, stop_bits, extra_wave, data } => {
                let parity_bits = if let Parity::None = parity { 0 } else { 1 };
                let frame_bits = 1 + *bit_count as u32 + parity_bits + *stop_bits as u32;
                let byte_secs = frame_bits as f64 * slow +
                                if *extra_wave { fast } else { 0.0 };
                data.len() as f64 * byte_secs
            }
            TapeEvent::Carrier { cycles } => {
                (cycles * carrier_multiplier) as f64 * fast
            }
            TapeEvent::CarrierDummy { before, after } => {
                ((before + after) * carrier_multiplier) as f64 * fast + 10.0 * slow
            }
            TapeEvent::Gap { cycles } => *cycles as f64 * slow,
            TapeEvent::SecurityCycles { cycles, first, last, data } => {
                let count = (*cycles as usize).min(data.len() * 8);
                let mut total = 0.0;
                let mut first_len = 0.0;
                let mut last_len = 0.0;
                for (index, one) in data_bits(data).take(count).enumerate() {
                    let len = if one { fast } else { slow };
                    if index == 0 {
                        first_len = len;
                    }
                    last_len = len;
                    total += len;
                }
                match (first, last) {
                    _ if count == 0 => 0.0,
                    (PulseMarker::PulseOnly, PulseMarker::PulseOnly) if count == 1 => {
                        first_len / 2.0
                    }
                    (first, last) => {
                        if let PulseMarker::PulseOnly = first {
                            total -= first_len / 2.0;
                        }
                        if let PulseMarker::PulseOnly = last {
                            total -= last_len / 2.0;
                        }
                        total
                    }
                }
            }
            TapeEvent::FloatGap(seconds) => *seconds as f64,
            TapeEvent::BaseFrequency(..)|
            TapeEvent::PhaseChange(..)|
            TapeEvent::Opaque {..} => 0.0
        }
    }
}

impl fmt::Display for TapeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapeEvent::Data(data) => {
                write!(f, "data block ({} bytes)", data.len())
            }
            TapeEvent::DefinedData { bit_count, parity, stop_bits, extra_wave, data } => {
                write!(f, "data block ({} bytes, {}{}{}{})", data.len(),
                        bit_count, parity, stop_bits,
                        if *extra_wave { "+" } else { "" })
            }
            TapeEvent::Carrier { cycles } => {
                write!(f, "carrier tone ({} cycles)", cycles)
            }
            TapeEvent::CarrierDummy { before, after } => {
                write!(f, "carrier tone ({}+{} cycles, dummy byte)", before, after)
            }
            TapeEvent::Gap { cycles } => {
                write!(f, "gap ({} cycles)", cycles)
            }
            TapeEvent::BaseFrequency(frequency) => {
                write!(f, "base frequency {:.1} Hz", frequency)
            }
            TapeEvent::SecurityCycles { cycles, .. } => {
                write!(f, "security cycles ({} cycles)", cycles)
            }
            TapeEvent::PhaseChange(degrees) => {
                write!(f, "phase change ({} deg)", degrees)
            }
            TapeEvent::FloatGap(seconds) => {
                write!(f, "gap ({:.1} sec)", seconds)
            }
            TapeEvent::Opaque { kind, data } => {
                write!(f, "opaque chunk &{:04x} ({} bytes)", kind, data.len())
            }
        }
    }
}
