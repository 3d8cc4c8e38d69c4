/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
/*! Tape catalog extraction.

An Acorn cassette file is saved as a run of data blocks, each opened by a
`'*'` synchronization byte and a [block header][BlockHeader]. [extract_markers]
walks a decoded [TapeEvent] sequence, sums event durations exactly the way the
[Modulator][crate::tape::signal::Modulator] does and emits a [Marker] for
every block header it recognizes, yielding a chronological catalog of the
recording.
*/
use core::fmt;

use bitflags::bitflags;
use memchr::memchr;

use crate::tape::TapeEvent;
use crate::tape::signal::consts::{BASE_FREQUENCY, CARRIER_MULTIPLIER};

/// The synchronization byte opening every Acorn cassette block.
pub const BLOCK_SYNC: u8 = b'*';
/// The maximum length of a cassette file name in bytes.
pub const MAX_FILENAME_LENGTH: usize = 10;

bitflags! {
    /// The flag byte of an Acorn cassette block header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        /// The file is protected from being loaded for inspection.
        const LOCKED = 0x01;
        /// The block carries no data.
        const EMPTY  = 0x40;
        /// The last block of a file.
        const LAST   = 0x80;
    }
}

/// A parsed Acorn cassette block header.
///
/// The on-tape layout, following the `'*'` synchronization byte:
///
/// | offset | size | description                          |
/// |--------|------|--------------------------------------|
/// |    0   | 1-10 | file name, terminated by `NUL`       |
/// |   +0   |    4 | load address (LSB first)             |
/// |   +4   |    4 | execution address (LSB first)        |
/// |   +8   |    2 | block index (LSB first)              |
/// |  +10   |    2 | block data length (LSB first)        |
/// |  +12   |    1 | block [flags][BlockFlags]            |
/// |  +13   |    4 | address of the next file (reserved)  |
/// |  +17   |    2 | header CRC (MSB first)               |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub filename: String,
    pub load_address: u32,
    pub exec_address: u32,
    pub block_index: u16,
    pub block_length: u16,
    pub flags: BlockFlags,
    /// The CRC stored in the header, covering the bytes from the file name
    /// up to the reserved field. See [block_crc].
    pub crc: u16,
}

/// A named, timestamped point of a recording where a file's block starts.
///
/// Markers are derived read-only data: re-running [extract_markers] over the
/// same events always reproduces them exactly.
#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    /// Elapsed seconds from the start of the recording to the first byte of
    /// the header's block.
    pub seconds: f64,
    pub filename: String,
    pub load_address: u32,
    pub block_index: u16,
}

/// Calculates the CRC used over the header and data sections of Acorn
/// cassette blocks.
pub fn block_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc = ((byte as u16 ^ (crc >> 8)) << 8) | (crc & 0x00ff);
        for _ in 0..8 {
            let carry = if crc & 0x8000 != 0 {
                crc ^= 0x0810;
                1
            }
            else {
                0
            };
            crc = crc << 1 | carry;
        }
    }
    crc
}

impl BlockHeader {
    /// Attempts to parse a block header from the start of a data block.
    ///
    /// Returns `None` if `data` does not begin with the tape-header layout;
    /// such blocks are anonymous data as far as the catalog is concerned.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let rest = match data.split_first() {
            Some((&BLOCK_SYNC, rest)) => rest,
            _ => return None
        };
        let name_end = memchr(0, &rest[..rest.len().min(MAX_FILENAME_LENGTH + 1)])?;
        let fields = rest.get(name_end + 1..name_end + 20)?;
        let filename = String::from_utf8_lossy(&rest[..name_end]).into_owned();
        Some(BlockHeader {
            filename,
            load_address: u32::from_le_bytes([fields[0], fields[1], fields[2], fields[3]]),
            exec_address: u32::from_le_bytes([fields[4], fields[5], fields[6], fields[7]]),
            block_index: u16::from_le_bytes([fields[8], fields[9]]),
            block_length: u16::from_le_bytes([fields[10], fields[11]]),
            flags: BlockFlags::from_bits_retain(fields[12]),
            crc: u16::from_be_bytes([fields[17], fields[18]]),
        })
    }

    /// Calculates the CRC over the header bytes of `data` for comparison
    /// with [BlockHeader::crc].
    ///
    /// `data` must be the same slice the header was [parsed][BlockHeader::parse]
    /// from.
    pub fn calculated_crc(&self, data: &[u8]) -> u16 {
        let name_end = memchr(0, &data[1..]).unwrap_or(0);
        let end = (1 + name_end + 1 + 17).min(data.len());
        block_crc(&data[1..end])
    }
}

/// Scans a decoded event sequence for block headers.
///
/// The running elapsed time and base frequency are threaded through the
/// traversal; a [TapeEvent::BaseFrequency] event re-times everything after
/// it. `carrier_multiplier` must match the value the signal was (or will be)
/// rendered with for the timestamps to line up with the waveform, see
/// [consts::CARRIER_MULTIPLIER][crate::tape::signal::consts::CARRIER_MULTIPLIER].
pub fn extract_markers(events: &[TapeEvent], carrier_multiplier: u32) -> Vec<Marker> {
    let mut base_hz = BASE_FREQUENCY;
    let mut elapsed = 0.0;
    let mut markers = Vec::new();
    for event in events {
        if let TapeEvent::Data(data) = event {
            if let Some(header) = BlockHeader::parse(data) {
                markers.push(Marker {
                    seconds: elapsed,
                    filename: header.filename,
                    load_address: header.load_address,
                    block_index: header.block_index,
                });
            }
        }
        elapsed += event.duration(base_hz, carrier_multiplier);
        if let TapeEvent::BaseFrequency(frequency) = event {
            base_hz = *frequency as f64;
        }
    }
    markers
}

/// Scans with the default carrier multiplier.
pub fn markers(events: &[TapeEvent]) -> Vec<Marker> {
    extract_markers(events, CARRIER_MULTIPLIER)
}

impl Marker {
    /// Returns the file name with non-printable characters replaced by `?`.
    pub fn printable_name(&self) -> String {
        self.filename.chars()
            .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
            .collect()
    }
}

impl fmt::Display for Marker {
    /// Formats as `mm:ss NAME`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.seconds as u64;
        write!(f, "{:02}:{:02} {}", seconds / 60, seconds % 60, self.printable_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_block(name: &str, load: u32, exec: u32, index: u16, body: &[u8]) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(name.as_bytes());
        header.push(0);
        header.extend_from_slice(&load.to_le_bytes());
        header.extend_from_slice(&exec.to_le_bytes());
        header.extend_from_slice(&index.to_le_bytes());
        header.extend_from_slice(&(body.len() as u16).to_le_bytes());
        header.push(if body.is_empty() { 0x40 } else { 0x80 });
        header.extend_from_slice(&0u32.to_le_bytes());
        let crc = block_crc(&header);
        let mut block = vec![BLOCK_SYNC];
        block.extend_from_slice(&header);
        block.extend_from_slice(&crc.to_be_bytes());
        block.extend_from_slice(body);
        block.extend_from_slice(&block_crc(body).to_be_bytes());
        block
    }

    #[test]
    fn block_crc_matches_known_vectors() {
        let header: Vec<u8> = [
            0x41, 0x52, 0x43, 0x41, 0x44, 0x49, 0x41, 0x4e, 0x53, 0x00,
            0x00, 0x0e, 0x00, 0x00, 0x23, 0x80, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00
        ].to_vec();
        assert_eq!(0xb6c0, block_crc(&header));
        assert_eq!(0x0d03, block_crc(&[1, 2, 3, 4]));
        assert_eq!(0x0000, block_crc(&[]));
    }

    #[test]
    fn block_header_parse_works() {
        let block = header_block("ELITE", 0x2000, 0x2010, 3, &[0xaa; 16]);
        let header = BlockHeader::parse(&block).unwrap();
        assert_eq!("ELITE", header.filename);
        assert_eq!(0x2000, header.load_address);
        assert_eq!(0x2010, header.exec_address);
        assert_eq!(3, header.block_index);
        assert_eq!(16, header.block_length);
        assert_eq!(BlockFlags::LAST, header.flags);
        assert_eq!(header.crc, header.calculated_crc(&block));
    }

    #[test]
    fn anonymous_blocks_are_not_headers() {
        // no sync byte
        assert_eq!(None, BlockHeader::parse(b"ELITE\0 etc"));
        // file name never terminates
        assert_eq!(None, BlockHeader::parse(b"*NAMETOOLONGTOBE\0TRUE"));
        // header cut short
        assert_eq!(None, BlockHeader::parse(b"*A\0\x00\x20"));
        assert_eq!(None, BlockHeader::parse(&[]));
    }

    #[test]
    fn markers_are_timestamped_and_deterministic() {
        let events = vec![
            TapeEvent::FloatGap(90.0),
            TapeEvent::Data(header_block("ELITE", 0x2000, 0x2000, 0, &[1, 2, 3])),
            TapeEvent::Carrier { cycles: 600 },
            TapeEvent::Data(b"no header here".to_vec()),
            TapeEvent::Data(header_block("ELITE", 0x2000, 0x2000, 1, &[4, 5, 6])),
        ];
        let first = markers(&events);
        match first.as_slice() {
            [one, two] => {
                assert_eq!("ELITE", one.filename);
                assert_eq!(0, one.block_index);
                assert_eq!(0x2000, one.load_address);
                assert!((one.seconds - 90.0).abs() < 1e-9);
                assert_eq!("01:30 ELITE", format!("{}", one));
                assert_eq!(1, two.block_index);
                assert!(two.seconds > one.seconds);
            }
            markers => panic!("unexpected markers: {:?}", markers)
        }
        assert_eq!(first, markers(&events));
    }

    #[test]
    fn base_frequency_changes_retime_later_markers() {
        let block = TapeEvent::Data(header_block("A", 0, 0, 0, &[]));
        let slow = vec![TapeEvent::Gap { cycles: 2400 }, block.clone()];
        let fast = vec![
            TapeEvent::BaseFrequency(2400.0),
            TapeEvent::Gap { cycles: 2400 },
            block
        ];
        let slow = markers(&slow);
        let fast = markers(&fast);
        assert!((slow[0].seconds - 2.0).abs() < 1e-9);
        assert!((fast[0].seconds - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unprintable_names_are_masked() {
        let marker = Marker {
            seconds: 0.0,
            filename: "EL\u{7f}TE".into(),
            load_address: 0,
            block_index: 0
        };
        assert_eq!("00:00 EL?TE", format!("{}", marker));
    }
}
