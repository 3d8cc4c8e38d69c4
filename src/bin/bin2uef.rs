/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
//! Wraps a raw binary in a UEF tape image as a sequence of Acorn cassette
//! blocks, ready for `*RUN`ning from a cassette interface.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use uef_cassette::catalog::{block_crc, BLOCK_SYNC, MAX_FILENAME_LENGTH};
use uef_cassette::tape::{self, TapeEvent};
use uef_cassette::uef::UefFile;

const BLOCK_SIZE: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "bin2uef", version,
          about = "Wraps a raw binary in a UEF tape image")]
struct Args {
    /// The binary file to include.
    #[arg(long)]
    bin: PathBuf,
    /// The UEF file to write.
    #[arg(long)]
    uef: PathBuf,
    /// Load address of the binary.
    #[arg(long, default_value = "0x2000", value_parser = parse_address)]
    load_addr: u32,
    /// Execution address of the binary; defaults to the load address.
    #[arg(long, value_parser = parse_address)]
    exec_addr: Option<u32>,
}

fn parse_address(arg: &str) -> Result<u32, String> {
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => arg.parse()
    };
    parsed.map_err(|e| e.to_string())
}

/// A single `*`-headed cassette block: header, header CRC, data, data CRC.
fn cassette_block(filename: &[u8], load_addr: u32, exec_addr: u32,
                  block_index: u16, block: &[u8], last: bool) -> Vec<u8>
{
    let mut header = Vec::with_capacity(filename.len() + 18);
    header.extend_from_slice(filename);
    header.push(0);
    header.extend_from_slice(&load_addr.to_le_bytes());
    header.extend_from_slice(&exec_addr.to_le_bytes());
    header.extend_from_slice(&block_index.to_le_bytes());
    header.extend_from_slice(&(block.len() as u16).to_le_bytes());
    header.push(if last { 0x80 } else { 0x00 });
    header.extend_from_slice(&0u32.to_le_bytes());

    let mut data = Vec::with_capacity(1 + header.len() + block.len() + 4);
    data.push(BLOCK_SYNC);
    data.extend_from_slice(&header);
    data.extend_from_slice(&block_crc(&header).to_be_bytes());
    data.extend_from_slice(block);
    data.extend_from_slice(&block_crc(block).to_be_bytes());
    data
}

fn run(args: Args) -> uef_cassette::Result<()> {
    let data = std::fs::read(&args.bin)?;
    let exec_addr = args.exec_addr.unwrap_or(args.load_addr);
    let filename: Vec<u8> = args.bin.file_stem()
        .map(|stem| stem.to_string_lossy().to_uppercase().into_bytes())
        .unwrap_or_default()
        .into_iter()
        .take(MAX_FILENAME_LENGTH)
        .collect();

    let mut events = vec![
        TapeEvent::Carrier { cycles: 1500 },
        TapeEvent::Data(vec![0xdc]),
        TapeEvent::Carrier { cycles: 1500 },
    ];
    let blocks = data.chunks(BLOCK_SIZE).count();
    for (index, block) in data.chunks(BLOCK_SIZE).enumerate() {
        events.push(TapeEvent::Data(cassette_block(
            &filename, args.load_addr, exec_addr,
            index as u16, block, index + 1 == blocks)));
        events.push(TapeEvent::Carrier { cycles: 600 });
    }
    events.push(TapeEvent::Gap { cycles: 600 });

    let file = UefFile::from_chunks(tape::events_to_chunks(&events));
    std::fs::write(&args.uef, file.to_bytes())?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    if simple_logger::init().is_err() {
        eprintln!("failed to initialize the logger");
    }
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
