/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
//! Converts a UEF tape image into a cassette audio WAV file.
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{debug, error, info};

use uef_cassette::catalog;
use uef_cassette::tape::signal::Modulator;
use uef_cassette::tape;
use uef_cassette::uef;
use uef_cassette::wav;

#[derive(Debug, Parser)]
#[command(name = "uef2wave", version,
          about = "Converts UEF tape images into cassette audio WAV files")]
struct Args {
    /// The UEF file to convert; may be gzip compressed or the first UEF
    /// member of a ZIP archive.
    ueffile: PathBuf,
    /// The sample frequency in Hz.
    #[arg(long, default_value_t = 44100, value_parser = parse_frequency)]
    frequency: u32,
    /// The sample resolution in bits.
    #[arg(long, default_value_t = 16, value_parser = parse_bits)]
    bits: u32,
    /// Enable debug output.
    #[arg(long)]
    debug: bool,
    /// Do not record a wave file.
    #[arg(long)]
    norecord: bool,
}

fn parse_frequency(arg: &str) -> Result<u32, String> {
    match arg.parse() {
        Ok(frequency @ (11025 | 22050 | 44100)) => Ok(frequency),
        _ => Err("supported sample frequencies are 11025, 22050 and 44100".into())
    }
}

fn parse_bits(arg: &str) -> Result<u32, String> {
    match arg.parse() {
        Ok(bits @ (8 | 16)) => Ok(bits),
        _ => Err("supported sample resolutions are 8 and 16 bits".into())
    }
}

fn format_kinds(kinds: &BTreeSet<u16>) -> String {
    kinds.iter().map(|kind| format!("&{:04x}", kind))
         .collect::<Vec<_>>()
         .join(", ")
}

fn run(args: Args) -> uef_cassette::Result<()> {
    let raw = std::fs::read(&args.ueffile)?;
    let raw = uef::extract_uef_bytes(raw)?;
    let file = uef::parse_uef(&raw)?;
    info!("UEF version {}, {} chunks", file.version, file.chunks.len());
    for chunk in &file.chunks {
        debug!("{}", chunk);
    }
    let (events, stats) = tape::chunks_to_events(&file.chunks)?;

    if let Some(name) = args.ueffile.file_name() {
        println!("{}", name.to_string_lossy());
    }
    println!("Chunk IDs encountered ... {}", format_kinds(&stats.encountered));
    println!("Chunk IDs ignored ....... {}", format_kinds(&stats.ignored));
    println!("Markers:");
    for marker in catalog::markers(&events) {
        if marker.block_index == 0 {
            println!("  {}", marker);
        }
    }

    if args.norecord {
        return Ok(());
    }
    let modulator = Modulator::new(args.frequency);
    let mut outfile = PathBuf::from(
        args.ueffile.file_stem().unwrap_or_else(|| "out".as_ref()));
    outfile.set_extension("wav");
    match args.bits {
        8 => {
            let samples: Vec<u8> = modulator.modulate(&events);
            wav::write_wav_u8(&outfile, args.frequency, &samples)?;
        }
        _ => {
            let samples: Vec<i16> = modulator.modulate(&events);
            wav::write_wav_i16(&outfile, args.frequency, &samples)?;
        }
    }
    info!("recorded {}", outfile.display());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.debug { log::Level::Debug } else { log::Level::Info };
    if simple_logger::init_with_level(level).is_err() {
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
