/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
//! Recovers a UEF tape image from a cassette audio WAV file.
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};

use uef_cassette::catalog;
use uef_cassette::tape::signal::Demodulator;
use uef_cassette::tape;
use uef_cassette::uef::{UefChunkWriter, UefVersion};
use uef_cassette::wav;

#[derive(Debug, Parser)]
#[command(name = "wave2uef", version,
          about = "Recovers UEF tape images from cassette audio WAV files")]
struct Args {
    /// The mono WAV file to decode.
    wavfile: PathBuf,
    /// The UEF file to write; defaults to the input name with a .uef extension.
    #[arg(long)]
    output: Option<PathBuf>,
    /// The nominal base frequency in Hz.
    #[arg(long, default_value_t = 1200.0)]
    frequency: f64,
    /// The fractional tolerance of cycle classification.
    #[arg(long, default_value_t = 0.25)]
    tolerance: f64,
    /// Enable debug output.
    #[arg(long)]
    debug: bool,
}

fn run(args: Args) -> uef_cassette::Result<()> {
    let (sample_rate, samples) = wav::read_wav_samples(&args.wavfile)?;
    info!("{}: {} samples at {} Hz", args.wavfile.display(), samples.len(), sample_rate);

    let demodulated = Demodulator::new(sample_rate)
                        .with_base_frequency(args.frequency)
                        .with_tolerance(args.tolerance)
                        .demodulate(&samples);
    if demodulated.anomalies != 0 {
        warn!("{} decode anomalies", demodulated.anomalies);
    }
    info!("{} tape events recovered", demodulated.events.len());

    println!("Markers:");
    for marker in catalog::markers(&demodulated.events) {
        if marker.block_index == 0 {
            println!("  {}", marker);
        }
    }

    let outfile = args.output.clone().unwrap_or_else(|| {
        let mut path = PathBuf::from(
            args.wavfile.file_stem().unwrap_or_else(|| "out".as_ref()));
        path.set_extension("uef");
        path
    });
    let chunks = tape::events_to_chunks(&demodulated.events);
    let file = BufWriter::new(File::create(&outfile)?);
    let mut writer = UefChunkWriter::new(file, UefVersion::default())?;
    for chunk in &chunks {
        writer.write_chunk(chunk)?;
    }
    writer.flush()?;
    info!("wrote {} chunks to {}", chunks.len(), outfile.display());
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
