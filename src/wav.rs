/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
/*! The WAV file boundary of the codec.

The signal transducers deal in plain sample slices; this module wraps them in
and out of canonical RIFF/WAVE files via the `hound` crate. Only mono PCM is
supported: 8-bit unsigned, 16-bit signed or 32-bit float.
*/
use std::io;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::Result;

fn spec(sample_rate: u32, bits_per_sample: u16, sample_format: SampleFormat) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample,
        sample_format,
    }
}

/// Writes mono 16-bit signed PCM samples as a WAV file.
pub fn write_wav_i16<P: AsRef<Path>>(path: P, sample_rate: u32, samples: &[i16]) -> Result<()> {
    let mut writer = WavWriter::create(path, spec(sample_rate, 16, SampleFormat::Int))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Writes mono 8-bit PCM samples as a WAV file.
///
/// WAV stores 8-bit audio unsigned around the midpoint of 128 while `hound`
/// exposes it signed, hence the offset below.
pub fn write_wav_u8<P: AsRef<Path>>(path: P, sample_rate: u32, samples: &[u8]) -> Result<()> {
    let mut writer = WavWriter::create(path, spec(sample_rate, 8, SampleFormat::Int))?;
    for &sample in samples {
        writer.write_sample((sample as i16 - 128) as i8)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Reads a mono PCM WAV file into normalized samples.
///
/// Returns the sample rate and the samples scaled to `[-1.0, 1.0]`.
/// Fails for multi-channel files and unsupported sample widths.
pub fn read_wav_samples<P: AsRef<Path>>(path: P) -> Result<(u32, Vec<f32>)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(io::Error::new(io::ErrorKind::InvalidData,
                    "only mono WAV files are supported").into());
    }
    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => {
            reader.samples::<i8>()
                  .map(|sample| sample.map(|s| s as f32 / i8::MAX as f32))
                  .collect::<hound::Result<Vec<_>>>()?
        }
        (SampleFormat::Int, 16) => {
            reader.samples::<i16>()
                  .map(|sample| sample.map(|s| s as f32 / i16::MAX as f32))
                  .collect::<hound::Result<Vec<_>>>()?
        }
        (SampleFormat::Float, 32) => {
            reader.samples::<f32>().collect::<hound::Result<Vec<_>>>()?
        }
        _ => return Err(io::Error::new(io::ErrorKind::InvalidData,
                    "unsupported WAV sample format").into())
    };
    Ok((spec.sample_rate, samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("uef-cassette-test-{}-{}", std::process::id(), name));
        path
    }

    #[test]
    fn wav_i16_round_trip_works() {
        let path = temp_path("i16.wav");
        let samples: Vec<i16> = (0..1000).map(|i| (i * 37 % 32767) as i16).collect();
        write_wav_i16(&path, 44100, &samples).unwrap();
        let (rate, read) = read_wav_samples(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(44100, rate);
        assert_eq!(samples.len(), read.len());
        for (&expected, &actual) in samples.iter().zip(read.iter()) {
            assert!((expected as f32 / 32767.0 - actual).abs() < 1e-6);
        }
    }

    #[test]
    fn wav_u8_round_trip_works() {
        let path = temp_path("u8.wav");
        let samples: Vec<u8> = (0..=255).collect();
        write_wav_u8(&path, 11025, &samples).unwrap();
        let (rate, read) = read_wav_samples(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(11025, rate);
        assert_eq!(samples.len(), read.len());
        // 127 is the silence level of the unsigned representation
        assert!((read[127] - (-1.0 / 127.0)).abs() < 1e-6);
        assert!(read[255] > 0.99);
        assert!(read[0] < -0.99);
    }
}
