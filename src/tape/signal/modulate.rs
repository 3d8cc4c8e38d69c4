/*
    Copyright (C) 2023  Rafal Michalski

    This file is part of UEF-CASSETTE, a Rust library for converting UEF tape
    images of the Acorn 8-bit computer series to and from cassette audio.

    For the full copyright notice, see the lib.rs file.
*/
use crate::sample::TapeSample;
use crate::tape::{data_bits, Parity, PulseMarker, TapeEvent};
use super::consts::*;

const PI2: f64 = core::f64::consts::PI * 2.0;

/// Synthesizes tape events as a mono PCM pulse-train waveform.
///
/// A bit of value 0 is rendered as one full cycle at the base frequency, a
/// bit of value 1 as two cycles at twice the base frequency. Cycles are full
/// sine periods spanning the whole amplitude range of the target sample type.
///
/// Construction is builder style:
///
/// ```
/// use uef_cassette::tape::signal::Modulator;
///
/// let modulator = Modulator::new(44100).with_carrier_multiplier(1);
/// let silence: Vec<i16> = modulator.modulate(&[]);
/// assert!(silence.is_empty());
/// ```
///
/// Each [Modulator::modulate] call owns an independent state record, so one
/// instance may serve any number of conversions.
#[derive(Clone, Debug)]
pub struct Modulator {
    sample_rate: u32,
    base_frequency: f64,
    phase_degrees: u16,
    carrier_multiplier: u32,
}

/// The per-call state of a modulation pass.
struct Recorder<S> {
    rate: f64,
    base_hz: f64,
    phase: f64,
    multiplier: u32,
    /// Seconds of signal recorded so far.
    cursor: f64,
    /// Samples emitted so far, always `round(cursor * rate)`.
    emitted: u64,
    samples: Vec<S>,
}

impl Modulator {
    /// Creates a new `Modulator` for the given sample rate with the default
    /// base frequency, phase and carrier multiplier.
    pub fn new(sample_rate: u32) -> Self {
        Modulator {
            sample_rate,
            base_frequency: BASE_FREQUENCY,
            phase_degrees: PHASE_DEGREES,
            carrier_multiplier: CARRIER_MULTIPLIER,
        }
    }
    /// Changes the initial base frequency, builder style.
    pub fn with_base_frequency(mut self, base_frequency: f64) -> Self {
        self.base_frequency = base_frequency;
        self
    }
    /// Changes the initial cycle phase, builder style.
    pub fn with_phase_degrees(mut self, phase_degrees: u16) -> Self {
        self.phase_degrees = phase_degrees;
        self
    }
    /// Changes the number of recorded cycles per carrier cycle unit,
    /// builder style. See [consts::CARRIER_MULTIPLIER][super::consts::CARRIER_MULTIPLIER].
    pub fn with_carrier_multiplier(mut self, carrier_multiplier: u32) -> Self {
        self.carrier_multiplier = carrier_multiplier;
        self
    }
    /// Returns the target sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    /// Returns the number of recorded cycles per carrier cycle unit.
    pub fn carrier_multiplier(&self) -> u32 {
        self.carrier_multiplier
    }

    /// Returns the total duration in seconds of the given events,
    /// threading base frequency changes through the traversal.
    pub fn duration_of(&self, events: &[TapeEvent]) -> f64 {
        let mut base_hz = self.base_frequency;
        let mut seconds = 0.0;
        for event in events {
            seconds += event.duration(base_hz, self.carrier_multiplier);
            if let TapeEvent::BaseFrequency(frequency) = event {
                base_hz = *frequency as f64;
            }
        }
        seconds
    }

    /// Renders the given events as samples.
    ///
    /// The output length is an exact function of the total event duration:
    /// `round(duration_of(events) * sample_rate)` within one sample. The
    /// fractional remainder of each cycle carries over to the next, so no
    /// rounding error accumulates over long recordings.
    pub fn modulate<S: TapeSample>(&self, events: &[TapeEvent]) -> Vec<S> {
        let size = (self.duration_of(events) * self.sample_rate as f64).round() as usize;
        let mut recorder = Recorder {
            rate: self.sample_rate as f64,
            base_hz: self.base_frequency,
            phase: (self.phase_degrees as f64).to_radians(),
            multiplier: self.carrier_multiplier,
            cursor: 0.0,
            emitted: 0,
            samples: Vec::with_capacity(size),
        };
        for event in events {
            recorder.record(event);
        }
        recorder.samples
    }
}

impl<S: TapeSample> Recorder<S> {
    /// Advances the time cursor by `duration` seconds and returns how many
    /// samples the span occupies.
    fn span_samples(&mut self, duration: f64) -> u64 {
        self.cursor += duration;
        let end = (self.cursor * self.rate).round() as u64;
        let count = end - self.emitted;
        self.emitted = end;
        count
    }

    fn silence(&mut self, duration: f64) {
        let count = self.span_samples(duration);
        self.samples.resize(self.samples.len() + count as usize, S::silence());
    }

    /// Renders `turns` of a sine period starting at the fractional cycle
    /// position `offset`, spread over `duration` seconds.
    fn wave(&mut self, duration: f64, turns: f64, offset: f64) {
        let count = self.span_samples(duration);
        for index in 0..count {
            let pos = offset + turns * index as f64 / count as f64;
            self.samples.push(S::from_norm((self.phase + pos * PI2).sin()));
        }
    }

    /// One full cycle at the given frequency.
    fn cycle(&mut self, frequency: f64) {
        self.wave(1.0 / frequency, 1.0, 0.0);
    }

    /// The leading half of a cycle.
    fn low_pulse(&mut self, frequency: f64) {
        self.wave(0.5 / frequency, 0.5, 0.0);
    }

    /// The trailing half of a cycle.
    fn high_pulse(&mut self, frequency: f64) {
        self.wave(0.5 / frequency, 0.5, 0.5);
    }

    fn bit(&mut self, one: bool) {
        if one {
            let frequency = self.base_hz * 2.0;
            self.cycle(frequency);
            self.cycle(frequency);
        }
        else {
            let frequency = self.base_hz;
            self.cycle(frequency);
        }
    }

    fn byte_implicit(&mut self, byte: u8) {
        self.bit(false);
        for index in 0..8 {
            self.bit(byte & 1 << index != 0);
        }
        self.bit(true);
    }

    fn byte_defined(&mut self, byte: u8, bit_count: u8, parity: Parity,
                    stop_bits: u8, extra_wave: bool)
    {
        self.bit(false);
        let mut odd_parity = false;
        for index in 0..bit_count {
            let one = byte & 1 << index != 0;
            odd_parity ^= one;
            self.bit(one);
        }
        match parity {
            Parity::None => {}
            Parity::Even => self.bit(odd_parity),
            Parity::Odd  => self.bit(!odd_parity),
        }
        for _ in 0..stop_bits {
            self.bit(true);
        }
        if extra_wave {
            let frequency = self.base_hz * 2.0;
            self.cycle(frequency);
        }
    }

    fn carrier(&mut self, cycles: u32) {
        let frequency = self.base_hz * 2.0;
        for _ in 0..cycles.saturating_mul(self.multiplier) {
            self.cycle(frequency);
        }
    }

    fn security(&mut self, cycles: u32, first: PulseMarker, last: PulseMarker, data: &[u8]) {
        let count = (cycles as usize).min(data.len() * 8);
        for (index, one) in data_bits(data).take(count).enumerate() {
            let frequency = if one { self.base_hz * 2.0 } else { self.base_hz };
            let first_p = index == 0 && matches!(first, PulseMarker::PulseOnly);
            let last_p = index + 1 == count && matches!(last, PulseMarker::PulseOnly);
            if first_p && last_p {
                // a single cycle cut from both ends keeps its leading pulse
                self.low_pulse(frequency);
            }
            else if first_p {
                self.high_pulse(frequency);
            }
            else if last_p {
                self.low_pulse(frequency);
            }
            else {
                self.cycle(frequency);
            }
        }
    }

    fn record(&mut self, event: &TapeEvent) {
        match event {
            TapeEvent::Data(data) => {
                for &byte in data {
                    self.byte_implicit(byte);
                }
            }
            TapeEvent::DefinedData { bit_count, parity, stop_bits, extra_wave, data } => {
                for &byte in data {
                    self.byte_defined(byte, *bit_count, *parity, *stop_bits, *extra_wave);
                }
            }
            TapeEvent::Carrier { cycles } => self.carrier(*cycles),
            TapeEvent::CarrierDummy { before, after } => {
                self.carrier(*before);
                self.byte_implicit(DUMMY_BYTE);
                self.carrier(*after);
            }
            TapeEvent::Gap { cycles } => {
                let duration = *cycles as f64 / self.base_hz;
                self.silence(duration);
            }
            TapeEvent::BaseFrequency(frequency) => {
                self.base_hz = *frequency as f64;
            }
            TapeEvent::SecurityCycles { cycles, first, last, data } => {
                self.security(*cycles, *first, *last, data);
            }
            TapeEvent::PhaseChange(degrees) => {
                self.phase = (*degrees as f64).to_radians();
            }
            TapeEvent::FloatGap(seconds) => self.silence(*seconds as f64),
            TapeEvent::Opaque {..} => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_gap_renders_exact_silence() {
        // 2400 cycle periods at 1200 Hz last exactly two seconds
        let events = [TapeEvent::Gap { cycles: 2400 }];
        let samples: Vec<i16> = Modulator::new(44100).modulate(&events);
        assert_eq!(2 * 44100, samples.len());
        assert!(samples.iter().all(|&sample| sample == 0));
        let samples: Vec<u8> = Modulator::new(11025).modulate(&events);
        assert_eq!(2 * 11025, samples.len());
        assert!(samples.iter().all(|&sample| sample == 127));
    }

    #[test]
    fn sample_count_follows_event_durations() {
        let events = [
            TapeEvent::Carrier { cycles: 100 },
            TapeEvent::Data(vec![0x12, 0x34, 0xff]),
            TapeEvent::BaseFrequency(2400.0),
            TapeEvent::Data(vec![0x56]),
            TapeEvent::Gap { cycles: 600 },
            TapeEvent::FloatGap(0.123),
            TapeEvent::Opaque { kind: 0, data: vec![0xab] },
        ];
        for &rate in [11025u32, 22050, 44100].iter() {
            let modulator = Modulator::new(rate);
            let expected = (modulator.duration_of(&events) * rate as f64).round() as i64;
            let samples: Vec<i16> = modulator.modulate(&events);
            assert!((samples.len() as i64 - expected).abs() <= 1,
                    "{} samples vs {} expected at {} Hz", samples.len(), expected, rate);
        }
    }

    #[test]
    fn carrier_multiplier_scales_the_tone() {
        let events = [TapeEvent::Carrier { cycles: 100 }];
        let corrected: Vec<i16> = Modulator::new(44100).modulate(&events);
        let literal: Vec<i16> = Modulator::new(44100)
                                    .with_carrier_multiplier(1)
                                    .modulate(&events);
        // 200 vs 100 cycles at 2400 Hz
        assert_eq!((200.0 / 2400.0f64 * 44100.0).round() as usize, corrected.len());
        let expected = 100.0 / 2400.0f64 * 44100.0;
        assert!((literal.len() as f64 - expected).abs() <= 1.0);
    }

    #[test]
    fn cycles_start_with_the_low_pulse() {
        // phase 180: the leading half of every cycle is the negative lobe
        let events = [TapeEvent::Carrier { cycles: 1 }];
        let samples: Vec<i16> = Modulator::new(44100)
                                    .with_carrier_multiplier(1)
                                    .modulate(&events);
        assert_eq!((44100.0 / 2400.0f64).round() as usize, samples.len());
        let mid = samples.len() / 2;
        assert!(samples[1..mid].iter().all(|&sample| sample <= 0));
        assert!(samples[mid + 1..].iter().all(|&sample| sample >= 0));
    }

    #[test]
    fn implicit_framing_takes_ten_bit_periods() {
        let modulator = Modulator::new(44100);
        for &byte in [0x00u8, 0xff, 0xaa, 0x2a].iter() {
            let samples: Vec<i16> = modulator.modulate(&[TapeEvent::Data(vec![byte])]);
            let expected = 10.0 / 1200.0f64 * 44100.0;
            assert!((samples.len() as f64 - expected).abs() <= 1.0);
        }
    }

    #[test]
    fn defined_framing_honors_the_format() {
        let modulator = Modulator::new(44100);
        // 7E2 with an extra terminating wave: 1+7+1+2 bit periods + half
        let events = [TapeEvent::DefinedData {
            bit_count: 7, parity: Parity::Even, stop_bits: 2,
            extra_wave: true, data: vec![0x41]
        }];
        let expected = ((11.0 + 0.5) / 1200.0 * 44100.0f64).round() as usize;
        let samples: Vec<i16> = modulator.modulate(&events);
        assert_eq!(expected, samples.len());
    }

    #[test]
    fn security_markers_halve_the_outer_cycles() {
        let modulator = Modulator::new(44100);
        let whole = [TapeEvent::SecurityCycles {
            cycles: 3, first: PulseMarker::Whole, last: PulseMarker::Whole,
            data: vec![0b101]
        }];
        let trimmed = [TapeEvent::SecurityCycles {
            cycles: 3, first: PulseMarker::PulseOnly, last: PulseMarker::PulseOnly,
            data: vec![0b101]
        }];
        let whole: Vec<i16> = modulator.modulate(&whole);
        let trimmed: Vec<i16> = modulator.modulate(&trimmed);
        // bits 1,0,1: fast, slow, fast; both fast halves are dropped
        let expected = (0.5 + 1.0 + 0.5) / 1200.0 * 44100.0f64;
        assert!((whole.len() as f64 - expected).abs() <= 1.0);
        let expected = (0.25 + 1.0 + 0.25) / 1200.0 * 44100.0f64;
        assert!((trimmed.len() as f64 - expected).abs() <= 1.0);
    }
}
