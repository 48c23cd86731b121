//! Synthesized beep, the last audio fallback when the sound asset cannot play.

use std::f64::consts::PI;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f64,
    pub duration: Duration,
    pub gain: f64,
    pub sample_rate: u32,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            frequency_hz: 800.0,
            duration: Duration::from_millis(300),
            gain: 0.3,
            sample_rate: 22_050,
        }
    }
}

impl Tone {
    pub fn sample_count(&self) -> usize {
        (self.duration.as_secs_f64() * self.sample_rate as f64).round() as usize
    }

    /// 16-bit mono PCM samples of a sine wave with a 10 ms attack and an
    /// exponential tail, so the beep does not click.
    pub fn samples(&self) -> Vec<i16> {
        let n = self.sample_count();
        let rate = self.sample_rate as f64;
        let attack = (0.01 * rate) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / rate;
                let envelope = if i < attack {
                    i as f64 / attack.max(1) as f64
                } else {
                    let progress = (i - attack) as f64 / (n - attack).max(1) as f64;
                    (0.01f64).powf(progress)
                };
                let value = (2.0 * PI * self.frequency_hz * t).sin() * self.gain * envelope;
                (value.clamp(-1.0, 1.0) * i16::MAX as f64) as i16
            })
            .collect()
    }

    /// A complete RIFF/WAVE file.
    pub fn to_wav(&self) -> Vec<u8> {
        let samples = self.samples();
        let data_len = (samples.len() * 2) as u32;
        let byte_rate = self.sample_rate * 2;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes()); // block align
        out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_and_length() {
        let tone = Tone::default();
        let wav = tone.to_wav();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(tone.sample_count(), 6_615);
        assert_eq!(wav.len(), 44 + 6_615 * 2);
        let data_len = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_len as usize, 6_615 * 2);
    }

    #[test]
    fn amplitude_respects_gain() {
        let tone = Tone::default();
        let peak = tone.samples().iter().map(|s| s.unsigned_abs()).max().unwrap();
        let ceiling = (0.3 * i16::MAX as f64) as u16;
        assert!(peak <= ceiling);
        assert!(peak > ceiling / 2);
    }
}
