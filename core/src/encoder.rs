//! Reference QPSK encoder: renders a payload into the audio wire format
//! the decoder expects. Used by the CLI and by the round-trip tests; on a
//! real link the same stream comes out of the companion tooling.

use std::f32::consts::PI;

use crate::crc32;
use crate::error::{FirmwaveError, Result};
use crate::hamming;
use crate::{ModemConfig, BLOCK_MARKER, END_MARKER};

/// `{2,1}` symbol pairs the correlator aligns on; eight pairs feed the
/// eight-peak timing average.
const ALIGNMENT_BYTES: [u8; 4] = [0x99; 4];

#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub modem: ModemConfig,
    pub crc_seed: u32,
    /// Seconds of zero-symbol carrier between blocks, long enough to cover
    /// the receiver's flash write plus its carrier re-sync leader.
    pub block_gap: f32,
    /// Peak amplitude of the rendered signal, in (0, 1].
    pub amplitude: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            modem: ModemConfig::default(),
            crc_seed: 0,
            block_gap: 0.1,
            amplitude: 1.0,
        }
    }
}

pub struct Encoder {
    config: EncoderConfig,
    /// Rendered carrier cycle per symbol value.
    symbols: [Vec<f32>; 4],
}

impl Encoder {
    pub fn new(config: EncoderConfig) -> Result<Self> {
        config.modem.validate()?;
        if !(config.amplitude > 0.0 && config.amplitude <= 1.0) {
            return Err(FirmwaveError::InvalidConfig(format!(
                "amplitude {} outside (0, 1]",
                config.amplitude
            )));
        }
        if config.block_gap < 0.05 {
            return Err(FirmwaveError::InvalidConfig(format!(
                "block gap {} s is shorter than the carrier sync leader",
                config.block_gap
            )));
        }

        let d = config.modem.samples_per_symbol();
        let symbols = std::array::from_fn(|symbol| {
            let i_level = (symbol as u8 & 2) as f32 - 1.0;
            let q_level = (symbol as u8 & 1) as f32 * 2.0 - 1.0;
            (0..d)
                .map(|k| {
                    let phase = 2.0 * PI * k as f32 / d as f32;
                    config.amplitude * (i_level * phase.cos() - q_level * phase.sin())
                        / 2f32.sqrt()
                })
                .collect()
        });

        Ok(Self { config, symbols })
    }

    /// Render `data` (a whole number of blocks) into audio samples.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<f32>> {
        let modem = &self.config.modem;
        if data.is_empty() || data.len() % modem.block_size != 0 {
            return Err(FirmwaveError::InvalidInputSize);
        }

        let mut signal = Vec::new();

        // intro: silence for the settling detector, then a zero-symbol
        // leader long enough for two settling windows and carrier sync
        self.push_silence(&mut signal, modem.sample_rate as usize);
        self.push_blank(&mut signal, (modem.symbol_rate as usize * 5) / 4);

        for (index, block) in data.chunks(modem.block_size).enumerate() {
            if index > 0 {
                self.push_blank(&mut signal, self.gap_symbols());
            }
            self.push_alignment(&mut signal);
            self.push_bytes(&mut signal, &BLOCK_MARKER.to_be_bytes());
            for packet in block.chunks(modem.packet_size) {
                self.push_packet(&mut signal, packet);
            }
        }

        self.push_blank(&mut signal, self.gap_symbols());
        self.push_alignment(&mut signal);
        self.push_bytes(&mut signal, &END_MARKER.to_be_bytes());

        // outro: keep the carrier up briefly so the last decisions drain
        self.push_blank(&mut signal, modem.symbol_rate as usize / 10);
        self.push_silence(&mut signal, modem.sample_rate as usize / 4);

        Ok(signal)
    }

    fn gap_symbols(&self) -> usize {
        (self.config.block_gap * self.config.modem.symbol_rate as f32) as usize
    }

    fn push_silence(&self, signal: &mut Vec<f32>, samples: usize) {
        signal.resize(signal.len() + samples, 0.0);
    }

    fn push_blank(&self, signal: &mut Vec<f32>, symbols: usize) {
        for _ in 0..symbols {
            self.push_symbol(signal, 0);
        }
    }

    fn push_alignment(&self, signal: &mut Vec<f32>) {
        self.push_bytes(signal, &ALIGNMENT_BYTES);
    }

    fn push_symbol(&self, signal: &mut Vec<f32>, symbol: u8) {
        signal.extend_from_slice(&self.symbols[symbol as usize]);
    }

    fn push_bytes(&self, signal: &mut Vec<f32>, bytes: &[u8]) {
        for &byte in bytes {
            self.push_symbol(signal, (byte >> 6) & 3);
            self.push_symbol(signal, (byte >> 4) & 3);
            self.push_symbol(signal, (byte >> 2) & 3);
            self.push_symbol(signal, byte & 3);
        }
    }

    fn push_packet(&self, signal: &mut Vec<f32>, data: &[u8]) {
        let crc = crc32::checksum(self.config.crc_seed, data);
        let mut protected = Vec::with_capacity(data.len() + 4);
        protected.extend_from_slice(data);
        protected.extend_from_slice(&crc.to_be_bytes());
        let ecc = hamming::parity(&protected);

        self.push_bytes(signal, &protected);
        self.push_bytes(signal, &ecc.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_partial_blocks() {
        let encoder = Encoder::new(EncoderConfig::default()).unwrap();
        assert!(encoder.encode(&[0u8; 100]).is_err());
        assert!(encoder.encode(&[]).is_err());
        assert!(encoder.encode(&vec![0u8; 2048]).is_ok());
    }

    #[test]
    fn test_rejects_bad_amplitude_and_gap() {
        let config = EncoderConfig {
            amplitude: 0.0,
            ..EncoderConfig::default()
        };
        assert!(Encoder::new(config).is_err());

        let config = EncoderConfig {
            amplitude: 1.5,
            ..EncoderConfig::default()
        };
        assert!(Encoder::new(config).is_err());

        let config = EncoderConfig {
            block_gap: 0.01,
            ..EncoderConfig::default()
        };
        assert!(Encoder::new(config).is_err());
    }

    #[test]
    fn test_signal_starts_silent_and_stays_in_range() {
        let encoder = Encoder::new(EncoderConfig::default()).unwrap();
        let signal = encoder.encode(&vec![0x5Au8; 2048]).unwrap();
        let sample_rate = ModemConfig::default().sample_rate as usize;
        assert!(signal[..sample_rate].iter().all(|&s| s == 0.0));
        assert!(signal.iter().all(|&s| s.abs() <= 1.0));
    }

    #[test]
    fn test_length_scales_with_blocks() {
        let encoder = Encoder::new(EncoderConfig::default()).unwrap();
        let one = encoder.encode(&vec![0u8; 2048]).unwrap().len();
        let two = encoder.encode(&vec![0u8; 4096]).unwrap().len();
        let modem = ModemConfig::default();
        let d = modem.samples_per_symbol();
        // a block adds its gap, alignment, marker and packet symbols
        let packet_symbols = (modem.packet_size + 6) * 4 * (modem.block_size / modem.packet_size);
        let block_symbols = (ALIGNMENT_BYTES.len() + 4) * 4 + packet_symbols;
        let gap_symbols = (0.1 * modem.symbol_rate as f32) as usize;
        assert_eq!(two - one, (block_symbols + gap_symbols) * d);
    }
}
