//! QPSK audio modem for firmware-over-audio transfer
//!
//! Receives binary payloads transmitted as an audio-band QPSK signal, the way
//! a microcontroller bootloader would: samples go into a lock-free FIFO from
//! the capture interrupt, and the main loop drains them through carrier
//! recovery, symbol timing recovery and CRC-protected packet framing until a
//! flash-page-sized block is ready to persist. The matching [`Encoder`]
//! renders a payload back into the audio wire format.

pub mod correlator;
pub mod crc32;
pub mod crf;
pub mod decoder;
pub mod demodulator;
pub mod encoder;
pub mod error;
pub mod fifo;
pub mod hamming;
mod math;
pub mod one_pole;
pub mod packet;
pub mod pll;
pub mod window;

pub use decoder::{DecodeResult, Decoder};
pub use encoder::{Encoder, EncoderConfig};
pub use error::{ErrorKind, FirmwaveError, Result};
pub use fifo::InputHandle;

/// Marker announcing that a payload block follows.
pub const BLOCK_MARKER: u32 = 0xCCCC_CCCC;
/// Marker announcing the end of the transmission.
pub const END_MARKER: u32 = 0xF0F0_F0F0;
/// Sync symbols per marker, two bits each.
pub const MARKER_SYMBOLS: u32 = 16;

/// Sample-per-symbol ratios with a carrier rejection kernel available.
pub const SUPPORTED_RATIOS: [u32; 4] = [6, 8, 12, 16];

/// Link parameters shared by the encoder and the decoder.
///
/// Both ends must agree on every field; the CRC seed travels separately
/// (it is handed to [`Decoder::new`] and [`EncoderConfig`] at runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModemConfig {
    /// Audio sample rate in Hz.
    pub sample_rate: u32,
    /// Symbol rate in baud; the carrier runs at one cycle per symbol.
    pub symbol_rate: u32,
    /// Payload bytes per packet, a multiple of 4.
    pub packet_size: usize,
    /// Bytes per delivered block, a multiple of `packet_size`.
    pub block_size: usize,
    /// Sample FIFO capacity, a power of two.
    pub fifo_capacity: usize,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            symbol_rate: 8_000,
            packet_size: 256,
            block_size: 2048,
            fifo_capacity: 1024,
        }
    }
}

impl ModemConfig {
    pub fn samples_per_symbol(&self) -> usize {
        (self.sample_rate / self.symbol_rate) as usize
    }

    /// Check every cross-field invariant. Called by both ends at construction.
    pub fn validate(&self) -> Result<()> {
        if self.symbol_rate == 0 || self.sample_rate % self.symbol_rate != 0 {
            return Err(FirmwaveError::InvalidConfig(format!(
                "sample rate {} is not an integer multiple of symbol rate {}",
                self.sample_rate, self.symbol_rate
            )));
        }
        let ratio = self.sample_rate / self.symbol_rate;
        if !SUPPORTED_RATIOS.contains(&ratio) {
            return Err(FirmwaveError::InvalidConfig(format!(
                "unsupported samples-per-symbol ratio {} (supported: {:?})",
                ratio, SUPPORTED_RATIOS
            )));
        }
        if self.packet_size == 0 || self.packet_size % 4 != 0 {
            return Err(FirmwaveError::InvalidConfig(format!(
                "packet size {} is not a positive multiple of 4",
                self.packet_size
            )));
        }
        if self.block_size == 0 || self.block_size % self.packet_size != 0 {
            return Err(FirmwaveError::InvalidConfig(format!(
                "block size {} is not a positive multiple of packet size {}",
                self.block_size, self.packet_size
            )));
        }
        if !self.fifo_capacity.is_power_of_two() {
            return Err(FirmwaveError::InvalidConfig(format!(
                "FIFO capacity {} is not a power of two",
                self.fifo_capacity
            )));
        }
        // The 16-bit ECC word must be able to number every data and CRC bit.
        let protected_bits = (self.packet_size + 4) * 8;
        if protected_bits > (1 << 16) - 16 - 1 {
            return Err(FirmwaveError::InvalidConfig(format!(
                "packet size {} exceeds Hamming coverage",
                self.packet_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ModemConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_fractional_ratio() {
        let config = ModemConfig {
            symbol_rate: 7_000,
            ..ModemConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unsupported_ratio() {
        let config = ModemConfig {
            sample_rate: 48_000,
            symbol_rate: 2_400, // ratio 20
            ..ModemConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unaligned_sizes() {
        let config = ModemConfig {
            packet_size: 250,
            ..ModemConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ModemConfig {
            block_size: 2000,
            ..ModemConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_power_of_two_fifo() {
        let config = ModemConfig {
            fifo_capacity: 1000,
            ..ModemConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
