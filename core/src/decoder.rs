//! Top-level receive state machine: marker sync → packet decode → block
//! handoff → resync, with latched errors.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::demodulator::{Demodulator, DemodulatorState};
use crate::error::{ErrorKind, Result};
use crate::fifo::{InputHandle, SharedInput};
use crate::packet::{Block, Packet};
use crate::{ModemConfig, BLOCK_MARKER, END_MARKER, MARKER_SYMBOLS};

/// Outcome of one `process` tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeResult {
    /// Nothing notable; the FIFO drained.
    None,
    /// A packet validated and was appended to the block in progress.
    PacketComplete,
    /// The block is full; read it via `block_data` before the next call.
    BlockComplete,
    /// The end marker was received; terminal until `reset`.
    End,
    /// A latched error; inspect `error`, recover with `reset`.
    Error,
}

enum State {
    /// Accumulating marker symbols.
    Sync,
    /// Feeding symbols into the current packet.
    Decode,
    /// A completed block awaits consumption by the caller.
    Write,
    End,
    Error,
}

/// QPSK audio decoder.
///
/// The consumer context owns this struct and calls `process`, `reset` and
/// the accessors; the producer context pushes samples (and may abort)
/// through the cloneable [`InputHandle`]. `process` is cooperative: it
/// returns after every significant event and never waits for samples.
pub struct Decoder {
    shared: Arc<SharedInput>,
    demodulator: Demodulator,
    packet: Packet,
    block: Block,
    state: State,
    error: Option<ErrorKind>,
    marker: u32,
    marker_symbols: u32,
}

impl Decoder {
    pub fn new(config: ModemConfig, crc_seed: u32) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(SharedInput::new(config.fifo_capacity)),
            demodulator: Demodulator::new(&config)?,
            packet: Packet::new(config.packet_size, crc_seed),
            block: Block::new(config.block_size),
            state: State::Sync,
            error: None,
            marker: 0,
            marker_symbols: 0,
        })
    }

    /// Handle for the sample producer; clone it into the capture context.
    pub fn input(&self) -> InputHandle {
        InputHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Producer entry point for single-context use; see [`InputHandle::push`].
    pub fn push(&self, sample: f32) -> bool {
        self.shared.push(sample)
    }

    /// Bulk producer entry point, all-or-nothing on overflow.
    pub fn push_slice(&self, samples: &[f32]) -> bool {
        self.shared.push_slice(samples)
    }

    /// Request cancellation; the next `process` reports `ErrorKind::Abort`.
    pub fn abort(&self) {
        self.shared.abort.store(true, Ordering::Release);
    }

    /// Re-arm after an error or for a new transmission.
    pub fn reset(&mut self) {
        self.demodulator.sync_carrier(true);
        self.packet.reset();
        self.block.clear();
        self.shared.fifo.flush();
        self.shared.overflow.store(false, Ordering::Release);
        self.shared.abort.store(false, Ordering::Release);
        self.error = None;
        self.restart_sync();
    }

    /// The latched error, if the decoder is stopped on one.
    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    /// Contents of the completed block. Only meaningful between a
    /// `BlockComplete` result and the next call to `process`.
    pub fn block_data(&self) -> &[u32] {
        self.block.data()
    }

    /// Drain queued samples until an event fires or the FIFO runs dry.
    pub fn process(&mut self) -> DecodeResult {
        match self.state {
            State::End => return DecodeResult::End,
            State::Error => return DecodeResult::Error,
            State::Write => {
                // The caller is done with the block. Audio that arrived
                // while it was writing flash is stale; drop it and
                // re-acquire the carrier with the learned gain and rate.
                self.block.clear();
                self.demodulator.sync_carrier(false);
                self.shared.fifo.flush();
                self.shared.overflow.store(false, Ordering::Release);
                self.restart_sync();
            }
            _ => {}
        }

        loop {
            if self.shared.abort.load(Ordering::Acquire) {
                return self.fail(ErrorKind::Abort);
            }
            if self.shared.overflow.load(Ordering::Acquire) {
                return self.fail(ErrorKind::Overflow);
            }

            let Some(sample) = self.shared.fifo.pop() else {
                return DecodeResult::None;
            };

            let symbol = self.demodulator.process(sample);
            if self.demodulator.state() == DemodulatorState::Error {
                return self.fail(ErrorKind::Sync);
            }
            let Some(symbol) = symbol else {
                continue;
            };

            match self.state {
                State::Sync => {
                    self.marker = (self.marker << 2) | symbol as u32;
                    self.marker_symbols += 1;
                    if self.marker_symbols == MARKER_SYMBOLS {
                        match self.marker {
                            BLOCK_MARKER => {
                                debug!("block marker found");
                                self.packet.reset();
                                self.state = State::Decode;
                            }
                            END_MARKER => {
                                debug!("end marker found");
                                self.state = State::End;
                                return DecodeResult::End;
                            }
                            other => {
                                debug!(marker = other, "marker mismatch");
                                return self.fail(ErrorKind::Sync);
                            }
                        }
                    }
                }
                State::Decode => {
                    self.packet.write_symbol(symbol);
                    if self.packet.full() {
                        if !self.packet.valid() {
                            debug!(
                                expected = self.packet.expected_crc(),
                                calculated = self.packet.calculated_crc(),
                                "packet rejected"
                            );
                            return self.fail(ErrorKind::Crc);
                        }
                        trace!("packet accepted");
                        self.block.append_packet(&self.packet);
                        self.packet.reset();
                        if self.block.full() {
                            debug!("block complete");
                            self.state = State::Write;
                            return DecodeResult::BlockComplete;
                        }
                        return DecodeResult::PacketComplete;
                    }
                }
                // unreachable: terminal states returned before the loop,
                // Write was converted to Sync on entry
                _ => return DecodeResult::None,
            }
        }
    }

    fn restart_sync(&mut self) {
        self.state = State::Sync;
        self.marker = 0;
        self.marker_symbols = 0;
    }

    fn fail(&mut self, kind: ErrorKind) -> DecodeResult {
        debug!(error = %kind, "decoder stopped");
        self.state = State::Error;
        self.error = Some(kind);
        DecodeResult::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> Decoder {
        Decoder::new(ModemConfig::default(), 0x0420_ACAB).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ModemConfig {
            symbol_rate: 5_000, // ratio 9.6
            ..ModemConfig::default()
        };
        assert!(Decoder::new(config, 0).is_err());
    }

    #[test]
    fn test_empty_fifo_returns_none() {
        let mut decoder = decoder();
        assert_eq!(decoder.process(), DecodeResult::None);
        assert_eq!(decoder.error(), None);
    }

    #[test]
    fn test_abort_latches_until_reset() {
        let mut decoder = decoder();
        let input = decoder.input();
        input.push_slice(&[0.0; 64]);
        input.abort();
        assert_eq!(decoder.process(), DecodeResult::Error);
        assert_eq!(decoder.error(), Some(ErrorKind::Abort));
        // stays latched
        assert_eq!(decoder.process(), DecodeResult::Error);
        decoder.reset();
        assert_eq!(decoder.error(), None);
        assert_eq!(decoder.process(), DecodeResult::None);
    }

    #[test]
    fn test_overflow_latches() {
        let config = ModemConfig {
            fifo_capacity: 256,
            ..ModemConfig::default()
        };
        let mut decoder = Decoder::new(config, 0).unwrap();
        for _ in 0..1000 {
            decoder.push(0.0);
        }
        assert_eq!(decoder.process(), DecodeResult::Error);
        assert_eq!(decoder.error(), Some(ErrorKind::Overflow));
    }
}
