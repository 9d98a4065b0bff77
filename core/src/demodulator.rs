//! Carrier acquisition, phase-locked demodulation and symbol recovery.
//!
//! One call per audio sample; at most one symbol comes out per symbol
//! period. The state machine walks settle → gain sense → carrier sync →
//! alignment → steady-state decoding, and latches `Error` if the carrier
//! disappears underneath it.

use tracing::debug;

use crate::correlator::{Correlator, PATTERN_LENGTH};
use crate::crf::CarrierRejectionFilter;
use crate::error::Result;
use crate::math;
use crate::one_pole::{OnePoleHighpass, OnePoleLowpass};
use crate::pll::PhaseLockedLoop;
use crate::window::Bay;
use crate::ModemConfig;

/// Minimum envelope for the input to count as a carrier.
const LEVEL_THRESHOLD: f32 = 0.05;
/// Envelope level the AGC normalizes to.
const AGC_TARGET: f32 = 0.64;
/// An early/late window must beat the on-time one by this factor.
const TIMING_THRESHOLD: f32 = 1.25;
/// Correlation peaks averaged into the decision phase.
const CORRELATION_PEAKS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodulatorState {
    /// Let the DC blocker and envelope follower settle.
    WaitToSettle,
    /// Measure the envelope and derive the AGC gain.
    SenseGain,
    /// Lock the PLL onto the zero-symbol leader.
    CarrierSync,
    /// Recover symbol timing from the alignment pattern.
    Align,
    /// Locked; symbols are being emitted.
    Ok,
    /// Carrier lost; needs an external resync.
    Error,
}

pub struct Demodulator {
    state: DemodulatorState,
    samples_per_symbol: usize,
    settle_samples: u32,
    carrier_sync_symbols: u32,

    hpf: OnePoleHighpass,
    follower: OnePoleLowpass,
    agc_gain: f32,

    pll: PhaseLockedLoop,
    crf_i: CarrierRejectionFilter,
    crf_q: CarrierRejectionFilter,

    correlator: Correlator,
    i_history: Bay,
    q_history: Bay,

    decision_phase: f32,
    skip_decision: bool,
    last_phase: f32,

    skipped_samples: u32,
    zero_symbols: u32,
    armed: bool,

    peak_acc_i: f32,
    peak_acc_q: f32,
    peaks: u32,
}

impl Demodulator {
    pub fn new(config: &ModemConfig) -> Result<Self> {
        let samples_per_symbol = config.samples_per_symbol();
        Ok(Self {
            state: DemodulatorState::WaitToSettle,
            samples_per_symbol,
            settle_samples: config.sample_rate / 4,
            carrier_sync_symbols: (config.symbol_rate / 40).max(1),
            hpf: OnePoleHighpass::new(0.001),
            follower: OnePoleLowpass::new(0.0001),
            agc_gain: 1.0,
            pll: PhaseLockedLoop::new(1.0 / samples_per_symbol as f32),
            crf_i: CarrierRejectionFilter::new(samples_per_symbol)?,
            crf_q: CarrierRejectionFilter::new(samples_per_symbol)?,
            correlator: Correlator::new(samples_per_symbol),
            i_history: Bay::new(samples_per_symbol, PATTERN_LENGTH),
            q_history: Bay::new(samples_per_symbol, PATTERN_LENGTH),
            decision_phase: 0.0,
            skip_decision: false,
            last_phase: 0.0,
            skipped_samples: 0,
            zero_symbols: 0,
            armed: false,
            peak_acc_i: 0.0,
            peak_acc_q: 0.0,
            peaks: 0,
        })
    }

    pub fn state(&self) -> DemodulatorState {
        self.state
    }

    /// Envelope of the (pre-gain) input signal.
    pub fn signal_power(&self) -> f32 {
        self.follower.output()
    }

    pub fn decision_phase(&self) -> f32 {
        self.decision_phase
    }

    /// Re-enter carrier acquisition. With `discover` the envelope and AGC
    /// gain are re-measured from scratch (initial reception); without it the
    /// learned gain and phase increment are kept and acquisition resumes at
    /// carrier sync (between blocks).
    pub fn sync_carrier(&mut self, discover: bool) {
        self.skipped_samples = 0;
        self.zero_symbols = 0;
        self.armed = false;
        self.skip_decision = false;

        if discover {
            self.follower.reset();
            self.agc_gain = 1.0;
            self.hpf.reset();
            self.crf_i.reset();
            self.crf_q.reset();
            self.i_history.reset();
            self.q_history.reset();
            self.pll.reset();
            self.decision_phase = 0.0;
            self.state = DemodulatorState::WaitToSettle;
        } else {
            self.pll.sync();
            self.state = DemodulatorState::CarrierSync;
        }
    }

    /// Process one sample; yields the decided symbol at decision instants
    /// once the demodulator is locked.
    pub fn process(&mut self, sample: f32) -> Option<u8> {
        let sample = self.hpf.process(sample);
        self.follower.process(sample.abs());
        let level = self.follower.output();
        let sample = sample * self.agc_gain;

        match self.state {
            DemodulatorState::WaitToSettle => {
                if self.skipped_samples < self.settle_samples {
                    self.skipped_samples += 1;
                } else if level > LEVEL_THRESHOLD {
                    self.skipped_samples = 0;
                    self.state = DemodulatorState::SenseGain;
                }
                None
            }
            DemodulatorState::SenseGain => {
                if self.skipped_samples < self.settle_samples {
                    self.skipped_samples += 1;
                } else if level > LEVEL_THRESHOLD {
                    self.agc_gain = AGC_TARGET / level;
                    debug!(gain = self.agc_gain, "carrier level sensed");
                    self.state = DemodulatorState::CarrierSync;
                } else {
                    // the carrier went away again while we were measuring
                    self.skipped_samples = 0;
                    self.state = DemodulatorState::WaitToSettle;
                }
                None
            }
            DemodulatorState::Error => None,
            _ => self.demodulate(sample, level),
        }
    }

    fn demodulate(&mut self, sample: f32, level: f32) -> Option<u8> {
        if level < LEVEL_THRESHOLD {
            debug!(level, "carrier dropped");
            self.state = DemodulatorState::Error;
            return None;
        }

        let phase = self.pll.phase();
        let i_osc = math::cosine(phase);
        let q_osc = math::sine(phase);

        let i = self.crf_i.process(2.0 * sample * i_osc);
        let q = self.crf_q.process(-2.0 * sample * q_osc);

        // During carrier sync the loop pulls toward constellation point
        // (-1, -1); afterwards it runs decision-directed.
        let phase_error = if self.state == DemodulatorState::CarrierSync {
            q - i
        } else {
            (if q > 0.0 { i } else { -i }) - (if i > 0.0 { q } else { -q })
        };
        self.pll.process(phase_error / 16.0);

        self.q_history.write(q);
        self.i_history.write(i);

        let prev_phase = phase;
        let phase = self.pll.phase();
        let wrapped = prev_phase > phase;

        let crossed = if wrapped {
            prev_phase < self.decision_phase || phase >= self.decision_phase
        } else {
            prev_phase < self.decision_phase && phase >= self.decision_phase
        };

        let mut symbol = None;
        if crossed {
            if self.skip_decision {
                self.skip_decision = false;
            } else {
                match self.state {
                    DemodulatorState::CarrierSync => self.carrier_sync_decision(),
                    DemodulatorState::Ok => symbol = Some(self.decide_symbol(true)),
                    _ => {}
                }
            }
        }

        // The correlator runs from the moment carrier sync arms, so the
        // first alignment pair is never lost to the handoff into Align.
        if self.state == DemodulatorState::Align
            || (self.state == DemodulatorState::CarrierSync && self.armed)
        {
            if let Some(tilt) = self.correlator.process(&self.i_history, &self.q_history) {
                self.collect_peak(tilt, phase);
            }
        }

        self.last_phase = prev_phase;
        symbol
    }

    fn carrier_sync_decision(&mut self) {
        if self.decide_symbol(false) == 0 {
            if !self.armed {
                self.zero_symbols += 1;
                if self.zero_symbols >= self.carrier_sync_symbols {
                    self.armed = true;
                    self.correlator.reset();
                    self.peak_acc_i = 0.0;
                    self.peak_acc_q = 0.0;
                    self.peaks = 0;
                    debug!("carrier locked, waiting for alignment");
                }
            }
        } else if self.armed {
            self.state = DemodulatorState::Align;
        } else {
            self.zero_symbols = 0;
        }
    }

    fn collect_peak(&mut self, tilt: f32, current_phase: f32) {
        // the peak is declared one sample after the maximum, whose mixing
        // phase was recorded last iteration
        let estimate = math::wrap(self.last_phase + tilt * self.pll.phase_increment());
        self.peak_acc_i += math::cosine(estimate);
        self.peak_acc_q += math::sine(estimate);
        self.peaks += 1;

        if self.peaks == CORRELATION_PEAKS {
            self.decision_phase = math::phase_of(self.peak_acc_i, self.peak_acc_q);
            self.state = DemodulatorState::Ok;
            // If the next crossing lands inside the alignment tail, sit out
            // one symbol instead of decoding it.
            if math::wrap(self.decision_phase - current_phase) <= 0.5 {
                self.skip_decision = true;
            }
            debug!(
                decision_phase = self.decision_phase,
                increment = self.pll.phase_increment(),
                "symbol timing recovered"
            );
        }
    }

    fn decide_symbol(&self, adjust_timing: bool) -> u8 {
        let latest = 0;
        let late = 1;
        let early = self.samples_per_symbol - 2;
        let earliest = self.samples_per_symbol - 1;

        let i_window = self.i_history.stage(0);
        let q_window = self.q_history.stage(0);

        let mut i_sum = i_window.sum();
        let mut q_sum = q_window.sum();

        let i_on_time = i_sum - i_window.tap(latest) - i_window.tap(earliest);
        let q_on_time = q_sum - q_window.tap(latest) - q_window.tap(earliest);

        if adjust_timing {
            let i_late = i_sum - i_window.tap(early) - i_window.tap(earliest);
            let q_late = q_sum - q_window.tap(early) - q_window.tap(earliest);
            let i_early = i_sum - i_window.tap(late) - i_window.tap(latest);
            let q_early = q_sum - q_window.tap(late) - q_window.tap(latest);

            let on_time_strength = q_on_time.abs() + i_on_time.abs();
            let late_strength = q_late.abs() + i_late.abs();
            let early_strength = q_early.abs() + i_early.abs();

            let threshold = TIMING_THRESHOLD * on_time_strength;
            let go_late = late_strength > threshold;
            let go_early = early_strength > threshold;

            if go_late && !go_early {
                i_sum = i_late;
                q_sum = q_late;
            } else if go_early && !go_late {
                i_sum = i_early;
                q_sum = q_early;
            }
        } else {
            i_sum = i_on_time;
            q_sum = q_on_time;
        }

        (if i_sum < 0.0 { 0 } else { 2 }) + (if q_sum < 0.0 { 0 } else { 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn config() -> ModemConfig {
        ModemConfig::default()
    }

    /// Zero-symbol carrier at one cycle per symbol, encoder scaling.
    fn carrier_samples(config: &ModemConfig, symbols: usize) -> Vec<f32> {
        let d = config.samples_per_symbol();
        let mut samples = Vec::with_capacity(symbols * d);
        for _ in 0..symbols {
            for k in 0..d {
                let phase = 2.0 * PI * k as f32 / d as f32;
                samples.push((-phase.cos() + phase.sin()) / 2f32.sqrt());
            }
        }
        samples
    }

    #[test]
    fn test_reaches_carrier_sync_on_leader() {
        let config = config();
        let mut demod = Demodulator::new(&config).unwrap();
        // 1.25 s of zero-symbol carrier
        for sample in carrier_samples(&config, config.symbol_rate as usize + 2000) {
            assert_eq!(demod.process(sample), None);
        }
        assert_eq!(demod.state(), DemodulatorState::CarrierSync);
        assert!(demod.signal_power() > LEVEL_THRESHOLD);
    }

    #[test]
    fn test_stays_settling_on_silence() {
        let config = config();
        let mut demod = Demodulator::new(&config).unwrap();
        for _ in 0..2 * config.sample_rate {
            demod.process(0.0);
        }
        assert_eq!(demod.state(), DemodulatorState::WaitToSettle);
    }

    #[test]
    fn test_carrier_loss_latches_error() {
        let config = config();
        let mut demod = Demodulator::new(&config).unwrap();
        for sample in carrier_samples(&config, config.symbol_rate as usize) {
            demod.process(sample);
        }
        assert_eq!(demod.state(), DemodulatorState::CarrierSync);
        for _ in 0..config.sample_rate {
            demod.process(0.0);
        }
        assert_eq!(demod.state(), DemodulatorState::Error);
    }

    #[test]
    fn test_resync_skips_level_discovery() {
        let config = config();
        let mut demod = Demodulator::new(&config).unwrap();
        for sample in carrier_samples(&config, config.symbol_rate as usize) {
            demod.process(sample);
        }
        demod.sync_carrier(false);
        assert_eq!(demod.state(), DemodulatorState::CarrierSync);
        demod.sync_carrier(true);
        assert_eq!(demod.state(), DemodulatorState::WaitToSettle);
    }
}
