//! Detects the two-symbol alignment pattern `{2, 1}` in the demodulated
//! I/Q history and estimates where inside the sample grid the symbol
//! boundary actually sits.

use crate::window::{Bay, Window};

const ALIGNMENT_SEQUENCE: [u8; 2] = [2, 1];

/// Length of the alignment pattern in symbols; the I/Q history bays must be
/// this wide.
pub const PATTERN_LENGTH: usize = ALIGNMENT_SEQUENCE.len();

pub struct Correlator {
    history: Window,
    age: u32,
    maximum: f32,
    min_peak: f32,
    warmup: u32,
}

impl Correlator {
    pub fn new(samples_per_symbol: usize) -> Self {
        Self {
            history: Window::new(3),
            age: 0,
            maximum: 0.0,
            // half the ideal peak height
            min_peak: samples_per_symbol as f32,
            warmup: samples_per_symbol as u32,
        }
    }

    pub fn reset(&mut self) {
        self.history.reset();
        self.age = 0;
        self.maximum = 0.0;
    }

    /// Correlate the per-symbol I/Q sums against the pattern. Call once per
    /// sample, after the bays were written. On a detected peak, returns the
    /// boundary tilt in samples, in [-0.5, 0.5]: positive means the true
    /// maximum lies later than the observed one.
    pub fn process(&mut self, i_history: &Bay, q_history: &Bay) -> Option<f32> {
        let mut correlation = 0.0;
        for stage in 0..PATTERN_LENGTH {
            // stage 0 holds the newest symbol period, so it is matched
            // against the last pattern symbol
            let symbol = ALIGNMENT_SEQUENCE[PATTERN_LENGTH - 1 - stage];
            let i_sum = i_history.stage(stage).sum();
            let q_sum = q_history.stage(stage).sum();
            correlation += if symbol & 2 != 0 { i_sum } else { -i_sum };
            correlation += if symbol & 1 != 0 { q_sum } else { -q_sum };
        }

        if correlation < 0.0 {
            // reset the peak detector at each valley so consecutive peaks
            // are all seen
            self.maximum = 0.0;
        } else if correlation > self.maximum {
            self.maximum = correlation;
        }

        self.history.write(correlation);
        if self.age < u32::MAX {
            self.age += 1;
        }
        if self.age < self.warmup {
            return None;
        }

        let current = self.history.tap(0);
        let previous = self.history.tap(1);

        if previous == self.maximum && current < previous && self.maximum >= self.min_peak {
            let left = previous - self.history.tap(2);
            let right = previous - current;
            let tilt = if left + right > 0.0 {
                0.5 * (left - right) / (left + right)
            } else {
                0.0
            };
            Some(tilt)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: usize = 8;

    fn write_symbol(i_bay: &mut Bay, q_bay: &mut Bay, symbol: u8) {
        let i_level = if symbol & 2 != 0 { 1.0 } else { -1.0 };
        let q_level = if symbol & 1 != 0 { 1.0 } else { -1.0 };
        for _ in 0..D {
            i_bay.write(i_level);
            q_bay.write(q_level);
        }
    }

    fn run(symbols: &[u8]) -> Vec<f32> {
        let mut correlator = Correlator::new(D);
        let mut i_bay = Bay::new(D, PATTERN_LENGTH);
        let mut q_bay = Bay::new(D, PATTERN_LENGTH);
        let mut tilts = Vec::new();
        for &symbol in symbols {
            let i_level = if symbol & 2 != 0 { 1.0 } else { -1.0 };
            let q_level = if symbol & 1 != 0 { 1.0 } else { -1.0 };
            for _ in 0..D {
                i_bay.write(i_level);
                q_bay.write(q_level);
                if let Some(tilt) = correlator.process(&i_bay, &q_bay) {
                    tilts.push(tilt);
                }
            }
        }
        tilts
    }

    #[test]
    fn test_detects_each_pattern_repetition() {
        // four {2,1} pairs between a zero-symbol leader and the first
        // marker symbol; the last peak is declared one sample past the
        // pattern, so a trailing symbol is needed to observe it
        let tilts = run(&[0, 0, 0, 2, 1, 2, 1, 2, 1, 2, 1, 3]);
        assert_eq!(tilts.len(), 4);
        for tilt in tilts {
            assert!(tilt.abs() <= 0.5);
        }
    }

    #[test]
    fn test_ignores_zero_leader() {
        let tilts = run(&[0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(tilts.is_empty());
    }

    #[test]
    fn test_ignores_marker_symbols() {
        // the 3,0 alternation of the block marker correlates to zero
        let tilts = run(&[3, 0, 3, 0, 3, 0, 3, 0]);
        assert!(tilts.is_empty());
    }

    #[test]
    fn test_reset_requires_new_warmup() {
        let mut correlator = Correlator::new(D);
        let mut i_bay = Bay::new(D, PATTERN_LENGTH);
        let mut q_bay = Bay::new(D, PATTERN_LENGTH);
        write_symbol(&mut i_bay, &mut q_bay, 2);
        write_symbol(&mut i_bay, &mut q_bay, 1);
        correlator.reset();
        // first sample after reset is inside the warmup window
        i_bay.write(1.0);
        q_bay.write(-1.0);
        assert!(correlator.process(&i_bay, &q_bay).is_none());
    }
}
