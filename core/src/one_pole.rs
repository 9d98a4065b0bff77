//! Complementary one-pole filters for DC removal and envelope following.

use std::f32::consts::PI;

pub struct OnePoleLowpass {
    factor: f32,
    history: f32,
}

impl OnePoleLowpass {
    pub fn new(normalized_frequency: f32) -> Self {
        Self {
            factor: 1.0 - (-2.0 * PI * normalized_frequency).exp(),
            history: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.history = 0.0;
    }

    pub fn process(&mut self, input: f32) -> f32 {
        self.history += self.factor * (input - self.history);
        self.history
    }

    pub fn output(&self) -> f32 {
        self.history
    }
}

pub struct OnePoleHighpass {
    lowpass: OnePoleLowpass,
}

impl OnePoleHighpass {
    pub fn new(normalized_frequency: f32) -> Self {
        Self {
            lowpass: OnePoleLowpass::new(normalized_frequency),
        }
    }

    pub fn reset(&mut self) {
        self.lowpass.reset();
    }

    pub fn process(&mut self, input: f32) -> f32 {
        input - self.lowpass.process(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowpass_settles_on_constant_input() {
        let mut lp = OnePoleLowpass::new(0.01);
        let mut out = 0.0;
        for _ in 0..2000 {
            out = lp.process(1.0);
        }
        assert!((out - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_highpass_removes_dc() {
        let mut hp = OnePoleHighpass::new(0.01);
        let mut out = 1.0;
        for _ in 0..2000 {
            out = hp.process(1.0);
        }
        assert!(out.abs() < 1e-3);
    }

    #[test]
    fn test_highpass_passes_fast_transitions() {
        let mut hp = OnePoleHighpass::new(0.001);
        hp.process(0.0);
        let out = hp.process(1.0);
        assert!(out > 0.9);
    }
}
