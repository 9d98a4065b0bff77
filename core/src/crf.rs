//! Carrier rejection filter: a short FIR low-pass that removes the
//! 2·f_carrier image left on the I and Q streams after mixing.
//!
//! One equi-ripple kernel per supported samples-per-symbol ratio, designed
//! for passband [0, 1/D] and stopband [2/D, 0.5]. The tables must stay
//! byte-identical to the companion encoder's design run.

use crate::error::{FirmwaveError, Result};
use crate::window::Window;

const KERNEL_LENGTH: usize = 7;

const KERNEL_06: [f32; KERNEL_LENGTH] = [
    -7.61504431e-02,
    4.23661388e-05,
    3.04728871e-01,
    5.00042366e-01,
    3.04728871e-01,
    4.23661388e-05,
    -7.61504431e-02,
];

const KERNEL_08: [f32; KERNEL_LENGTH] = [
    -4.62606751e-02,
    1.25000000e-01,
    2.96260675e-01,
    3.82800831e-01,
    2.96260675e-01,
    1.25000000e-01,
    -4.62606751e-02,
];

const KERNEL_12: [f32; KERNEL_LENGTH] = [
    4.06822339e-02,
    2.09317766e-01,
    2.09317766e-01,
    2.54748848e-01,
    2.09317766e-01,
    2.09317766e-01,
    4.06822339e-02,
];

const KERNEL_16: [f32; KERNEL_LENGTH] = [
    1.56977082e-01,
    1.37855092e-01,
    1.68060009e-01,
    1.79345186e-01,
    1.68060009e-01,
    1.37855092e-01,
    1.56977082e-01,
];

pub struct CarrierRejectionFilter {
    window: Window,
    kernel: &'static [f32; KERNEL_LENGTH],
}

impl CarrierRejectionFilter {
    pub fn new(samples_per_symbol: usize) -> Result<Self> {
        let kernel = match samples_per_symbol {
            6 => &KERNEL_06,
            8 => &KERNEL_08,
            12 => &KERNEL_12,
            16 => &KERNEL_16,
            other => {
                return Err(FirmwaveError::InvalidConfig(format!(
                    "no carrier rejection kernel for {} samples per symbol",
                    other
                )))
            }
        };
        Ok(Self {
            window: Window::new(KERNEL_LENGTH),
            kernel,
        })
    }

    pub fn reset(&mut self) {
        self.window.reset();
    }

    pub fn process(&mut self, input: f32) -> f32 {
        self.window.write(input);
        let mut acc = 0.0;
        for (i, &coefficient) in self.kernel.iter().enumerate() {
            acc += self.window.tap(i) * coefficient;
        }
        acc
    }
}
