//! Phase arithmetic and the quadrant-mirrored lookup tables used by the
//! demodulator's oscillator and by the correlation-peak averaging.
//!
//! All angles are normalized turns: one carrier cycle spans [0, 1).

/// Fractional part, truncating toward zero (inputs are non-negative phases).
pub(crate) fn fract(x: f32) -> f32 {
    x - x.trunc()
}

/// Wrap an arbitrary phase difference into [0, 1).
pub(crate) fn wrap(x: f32) -> f32 {
    let f = fract(x);
    if f < 0.0 {
        f + 1.0
    } else {
        f
    }
}

const SINE_QUADRANT: [f32; 65] = [
    0.00000000e+00,
    2.45412285e-02,
    4.90676743e-02,
    7.35645636e-02,
    9.80171403e-02,
    1.22410675e-01,
    1.46730474e-01,
    1.70961889e-01,
    1.95090322e-01,
    2.19101240e-01,
    2.42980180e-01,
    2.66712757e-01,
    2.90284677e-01,
    3.13681740e-01,
    3.36889853e-01,
    3.59895037e-01,
    3.82683432e-01,
    4.05241314e-01,
    4.27555093e-01,
    4.49611330e-01,
    4.71396737e-01,
    4.92898192e-01,
    5.14102744e-01,
    5.34997620e-01,
    5.55570233e-01,
    5.75808191e-01,
    5.95699304e-01,
    6.15231591e-01,
    6.34393284e-01,
    6.53172843e-01,
    6.71558955e-01,
    6.89540545e-01,
    7.07106781e-01,
    7.24247083e-01,
    7.40951125e-01,
    7.57208847e-01,
    7.73010453e-01,
    7.88346428e-01,
    8.03207531e-01,
    8.17584813e-01,
    8.31469612e-01,
    8.44853565e-01,
    8.57728610e-01,
    8.70086991e-01,
    8.81921264e-01,
    8.93224301e-01,
    9.03989293e-01,
    9.14209756e-01,
    9.23879533e-01,
    9.32992799e-01,
    9.41544065e-01,
    9.49528181e-01,
    9.56940336e-01,
    9.63776066e-01,
    9.70031253e-01,
    9.75702130e-01,
    9.80785280e-01,
    9.85277642e-01,
    9.89176510e-01,
    9.92479535e-01,
    9.95184727e-01,
    9.97290457e-01,
    9.98795456e-01,
    9.99698819e-01,
    1.00000000e+00,
];

/// sin(2π·t) for t in [0, 1.25], folded through the quarter-wave table.
pub(crate) fn sine(t: f32) -> f32 {
    let index = (256.0 * t) as u32;
    let quadrant = (index & 0xC0) >> 6;
    let mut index = index & 0x3F;

    if quadrant & 1 != 0 {
        index = 0x40 - index;
    }

    let value = SINE_QUADRANT[index as usize];
    if quadrant & 2 != 0 {
        -value
    } else {
        value
    }
}

pub(crate) fn cosine(t: f32) -> f32 {
    sine(t + 0.25)
}

// atan(k/64) / 2π for k in 0..=64, i.e. the first octant in turns.
const ATAN_QUADRANT: [f32; 65] = [
    0.00000000e+00,
    2.48659364e-03,
    4.97197391e-03,
    7.45493100e-03,
    9.93426215e-03,
    1.24087752e-02,
    1.48772918e-02,
    1.73386510e-02,
    1.97917121e-02,
    2.22353579e-02,
    2.46684976e-02,
    2.70900693e-02,
    2.94990424e-02,
    3.18944204e-02,
    3.42752424e-02,
    3.66405853e-02,
    3.89895652e-02,
    4.13213389e-02,
    4.36351051e-02,
    4.59301052e-02,
    4.82056240e-02,
    5.04609904e-02,
    5.26955772e-02,
    5.49088019e-02,
    5.71001256e-02,
    5.92690536e-02,
    6.14151343e-02,
    6.35379589e-02,
    6.56371604e-02,
    6.77124128e-02,
    6.97634302e-02,
    7.17899654e-02,
    7.37918088e-02,
    7.57687872e-02,
    7.77207622e-02,
    7.96476291e-02,
    8.15493154e-02,
    8.34257790e-02,
    8.52770071e-02,
    8.71030145e-02,
    8.89038422e-02,
    9.06795559e-02,
    9.24302444e-02,
    9.41560182e-02,
    9.58570083e-02,
    9.75333644e-02,
    9.91852539e-02,
    1.00812860e-01,
    1.02416382e-01,
    1.03996032e-01,
    1.05552035e-01,
    1.07084626e-01,
    1.08594052e-01,
    1.10080570e-01,
    1.11544443e-01,
    1.12985943e-01,
    1.14405348e-01,
    1.15802940e-01,
    1.17179009e-01,
    1.18533847e-01,
    1.19867749e-01,
    1.21181014e-01,
    1.22473943e-01,
    1.23746837e-01,
    1.25000000e-01,
];

/// Angle of the vector (i, q) as a normalized phase in [0, 1).
///
/// Octant folding over the atan table; resolution matches the sine table.
pub(crate) fn phase_of(i: f32, q: f32) -> f32 {
    if i == 0.0 && q == 0.0 {
        return 0.0;
    }

    let ai = i.abs();
    let aq = q.abs();
    let mirrored = aq > ai;
    let ratio = if mirrored { ai / aq } else { aq / ai };

    let index = (64.0 * ratio + 0.5) as usize;
    let octant = ATAN_QUADRANT[index.min(64)];
    let octant = if mirrored { 0.25 - octant } else { octant };

    let phase = match (i >= 0.0, q >= 0.0) {
        (true, true) => octant,
        (false, true) => 0.5 - octant,
        (false, false) => 0.5 + octant,
        (true, false) => 1.0 - octant,
    };

    if phase >= 1.0 {
        phase - 1.0
    } else {
        phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_sine_matches_std() {
        for k in 0..1000 {
            let t = k as f32 / 1000.0;
            let expected = (2.0 * PI * t).sin();
            assert!(
                (sine(t) - expected).abs() < 0.03,
                "sine({}) = {} vs {}",
                t,
                sine(t),
                expected
            );
        }
    }

    #[test]
    fn test_cosine_matches_std() {
        for k in 0..1000 {
            let t = k as f32 / 1000.0;
            let expected = (2.0 * PI * t).cos();
            assert!((cosine(t) - expected).abs() < 0.03);
        }
    }

    #[test]
    fn test_phase_of_matches_atan2() {
        for k in 0..360 {
            let angle = 2.0 * PI * k as f32 / 360.0;
            let (i, q) = (angle.cos(), angle.sin());
            let expected = k as f32 / 360.0;
            let got = phase_of(i, q);
            let diff = (got - expected).abs();
            let diff = diff.min(1.0 - diff);
            assert!(diff < 0.005, "phase_of at {}°: {} vs {}", k, got, expected);
        }
    }

    #[test]
    fn test_wrap_negative() {
        assert!((wrap(-0.25) - 0.75).abs() < 1e-6);
        assert!((wrap(1.25) - 0.25).abs() < 1e-6);
        assert_eq!(wrap(0.0), 0.0);
    }
}
