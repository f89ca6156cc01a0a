//! Numeric cores for axis transduction (spec.md §4.6).
//!
//! Grounded on
//! `original_source/inputremapper/injection/consumers/mapping_handler.py`:
//! `_normalize`/`_calc_qubic` are ported near-verbatim since their exact
//! closed forms are part of the contract (spec.md's "Cubic expo shaping"
//! and "Normalization of EV_ABS" clauses), the rate loop reuses
//! `macro_engine::PreciseIterationFrequency` (same drift-correction
//! idiom, same source function).

pub mod abs_abs;
pub mod abs_rel;
pub mod rel_rel;

use crate::device::AbsInfo;

/// Maps a raw `EV_ABS` value to `x ∈ [-1, 1]` and returns the scale
/// factor (half the raw range, or `1` for a hat switch) needed to
/// convert a shaped `[-1, 1]` value back into raw/rel units.
pub fn normalize(raw: i32, info: &AbsInfo) -> (f64, f64) {
    if info.is_hat_switch() {
        return (raw as f64, 1.0);
    }
    let half_range = (info.max - info.min) as f64 / 2.0;
    let middle = half_range + info.min as f64;
    ((raw as f64 - middle) / half_range, half_range)
}

/// Cubic expo shaping, odd in `x`. `k == 0` is identity; `k > 0` softens
/// small inputs; `k < 0` is the real inverse of the `k > 0` curve (ported
/// from `_calc_qubic`'s closed-form solution of `y = d·y + a·y³`).
pub fn expo(x: f64, k: f64) -> f64 {
    if k == 0.0 {
        return x;
    }
    if k > 0.0 {
        let d = 1.0 - k;
        return d * x + (1.0 - d) * x.powi(3);
    }

    let sign = if x >= 0.0 { 1.0 } else { -1.0 };
    let x = x.abs();
    let d = 1.0 + k;
    let a = 1.0 - d;
    let b = d;
    let radicand = 27.0 * x.powi(2) + (4.0 * b.powi(3)) / a;
    let c = (radicand.sqrt() + 3f64.powf(1.5) * x).powf(1.0 / 3.0);
    let y = c / (2f64.powf(1.0 / 3.0) * 3f64.sqrt() * a.powf(1.0 / 3.0))
        - (2f64.powf(1.0 / 3.0) * b) / (3f64.sqrt() * a.powf(2.0 / 3.0) * c);
    y * sign
}

/// Applies deadzone, expo and gain to a normalized axis value, per
/// spec.md §4.6's shared transducer preamble. Returns `0.0` inside the
/// deadzone.
pub fn shape(x: f64, deadzone: f64, expo_k: f64, gain: f64) -> f64 {
    if x.abs() < deadzone {
        return 0.0;
    }
    expo(x, expo_k) * gain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AbsInfo;

    #[test]
    fn normalize_midpoint_is_zero() {
        let info = AbsInfo::new(0, 255);
        let (x, scale) = normalize(127, &info);
        assert!((x - (-0.0078)).abs() < 0.01);
        assert_eq!(scale, 127.5);
    }

    #[test]
    fn normalize_hat_switch_passes_through() {
        let mut info = AbsInfo::new(-1, 1);
        info.min = -1;
        info.max = 1;
        let (x, scale) = normalize(1, &info);
        assert_eq!(x, 1.0);
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn expo_zero_is_identity() {
        assert_eq!(expo(0.5, 0.0), 0.5);
    }

    #[test]
    fn expo_is_odd() {
        let k = 0.4;
        assert!((expo(0.7, k) + expo(-0.7, k)).abs() < 1e-9);
    }

    #[test]
    fn expo_endpoints_are_fixed() {
        assert!((expo(1.0, 0.5) - 1.0).abs() < 1e-6);
        assert!((expo(1.0, -0.5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn expo_negative_k_is_inverse_of_positive_k() {
        let k = 0.5;
        let x = 0.3;
        let forward = expo(x, k);
        let back = expo(forward, -k);
        assert!((back - x).abs() < 1e-6);
    }

    #[test]
    fn shape_zeroes_inside_deadzone() {
        assert_eq!(shape(0.05, 0.1, 0.0, 2.0), 0.0);
    }
}
