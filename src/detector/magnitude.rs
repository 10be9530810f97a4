//! Magnitude model: PGA ↔ Richter conversions and derived scalars.
//!
//! All functions are pure and clamped to physically plausible ranges so a
//! corrupt sample can never produce an unbounded record field.

/// Conversion from g to mm/s² (standard gravity × 1000).
const G_TO_MM_S2: f64 = 9_806.65;

/// Richter magnitude proxy from peak ground acceleration (g).
///
/// Clamped to [-2, 10].
pub fn richter(pga_g: f64, local_offset: f64) -> f64 {
    ((pga_g * G_TO_MM_S2).log10() - local_offset).clamp(-2.0, 10.0)
}

/// Local magnitude estimate from PGA (g), assuming a 5 Hz dominant signal.
///
/// Clamped to [-3, 8].
pub fn local_magnitude(pga_g: f64, local_offset: f64) -> f64 {
    let displacement_um = (pga_g / (2.0 * std::f64::consts::PI * 5.0)) * 1e6;
    (displacement_um.log10() - 2.0 - local_offset).clamp(-3.0, 8.0)
}

/// Radiated energy (Gutenberg-Richter) in joules for a Richter magnitude.
///
/// Zero below the model floor of R = -2; clamped to [1, 1e20] otherwise.
pub fn energy_joules(richter: f64) -> f64 {
    if richter < -2.0 {
        return 0.0;
    }
    10f64.powf(11.8 + 1.5 * richter).clamp(1.0, 1e20)
}

/// Peak frequency heuristic (Hz) from PGA (g), clamped to [1, 30].
///
/// Coarse empirical fit kept for record-field compatibility only; not a
/// scientific output.
pub fn peak_frequency_hz(pga_g: f64) -> f64 {
    (30.0 - 50.0 * pga_g).clamp(1.0, 30.0)
}

/// Inverse of [`richter`]: PGA (g) for a target magnitude. Used by the
/// simulator. Clamped to [1e-4, 10] g.
pub fn pga_from_richter(richter: f64, local_offset: f64) -> f64 {
    (10f64.powf(richter + local_offset) / G_TO_MM_S2).clamp(1e-4, 10.0)
}

/// Synthetic shaking duration (ms) for a simulated event of magnitude R.
///
/// Piecewise linear, clamped to [100 ms, 300 s].
pub fn synthetic_duration_ms(richter: f64) -> u64 {
    let ms = match richter {
        r if r < 2.0 => 100.0 + 200.0 * r,
        r if r < 4.0 => 1_000.0 + 2_000.0 * (r - 2.0),
        r if r < 6.0 => 5_000.0 + 12_500.0 * (r - 4.0),
        r if r < 7.0 => 30_000.0 + 90_000.0 * (r - 6.0),
        r => 120_000.0 + 180_000.0 * (r - 7.0),
    };
    (ms.clamp(100.0, 300_000.0)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn richter_of_one_g_is_about_four() {
        // 1 g ≈ 9806.65 mm/s², log10 ≈ 3.99
        let r = richter(1.0, 0.0);
        assert!((r - 3.9915).abs() < 1e-3, "got {r}");
    }

    #[test]
    fn richter_clamps_extremes() {
        assert!((richter(1e-12, 0.0) - (-2.0)).abs() < f64::EPSILON);
        assert!((richter(1e12, 0.0) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn round_trip_within_tolerance() {
        // richter(pga_from_richter(R)) ≈ R for R in [0, 8]
        let mut r = 0.0;
        while r <= 8.0 {
            let pga = pga_from_richter(r, 0.0);
            let back = richter(pga, 0.0);
            // The PGA clamp floors very small magnitudes; above that the
            // inverse is exact.
            if (1e-4..10.0).contains(&pga) {
                assert!((back - r).abs() < 1e-3, "R={r} -> pga={pga} -> {back}");
            }
            r += 0.25;
        }
    }

    #[test]
    fn energy_floor_and_growth() {
        assert!((energy_joules(-3.0) - 0.0).abs() < f64::EPSILON);
        let e4 = energy_joules(4.0);
        let e5 = energy_joules(5.0);
        // One magnitude unit ≈ 31.6× energy
        assert!((e5 / e4 - 10f64.powf(1.5)).abs() < 1.0);
    }

    #[test]
    fn peak_frequency_bounds() {
        assert!((peak_frequency_hz(0.0) - 30.0).abs() < f64::EPSILON);
        assert!((peak_frequency_hz(1.0) - 1.0).abs() < f64::EPSILON);
        assert!((peak_frequency_hz(0.1) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn synthetic_duration_table() {
        assert_eq!(synthetic_duration_ms(0.0), 100);
        assert_eq!(synthetic_duration_ms(2.0), 1_000);
        assert_eq!(synthetic_duration_ms(4.0), 5_000);
        assert_eq!(synthetic_duration_ms(6.0), 30_000);
        assert_eq!(synthetic_duration_ms(7.0), 120_000);
        assert_eq!(synthetic_duration_ms(9.0), 300_000); // clamped
    }
}
