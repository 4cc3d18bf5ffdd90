//! Derived-metric helpers.
//!
//! All division operations are safe against zero denominators and produce
//! `0.0` rather than NaN / Infinity, which keeps every rate serialisable.

/// Ratio safe against zero denominator. Returns 0.0 when denominator is zero.
pub fn safe_rate(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Round to `places` decimal places. Non-finite input collapses to 0.0.
pub fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Mean of an aggregate, treating SQL `NULL` (no rows) as zero.
pub fn mean_or_zero(value: Option<f64>, places: i32) -> f64 {
    value.map(|v| round_to(v, places)).unwrap_or(0.0)
}

/// True when `a` and `b` agree within `tolerance`.
pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
