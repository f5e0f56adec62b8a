/// Fixed per the spec: z = 1.96 (95% confidence).
const Z: f64 = 1.96;

/// Wilson score interval for a binomial proportion, well-behaved for small
/// `n` where the normal approximation breaks down. Returns `(low, high)`,
/// both clamped to `[0, 1]`.
#[inline]
pub fn wilson_interval(k: u32, n: u32) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }
    let n = n as f64;
    let p_hat = k as f64 / n;
    let z2 = Z * Z;

    let denom = 1.0 + z2 / n;
    let center = (p_hat + z2 / (2.0 * n)) / denom;
    let margin = (Z * ((p_hat * (1.0 - p_hat) / n) + (z2 / (4.0 * n * n))).sqrt()) / denom;

    ((center - margin).max(0.0), (center + margin).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: k=0, n=10 — the literal fixture in the spec's testable properties.
    /// Expected: low = 0, high ~= 0.278 (+/-1e-6).
    #[test]
    fn test_wilson_zero_successes_fixture() {
        let (low, high) = wilson_interval(0, 10);
        assert!((low - 0.0).abs() < 1e-6);
        assert!((high - 0.278).abs() < 1e-3);
    }

    /// Scenario: k=n (all successes), any n > 0.
    /// Expected: high == 1.0 exactly (clamped), low < 1.0.
    #[test]
    fn test_wilson_all_successes_clamped_high() {
        let (low, high) = wilson_interval(10, 10);
        assert_eq!(high, 1.0);
        assert!(low < 1.0);
    }

    /// Scenario: n=0 (no observations at all).
    /// Expected: both bounds are 0, not NaN or a division-by-zero panic.
    #[test]
    fn test_wilson_zero_n_returns_zero_interval() {
        let (low, high) = wilson_interval(0, 0);
        assert_eq!((low, high), (0.0, 0.0));
    }

    /// Scenario: k=5, n=10 (a fair coin estimate).
    /// Expected: the interval brackets 0.5 and both bounds lie in [0, 1].
    #[test]
    fn test_wilson_half_successes_brackets_half() {
        let (low, high) = wilson_interval(5, 10);
        assert!(low <= 0.5 && 0.5 <= high);
        assert!((0.0..=1.0).contains(&low));
        assert!((0.0..=1.0).contains(&high));
    }

    /// Scenario: larger n with the same proportion as a smaller n (50/100 vs 5/10).
    /// Expected: the interval narrows as n grows, since more observations raise confidence.
    #[test]
    fn test_wilson_narrows_with_more_data() {
        let (low_small, high_small) = wilson_interval(5, 10);
        let (low_big, high_big) = wilson_interval(50, 100);
        assert!(high_big - low_big < high_small - low_small);
    }
}
