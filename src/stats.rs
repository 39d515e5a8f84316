//! Numeric helpers for the correlation analysis.

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the Pearson correlation coefficient of two paired series.
///
/// Degenerate inputs are defined results, not errors: returns `None` when
/// the lengths differ, the series are empty, or either series is constant
/// (zero sum of squares would divide by zero).
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.is_empty() {
        return None;
    }

    let mean_x = mean(xs);
    let mean_y = mean(ys);

    let numerator: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let ss_x: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    let ss_y: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();

    let denominator = (ss_x * ss_y).sqrt();
    if denominator == 0.0 {
        return None;
    }

    Some(numerator / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_mean_normal_values() {
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
    }

    #[test]
    fn test_pearson_perfect_positive() {
        assert_eq!(pearson(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), Some(1.0));
    }

    #[test]
    fn test_pearson_perfect_negative() {
        assert_eq!(pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]), Some(-1.0));
    }

    #[test]
    fn test_pearson_constant_series_is_undefined() {
        assert_eq!(pearson(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn test_pearson_empty_is_undefined() {
        assert_eq!(pearson(&[], &[]), None);
    }

    #[test]
    fn test_pearson_length_mismatch_is_undefined() {
        assert_eq!(pearson(&[1.0, 2.0], &[1.0]), None);
    }

    #[test]
    fn test_pearson_scaled_series_still_perfect() {
        let r = pearson(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
    }
}
