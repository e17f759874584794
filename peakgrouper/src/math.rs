//! Windowed density and trend estimation helpers shared across the pipeline
use num_traits::Float;

/// Partition a sorted sequence into maximal runs of near-adjacent values,
/// splitting wherever the gap between neighbors exceeds `gap_tolerance`.
pub fn expanding_window<F: Float>(sorted_values: &[F], gap_tolerance: F) -> Vec<Vec<F>> {
    let mut windows = Vec::new();
    let mut current: Vec<F> = Vec::new();
    for &value in sorted_values {
        match current.last() {
            Some(&last) if (value - last) > gap_tolerance => {
                windows.push(std::mem::take(&mut current));
                current.push(value);
            }
            _ => current.push(value),
        }
    }
    if !current.is_empty() {
        windows.push(current);
    }
    windows
}

/// Ordinary least squares fit of `y = alpha + beta * x`.
///
/// Degenerate populations, fewer than two points or zero variance in `x`,
/// yield `(0, 0)` so that downstream error terms collapse to the raw
/// estimate rather than failing.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return (0.0, 0.0);
    }
    let x_mean = xs[..n].iter().sum::<f64>() / n as f64;
    let y_mean = ys[..n].iter().sum::<f64>() / n as f64;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&x, &y) in xs[..n].iter().zip(ys[..n].iter()) {
        sxx += (x - x_mean).powi(2);
        sxy += (x - x_mean) * (y - y_mean);
    }
    if sxx == 0.0 {
        return (0.0, 0.0);
    }
    let beta = sxy / sxx;
    let alpha = y_mean - beta * x_mean;
    (alpha, beta)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_expanding_window() {
        let values = [1.0, 2.0, 3.0, 10.0, 11.0, 30.0];
        let windows = expanding_window(&values, 2.0);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(windows[1], vec![10.0, 11.0]);
        assert_eq!(windows[2], vec![30.0]);

        assert!(expanding_window::<f64>(&[], 2.0).is_empty());
    }

    #[test]
    fn test_linear_regression() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 + 2.0 * x).collect();
        let (alpha, beta) = linear_regression(&xs, &ys);
        assert!((alpha - 3.0).abs() < 1e-9);
        assert!((beta - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_regression_degenerate() {
        assert_eq!(linear_regression(&[1.0], &[2.0]), (0.0, 0.0));
        assert_eq!(linear_regression(&[5.0, 5.0], &[1.0, 2.0]), (0.0, 0.0));
    }

}
