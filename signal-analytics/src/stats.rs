//! Descriptive statistics and significance tests
//!
//! Two-sided p-values come from the Student-t distribution. Degenerate inputs
//! (too few points, zero variance) are handled explicitly rather than
//! producing NaN.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::cmp::Ordering;

/// Result of a t-test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    pub t_stat: f64,
    pub p_value: f64,
}

impl TTest {
    /// Outcome when the standard error is zero
    fn degenerate(diff: f64) -> Self {
        if diff == 0.0 {
            Self {
                t_stat: 0.0,
                p_value: 1.0,
            }
        } else {
            Self {
                t_stat: f64::INFINITY.copysign(diff),
                p_value: 0.0,
            }
        }
    }
}

/// A correlation coefficient with its two-sided p-value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub coefficient: f64,
    pub p_value: f64,
    pub n: usize,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn sum_squared_deviations(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum()
}

/// Standard deviation with `n - 1` in the denominator; 0 below two points
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    (sum_squared_deviations(values) / (values.len() - 1) as f64).sqrt()
}

/// Standard deviation with `n` in the denominator
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (sum_squared_deviations(values) / values.len() as f64).sqrt()
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    sum_squared_deviations(values) / (values.len() - 1) as f64
}

/// Two-sided p-value of `t` under Student-t with `df` degrees of freedom
pub fn two_sided_p_value(t: f64, df: f64) -> f64 {
    if t.is_nan() || df <= 0.0 {
        return 1.0;
    }
    if t.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// One-sample t-test of `mean(values) == mu`. `None` below two points.
pub fn one_sample_t_test(values: &[f64], mu: f64) -> Option<TTest> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let diff = mean(values) - mu;
    let se = sample_std(values) / (n as f64).sqrt();
    if se == 0.0 {
        return Some(TTest::degenerate(diff));
    }

    let t_stat = diff / se;
    Some(TTest {
        t_stat,
        p_value: two_sided_p_value(t_stat, (n - 1) as f64),
    })
}

/// Welch's unequal-variance t-test of `mean(a) == mean(b)`
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<TTest> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (va, vb) = (sample_variance(a) / na, sample_variance(b) / nb);
    let diff = mean(a) - mean(b);
    let se = (va + vb).sqrt();
    if se == 0.0 {
        return Some(TTest::degenerate(diff));
    }

    // Welch-Satterthwaite
    let df = (va + vb).powi(2) / (va.powi(2) / (na - 1.0) + vb.powi(2) / (nb - 1.0));
    let t_stat = diff / se;
    Some(TTest {
        t_stat,
        p_value: two_sided_p_value(t_stat, df),
    })
}

/// Pearson correlation with a t-based p-value (`n - 2` degrees of freedom)
///
/// `None` for mismatched lengths, fewer than three points, or a constant
/// series.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<Correlation> {
    let n = x.len();
    if n != y.len() || n < 3 {
        return None;
    }

    let (mx, my) = (mean(x), mean(y));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }

    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    let df = (n - 2) as f64;
    let p_value = if r.abs() >= 1.0 {
        0.0
    } else {
        two_sided_p_value(r * (df / (1.0 - r * r)).sqrt(), df)
    };

    Some(Correlation {
        coefficient: r,
        p_value,
        n,
    })
}

/// 1-based ranks; ties share the average of their positions
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Spearman rank correlation: Pearson over average ranks
pub fn spearman(x: &[f64], y: &[f64]) -> Option<Correlation> {
    if x.len() != y.len() {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_descriptive() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&v), 5.0);
        assert_eq!(median(&v), 4.5);
        assert_eq!(population_std(&v), 2.0);
        assert!(close(sample_std(&v), 2.138089935, 1e-8));
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(sample_std(&[1.0]), 0.0);
    }

    #[test]
    fn test_one_sample_t_test() {
        // mean 2.5, sample std 1.2910, se 0.6455 -> t 3.873, df 3
        let result = one_sample_t_test(&[1.0, 2.0, 3.0, 4.0], 0.0).unwrap();
        assert!(close(result.t_stat, 3.872983, 1e-5));
        assert!(close(result.p_value, 0.030466, 1e-4));

        assert!(one_sample_t_test(&[1.0], 0.0).is_none());
    }

    #[test]
    fn test_degenerate_t_test() {
        let flat = one_sample_t_test(&[0.0, 0.0, 0.0], 0.0).unwrap();
        assert_eq!(flat.t_stat, 0.0);
        assert_eq!(flat.p_value, 1.0);

        let shifted = one_sample_t_test(&[0.01, 0.01], 0.0).unwrap();
        assert_eq!(shifted.t_stat, f64::INFINITY);
        assert_eq!(shifted.p_value, 0.0);
    }

    #[test]
    fn test_welch() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [1.0, 2.0, 3.0, 4.0, 5.0];
        let same = welch_t_test(&a, &b).unwrap();
        assert_eq!(same.t_stat, 0.0);
        assert!(close(same.p_value, 1.0, 1e-9));

        let c = [11.0, 12.0, 13.0, 14.0, 15.0];
        let apart = welch_t_test(&a, &c).unwrap();
        assert!(apart.t_stat < 0.0);
        assert!(apart.p_value < 0.001);
    }

    #[test]
    fn test_pearson() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let perfect = pearson(&x, &[2.0, 4.0, 6.0, 8.0, 10.0]).unwrap();
        assert_eq!(perfect.coefficient, 1.0);
        assert_eq!(perfect.p_value, 0.0);

        let inverse = pearson(&x, &[5.0, 4.0, 3.0, 2.0, 1.0]).unwrap();
        assert_eq!(inverse.coefficient, -1.0);

        // r = 0.8, t = 0.8 * sqrt(3 / 0.36) = 2.309, df 3 -> p ~ 0.104
        let partial = pearson(&x, &[1.0, 3.0, 2.0, 5.0, 4.0]).unwrap();
        assert!(close(partial.coefficient, 0.8, 1e-12));
        assert!(close(partial.p_value, 0.1041, 1e-3));

        assert!(pearson(&x, &[3.0; 5]).is_none());
        assert!(pearson(&[1.0, 2.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_ranks_with_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_spearman_monotone() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 8.0, 27.0, 64.0, 125.0];
        let rho = spearman(&x, &y).unwrap();
        assert!(close(rho.coefficient, 1.0, 1e-12));

        assert!(spearman(&x, &[7.0; 5]).is_none());
    }
}
