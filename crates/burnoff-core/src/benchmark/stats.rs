//! Descriptive statistics over per-run samples.

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation. Zero for fewer than two samples.
pub fn population_std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let variance = samples.iter().map(|x| (x - m).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

pub fn min(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().copied().fold(f64::INFINITY, f64::min)
}

pub fn max(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(population_std_dev(&[]), 0.0);
        assert_eq!(min(&[]), 0.0);
        assert_eq!(max(&[]), 0.0);
    }

    #[test]
    fn test_population_not_sample_variance() {
        // sample variance would give sqrt(2), population gives 1
        let samples = [2.0, 4.0, 2.0, 4.0];
        assert!((population_std_dev(&samples) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_worst_le_mean_le_best() {
        let samples = [17.2, 19.9, 18.4, 21.0, 16.8];
        assert!(min(&samples) <= mean(&samples));
        assert!(mean(&samples) <= max(&samples));
    }
}
