//! Timing statistics used to detect synchronized bursts.
//!
//! Every function here is total: short or degenerate input yields `0.0`
//! instead of `NaN` or a panic.

use std::time::Instant;

use serde::Serialize;

/// Population variance. `0.0` for fewer than two samples.
pub fn variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let mean = mean(xs);
    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64
}

/// Shannon entropy of the sequence normalized by its sum.
///
/// A non-positive sum is treated as 1 and non-positive shares are skipped.
pub fn entropy(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let sum: f64 = xs.iter().sum();
    let total = if sum <= 0.0 { 1.0 } else { sum };
    -xs.iter()
        .map(|x| x / total)
        .filter(|p| *p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f64>()
}

/// Excess kurtosis using the population standard deviation.
///
/// `0.0` for fewer than four samples or a flat sequence.
pub fn kurtosis(xs: &[f64]) -> f64 {
    if xs.len() < 4 {
        return 0.0;
    }
    let mean = mean(xs);
    let std = variance(xs).sqrt();
    if std == 0.0 {
        return 0.0;
    }
    let fourth = xs.iter().map(|x| ((x - mean) / std).powi(4)).sum::<f64>() / xs.len() as f64;
    fourth - 3.0
}

/// Mean absolute successive difference. `0.0` for fewer than two samples.
pub fn noise(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let total: f64 = xs.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    total / (xs.len() - 1) as f64
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Feature vector extracted from a key's recent arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Features {
    pub variance: f64,
    pub entropy: f64,
    pub kurtosis: f64,
    pub noise: f64,
}

impl Features {
    /// Computes features over inter-arrival gaps, in milliseconds.
    pub fn from_timestamps<'a, I>(timestamps: I) -> Self
    where
        I: IntoIterator<Item = &'a Instant>,
    {
        let mut iter = timestamps.into_iter();
        let Some(mut prev) = iter.next().copied() else {
            return Self::default();
        };
        let gaps: Vec<f64> = iter
            .map(|&ts| {
                let gap = ts.saturating_duration_since(prev).as_secs_f64() * 1000.0;
                prev = ts;
                gap
            })
            .collect();
        Self::from_gaps(&gaps)
    }

    /// Computes features over an already differenced sequence.
    pub fn from_gaps(gaps: &[f64]) -> Self {
        Self {
            variance: variance(gaps),
            entropy: entropy(gaps),
            kurtosis: kurtosis(gaps),
            noise: noise(gaps),
        }
    }
}
