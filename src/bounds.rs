// src/bounds.rs

use crate::error::KpcaError;
use crate::kernel_sum::KernelSumStatistics;
use log::{debug, warn};
use ndarray::ArrayViewMut2;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Parameters turning kernel-sum statistics into projection bounds.
///
/// For every cell the exported values are
/// `(mean - correction_term -/+ num_standard_deviations * sd(mean)) * multiplicative_constant`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Confidence width in units of the standard deviation of the mean. Must be >= 0.
    pub num_standard_deviations: f64,
    /// Rescaling factor coming from the kernel normalization. Any finite sign.
    pub multiplicative_constant: f64,
    /// Bias subtracted from every mean before scaling.
    pub correction_term: f64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            num_standard_deviations: 1.0,
            multiplicative_constant: 1.0,
            correction_term: 0.0,
        }
    }
}

impl ExportConfig {
    pub fn new(num_standard_deviations: f64, multiplicative_constant: f64, correction_term: f64) -> Self {
        Self {
            num_standard_deviations,
            multiplicative_constant,
            correction_term,
        }
    }

    /// Builds a config whose width covers a two-sided normal confidence level,
    /// e.g. `0.95` gives roughly 1.96 standard deviations.
    ///
    /// # Errors
    /// `InvalidConfiguration` unless `0 < confidence_level < 1`.
    pub fn from_confidence_level(
        confidence_level: f64,
        multiplicative_constant: f64,
        correction_term: f64,
    ) -> Result<Self, KpcaError> {
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(KpcaError::InvalidConfiguration(format!(
                "confidence level must lie strictly between 0 and 1, got {}",
                confidence_level
            )));
        }
        let standard_normal = Normal::new(0.0, 1.0)
            .map_err(|e| KpcaError::InvalidConfiguration(e.to_string()))?;
        let num_standard_deviations = standard_normal.inverse_cdf(0.5 + confidence_level / 2.0);
        debug!(
            "Confidence level {} -> {} standard deviations",
            confidence_level, num_standard_deviations
        );
        Ok(Self::new(num_standard_deviations, multiplicative_constant, correction_term))
    }

    pub fn with_num_standard_deviations(mut self, num_standard_deviations: f64) -> Self {
        self.num_standard_deviations = num_standard_deviations;
        self
    }

    pub fn with_multiplicative_constant(mut self, multiplicative_constant: f64) -> Self {
        self.multiplicative_constant = multiplicative_constant;
        self
    }

    pub fn with_correction_term(mut self, correction_term: f64) -> Self {
        self.correction_term = correction_term;
        self
    }

    /// # Errors
    /// `InvalidConfiguration` for a negative or non-finite width, or a
    /// non-finite scale or correction.
    pub fn validate(&self) -> Result<(), KpcaError> {
        if !self.num_standard_deviations.is_finite() || self.num_standard_deviations < 0.0 {
            return Err(KpcaError::InvalidConfiguration(format!(
                "num_standard_deviations must be finite and non-negative, got {}",
                self.num_standard_deviations
            )));
        }
        if !self.multiplicative_constant.is_finite() {
            return Err(KpcaError::InvalidConfiguration(format!(
                "multiplicative_constant must be finite, got {}",
                self.multiplicative_constant
            )));
        }
        if !self.correction_term.is_finite() {
            return Err(KpcaError::InvalidConfiguration(format!(
                "correction_term must be finite, got {}",
                self.correction_term
            )));
        }
        Ok(())
    }
}

/// The three co-indexed bound matrices being written by [`export_bounds`].
pub(crate) struct BoundViews<'a> {
    pub lower: ArrayViewMut2<'a, f64>,
    pub center: ArrayViewMut2<'a, f64>,
    pub upper: ArrayViewMut2<'a, f64>,
}

/// Overwrites `views` with bounds derived from `statistics`.
///
/// Callers validate `config` and shapes first; this only writes. When the
/// multiplicative constant is negative the scaled interval flips, and the two
/// ends are swapped back so `lower <= center <= upper` still holds.
pub(crate) fn export_bounds<S: KernelSumStatistics + ?Sized>(
    config: &ExportConfig,
    statistics: &S,
    views: BoundViews<'_>,
) {
    let BoundViews {
        mut lower,
        mut center,
        mut upper,
    } = views;
    let scale = config.multiplicative_constant;
    let flip = scale < 0.0;
    if flip {
        warn!(
            "Negative multiplicative constant {}; swapping lower/upper bounds to keep them ordered.",
            scale
        );
    }

    let (num_components, num_query_points) = center.dim();
    let mut negative_variances = 0usize;
    let mut nan_variances = 0usize;
    for i in 0..num_query_points {
        for k in 0..num_components {
            let variance = statistics.sample_mean_variance(k, i);
            // Only true negatives are clamped; NaN stays NaN and yields NaN bounds.
            let variance = if variance < 0.0 {
                negative_variances += 1;
                0.0
            } else {
                if variance.is_nan() {
                    nan_variances += 1;
                }
                variance
            };
            let deviation = config.num_standard_deviations * variance.sqrt();
            let shifted = statistics.sample_mean(k, i) - config.correction_term;
            let low = (shifted - deviation) * scale;
            let high = (shifted + deviation) * scale;
            center[[k, i]] = shifted * scale;
            if flip {
                lower[[k, i]] = high;
                upper[[k, i]] = low;
            } else {
                lower[[k, i]] = low;
                upper[[k, i]] = high;
            }
        }
    }
    if negative_variances > 0 {
        warn!(
            "{} kernel-sum cells reported a negative variance of the mean; treated as zero.",
            negative_variances
        );
    }
    if nan_variances > 0 {
        warn!(
            "{} kernel-sum cells reported a NaN variance of the mean; their bounds are NaN.",
            nan_variances
        );
    }
}
