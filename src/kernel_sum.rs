// src/kernel_sum.rs

use crate::error::KpcaError;
use log::{debug, info};
use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Read access to per-(component, query-point) kernel-sum statistics.
///
/// The result engine only needs the sample mean and the variance of that mean
/// for every cell. How the producer arrives at them (exact sums, Monte-Carlo
/// sampling, tree-based approximation) is irrelevant here, as long as the
/// indexing is `(component, query_point)` and `shape()` reports
/// `(num_components, num_query_points)`.
pub trait KernelSumStatistics {
    /// `(num_components, num_query_points)`.
    fn shape(&self) -> (usize, usize);

    /// Sample mean of the kernel sum for `component` at `query_point`.
    fn sample_mean(&self, component: usize, query_point: usize) -> f64;

    /// Variance of the mean estimator for `component` at `query_point`.
    fn sample_mean_variance(&self, component: usize, query_point: usize) -> f64;
}

/// Running mean/variance accumulator for one Monte-Carlo estimated kernel sum.
///
/// Uses Welford's update for single points and the Chan et al. pairwise
/// formula for merging two accumulators, so partial results gathered on
/// different nodes can be reduced in any order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanVariancePair {
    num_samples: u64,
    mean: f64,
    /// Sum of squared deviations from the running mean.
    m2: f64,
}

impl MeanVariancePair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an accumulator from already summarized moments.
    ///
    /// `sample_variance` is the unbiased (n - 1) sample variance of the
    /// observations, not the variance of the mean.
    pub fn from_summary(num_samples: u64, sample_mean: f64, sample_variance: f64) -> Self {
        let m2 = if num_samples > 1 {
            sample_variance * (num_samples - 1) as f64
        } else {
            0.0
        };
        Self {
            num_samples,
            mean: if num_samples > 0 { sample_mean } else { 0.0 },
            m2,
        }
    }

    /// Adds one sampled observation.
    pub fn push_point(&mut self, value: f64) {
        self.num_samples += 1;
        let delta = value - self.mean;
        self.mean += delta / self.num_samples as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Merges another accumulator into this one, weighting by sample counts.
    pub fn combine(&mut self, other: &MeanVariancePair) {
        if other.num_samples == 0 {
            return;
        }
        if self.num_samples == 0 {
            *self = *other;
            return;
        }
        let n_a = self.num_samples as f64;
        let n_b = other.num_samples as f64;
        let total = n_a + n_b;
        let delta = other.mean - self.mean;
        self.mean += delta * n_b / total;
        self.m2 += other.m2 + delta * delta * n_a * n_b / total;
        self.num_samples += other.num_samples;
    }

    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    pub fn sample_mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance of the observations. Zero with fewer than two samples.
    pub fn sample_variance(&self) -> f64 {
        if self.num_samples > 1 {
            self.m2 / (self.num_samples - 1) as f64
        } else {
            0.0
        }
    }

    /// Variance of the sample mean, `sample_variance / n`. Zero when empty.
    pub fn sample_mean_variance(&self) -> f64 {
        if self.num_samples > 0 {
            self.sample_variance() / self.num_samples as f64
        } else {
            0.0
        }
    }

    /// `(lower, center, upper)` of `scale * (mean -/+ num_standard_deviations * sd(mean))`.
    pub fn scaled_interval(&self, scale: f64, num_standard_deviations: f64) -> (f64, f64, f64) {
        let deviation = num_standard_deviations * self.sample_mean_variance().sqrt();
        let a = (self.mean - deviation) * scale;
        let b = (self.mean + deviation) * scale;
        (a.min(b), self.mean * scale, a.max(b))
    }
}

/// A `num_components x num_query_points` grid of [`MeanVariancePair`]s.
///
/// This is the unit each node produces and ships to the coordinator, where
/// the per-node grids are reduced with [`MeanVariancePairMatrix::reduce`]
/// before bounds are exported.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeanVariancePairMatrix {
    pairs: Array2<MeanVariancePair>,
}

impl MeanVariancePairMatrix {
    /// Creates an empty (zero-sample) grid.
    pub fn new(num_components: usize, num_query_points: usize) -> Self {
        Self {
            pairs: Array2::from_elem((num_components, num_query_points), MeanVariancePair::new()),
        }
    }

    pub fn num_components(&self) -> usize {
        self.pairs.nrows()
    }

    pub fn num_query_points(&self) -> usize {
        self.pairs.ncols()
    }

    pub fn get(&self, component: usize, query_point: usize) -> &MeanVariancePair {
        &self.pairs[[component, query_point]]
    }

    pub fn get_mut(&mut self, component: usize, query_point: usize) -> &mut MeanVariancePair {
        &mut self.pairs[[component, query_point]]
    }

    /// Merges `other` into `self` cell by cell, cells in parallel.
    ///
    /// # Errors
    /// `DimensionMismatch` if the grids differ in shape; `self` is untouched in that case.
    pub fn combine_with(&mut self, other: &MeanVariancePairMatrix) -> Result<(), KpcaError> {
        if self.pairs.dim() != other.pairs.dim() {
            return Err(KpcaError::dimension_mismatch(
                "kernel-sum statistic merge",
                self.pairs.dim(),
                other.pairs.dim(),
            ));
        }
        Zip::from(&mut self.pairs)
            .and(&other.pairs)
            .par_for_each(|a, b| a.combine(b));
        Ok(())
    }

    /// Reduces per-node grids into a single grid.
    ///
    /// The merge is associative and commutative (up to floating-point
    /// rounding), so the reduction runs in parallel in whatever order rayon picks.
    ///
    /// # Errors
    /// `InvalidConfiguration` when `parts` is empty, `DimensionMismatch` when
    /// the grids do not all share one shape.
    pub fn reduce(parts: Vec<MeanVariancePairMatrix>) -> Result<MeanVariancePairMatrix, KpcaError> {
        let expected = parts
            .first()
            .map(|p| p.pairs.dim())
            .ok_or_else(|| KpcaError::InvalidConfiguration("no kernel-sum statistics to reduce".into()))?;
        if let Some(bad) = parts.iter().find(|p| p.pairs.dim() != expected) {
            return Err(KpcaError::dimension_mismatch(
                "kernel-sum statistic reduction",
                expected,
                bad.pairs.dim(),
            ));
        }
        info!("Reducing {} kernel-sum grids of shape {:?}", parts.len(), expected);

        let reduced = parts
            .into_par_iter()
            .reduce_with(|mut acc, next| {
                Zip::from(&mut acc.pairs)
                    .and(&next.pairs)
                    .par_for_each(|a, b| a.combine(b));
                acc
            })
            .unwrap_or_else(|| MeanVariancePairMatrix::new(expected.0, expected.1));
        debug!(
            "Reduced grid holds {} total samples",
            reduced.pairs.iter().map(|p| p.num_samples()).sum::<u64>()
        );
        Ok(reduced)
    }
}

impl KernelSumStatistics for MeanVariancePairMatrix {
    fn shape(&self) -> (usize, usize) {
        self.pairs.dim()
    }

    fn sample_mean(&self, component: usize, query_point: usize) -> f64 {
        self.pairs[[component, query_point]].sample_mean()
    }

    fn sample_mean_variance(&self, component: usize, query_point: usize) -> f64 {
        self.pairs[[component, query_point]].sample_mean_variance()
    }
}

/// Kernel-sum statistics already summarized into two dense matrices.
#[derive(Clone, Copy, Debug)]
pub struct DenseKernelSums<'a> {
    means: ArrayView2<'a, f64>,
    mean_variances: ArrayView2<'a, f64>,
}

impl<'a> DenseKernelSums<'a> {
    /// # Errors
    /// `DimensionMismatch` if the two matrices differ in shape.
    pub fn new(
        means: ArrayView2<'a, f64>,
        mean_variances: ArrayView2<'a, f64>,
    ) -> Result<Self, KpcaError> {
        if means.dim() != mean_variances.dim() {
            return Err(KpcaError::dimension_mismatch(
                "dense kernel sums",
                means.dim(),
                mean_variances.dim(),
            ));
        }
        Ok(Self {
            means,
            mean_variances,
        })
    }
}

impl KernelSumStatistics for DenseKernelSums<'_> {
    fn shape(&self) -> (usize, usize) {
        self.means.dim()
    }

    fn sample_mean(&self, component: usize, query_point: usize) -> f64 {
        self.means[[component, query_point]]
    }

    fn sample_mean_variance(&self, component: usize, query_point: usize) -> f64 {
        self.mean_variances[[component, query_point]]
    }
}
