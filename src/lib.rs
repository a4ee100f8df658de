// Result engine for distributed approximate kernel PCA

#![doc = include_str!("../README.md")]

pub mod bounds;
pub mod eigen;
pub mod emit;
pub mod error;
pub mod kernel_sum;
pub mod result;

pub use bounds::ExportConfig;
pub use eigen::{CovarianceEigensolver, EigenDecomposition, NdarrayEigensolver};
pub use error::KpcaError;
pub use kernel_sum::{DenseKernelSums, KernelSumStatistics, MeanVariancePair, MeanVariancePairMatrix};
pub use result::KpcaResult;
