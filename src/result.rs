// src/result.rs

use crate::bounds::{export_bounds, BoundViews, ExportConfig};
use crate::eigen::{self, CovarianceEigensolver};
use crate::emit;
use crate::error::KpcaError;
use crate::kernel_sum::KernelSumStatistics;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Storage for the outcome of a distributed KPCA run.
///
/// Holds the confidence-bounded projections of the query points, the sorted
/// kernel eigenvalues with their covariance eigenvectors, the reference-set
/// projections and the final kernel principal components.
///
/// Only the three projection matrices and the eigen fields travel between
/// nodes (see [`KpcaResult::to_bytes`]); reference projections and components
/// are node-local.
#[derive(Debug, Clone, PartialEq)]
pub struct KpcaResult {
    /// Lower bound on the projections. Shape: (num_components, num_query_points)
    projection_lower: Array2<f64>,
    /// Point estimate of the projections. Shape: (num_components, num_query_points)
    projections: Array2<f64>,
    /// Upper bound on the projections. Shape: (num_components, num_query_points)
    projection_upper: Array2<f64>,
    /// Kernel eigenvalues, non-increasing once set through
    /// [`KpcaResult::set_eigendecomposition_results`].
    kernel_eigenvalues: Array1<f64>,
    /// Covariance eigenvectors; column `j` belongs to `kernel_eigenvalues[j]`.
    covariance_eigenvectors: Array2<f64>,
    /// Reference-set projections used to build the covariance basis.
    reference_projections: Array2<f64>,
    /// Final kernel principal component directions, one per column.
    kpca_components: Array2<f64>,
}

impl Default for KpcaResult {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed-order field list exchanged between nodes and written to disk:
/// lower, center, upper, eigenvalues, eigenvectors.
#[derive(Serialize)]
struct KpcaResultWireRef<'a> {
    projection_lower: &'a Array2<f64>,
    projections: &'a Array2<f64>,
    projection_upper: &'a Array2<f64>,
    kernel_eigenvalues: &'a Array1<f64>,
    covariance_eigenvectors: &'a Array2<f64>,
}

#[derive(Deserialize)]
struct KpcaResultWire {
    projection_lower: Array2<f64>,
    projections: Array2<f64>,
    projection_upper: Array2<f64>,
    kernel_eigenvalues: Array1<f64>,
    covariance_eigenvectors: Array2<f64>,
}

impl KpcaResult {
    /// Creates an empty result: every matrix is zero-sized.
    ///
    /// # Examples
    ///
    /// ```
    /// use distributed_kpca::KpcaResult;
    /// let result = KpcaResult::new();
    /// assert_eq!(result.shape(), (0, 0));
    /// ```
    pub fn new() -> Self {
        Self {
            projection_lower: Array2::zeros((0, 0)),
            projections: Array2::zeros((0, 0)),
            projection_upper: Array2::zeros((0, 0)),
            kernel_eigenvalues: Array1::zeros(0),
            covariance_eigenvectors: Array2::zeros((0, 0)),
            reference_projections: Array2::zeros((0, 0)),
            kpca_components: Array2::zeros((0, 0)),
        }
    }

    /// Allocates the three projection matrices as
    /// `num_components x num_query_points` and zeroes them.
    ///
    /// Calling it again with the same dimensions only re-zeroes.
    /// `num_reference_points` does not size anything; it is checked against
    /// the column count of already populated reference projections.
    ///
    /// # Errors
    /// `DimensionMismatch` if reference projections are present and hold a
    /// different number of reference points.
    pub fn init(
        &mut self,
        num_components: usize,
        num_reference_points: usize,
        num_query_points: usize,
    ) -> Result<(), KpcaError> {
        if !self.reference_projections.is_empty()
            && self.reference_projections.ncols() != num_reference_points
        {
            return Err(KpcaError::dimension_mismatch(
                "reference projections at init",
                (self.reference_projections.nrows(), num_reference_points),
                self.reference_projections.dim(),
            ));
        }

        let shape = (num_components, num_query_points);
        if self.projections.dim() == shape
            && self.projection_lower.dim() == shape
            && self.projection_upper.dim() == shape
        {
            self.set_zero();
        } else {
            self.projection_lower = Array2::zeros(shape);
            self.projections = Array2::zeros(shape);
            self.projection_upper = Array2::zeros(shape);
        }
        info!(
            "Initialized KPCA result: {} components, {} reference points, {} query points",
            num_components, num_reference_points, num_query_points
        );
        Ok(())
    }

    /// Zeroes the three projection matrices. Eigen fields, reference
    /// projections and components are left alone.
    pub fn set_zero(&mut self) {
        self.projection_lower.fill(0.0);
        self.projections.fill(0.0);
        self.projection_upper.fill(0.0);
    }

    /// `(num_components, num_query_points)` of the projection matrices.
    pub fn shape(&self) -> (usize, usize) {
        self.projections.dim()
    }

    /// Fills lower/center/upper projections from kernel-sum statistics.
    ///
    /// For every (component `k`, query point `i`):
    /// `deviation = num_sd * sqrt(var(k, i))`,
    /// `center = (mean(k, i) - correction) * scale` and the bounds are
    /// `(mean(k, i) - correction -/+ deviation) * scale`, swapped when
    /// `scale < 0` so that `lower <= center <= upper`.
    ///
    /// # Errors
    /// `InvalidConfiguration` for an invalid `config`, `DimensionMismatch` if
    /// `statistics` is not shaped like the projection matrices. Nothing is
    /// written on error.
    pub fn export<S: KernelSumStatistics + ?Sized>(
        &mut self,
        config: &ExportConfig,
        statistics: &S,
    ) -> Result<(), KpcaError> {
        config.validate()?;
        if statistics.shape() != self.shape() {
            return Err(KpcaError::dimension_mismatch(
                "kernel-sum statistics at export",
                self.shape(),
                statistics.shape(),
            ));
        }
        if self.projections.is_empty() {
            warn!("Exporting into empty projection matrices {:?}; nothing to do.", self.shape());
        }
        debug!("Exporting bounds with {:?}", config);

        export_bounds(
            config,
            statistics,
            BoundViews {
                lower: self.projection_lower.view_mut(),
                center: self.projections.view_mut(),
                upper: self.projection_upper.view_mut(),
            },
        );
        Ok(())
    }

    /// [`KpcaResult::export`] with the configuration passed as loose scalars.
    pub fn export_with<S: KernelSumStatistics + ?Sized>(
        &mut self,
        num_standard_deviations: f64,
        multiplicative_constant: f64,
        correction_term: f64,
        statistics: &S,
    ) -> Result<(), KpcaError> {
        let config = ExportConfig::new(num_standard_deviations, multiplicative_constant, correction_term);
        self.export(&config, statistics)
    }

    /// Stores eigenpairs sorted by descending eigenvalue.
    ///
    /// Ties keep their original relative order. The inputs are not modified;
    /// the stored eigenvector columns are copies of the input columns, and
    /// every input pair is kept.
    ///
    /// # Errors
    /// `DimensionMismatch` if the eigenvalue count differs from the eigenvector
    /// column count, or if reference projections are populated and their row
    /// count differs from the eigenvector row count. The stored eigen fields
    /// stay unchanged on error.
    pub fn set_eigendecomposition_results(
        &mut self,
        eigenvalues: &Array1<f64>,
        eigenvectors: &Array2<f64>,
    ) -> Result<(), KpcaError> {
        if !self.reference_projections.is_empty()
            && self.reference_projections.nrows() != eigenvectors.nrows()
        {
            return Err(KpcaError::dimension_mismatch(
                "covariance eigenvectors vs reference projections",
                (self.reference_projections.nrows(), eigenvectors.ncols()),
                eigenvectors.dim(),
            ));
        }
        let (sorted_values, sorted_vectors) =
            eigen::sort_eigenpairs_descending(eigenvalues.view(), eigenvectors.view())?;

        self.kernel_eigenvalues = sorted_values;
        self.covariance_eigenvectors = sorted_vectors;
        info!(
            "Stored {} eigenpairs (eigenvector length {})",
            self.kernel_eigenvalues.len(),
            self.covariance_eigenvectors.nrows()
        );
        Ok(())
    }

    /// Runs `solver` on `covariance` and stores the leading eigenpairs.
    ///
    /// With `num_components = Some(c)` only the `c` largest pairs are kept
    /// (all of them if fewer exist).
    pub fn decompose_covariance<E: CovarianceEigensolver + ?Sized>(
        &mut self,
        solver: &E,
        covariance: ArrayView2<f64>,
        num_components: Option<usize>,
    ) -> Result<(), KpcaError> {
        let raw = solver.decompose(covariance)?;
        let total = raw.eigenvalues.len();
        if raw.eigenvectors.ncols() != total {
            return Err(KpcaError::dimension_mismatch(
                "eigensolver output",
                (raw.eigenvectors.nrows(), total),
                raw.eigenvectors.dim(),
            ));
        }
        let keep = num_components.map_or(total, |c| c.min(total));
        if keep == total {
            return self.set_eigendecomposition_results(&raw.eigenvalues, &raw.eigenvectors);
        }

        let order = eigen::descending_order(raw.eigenvalues.view());
        let leading = &order[..keep];
        let values = eigen::reorder_array_owned(raw.eigenvalues.view(), leading);
        let vectors = eigen::reorder_columns_owned(raw.eigenvectors.view(), leading);
        debug!("Keeping {} of {} eigenpairs", keep, total);
        self.set_eigendecomposition_results(&values, &vectors)
    }

    /// Share of the eigenvalue total carried by each stored eigenvalue.
    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        eigen::explained_variance_ratio(self.kernel_eigenvalues.view())
    }

    pub fn projection_lower(&self) -> &Array2<f64> {
        &self.projection_lower
    }

    pub fn projections(&self) -> &Array2<f64> {
        &self.projections
    }

    pub fn projection_upper(&self) -> &Array2<f64> {
        &self.projection_upper
    }

    pub fn kernel_eigenvalues(&self) -> &Array1<f64> {
        &self.kernel_eigenvalues
    }

    /// Direct write access for external solvers. Values written here bypass
    /// the descending-order guarantee of `set_eigendecomposition_results`.
    pub fn kernel_eigenvalues_mut(&mut self) -> &mut Array1<f64> {
        &mut self.kernel_eigenvalues
    }

    pub fn covariance_eigenvectors(&self) -> &Array2<f64> {
        &self.covariance_eigenvectors
    }

    pub fn covariance_eigenvectors_mut(&mut self) -> &mut Array2<f64> {
        &mut self.covariance_eigenvectors
    }

    pub fn reference_projections(&self) -> &Array2<f64> {
        &self.reference_projections
    }

    pub fn reference_projections_mut(&mut self) -> &mut Array2<f64> {
        &mut self.reference_projections
    }

    pub fn kpca_components(&self) -> &Array2<f64> {
        &self.kpca_components
    }

    pub fn kpca_components_mut(&mut self) -> &mut Array2<f64> {
        &mut self.kpca_components
    }

    /// Writes the center projections (one line per query point) to
    /// `projections_path` and the components (one line per component) to
    /// `components_path`, values in `%g` format.
    ///
    /// # Errors
    /// `KpcaError::Io` naming the path that could not be written. Destination
    /// files are replaced only after both outputs were staged successfully.
    pub fn emit<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        components_path: P,
        projections_path: Q,
    ) -> Result<(), KpcaError> {
        emit::emit_pair(
            self.kpca_components.view(),
            components_path.as_ref(),
            self.projections.view(),
            projections_path.as_ref(),
        )
    }

    fn wire(&self) -> KpcaResultWireRef<'_> {
        KpcaResultWireRef {
            projection_lower: &self.projection_lower,
            projections: &self.projections,
            projection_upper: &self.projection_upper,
            kernel_eigenvalues: &self.kernel_eigenvalues,
            covariance_eigenvectors: &self.covariance_eigenvectors,
        }
    }

    fn from_wire(wire: KpcaResultWire) -> Result<Self, KpcaError> {
        let shape = wire.projections.dim();
        for (name, m) in [
            ("lower projection bound", &wire.projection_lower),
            ("upper projection bound", &wire.projection_upper),
        ] {
            if m.dim() != shape {
                warn!("Decoded {} has shape {:?}, expected {:?}", name, m.dim(), shape);
                return Err(KpcaError::dimension_mismatch("decoded projection bounds", shape, m.dim()));
            }
        }
        if wire.covariance_eigenvectors.ncols() != wire.kernel_eigenvalues.len() {
            return Err(KpcaError::dimension_mismatch(
                "decoded eigen fields",
                (wire.covariance_eigenvectors.nrows(), wire.kernel_eigenvalues.len()),
                wire.covariance_eigenvectors.dim(),
            ));
        }
        Ok(Self {
            projection_lower: wire.projection_lower,
            projections: wire.projections,
            projection_upper: wire.projection_upper,
            kernel_eigenvalues: wire.kernel_eigenvalues,
            covariance_eigenvectors: wire.covariance_eigenvectors,
            ..Self::new()
        })
    }

    /// Encodes the transferable fields (lower, center, upper, eigenvalues,
    /// eigenvectors, in that order) with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, KpcaError> {
        bincode::serde::encode_to_vec(self.wire(), bincode::config::standard())
            .map_err(|e| KpcaError::Serialization(e.to_string()))
    }

    /// Decodes a result produced by [`KpcaResult::to_bytes`] on any node.
    /// Reference projections and components come back empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KpcaError> {
        let (wire, _read): (KpcaResultWire, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| KpcaError::Deserialization(e.to_string()))?;
        Self::from_wire(wire)
    }

    /// Writes the wire encoding to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), KpcaError> {
        bincode::serde::encode_into_std_write(self.wire(), writer, bincode::config::standard())
            .map_err(|e| KpcaError::Serialization(e.to_string()))?;
        Ok(())
    }

    /// Reads a wire encoding from `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, KpcaError> {
        let wire: KpcaResultWire =
            bincode::serde::decode_from_std_read(reader, bincode::config::standard())
                .map_err(|e| KpcaError::Deserialization(e.to_string()))?;
        Self::from_wire(wire)
    }

    /// Saves the transferable fields to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), KpcaError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| KpcaError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush().map_err(|e| KpcaError::io(path, e))?;
        info!("Saved KPCA result {:?} to {:?}", self.shape(), path);
        Ok(())
    }

    /// Loads a result previously written with [`KpcaResult::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KpcaError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| KpcaError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let result = Self::read_from(&mut reader)?;
        info!("Loaded KPCA result {:?} from {:?}", result.shape(), path);
        Ok(result)
    }
}
