// src/emit.rs

use crate::error::KpcaError;
use log::{debug, info};
use ndarray::ArrayView2;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Significant digits used for text output, matching C's default `%g`.
const SIGNIFICANT_DIGITS: i32 = 6;

/// Formats `value` the way C's `%g` does with the default precision of 6:
/// fixed notation for decimal exponents in `[-4, 6)`, scientific otherwise,
/// trailing zeros removed.
pub fn format_general(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }

    // Round to the target precision first; the exponent is the one after rounding.
    let scientific = format!("{:.*e}", (SIGNIFICANT_DIGITS - 1) as usize, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if (-4..SIGNIFICANT_DIGITS).contains(&exponent) {
        let decimals = (SIGNIFICANT_DIGITS - 1 - exponent) as usize;
        strip_trailing_zeros(&format!("{:.*}", decimals, value)).to_string()
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            strip_trailing_zeros(mantissa),
            sign,
            exponent.abs()
        )
    }
}

fn strip_trailing_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Writes one line per column of `matrix`, values space-separated.
pub fn write_columns_to<W: Write>(matrix: ArrayView2<f64>, writer: &mut W) -> std::io::Result<()> {
    for column in matrix.columns() {
        let mut first = true;
        for &value in column.iter() {
            if !first {
                writer.write_all(b" ")?;
            }
            writer.write_all(format_general(value).as_bytes())?;
            first = false;
        }
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Where the text for `path` actually lands.
///
/// An existing destination is resolved through symlinks and must be openable
/// for writing; a missing one is created at `path` itself.
fn resolve_destination(path: &Path) -> Result<PathBuf, KpcaError> {
    match fs::symlink_metadata(path) {
        Ok(_) => {
            let target = fs::canonicalize(path).map_err(|e| KpcaError::io(path, e))?;
            OpenOptions::new()
                .write(true)
                .open(&target)
                .map_err(|e| KpcaError::io(path, e))?;
            Ok(target)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(e) => Err(KpcaError::io(path, e)),
    }
}

/// Text rendered into a temporary file, waiting to replace its destination.
struct StagedOutput {
    file: NamedTempFile,
    target: PathBuf,
}

/// Renders `matrix` into a temporary file next to the resolved destination
/// of `path`. Nothing is visible at the destination until [`persist`].
fn stage_columns(matrix: ArrayView2<f64>, path: &Path) -> Result<StagedOutput, KpcaError> {
    let target = resolve_destination(path)?;
    let directory = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(directory).map_err(|e| KpcaError::io(path, e))?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        write_columns_to(matrix, &mut writer).map_err(|e| KpcaError::io(path, e))?;
        writer.flush().map_err(|e| KpcaError::io(path, e))?;
    }
    Ok(StagedOutput { file, target })
}

fn persist(staged: StagedOutput, path: &Path) -> Result<(), KpcaError> {
    let StagedOutput { file, target } = staged;
    file.persist(&target)
        .map_err(|e| KpcaError::io(path, e.error))?;
    Ok(())
}

/// Writes `matrix` to `path`, one line per column.
///
/// The text is staged in a temporary file in the destination directory and
/// renamed over the destination only once fully written. If `path` is a
/// symlink, the file it points to is replaced and the link is kept.
///
/// # Errors
/// `KpcaError::Io` carrying `path` if an existing destination cannot be opened
/// for writing, or the file cannot be created, written or renamed.
pub fn write_columns<P: AsRef<Path>>(matrix: ArrayView2<f64>, path: P) -> Result<(), KpcaError> {
    let path = path.as_ref();
    let staged = stage_columns(matrix, path)?;
    persist(staged, path)?;
    debug!("Wrote {} lines to {:?}", matrix.ncols(), path);
    Ok(())
}

/// Writes projections (one line per query point) and components (one line per
/// component). Both files are fully staged before either destination is replaced.
pub(crate) fn emit_pair(
    components: ArrayView2<f64>,
    components_path: &Path,
    projections: ArrayView2<f64>,
    projections_path: &Path,
) -> Result<(), KpcaError> {
    let staged_projections = stage_columns(projections, projections_path)?;
    let staged_components = stage_columns(components, components_path)?;
    persist(staged_projections, projections_path)?;
    persist(staged_components, components_path)?;
    info!(
        "Emitted {} projection rows to {:?} and {} component rows to {:?}",
        projections.ncols(),
        projections_path,
        components.ncols(),
        components_path
    );
    Ok(())
}
