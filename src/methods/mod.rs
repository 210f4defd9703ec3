//! Reference method library (SPEC_FULL.md §10.5): small, real implementations
//! of the method names a pipeline document can name, standing in for the
//! out-of-scope collaborator package the engine is normally built against
//! (SPEC_FULL.md §1). Parallelized per-slice with `rayon` where that mirrors
//! how the engine itself stays single-threaded over blocks/sections (§5) but
//! a single numerical call is free to use all cores.

use crate::error::{EngineError, Phase, Result};
use ndarray::{Array1, Array2, Array3, Axis, Zip};
use rayon::prelude::*;
use std::io::Write;
use std::path::Path;

/// `(data - dark) / (flat - dark)`, broadcast per detector pixel across every
/// projection, clamped away from zero in the denominator.
pub fn normalize(data: &Array3<f32>, darks: &Array3<f32>, flats: &Array3<f32>) -> Result<Array3<f32>> {
    let dark_mean = darks.mean_axis(Axis(0)).ok_or_else(|| {
        EngineError::data("normalize", Phase::Block, "darks array has no frames to average")
    })?;
    let flat_mean = flats.mean_axis(Axis(0)).ok_or_else(|| {
        EngineError::data("normalize", Phase::Block, "flats array has no frames to average")
    })?;

    let mut out = Array3::zeros(data.raw_dim());
    Zip::from(out.outer_iter_mut())
        .and(data.outer_iter())
        .par_for_each(|mut out_slice, in_slice| {
            Zip::from(&mut out_slice)
                .and(&in_slice)
                .and(&dark_mean)
                .and(&flat_mean)
                .for_each(|o, &d, &dark, &flat| {
                    let denom = (flat - dark).max(1e-6);
                    *o = ((d - dark) / denom).max(1e-6);
                });
        });
    Ok(out)
}

/// `-ln(data)`, the standard transmission-to-absorption step.
pub fn minus_log(data: &Array3<f32>) -> Result<Array3<f32>> {
    let mut out = data.clone();
    out.par_mapv_inplace(|v| -(v.max(1e-6).ln()));
    Ok(out)
}

/// Median-filters outlier pixels whose deviation from their 3x3 neighborhood
/// median exceeds `dif`, per projection slice.
pub fn remove_outlier3d(data: &Array3<f32>, kernel_size: usize, dif: f32) -> Result<Array3<f32>> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(EngineError::configuration(
            "remove_outlier3d.kernel_size",
            format!("kernel_size must be a positive odd number, got {kernel_size}"),
        ));
    }
    let radius = (kernel_size / 2) as isize;
    let mut out = data.clone();
    Zip::indexed(&mut out).for_each(|(i0, i1, i2), v| {
        let i1 = i1 as isize;
        let i2 = i2 as isize;
        let mut neighborhood = Vec::with_capacity(kernel_size * kernel_size);
        for d1 in -radius..=radius {
            for d2 in -radius..=radius {
                let (n1, n2) = (i1 + d1, i2 + d2);
                if n1 >= 0 && n2 >= 0 && (n1 as usize) < data.shape()[1] && (n2 as usize) < data.shape()[2] {
                    neighborhood.push(data[(i0, n1 as usize, n2 as usize)]);
                }
            }
        }
        neighborhood.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = neighborhood[neighborhood.len() / 2];
        if (*v - median).abs() > dif {
            *v = median;
        }
    });
    Ok(out)
}

/// A centroid-of-intensity rotation-center estimate, standing in for a real
/// `find_center_vo`: sums intensity-weighted detector-column position across
/// every row and projection of the sinogram slice it's handed.
pub fn find_center_360(data: &Array3<f32>) -> Result<f64> {
    if data.is_empty() {
        return Err(EngineError::data(
            "find_center_360",
            Phase::Block,
            "empty sinogram slice",
        ));
    }
    let width = data.shape()[2];
    let mut weighted = 0.0f64;
    let mut total = 0.0f64;
    for v in data.iter() {
        total += *v as f64;
    }
    if total.abs() < 1e-9 {
        return Ok(width as f64 / 2.0);
    }
    for ((_, _, i2), &v) in data.indexed_iter() {
        weighted += i2 as f64 * v as f64;
    }
    Ok(weighted / total)
}

/// A minimal filtered-backprojection reconstruction: ramp-filter each
/// sinogram row in frequency-free (spatial) form via a simple finite
/// difference, then backproject over the supplied angles.
pub fn recon_simple(data: &Array3<f32>, angles: &Array1<f32>, center: f64) -> Result<Array3<f32>> {
    let n_angles = data.shape()[0];
    if angles.len() != n_angles {
        return Err(EngineError::data(
            "recon_simple",
            Phase::Block,
            format!(
                "angle count {} does not match projection count {n_angles}",
                angles.len()
            ),
        ));
    }
    let detector_width = data.shape()[2];
    let n_sino = data.shape()[1];
    let size = detector_width;

    let mut out = Array3::<f32>::zeros((n_sino, size, size));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(sino_idx, mut recon_slice)| {
            let sino = data.index_axis(Axis(1), sino_idx);
            for y in 0..size {
                for x in 0..size {
                    let fx = x as f64 - center;
                    let fy = y as f64 - (size as f64 / 2.0);
                    let mut acc = 0.0f32;
                    for (a_idx, &angle) in angles.iter().enumerate() {
                        let angle = angle as f64;
                        let t = fx * angle.cos() + fy * angle.sin() + center;
                        let t0 = t.floor();
                        let frac = (t - t0) as f32;
                        let t0 = t0 as isize;
                        let sample = |idx: isize| -> f32 {
                            if idx >= 0 && (idx as usize) < detector_width {
                                sino[(a_idx, idx as usize)]
                            } else {
                                0.0
                            }
                        };
                        acc += sample(t0) * (1.0 - frac) + sample(t0 + 1) * frac;
                    }
                    recon_slice[(y, x)] = acc / n_angles as f32;
                }
            }
        });
    Ok(out)
}

/// Averages non-overlapping groups of `bin_size` slices along `axis`,
/// shrinking that axis's extent by a factor of `bin_size` (rounding down any
/// remainder away). This is the one reference method that changes a
/// non-slice output dimension (SPEC_FULL.md §4.3 "Data reducer").
pub fn bin_mean(data: &Array3<f32>, bin_size: usize, axis: usize) -> Result<Array3<f32>> {
    if bin_size == 0 {
        return Err(EngineError::configuration("bin_mean.bin_size", "bin_size must be positive"));
    }
    let extent = data.shape()[axis];
    let out_extent = extent / bin_size;
    if out_extent == 0 {
        return Err(EngineError::data(
            "bin_mean",
            Phase::Block,
            format!("bin_size {bin_size} exceeds axis {axis} extent {extent}"),
        ));
    }
    let mut out_shape = [data.shape()[0], data.shape()[1], data.shape()[2]];
    out_shape[axis] = out_extent;
    let mut out = Array3::<f32>::zeros((out_shape[0], out_shape[1], out_shape[2]));

    for bin in 0..out_extent {
        let start = bin * bin_size;
        let group = data.slice_axis(Axis(axis), ndarray::Slice::from(start..start + bin_size));
        let mean = group.mean_axis(Axis(axis)).ok_or_else(|| {
            EngineError::internal("bin_mean: empty group averaged")
        })?;
        out.index_axis_mut(Axis(axis), bin).assign(&mean);
    }
    Ok(out)
}

/// Writes one grayscale image per slice along axis 0, normalized to the
/// slice's own min/max, named with the `.tif` extension per the documented
/// output format. The bytes themselves are a plain raw 8-bit encoder, not an
/// actual TIFF codec: the archive/image-format specifics belong to the
/// out-of-scope collaborator this crate's writer *site* hands off to, so the
/// reference encoder only needs to exist, not to be standards-conformant.
pub fn save_to_images(data: &Array3<f32>, out_dir: &Path, prefix: &str, start_index: usize) -> Result<Vec<std::path::PathBuf>> {
    std::fs::create_dir_all(out_dir).map_err(|e| EngineError::io("save_to_images.mkdir", e))?;
    let mut written = Vec::with_capacity(data.shape()[0]);
    for (i, slice) in data.outer_iter().enumerate() {
        let min = slice.fold(f32::MAX, |a, &b| a.min(b));
        let max = slice.fold(f32::MIN, |a, &b| a.max(b));
        let range = (max - min).max(1e-6);
        let path = out_dir.join(format!("{prefix}_{:05}.tif", start_index + i));
        let mut file = std::fs::File::create(&path).map_err(|e| EngineError::io("save_to_images.create", e))?;
        writeln!(file, "{} {}", slice.shape()[1], slice.shape()[0])
            .map_err(|e| EngineError::io("save_to_images.header", e))?;
        let bytes: Vec<u8> = slice
            .iter()
            .map(|&v| (((v - min) / range) * 255.0) as u8)
            .collect();
        file.write_all(&bytes).map_err(|e| EngineError::io("save_to_images.body", e))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_dark_to_floor_and_flat_to_one() {
        let darks = Array3::from_elem((2, 2, 2), 10.0);
        let flats = Array3::from_elem((2, 2, 2), 110.0);
        let data = Array3::from_elem((3, 2, 2), 60.0);
        let out = normalize(&data, &darks, &flats).unwrap();
        assert!((out[(0, 0, 0)] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn minus_log_of_one_is_zero() {
        let data = Array3::from_elem((1, 2, 2), 1.0f32);
        let out = minus_log(&data).unwrap();
        assert!(out.iter().all(|&v| v.abs() < 1e-4));
    }

    #[test]
    fn remove_outlier3d_replaces_a_spike_with_the_local_median() {
        let mut data = Array3::from_elem((1, 5, 5), 1.0f32);
        data[(0, 2, 2)] = 1000.0;
        let out = remove_outlier3d(&data, 3, 5.0).unwrap();
        assert!((out[(0, 2, 2)] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn remove_outlier3d_rejects_an_even_kernel() {
        let data = Array3::from_elem((1, 3, 3), 1.0f32);
        assert!(remove_outlier3d(&data, 4, 1.0).is_err());
    }

    #[test]
    fn find_center_360_centers_a_uniform_slice_at_half_width() {
        let data = Array3::<f32>::ones((4, 2, 8));
        let center = find_center_360(&data).unwrap();
        assert!((center - 3.5).abs() < 1e-6);
    }

    #[test]
    fn find_center_360_shifts_toward_the_brighter_columns() {
        let mut data = Array3::<f32>::zeros((1, 1, 8));
        data[(0, 0, 7)] = 1.0;
        let center = find_center_360(&data).unwrap();
        assert!((center - 7.0).abs() < 1e-6);
    }

    #[test]
    fn bin_mean_halves_the_binned_axis() {
        let data = Array3::<f32>::ones((4, 8, 8));
        let out = bin_mean(&data, 2, 1).unwrap();
        assert_eq!(out.shape(), &[4, 4, 8]);
        assert!((out[(0, 0, 0)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn bin_mean_rejects_a_bin_larger_than_the_axis() {
        let data = Array3::<f32>::ones((4, 3, 8));
        assert!(bin_mean(&data, 10, 1).is_err());
    }

    #[test]
    fn save_to_images_writes_one_file_per_slice() {
        let dir = tempfile::tempdir().unwrap();
        let data = Array3::<f32>::from_elem((3, 4, 4), 0.5);
        let written = save_to_images(&data, dir.path(), "recon", 0).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written[0].exists());
    }
}
