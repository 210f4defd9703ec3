//! Archive reader contract (SPEC_FULL.md §10.1): the out-of-scope collaborator
//! boundary for raw projection data. This crate defines the trait and ships
//! only an in-memory test double plus a file-backed fixture reader for the
//! CLI binary to exercise end to end; a real HDF5/NeXus reader against the
//! archive format `original_source`'s `StandardTomoLoader` parses is a
//! pluggable implementation of the same trait, supplied by the deployment
//! per §1/§10.1 — this crate does not ship one.

use crate::error::{EngineError, Phase, Result};
use ndarray::{Array1, Array3, Axis};
use std::io::Read as _;
use std::path::Path;

/// Everything a loader needs out of one process's slab of the archive.
pub struct LoadedChunk {
    pub data: Array3<f32>,
    pub darks: Array3<f32>,
    pub flats: Array3<f32>,
    /// Already in radians; degrees-to-radians conversion, if needed, is the
    /// reader's own responsibility per the documented units flag (SPEC_FULL.md §6).
    pub angles: Array1<f32>,
    pub global_shape: (usize, usize, usize),
    /// Separates projections from interleaved flats/darks frames, when the
    /// archive stores them together. `None` when the archive already
    /// separates them (as `InMemoryArchive` always does).
    pub image_key: Option<Vec<i32>>,
}

pub trait ArchiveReader: Send + Sync {
    /// The full logical volume shape, readable from archive metadata alone
    /// (no projection data touched). The runner uses this to compute each
    /// process's chunk bounds before calling `load`.
    fn global_shape(&self, path: &Path) -> Result<(usize, usize, usize)>;

    fn load(&self, path: &Path, chunk_start: usize, chunk_len: usize, split_dim: usize) -> Result<LoadedChunk>;
}

/// A reader over pre-built in-memory arrays: the whole global volume plus its
/// aux arrays already live in the process, and `load` just carves out the
/// requested chunk. Used by tests and by any embedder that already holds the
/// volume in memory (SPEC_FULL.md §10.1); this crate does not ship an
/// HDF5-backed reader for raw input.
pub struct InMemoryArchive {
    data: Array3<f32>,
    darks: Array3<f32>,
    flats: Array3<f32>,
    angles: Array1<f32>,
    image_key: Option<Vec<i32>>,
}

impl InMemoryArchive {
    pub fn new(data: Array3<f32>, darks: Array3<f32>, flats: Array3<f32>, angles: Array1<f32>) -> Self {
        Self {
            data,
            darks,
            flats,
            angles,
            image_key: None,
        }
    }

    pub fn with_image_key(mut self, image_key: Vec<i32>) -> Self {
        self.image_key = Some(image_key);
        self
    }
}

impl ArchiveReader for InMemoryArchive {
    fn global_shape(&self, _path: &Path) -> Result<(usize, usize, usize)> {
        let s = self.data.shape();
        Ok((s[0], s[1], s[2]))
    }

    fn load(&self, _path: &Path, chunk_start: usize, chunk_len: usize, split_dim: usize) -> Result<LoadedChunk> {
        let extent = self.data.shape()[split_dim];
        if chunk_start + chunk_len > extent {
            return Err(EngineError::data(
                "in_memory_archive.load",
                Phase::Plan,
                format!(
                    "requested chunk [{chunk_start}, {}) exceeds global extent {extent} on dim {split_dim}",
                    chunk_start + chunk_len
                ),
            ));
        }
        let data = self
            .data
            .slice_axis(Axis(split_dim), ndarray::Slice::from(chunk_start..chunk_start + chunk_len))
            .to_owned();
        let global_shape = {
            let s = self.data.shape();
            (s[0], s[1], s[2])
        };
        Ok(LoadedChunk {
            data,
            darks: self.darks.clone(),
            flats: self.flats.clone(),
            angles: self.angles.clone(),
            global_shape,
            image_key: self.image_key.clone(),
        })
    }
}

/// A tiny self-describing binary container this crate defines for its own
/// CLI binary to read an `in_data_file` from disk without pretending to
/// parse a real scientific archive format (SPEC_FULL.md §10.1 is explicit
/// that this crate ships no HDF5/NeXus reader for raw input). Layout:
/// six little-endian `u64`s (`global_dim0..2`, `n_darks`, `n_flats`,
/// `n_angles`), then `f32` data in row-major order for the projection
/// volume, darks, flats, and finally the angle vector (already radians).
pub struct RawArchive;

impl RawArchive {
    pub fn new() -> Self {
        Self
    }

    fn read_header(path: &Path) -> Result<(std::fs::File, [usize; 6])> {
        let mut file = std::fs::File::open(path).map_err(|e| EngineError::io("raw_archive.open", e))?;
        let mut header = [0u8; 48];
        file.read_exact(&mut header).map_err(|e| EngineError::io("raw_archive.read_header", e))?;
        let mut dims = [0usize; 6];
        for (i, chunk) in header.chunks_exact(8).enumerate() {
            dims[i] = u64::from_le_bytes(chunk.try_into().unwrap()) as usize;
        }
        Ok((file, dims))
    }

    fn read_f32_array(file: &mut std::fs::File, count: usize) -> Result<Vec<f32>> {
        let mut bytes = vec![0u8; count * 4];
        file.read_exact(&mut bytes).map_err(|e| EngineError::io("raw_archive.read_body", e))?;
        Ok(bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect())
    }
}

impl Default for RawArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveReader for RawArchive {
    fn global_shape(&self, path: &Path) -> Result<(usize, usize, usize)> {
        let (_, dims) = Self::read_header(path)?;
        Ok((dims[0], dims[1], dims[2]))
    }

    fn load(&self, path: &Path, chunk_start: usize, chunk_len: usize, split_dim: usize) -> Result<LoadedChunk> {
        let (mut file, dims) = Self::read_header(path)?;
        let global_shape = (dims[0], dims[1], dims[2]);
        let (n_darks, n_flats, n_angles) = (dims[3], dims[4], dims[5]);

        let extent = match split_dim {
            0 => dims[0],
            1 => dims[1],
            2 => dims[2],
            other => {
                return Err(EngineError::data(
                    "raw_archive.load",
                    Phase::Plan,
                    format!("unsupported split dim {other}"),
                ))
            }
        };
        if chunk_start + chunk_len > extent {
            return Err(EngineError::data(
                "raw_archive.load",
                Phase::Plan,
                format!(
                    "requested chunk [{chunk_start}, {}) exceeds global extent {extent} on dim {split_dim}",
                    chunk_start + chunk_len
                ),
            ));
        }

        let full_len = dims[0] * dims[1] * dims[2];
        let full_data = Array3::from_shape_vec((dims[0], dims[1], dims[2]), Self::read_f32_array(&mut file, full_len)?)
            .map_err(|e| EngineError::internal(format!("raw_archive: malformed data shape: {e}")))?;
        let data = full_data
            .slice_axis(Axis(split_dim), ndarray::Slice::from(chunk_start..chunk_start + chunk_len))
            .to_owned();

        let darks = Array3::from_shape_vec((n_darks, dims[1], dims[2]), Self::read_f32_array(&mut file, n_darks * dims[1] * dims[2])?)
            .map_err(|e| EngineError::internal(format!("raw_archive: malformed darks shape: {e}")))?;
        let flats = Array3::from_shape_vec((n_flats, dims[1], dims[2]), Self::read_f32_array(&mut file, n_flats * dims[1] * dims[2])?)
            .map_err(|e| EngineError::internal(format!("raw_archive: malformed flats shape: {e}")))?;
        let angles = Array1::from_vec(Self::read_f32_array(&mut file, n_angles)?);

        Ok(LoadedChunk {
            data,
            darks,
            flats,
            angles,
            global_shape,
            image_key: None,
        })
    }
}
