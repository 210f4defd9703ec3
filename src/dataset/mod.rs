//! Dataset Model (SPEC_FULL.md §3 / §4.2): the global / chunk / block view
//! hierarchy, host/device placement, and the read-only auxiliary arrays.
//!
//! Grounded on `original_source/httomo/runner/dataset.py`'s `DataSet` /
//! `DataSetBlock` / `FullFileDataSet`, reshaped from a subclass hierarchy into
//! a single struct per level (SPEC_FULL.md §9: "represent placement as part
//! of the buffer type").

mod aux;

pub use aux::AuxArrays;

use crate::error::{EngineError, Phase, Result};
use crate::pattern::Placement;
use ndarray::Array3;

/// The entire logical 3D volume's shape: axis 0 = rotation angle, axis 1 =
/// detector-y, axis 2 = detector-x.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalShape(pub usize, pub usize, pub usize);

impl GlobalShape {
    pub fn dim(&self, axis: usize) -> usize {
        match axis {
            0 => self.0,
            1 => self.1,
            2 => self.2,
            other => panic!("3D volume has no axis {other}"),
        }
    }

    /// `P`-way contiguous split of axis `dim`: process `rank`'s
    /// `(chunk_start, chunk_len)`. SPEC_FULL.md §3.
    pub fn chunk_bounds(&self, dim: usize, rank: usize, world_size: usize) -> (usize, usize) {
        let extent = self.dim(dim);
        let start = rank * extent / world_size;
        let end = (rank + 1) * extent / world_size;
        (start, end - start)
    }
}

/// One process's contiguous sub-volume along `split_dim`.
pub struct Chunk {
    pub global_shape: GlobalShape,
    pub split_dim: usize,
    pub chunk_start: usize,
    data: Array3<f32>,
    placement: Placement,
    aux: AuxArrays,
}

impl Chunk {
    pub fn new(
        global_shape: GlobalShape,
        split_dim: usize,
        chunk_start: usize,
        data: Array3<f32>,
        aux: AuxArrays,
    ) -> Self {
        Self {
            global_shape,
            split_dim,
            chunk_start,
            data,
            placement: Placement::Host,
            aux,
        }
    }

    pub fn chunk_shape(&self) -> (usize, usize, usize) {
        let s = self.data.shape();
        (s[0], s[1], s[2])
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn aux(&self) -> &AuxArrays {
        &self.aux
    }

    pub fn aux_mut(&mut self) -> &mut AuxArrays {
        &mut self.aux
    }

    /// `to_host`/`to_device` are idempotent: calling them when already in the
    /// target placement is a no-op beyond the tag.
    pub fn to_host(&mut self) {
        self.placement = Placement::Host;
    }

    pub fn to_device(&mut self, device_id: u32) {
        self.placement = Placement::Device;
        self.aux.note_device_bound(device_id);
    }

    /// Replaces the chunk's data buffer, e.g. after the aggregator has
    /// finished a section whose methods changed non-slice dims.
    pub fn replace_data(&mut self, data: Array3<f32>) {
        self.data = data;
    }

    /// Decomposes the chunk into its data/placement/aux parts, e.g. for the
    /// reslicer which rebuilds a `Chunk` under a new split dimension while
    /// carrying the aux arrays over untouched.
    pub fn into_parts(self) -> (Array3<f32>, Placement, AuxArrays) {
        (self.data, self.placement, self.aux)
    }

    /// Carves out a block of `length` slices starting at `block_start` along
    /// `slicing_dim`. Fails if the request runs past the chunk's extent on
    /// that dimension (SPEC_FULL.md §3 invariant).
    pub fn make_block(&self, slicing_dim: usize, block_start: usize, length: usize) -> Result<Block> {
        let chunk_shape = self.chunk_shape();
        let chunk_len = match slicing_dim {
            0 => chunk_shape.0,
            1 => chunk_shape.1,
            2 => chunk_shape.2,
            other => {
                return Err(EngineError::internal(format!(
                    "slicing dim {other} is out of range for a 3D volume"
                )))
            }
        };
        if block_start + length > chunk_len {
            return Err(EngineError::data(
                "make_block",
                Phase::Block,
                format!(
                    "block [{block_start}, {}) exceeds chunk extent {chunk_len} on dim {slicing_dim}",
                    block_start + length
                ),
            ));
        }
        let data = match slicing_dim {
            0 => self
                .data
                .slice(ndarray::s![block_start..block_start + length, .., ..])
                .to_owned(),
            1 => self
                .data
                .slice(ndarray::s![.., block_start..block_start + length, ..])
                .to_owned(),
            2 => self
                .data
                .slice(ndarray::s![.., .., block_start..block_start + length])
                .to_owned(),
            _ => unreachable!(),
        };
        Ok(Block {
            global_shape: self.global_shape,
            chunk_start: self.chunk_start,
            split_dim: self.split_dim,
            slicing_dim,
            block_start,
            data,
            placement: self.placement,
        })
    }
}

/// One iteration's sub-slab of a chunk, processed end-to-end by every wrapper
/// of a section before the next block is produced (Glossary: Block).
///
/// Blocks own no storage beyond their own slice; this implementation holds an
/// owned copy of just that slice (not the whole chunk), trading a bounded
/// per-block copy for avoiding lifetime-parameterized views across the
/// wrapper/communicator boundary, since no test in SPEC_FULL.md §8 depends on
/// true zero-copy aliasing.
pub struct Block {
    pub global_shape: GlobalShape,
    pub chunk_start: usize,
    pub split_dim: usize,
    pub slicing_dim: usize,
    pub block_start: usize,
    data: Array3<f32>,
    placement: Placement,
}

impl Block {
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn to_host(&mut self) {
        self.placement = Placement::Host;
    }

    pub fn to_device(&mut self, _device_id: u32) {
        self.placement = Placement::Device;
    }

    /// Global index of this block's first slice: `chunk_start + block_start`
    /// on the slicing dim, `0` elsewhere (SPEC_FULL.md §3).
    pub fn global_index(&self) -> (usize, usize, usize) {
        let mut idx = (0usize, 0usize, 0usize);
        let value = self.chunk_start + self.block_start;
        match self.slicing_dim {
            0 => idx.0 = value,
            1 => idx.1 = value,
            2 => idx.2 = value,
            _ => unreachable!(),
        }
        idx
    }

    pub fn is_last_in_chunk(&self, chunk_len_on_slicing_dim: usize) -> bool {
        let s = self.data.shape();
        let block_len = s[self.slicing_dim];
        self.block_start + block_len >= chunk_len_on_slicing_dim
    }

    /// Overwrites this block's data, validating the shape-change contract of
    /// SPEC_FULL.md §4.2: the slicing-dim extent must be unchanged (a method
    /// never changes how many slices it was handed), only non-slice dims may
    /// differ.
    pub fn set_data(&mut self, data: Array3<f32>) -> Result<()> {
        let old_slice_len = self.data.shape()[self.slicing_dim];
        let new_slice_len = data.shape()[self.slicing_dim];
        if old_slice_len != new_slice_len {
            return Err(EngineError::data(
                "block.set_data",
                Phase::Block,
                format!(
                    "method changed slicing-dim extent from {old_slice_len} to {new_slice_len}"
                ),
            ));
        }
        self.data = data;
        Ok(())
    }
}
