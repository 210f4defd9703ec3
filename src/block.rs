//! Block Splitter / Aggregator (SPEC_FULL.md §4.5).
//!
//! Grounded on `original_source/httomo/runner/block_split.py`'s
//! `BlockSplitter`/`BlockAggregator`, including the edge case that a
//! non-slice shape or dtype change is only tolerated on the first append.

use crate::dataset::{Block, Chunk};
use crate::error::{EngineError, Phase, Result};
use ndarray::Array3;

/// Carves `chunk` into blocks of at most `max_slices` slices along
/// `slicing_dim`. Yields `⌈chunk_len/max_slices⌉` blocks, all of size
/// `max_slices` except possibly the last.
pub fn split(chunk: &Chunk, slicing_dim: usize, max_slices: usize) -> Result<Vec<Block>> {
    let chunk_shape = chunk.chunk_shape();
    let chunk_len = match slicing_dim {
        0 => chunk_shape.0,
        1 => chunk_shape.1,
        2 => chunk_shape.2,
        other => return Err(EngineError::internal(format!("invalid slicing dim {other}"))),
    };
    let max_slices = max_slices.min(chunk_len);
    if max_slices == 0 {
        return Err(EngineError::plan(
            "block_splitter",
            "max_slices resolved to zero for a non-empty chunk",
        ));
    }
    let num_blocks = (chunk_len + max_slices - 1) / max_slices;
    (0..num_blocks)
        .map(|i| {
            let start = i * max_slices;
            let len = max_slices.min(chunk_len - start);
            chunk.make_block(slicing_dim, start, len)
        })
        .collect()
}

/// Accumulates block outputs back into a full per-chunk buffer. The first
/// append determines the buffer's non-slice shape (which may differ from the
/// input chunk's, if the section changed output dims); every later append
/// must match it.
pub struct BlockAggregator {
    slicing_dim: usize,
    chunk_len: usize,
    buffer: Option<Array3<f32>>,
    current_idx: usize,
}

impl BlockAggregator {
    pub fn new(slicing_dim: usize, chunk_len: usize) -> Self {
        Self {
            slicing_dim,
            chunk_len,
            buffer: None,
            current_idx: 0,
        }
    }

    pub fn append(&mut self, block: &Block) -> Result<()> {
        let block_shape = block.data().shape().to_vec();
        let block_len = block_shape[self.slicing_dim];

        if self.current_idx + block_len > self.chunk_len {
            return Err(EngineError::data(
                "block_aggregator",
                Phase::Block,
                format!(
                    "append at {} would exceed chunk length {}",
                    self.current_idx, self.chunk_len
                ),
            ));
        }

        match &self.buffer {
            None => {
                let mut full_shape = [0usize; 3];
                for axis in 0..3 {
                    full_shape[axis] = if axis == self.slicing_dim {
                        self.chunk_len
                    } else {
                        block_shape[axis]
                    };
                }
                self.buffer = Some(Array3::zeros((full_shape[0], full_shape[1], full_shape[2])));
            }
            Some(existing) => {
                for axis in 0..3 {
                    if axis != self.slicing_dim && existing.shape()[axis] != block_shape[axis] {
                        return Err(EngineError::data(
                            "block_aggregator",
                            Phase::Block,
                            format!(
                                "non-slice shape changed after the first append: dim {axis} was {}, now {}",
                                existing.shape()[axis],
                                block_shape[axis]
                            ),
                        ));
                    }
                }
            }
        }

        let buffer = self.buffer.as_mut().expect("just allocated above");
        let start = self.current_idx;
        let end = start + block_len;
        match self.slicing_dim {
            0 => buffer
                .slice_mut(ndarray::s![start..end, .., ..])
                .assign(block.data()),
            1 => buffer
                .slice_mut(ndarray::s![.., start..end, ..])
                .assign(block.data()),
            2 => buffer
                .slice_mut(ndarray::s![.., .., start..end])
                .assign(block.data()),
            other => return Err(EngineError::internal(format!("invalid slicing dim {other}"))),
        }
        self.current_idx = end;
        Ok(())
    }

    /// Exposes the completed chunk buffer; fails if fewer than `chunk_len`
    /// slices have been appended.
    pub fn into_chunk(self) -> Result<Array3<f32>> {
        if self.current_idx != self.chunk_len {
            return Err(EngineError::internal(format!(
                "aggregator accessed before completion: {}/{} slices appended",
                self.current_idx, self.chunk_len
            )));
        }
        Ok(self.buffer.expect("current_idx > 0 implies buffer is populated"))
    }
}
