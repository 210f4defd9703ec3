use super::WrapperEnv;
use crate::dataset::Block;
use crate::error::{EngineError, Result};
use ndarray::s;
use std::path::PathBuf;

/// Identity of the method immediately preceding a runner-inserted
/// intermediate writer, used only to build its deterministic filename
/// (SPEC_FULL.md §4.3 "Intermediate writer"). A value-typed back-reference
/// rather than an owned pointer into the wrapper list (SPEC_FULL.md §9
/// "Cyclic references").
#[derive(Debug, Clone)]
pub struct PrevMethodIdentity {
    pub task_id: usize,
    pub package_name: String,
    pub method_name: String,
    /// Set only when the previous method is a reconstruction algorithm;
    /// the filename then carries a `-{algo}` suffix (SPEC_FULL.md §9 Open
    /// Questions: the variant chosen here matches the persisted-output
    /// tests, which key on this suffix).
    pub recon_algorithm: Option<String>,
}

impl PrevMethodIdentity {
    pub fn filename(&self) -> String {
        let mut stem = format!("{}-{}-{}", self.task_id, self.package_name, self.method_name);
        if let Some(algo) = &self.recon_algorithm {
            stem.push('-');
            stem.push_str(algo);
        }
        format!("{stem}.h5")
    }
}

/// SPEC_FULL.md §4.3 "Intermediate writer": opens its destination file on
/// the first block it sees, writes each block to its global-index offset
/// inside `/data`, preserves angles and detector extents, and closes on the
/// last block of the chunk. Never transfers data back to device.
///
/// A real multi-process deployment would open this file collectively with
/// MPI-IO semantics (SPEC_FULL.md §5); this crate's `hdf5` dependency has no
/// `mpio` feature (not present anywhere in this project's dependency stack),
/// so each process opens its own handle to the same path and writes only its
/// own disjoint global-index region, which is sufficient under the
/// single-process `Communicator` this crate ships.
pub struct IntermediateWriterWrapper {
    identity: PrevMethodIdentity,
    dir: PathBuf,
    chunk_len_on_slicing_dim: usize,
    file: Option<hdf5::File>,
}

impl IntermediateWriterWrapper {
    pub fn new(identity: PrevMethodIdentity, dir: PathBuf, chunk_len_on_slicing_dim: usize) -> Self {
        Self {
            identity,
            dir,
            chunk_len_on_slicing_dim,
            file: None,
        }
    }

    pub fn execute(&mut self, mut block: Block, env: &mut WrapperEnv<'_>) -> Result<Block> {
        block.to_host();

        if self.file.is_none() {
            self.file = Some(self.open(&block, env)?);
        }
        self.write_block(&block)?;

        if block.is_last_in_chunk(self.chunk_len_on_slicing_dim) {
            if let Some(file) = self.file.take() {
                file.close()
                    .map_err(|e| EngineError::hdf5("intermediate_writer.close", e))?;
            }
        }

        Ok(block)
    }

    fn open(&self, block: &Block, env: &WrapperEnv<'_>) -> Result<hdf5::File> {
        std::fs::create_dir_all(&self.dir).map_err(|e| EngineError::io("intermediate_writer.mkdir", e))?;
        let path = self.dir.join(self.identity.filename());
        let file =
            hdf5::File::create(&path).map_err(|e| EngineError::hdf5("intermediate_writer.create", e))?;

        // `block.global_shape` reflects the chunk's shape as of block-carving
        // time, before this section ran; if an earlier wrapper in this same
        // section changed non-slice dims (e.g. reconstruction), that field is
        // stale for the data actually being written here. The slicing-dim
        // extent is always `chunk_len_on_slicing_dim` (methods never change
        // how many slices they were handed); the non-slice extents are
        // exactly this block's own current shape, since blocks never
        // partition non-slice axes.
        let block_shape = block.data().shape();
        let mut global = [0usize; 3];
        for (axis, slot) in global.iter_mut().enumerate() {
            *slot = if axis == block.slicing_dim {
                self.chunk_len_on_slicing_dim
            } else {
                block_shape[axis]
            };
        }
        let (g0, g1, g2) = (global[0], global[1], global[2]);
        file.new_dataset::<f32>()
            .shape((g0, g1, g2))
            .create("data")
            .map_err(|e| EngineError::hdf5("intermediate_writer.create_data", e))?;

        let angles = env.aux.angles();
        let angles_ds = file
            .new_dataset::<f32>()
            .shape(angles.len())
            .create("angles")
            .map_err(|e| EngineError::hdf5("intermediate_writer.create_angles", e))?;
        angles_ds
            .write(angles.as_slice().expect("angles array is contiguous"))
            .map_err(|e| EngineError::hdf5("intermediate_writer.write_angles", e))?;

        let dims_ds = file
            .new_dataset::<u64>()
            .shape(2)
            .create("data_dims/detector_x_y")
            .map_err(|e| EngineError::hdf5("intermediate_writer.create_dims", e))?;
        dims_ds
            .write(&[g2 as u64, g1 as u64])
            .map_err(|e| EngineError::hdf5("intermediate_writer.write_dims", e))?;

        file.new_attr::<u64>()
            .create("chunk_origin")
            .and_then(|attr| attr.write_scalar(&(block.chunk_start as u64)))
            .map_err(|e| EngineError::hdf5("intermediate_writer.write_chunk_origin", e))?;

        Ok(file)
    }

    fn write_block(&self, block: &Block) -> Result<()> {
        let file = self.file.as_ref().expect("opened before the first write_block call");
        let dataset = file
            .dataset("data")
            .map_err(|e| EngineError::hdf5("intermediate_writer.open_data", e))?;

        let (g0, g1, g2) = block.global_index();
        let shape = block.data().shape();
        dataset
            .write_slice(
                block.data(),
                s![g0..g0 + shape[0], g1..g1 + shape[1], g2..g2 + shape[2]],
            )
            .map_err(|e| EngineError::hdf5("intermediate_writer.write_slice", e))
    }
}
