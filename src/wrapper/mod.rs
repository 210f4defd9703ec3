//! Method Wrapper (SPEC_FULL.md §4.3): the uniform call interface around
//! every method, modeled as a tagged sum rather than open inheritance
//! (SPEC_FULL.md §9 "Polymorphism over wrappers").
//!
//! Grounded on the teacher's `stages/mod.rs` `StageHandler` trait (one
//! pluggable `execute()` per stage), generalized here to this crate's closed,
//! known set of variants selected structurally by `crate::registry`.

mod data_reducer;
mod dezinging;
mod generic;
mod image_writer;
mod intermediate_writer;
mod reconstruction;
mod rotation;

pub use intermediate_writer::PrevMethodIdentity;

use crate::comm::Communicator;
use crate::dataset::{AuxArrays, Block};
use crate::error::Result;
use crate::pipeline::BoundStage;
use crate::registry::MethodInfo;
use std::collections::HashMap;
use std::path::PathBuf;

/// Everything a wrapper's `execute` needs beyond the block itself: run-wide
/// context plus the mutable pieces shared across the whole pipeline
/// (aux arrays, side outputs) for the block's owning chunk.
pub struct WrapperEnv<'a> {
    pub comm: &'a dyn Communicator,
    pub aux: &'a mut AuxArrays,
    pub gpu_id: Option<u32>,
    pub out_dir: &'a std::path::Path,
    pub task_id: &'a str,
    /// Side outputs published so far (e.g. `cor`, `overlap`), merged into the
    /// parameter map visible to every later method in the pipeline
    /// (SPEC_FULL.md §4.3 "Side outputs").
    pub side_outputs: &'a mut HashMap<String, f64>,
}

/// Variants match SPEC_FULL.md §9's tagged sum exactly; selection from a
/// `BoundStage` + its registry `MethodInfo` is a pure function in `build`.
pub enum MethodWrapper {
    Generic(generic::GenericWrapper),
    Reconstruction(reconstruction::ReconstructionWrapper),
    Rotation(rotation::RotationWrapper),
    Dezinging(dezinging::DezingingWrapper),
    ImageWriter(image_writer::ImageWriterWrapper),
    IntermediateWriter(intermediate_writer::IntermediateWriterWrapper),
    DataReducer(data_reducer::DataReducerWrapper),
}

impl MethodWrapper {
    pub fn save_result(&self) -> bool {
        match self {
            MethodWrapper::Generic(w) => w.stage.save_result(),
            MethodWrapper::Reconstruction(w) => w.stage.save_result(),
            MethodWrapper::Rotation(w) => w.stage.save_result(),
            MethodWrapper::Dezinging(w) => w.stage.save_result(),
            MethodWrapper::ImageWriter(w) => w.stage.save_result(),
            MethodWrapper::IntermediateWriter(_) => false,
            MethodWrapper::DataReducer(w) => w.stage.save_result(),
        }
    }

    pub async fn execute(&mut self, block: Block, env: &mut WrapperEnv<'_>) -> Result<Block> {
        match self {
            MethodWrapper::Generic(w) => w.execute(block, env),
            MethodWrapper::Reconstruction(w) => w.execute(block, env),
            MethodWrapper::Rotation(w) => w.execute(block, env).await,
            MethodWrapper::Dezinging(w) => w.execute(block, env),
            MethodWrapper::ImageWriter(w) => w.execute(block, env),
            MethodWrapper::IntermediateWriter(w) => w.execute(block, env),
            MethodWrapper::DataReducer(w) => w.execute(block, env),
        }
    }
}

/// Identity and attributes needed to construct any wrapper variant.
pub struct WrapperBuildInput {
    pub id: usize,
    pub stage: BoundStage,
    pub info: MethodInfo,
    /// The owning chunk's extent on the section's slicing dimension. Read by
    /// the rotation variant (cross-block accumulation sizing / last-block
    /// detection) and otherwise unused.
    pub chunk_len_on_slicing_dim: usize,
    /// The owning chunk's extent on axis 1, used only to compute the
    /// rotation variant's default `ind` ("middle of chunk along axis 1").
    pub chunk_axis1_len: usize,
    /// Only read by the intermediate-writer variant.
    pub prev_identity: Option<PrevMethodIdentity>,
    pub intermediate_dir: PathBuf,
}

pub fn build(
    kind: crate::registry::WrapperKind,
    input: WrapperBuildInput,
) -> Result<MethodWrapper> {
    use crate::registry::WrapperKind as K;
    Ok(match kind {
        K::Generic => MethodWrapper::Generic(generic::GenericWrapper::new(input.stage, input.info)),
        K::Reconstruction => {
            MethodWrapper::Reconstruction(reconstruction::ReconstructionWrapper::new(input.stage, input.info))
        }
        K::Rotation => MethodWrapper::Rotation(rotation::RotationWrapper::new(
            input.stage,
            input.info,
            input.chunk_len_on_slicing_dim,
            input.chunk_axis1_len,
        )?),
        K::Dezinging => MethodWrapper::Dezinging(dezinging::DezingingWrapper::new(input.stage, input.info)),
        K::ImageWriter => MethodWrapper::ImageWriter(image_writer::ImageWriterWrapper::new(input.stage, input.info)),
        K::IntermediateWriter => MethodWrapper::IntermediateWriter(intermediate_writer::IntermediateWriterWrapper::new(
            input.prev_identity.ok_or_else(|| {
                crate::error::EngineError::internal(
                    "intermediate writer constructed with no previous-method identity",
                )
            })?,
            input.intermediate_dir,
            input.chunk_len_on_slicing_dim,
        )),
        K::DataReducer => MethodWrapper::DataReducer(data_reducer::DataReducerWrapper::new(input.stage, input.info)),
    })
}
