use super::WrapperEnv;
use crate::dataset::Block;
use crate::error::{EngineError, Result};
use crate::pipeline::BoundStage;
use crate::registry::MethodInfo;
use ndarray::Array3;

/// The plain wrapper variant (SPEC_FULL.md §4.3 "Generic"): transfer, bind,
/// invoke, validate shape, overwrite.
pub struct GenericWrapper {
    pub stage: BoundStage,
    pub info: MethodInfo,
}

impl GenericWrapper {
    pub fn new(stage: BoundStage, info: MethodInfo) -> Self {
        Self { stage, info }
    }

    pub fn execute(&mut self, mut block: Block, env: &mut WrapperEnv<'_>) -> Result<Block> {
        transfer(&mut block, &self.info, env);
        let out = dispatch(&self.stage, &self.info, &block, env)?;
        validate_output_shape(&block, &out, self.info.changes_output_dims)?;
        block.set_data(out)?;
        Ok(block)
    }
}

pub(super) fn transfer(block: &mut Block, info: &MethodInfo, env: &WrapperEnv<'_>) {
    match info.placement {
        crate::pattern::Placement::Host => block.to_host(),
        crate::pattern::Placement::Device => block.to_device(env.gpu_id.unwrap_or(0)),
    }
}

/// Binds arguments by method name from parameters, aux properties, and
/// computed values, then invokes the reference-library body. A real build
/// would resolve this via the method's own declared parameter signature (the
/// out-of-scope collaborator of SPEC_FULL.md §1); here the closed, known set
/// of methods makes that binding a direct match.
pub(super) fn dispatch(
    stage: &BoundStage,
    _info: &MethodInfo,
    block: &Block,
    env: &mut WrapperEnv<'_>,
) -> Result<Array3<f32>> {
    match stage.spec.method.as_str() {
        "normalize" => {
            let placement = block.placement();
            let darks = env.aux.darks(placement).clone();
            let flats = env.aux.flats(placement).clone();
            crate::methods::normalize(block.data(), &darks, &flats)
        }
        "minus_log" => crate::methods::minus_log(block.data()),
        other => Err(EngineError::configuration(
            format!("{}.{other}", stage.spec.module),
            "no binding known for this method in the generic wrapper",
        )),
    }
}

/// SPEC_FULL.md §4.3(iv): same shape unless `changes_output_dims`, in which
/// case only the slicing-dim extent is still required to match (enforced by
/// `Block::set_data` itself); non-slice dims are free to differ.
pub(super) fn validate_output_shape(block: &Block, out: &Array3<f32>, changes_output_dims: bool) -> Result<()> {
    if changes_output_dims {
        return Ok(());
    }
    if block.data().shape() != out.shape() {
        return Err(EngineError::data(
            "generic_wrapper.validate_output_shape",
            crate::error::Phase::Block,
            format!(
                "method did not declare changes_output_dims but returned shape {:?} for input shape {:?}",
                out.shape(),
                block.data().shape()
            ),
        ));
    }
    Ok(())
}
