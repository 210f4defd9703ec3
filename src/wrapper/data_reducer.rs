use super::generic::{transfer, validate_output_shape};
use super::WrapperEnv;
use crate::dataset::Block;
use crate::error::{EngineError, Result};
use crate::pipeline::BoundStage;
use crate::registry::MethodInfo;

/// SPEC_FULL.md §4.3 "Datareducer": shrinks the working view (binning,
/// cropping) and updates non-slice dims.
pub struct DataReducerWrapper {
    pub stage: BoundStage,
    pub info: MethodInfo,
}

impl DataReducerWrapper {
    pub fn new(stage: BoundStage, info: MethodInfo) -> Self {
        Self { stage, info }
    }

    pub fn execute(&mut self, mut block: Block, env: &mut WrapperEnv<'_>) -> Result<Block> {
        transfer(&mut block, &self.info, env);

        let out = match self.stage.spec.method.as_str() {
            "bin_mean" => {
                let bin_size = self
                    .stage
                    .spec
                    .params
                    .get("bin_size")
                    .and_then(|v| v.as_usize())
                    .unwrap_or(2);
                let axis = self
                    .stage
                    .spec
                    .params
                    .get("axis")
                    .and_then(|v| v.as_usize())
                    .unwrap_or(1);
                crate::methods::bin_mean(block.data(), bin_size, axis)?
            }
            other => {
                return Err(EngineError::configuration(
                    format!("{}.{other}", self.stage.spec.module),
                    "no binding known for this method in the data reducer wrapper",
                ))
            }
        };

        validate_output_shape(&block, &out, true)?;
        block.set_data(out)?;
        Ok(block)
    }
}
