use super::WrapperEnv;
use crate::dataset::Block;
use crate::error::Result;
use crate::pipeline::BoundStage;
use crate::registry::MethodInfo;

/// SPEC_FULL.md §4.3 "Image writer": hands a host copy of the data to the
/// method with `out_dir`/`comm_rank` bound; returns the block untouched
/// (device data, if any, stays on device).
pub struct ImageWriterWrapper {
    pub stage: BoundStage,
    pub info: MethodInfo,
}

impl ImageWriterWrapper {
    pub fn new(stage: BoundStage, info: MethodInfo) -> Self {
        Self { stage, info }
    }

    pub fn execute(&mut self, block: Block, env: &mut WrapperEnv<'_>) -> Result<Block> {
        let _ = &self.info;
        // Device placement in this crate is an ordinary host-resident buffer
        // under a different tag (SPEC_FULL.md §4.2), so no real transfer is
        // needed here beyond reading the data as-is.
        let host_copy = block.data().clone();

        let prefix = self
            .stage
            .spec
            .params
            .get("prefix")
            .and_then(|v| v.as_str())
            .unwrap_or(self.stage.spec.method.as_str())
            .to_string();

        let rank_dir = env.out_dir.join(format!("rank{}", env.comm.rank()));
        crate::methods::save_to_images(&host_copy, &rank_dir, &prefix, block.global_index().0)?;

        Ok(block)
    }
}
