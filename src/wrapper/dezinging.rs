use super::generic::transfer;
use super::WrapperEnv;
use crate::dataset::Block;
use crate::error::Result;
use crate::pipeline::BoundStage;
use crate::registry::MethodInfo;

/// SPEC_FULL.md §4.3 "Dezinging": `remove_outlier3d` applied to the block's
/// data *and* to darks/flats with the same parameters, unlocking the aux
/// arrays only around those writes.
pub struct DezingingWrapper {
    pub stage: BoundStage,
    pub info: MethodInfo,
}

impl DezingingWrapper {
    pub fn new(stage: BoundStage, info: MethodInfo) -> Self {
        Self { stage, info }
    }

    pub fn execute(&mut self, mut block: Block, env: &mut WrapperEnv<'_>) -> Result<Block> {
        transfer(&mut block, &self.info, env);

        let kernel_size = self
            .stage
            .spec
            .params
            .get("kernel_size")
            .and_then(|v| v.as_usize())
            .unwrap_or(3);
        let dif = self
            .stage
            .spec
            .params
            .get("dif")
            .and_then(|v| v.as_f64())
            .unwrap_or(3.0) as f32;

        let new_data = crate::methods::remove_outlier3d(block.data(), kernel_size, dif)?;
        block.set_data(new_data)?;

        let placement = block.placement();
        let darks = env.aux.darks(placement).clone();
        let flats = env.aux.flats(placement).clone();
        let new_darks = crate::methods::remove_outlier3d(&darks, kernel_size, dif)?;
        let new_flats = crate::methods::remove_outlier3d(&flats, kernel_size, dif)?;

        env.aux.unlock();
        let result = (|| -> Result<()> {
            env.aux.set_darks(new_darks)?;
            env.aux.set_flats(new_flats)?;
            Ok(())
        })();
        env.aux.lock();
        result?;

        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcessCommunicator;
    use crate::dataset::{AuxArrays, Chunk, GlobalShape};
    use crate::pattern::{Pattern, Placement};
    use crate::pipeline::StageSpec;
    use ndarray::{Array1, Array3};
    use std::collections::HashMap;

    #[test]
    fn dezinging_scrubs_a_spike_from_data_and_aux() {
        let mut data = Array3::from_elem((1, 5, 5), 1.0f32);
        data[(0, 2, 2)] = 1000.0;
        let mut darks = Array3::from_elem((1, 5, 5), 0.1f32);
        darks[(0, 2, 2)] = 999.0;
        let flats = Array3::from_elem((1, 5, 5), 0.9f32);
        let angles = Array1::zeros(1);
        let aux = AuxArrays::new(darks, flats, angles);
        let chunk = Chunk::new(GlobalShape(1, 5, 5), 0, 0, data, aux);
        let block = chunk.make_block(0, 0, 1).unwrap();

        let stage = BoundStage {
            spec: StageSpec {
                module: "httomolibgpu.misc.corr".into(),
                method: "remove_outlier3d".into(),
                params: HashMap::new(),
            },
            pattern: Pattern::Projection,
            placement: Placement::Host,
            save_by_default: false,
            swap_output_axes_01: false,
            changes_output_dims: false,
        };
        let info = MethodInfo {
            module: "httomolibgpu.misc.corr",
            name: "remove_outlier3d",
            pattern: Pattern::Projection,
            placement: Placement::Host,
            changes_output_dims: false,
            save_by_default: false,
            swap_output_axes_01: false,
            predict_memory: None,
            predict_output_shape: None,
        };
        let mut wrapper = DezingingWrapper::new(stage, info);

        let comm = SingleProcessCommunicator;
        let mut aux = AuxArrays::new(
            Array3::from_elem((1, 5, 5), 999.0),
            Array3::from_elem((1, 5, 5), 0.9),
            Array1::zeros(1),
        );
        let mut side_outputs = HashMap::new();
        let dir = tempfile::tempdir().unwrap();
        let mut e = WrapperEnv {
            comm: &comm,
            aux: &mut aux,
            gpu_id: None,
            out_dir: dir.path(),
            task_id: "t",
            side_outputs: &mut side_outputs,
        };

        let out = wrapper.execute(block, &mut e).unwrap();
        assert!((out.data()[(0, 2, 2)] - 1.0).abs() < 1e-3);
        assert!(e.aux.is_locked());
    }
}
