use super::generic::{transfer, validate_output_shape};
use super::WrapperEnv;
use crate::dataset::Block;
use crate::error::{EngineError, Result};
use crate::pipeline::BoundStage;
use crate::registry::MethodInfo;
use ndarray::Axis;

/// SPEC_FULL.md §4.3 "Reconstruction": truncate the working angles to the
/// block's own projection count before delegating to the generic call.
pub struct ReconstructionWrapper {
    pub stage: BoundStage,
    pub info: MethodInfo,
}

impl ReconstructionWrapper {
    pub fn new(stage: BoundStage, info: MethodInfo) -> Self {
        Self { stage, info }
    }

    pub fn execute(&mut self, mut block: Block, env: &mut WrapperEnv<'_>) -> Result<Block> {
        transfer(&mut block, &self.info, env);

        let center = self
            .stage
            .spec
            .params
            .get("center")
            .and_then(|v| v.as_f64())
            .or_else(|| env.side_outputs.get("cor").copied())
            .ok_or_else(|| {
                EngineError::configuration(
                    format!("{}.center", self.stage.spec.module),
                    "reconstruction requires a center parameter or a published 'cor' side output",
                )
            })?;

        let n_projections = block.data().shape()[0];
        let angles = env.aux.angles_truncated(n_projections);

        let mut out = crate::methods::recon_simple(block.data(), &angles, center)?;
        if self.info.swap_output_axes_01 {
            out.swap_axes(0, 1);
            out = out.as_standard_layout().to_owned();
        }

        validate_output_shape_changed(&block, &out)?;
        block.set_data(out)?;
        Ok(block)
    }
}

/// Reconstruction always declares `changes_output_dims` (a sinogram-shaped
/// block becomes a reconstructed-slice-shaped one), so the generic wrapper's
/// unchanged-shape check never applies here; only the slicing-dim-preserved
/// invariant (enforced inside `Block::set_data`) still holds.
fn validate_output_shape_changed(block: &Block, out: &ndarray::Array3<f32>) -> Result<()> {
    let _ = Axis(block.slicing_dim);
    validate_output_shape(block, out, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcessCommunicator;
    use crate::dataset::{AuxArrays, Chunk, GlobalShape};
    use crate::pattern::{Pattern, Placement};
    use crate::pipeline::{ParamValue, StageSpec};
    use ndarray::{Array1, Array3};
    use std::collections::HashMap;

    #[test]
    fn reconstruction_truncates_angles_and_changes_output_dims() {
        let n_angles = 8;
        let data = Array3::from_elem((n_angles, 1, 4), 1.0f32);
        let angles = Array1::linspace(0.0, std::f32::consts::PI, n_angles);
        let aux = AuxArrays::new(Array3::zeros((2, 1, 4)), Array3::from_elem((2, 1, 4), 1.0), angles);
        let chunk = Chunk::new(GlobalShape(n_angles, 1, 4), 2, 0, data, aux);
        let block = chunk.make_block(2, 0, 4).unwrap();

        let mut params = HashMap::new();
        params.insert("center".to_string(), ParamValue::Float(2.0));
        let stage = BoundStage {
            spec: StageSpec {
                module: "tomopy.recon.algorithm".into(),
                method: "recon_simple".into(),
                params,
            },
            pattern: Pattern::Sinogram,
            placement: Placement::Host,
            save_by_default: false,
            swap_output_axes_01: false,
            changes_output_dims: true,
        };
        let info = MethodInfo {
            module: "tomopy.recon.algorithm",
            name: "recon_simple",
            pattern: Pattern::Sinogram,
            placement: Placement::Host,
            changes_output_dims: true,
            save_by_default: false,
            swap_output_axes_01: false,
            predict_memory: None,
            predict_output_shape: None,
        };
        let mut wrapper = ReconstructionWrapper::new(stage, info);

        let comm = SingleProcessCommunicator;
        let mut aux = AuxArrays::new(Array3::zeros((2, 1, 4)), Array3::from_elem((2, 1, 4), 1.0), Array1::zeros(2));
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
        assert_eq!(out.data().shape()[1], out.data().shape()[2]);
    }

    #[test]
    fn missing_center_and_no_cor_side_output_is_a_configuration_error() {
        let data = Array3::from_elem((4, 1, 4), 1.0f32);
        let angles = Array1::linspace(0.0, std::f32::consts::PI, 4);
        let aux = AuxArrays::new(Array3::zeros((2, 1, 4)), Array3::from_elem((2, 1, 4), 1.0), angles);
        let chunk = Chunk::new(GlobalShape(4, 1, 4), 2, 0, data, aux);
        let block = chunk.make_block(2, 0, 4).unwrap();

        let stage = BoundStage {
            spec: StageSpec {
                module: "tomopy.recon.algorithm".into(),
                method: "recon_simple".into(),
                params: HashMap::new(),
            },
            pattern: Pattern::Sinogram,
            placement: Placement::Host,
            save_by_default: false,
            swap_output_axes_01: false,
            changes_output_dims: true,
        };
        let info = MethodInfo {
            module: "tomopy.recon.algorithm",
            name: "recon_simple",
            pattern: Pattern::Sinogram,
            placement: Placement::Host,
            changes_output_dims: true,
            save_by_default: false,
            swap_output_axes_01: false,
            predict_memory: None,
            predict_output_shape: None,
        };
        let mut wrapper = ReconstructionWrapper::new(stage, info);
        let comm = SingleProcessCommunicator;
        let mut aux = AuxArrays::new(Array3::zeros((2, 1, 4)), Array3::from_elem((2, 1, 4), 1.0), Array1::zeros(2));
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
        assert!(wrapper.execute(block, &mut e).is_err());
    }
}
