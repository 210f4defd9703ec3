use super::WrapperEnv;
use crate::dataset::Block;
use crate::error::{EngineError, Phase, Result};
use crate::pattern::Pattern;
use crate::pipeline::BoundStage;
use crate::registry::MethodInfo;
use ndarray::{Array2, Array3, Axis};

/// SPEC_FULL.md §4.3 "Rotation/centering" and §9 "Rotation cross-block
/// accumulation": a `WaitingBlocks -> Computing -> Done` state machine over
/// the chunk (not the block), keyed on the single sinogram slice at `ind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingBlocks,
    Done,
}

pub struct RotationWrapper {
    pub stage: BoundStage,
    pub info: MethodInfo,
    ind: usize,
    chunk_len_on_slicing_dim: usize,
    accumulated: Option<Array2<f32>>,
    state: State,
}

impl RotationWrapper {
    pub fn new(stage: BoundStage, info: MethodInfo, chunk_len_on_slicing_dim: usize, chunk_axis1_len: usize) -> Result<Self> {
        if stage.pattern == Pattern::Projection {
            return Err(EngineError::capability(
                format!("{}.{}", stage.spec.module, stage.spec.method),
                "centering is sinogram-only; this stage resolved to a projection pattern",
            ));
        }
        // The original resolves `ind` with
        // `if slice_ind_center is None or 'mid': ind = shape[1] // 2`.
        // The bare string literal `'mid'` is always truthy, so that `or`
        // is always true no matter what `slice_ind_center` holds, and the
        // original always falls through to the midpoint. This port
        // reproduces that bug rather than the evidently-intended
        // "default only when ind is None or the literal 'mid'" check: any
        // `ind` that fails to parse as a plain integer, present or not,
        // resolves to the chunk midpoint along axis 1.
        let ind = stage
            .spec
            .params
            .get("ind")
            .and_then(|v| v.as_usize())
            .unwrap_or(chunk_axis1_len / 2);

        Ok(Self {
            stage,
            info,
            ind,
            chunk_len_on_slicing_dim,
            accumulated: None,
            state: State::WaitingBlocks,
        })
    }

    pub async fn execute(&mut self, block: Block, env: &mut WrapperEnv<'_>) -> Result<Block> {
        if self.state == State::Done {
            return Ok(block);
        }

        let slice = block
            .data()
            .index_axis(Axis(1), self.ind.min(block.data().shape()[1] - 1))
            .to_owned();
        self.accumulate(&block, slice)?;

        if block.is_last_in_chunk(self.chunk_len_on_slicing_dim) {
            self.finalize(env).await?;
            self.state = State::Done;
        }

        Ok(block)
    }

    fn accumulate(&mut self, block: &Block, slice: Array2<f32>) -> Result<()> {
        let n_angles = slice.shape()[0];
        let width = slice.shape()[1];
        let buffer = self
            .accumulated
            .get_or_insert_with(|| Array2::zeros((n_angles, self.chunk_len_on_slicing_dim)));

        if buffer.shape()[0] != n_angles {
            return Err(EngineError::data(
                "rotation_wrapper.accumulate",
                Phase::Block,
                "projection count changed between blocks of the same chunk",
            ));
        }

        let start = block.block_start;
        buffer
            .slice_mut(ndarray::s![.., start..start + width])
            .assign(&slice);
        Ok(())
    }

    async fn finalize(&mut self, env: &mut WrapperEnv<'_>) -> Result<()> {
        let local = self.accumulated.take().ok_or_else(|| {
            EngineError::internal("rotation wrapper reached its last block with nothing accumulated")
        })?;

        let gathered = env.comm.gather_to_root(local.clone()).await?;

        let center = if let Some(pieces) = gathered {
            let full = concat_columns(&pieces)?;
            let normalized = normalize_against_aux(&full, env)?;
            let as_volume = normalized.insert_axis(Axis(1));
            Some(crate::methods::find_center_360(&as_volume)?)
        } else {
            None
        };

        let center = env.comm.broadcast(center).await?;
        env.side_outputs.insert("cor".to_string(), center);
        Ok(())
    }
}

fn concat_columns(pieces: &[Array2<f32>]) -> Result<Array2<f32>> {
    if pieces.len() == 1 {
        return Ok(pieces[0].clone());
    }
    let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
    ndarray::concatenate(Axis(1), &views)
        .map_err(|e| EngineError::internal(format!("rotation gather concatenation failed: {e}")))
}

fn normalize_against_aux(sinogram: &Array2<f32>, env: &mut WrapperEnv<'_>) -> Result<Array2<f32>> {
    let darks = env.aux.darks(crate::pattern::Placement::Host).mean_axis(Axis(0));
    let flats = env.aux.flats(crate::pattern::Placement::Host).mean_axis(Axis(0));
    let (darks, flats) = match (darks, flats) {
        (Some(d), Some(f)) => (d, f),
        _ => return Ok(sinogram.clone()),
    };
    let mut out = sinogram.clone();
    for mut row in out.outer_iter_mut() {
        for ((col, v), (&d, &f)) in row.iter_mut().enumerate().zip(darks.iter().zip(flats.iter())) {
            let _ = col;
            let denom = (f - d).max(1e-6);
            *v = ((*v - d) / denom).max(1e-6);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcessCommunicator;
    use crate::dataset::{AuxArrays, Chunk, GlobalShape};
    use crate::pattern::Placement;
    use crate::pipeline::StageSpec;
    use ndarray::Array1;
    use std::collections::HashMap;

    fn make_stage() -> BoundStage {
        BoundStage {
            spec: StageSpec {
                module: "tomopy.recon.rotation".into(),
                method: "find_center_360".into(),
                params: HashMap::new(),
            },
            pattern: Pattern::Sinogram,
            placement: Placement::Host,
            save_by_default: false,
            swap_output_axes_01: false,
            changes_output_dims: false,
        }
    }

    fn make_info() -> MethodInfo {
        MethodInfo {
            module: "tomopy.recon.rotation",
            name: "find_center_360",
            pattern: Pattern::Sinogram,
            placement: Placement::Host,
            changes_output_dims: false,
            save_by_default: false,
            swap_output_axes_01: false,
            predict_memory: None,
            predict_output_shape: None,
        }
    }

    #[test]
    fn construction_rejects_a_projection_pattern() {
        let mut stage = make_stage();
        stage.pattern = Pattern::Projection;
        let err = RotationWrapper::new(stage, make_info(), 8, 4).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Capability);
    }

    #[tokio::test]
    async fn publishes_a_cor_side_output_on_the_last_block_of_the_chunk() {
        let stage = make_stage();
        let mut wrapper = RotationWrapper::new(stage, make_info(), 8, 4).unwrap();

        let data = Array3::<f32>::ones((4, 4, 8));
        let aux = AuxArrays::new(Array3::zeros((2, 4, 8)), Array3::from_elem((2, 4, 8), 2.0), Array1::zeros(4));
        let chunk = Chunk::new(GlobalShape(4, 4, 8), 2, 0, data, aux);
        let block = chunk.make_block(2, 0, 8).unwrap();

        let comm = SingleProcessCommunicator;
        let mut aux = AuxArrays::new(Array3::zeros((2, 4, 8)), Array3::from_elem((2, 4, 8), 2.0), Array1::zeros(4));
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

        let out = wrapper.execute(block, &mut e).await.unwrap();
        assert_eq!(out.data().shape(), &[4, 4, 8]);
        assert!(side_outputs_contains_cor(&side_outputs));
    }

    fn side_outputs_contains_cor(side_outputs: &HashMap<String, f64>) -> bool {
        side_outputs.contains_key("cor")
    }

    /// At `world_size = 2`, rank 0's gather sees two peer pieces rather than
    /// its own local accumulation echoed back, exercising `concat_columns`'s
    /// multi-piece branch (the original's `test_rotation.py` mocks `comm.size
    /// = 2` and asserts on what `comm.gather` was called with the same way).
    #[tokio::test]
    async fn finalize_concatenates_gathered_pieces_from_every_rank() {
        let stage = make_stage();
        let mut wrapper = RotationWrapper::new(stage, make_info(), 8, 4).unwrap();

        let data = Array3::<f32>::ones((4, 4, 8));
        let aux = AuxArrays::new(Array3::zeros((2, 4, 8)), Array3::from_elem((2, 4, 8), 2.0), Array1::zeros(4));
        let chunk = Chunk::new(GlobalShape(4, 4, 8), 2, 0, data, aux);
        let block = chunk.make_block(2, 0, 8).unwrap();

        let peer_a = Array2::from_elem((4, 4), 3.0);
        let peer_b = Array2::from_elem((4, 4), 5.0);
        let comm = crate::test_support::FakeMultiRankCommunicator::new(0, 2)
            .with_gathered_on_root(vec![peer_a, peer_b]);
        let mut aux = AuxArrays::new(Array3::zeros((2, 4, 8)), Array3::from_elem((2, 4, 8), 2.0), Array1::zeros(4));
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

        let out = wrapper.execute(block, &mut e).await.unwrap();
        assert_eq!(out.data().shape(), &[4, 4, 8]);
        assert!(side_outputs_contains_cor(&side_outputs));
        assert!(comm.last_gather_send.lock().unwrap().is_some());
    }
}
