//! Runner (SPEC_FULL.md §4.8): builds a pipeline from its configuration,
//! sectionizes it, and drives section/block/wrapper execution to completion.
//!
//! Grounded on the teacher's `orchestrator.rs` (`PipelineOrchestrator::execute_job`
//! / `run_dag`: build context, iterate execution units in order, merge
//! results, emit elapsed time) generalized from a DAG-of-stages run to this
//! spec's linear section/block/wrapper loop. The teacher's `JobStateMachine`
//! retry/backoff machinery is not reused: SPEC_FULL.md §4.9/§7 abort a run on
//! any method or reslice failure, with no recovery to retry into.

use crate::archive::ArchiveReader;
use crate::block;
use crate::comm::Communicator;
use crate::config::RunContext;
use crate::dataset::{AuxArrays, Chunk, GlobalShape};
use crate::error::{EngineError, Result};
use crate::memory::{self, DeviceMemoryInfo, MethodMemorySpec, PlanInput};
use crate::pattern::{Pattern, Placement};
use crate::pipeline::{BoundStage, LoaderSpec, PipelineSpec};
use crate::registry::{MethodInfo, MethodRegistry, WrapperKind};
use crate::reslice::{self, ResliceMode};
use crate::sectionizer::{self, MethodDescriptor, SectionizeResult};
use crate::wrapper::{self, MethodWrapper, PrevMethodIdentity, WrapperBuildInput, WrapperEnv};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

pub struct RunOutcome {
    pub elapsed: Duration,
    pub sections_executed: usize,
}

/// Everything the runner needs beyond the pipeline document and the
/// per-run `RunContext`: the method attribute table, the process group, and
/// a device-memory oracle. Borrowed, never owned, so a caller can share one
/// registry/communicator across many runs.
pub struct Runner<'a> {
    pub registry: &'a MethodRegistry,
    pub comm: &'a dyn Communicator,
    pub device_memory: &'a dyn DeviceMemoryInfo,
    pub ctx: &'a RunContext,
    pub reslice_mode: ResliceMode,
}

/// Everything bound and sectionized ahead of execution, shared by both
/// `Runner::check` (plan-only) and `Runner::run` (plan + execute).
struct PlannedPipeline {
    bound: Vec<BoundStage>,
    infos: Vec<MethodInfo>,
    kinds: Vec<WrapperKind>,
    loader_pattern: Pattern,
    sectionize: SectionizeResult,
}

impl<'a> Runner<'a> {
    /// SPEC_FULL.md §6 `check`: parses, validates, and sectionizes a pipeline
    /// without loading any data or running any method.
    pub fn check(&self, pipeline: &PipelineSpec, save_all: bool) -> Result<SectionizeResult> {
        Ok(self.plan(pipeline, save_all)?.sectionize)
    }

    /// SPEC_FULL.md §6 `run`: the full plan-then-execute algorithm.
    pub async fn run(&self, archive: &dyn ArchiveReader, input_path: &Path, pipeline: &PipelineSpec, save_all: bool) -> Result<RunOutcome> {
        let start = Instant::now();
        crate::comm::log_once(self.comm, "starting run");

        let planned = self.plan(pipeline, save_all)?;
        let split_dim = planned.loader_pattern.slicing_dim();

        let (g0, g1, g2) = archive.global_shape(input_path)?;
        let global_shape = GlobalShape(g0, g1, g2);
        let (chunk_start, chunk_len) = global_shape.chunk_bounds(split_dim, self.comm.rank(), self.comm.world_size());

        let loaded = archive.load(input_path, chunk_start, chunk_len, split_dim)?;
        let aux = AuxArrays::new(loaded.darks, loaded.flats, loaded.angles);
        let mut chunk = Chunk::new(global_shape, split_dim, chunk_start, loaded.data, aux);

        if planned.sectionize.loader_needs_initial_reslice {
            let target = planned.sectionize.sections[0].pattern.slicing_dim();
            chunk = reslice::reslice(self.comm, chunk, target, &self.reslice_mode).await?;
        }

        let mut side_outputs: HashMap<String, f64> = HashMap::new();
        let sections_executed = self.run_sections(&planned, &mut chunk, &mut side_outputs, save_all).await?;

        if self.comm.rank() == 0 {
            let elapsed = start.elapsed();
            tracing::info!(elapsed_ms = elapsed.as_millis(), "run complete");
            crate::config::strip_ansi_from_log(&self.ctx.run_out_dir.join("user.log"))?;
        }

        Ok(RunOutcome {
            elapsed: start.elapsed(),
            sections_executed,
        })
    }

    fn plan(&self, pipeline: &PipelineSpec, save_all: bool) -> Result<PlannedPipeline> {
        let mut bound = Vec::with_capacity(pipeline.stages.len());
        let mut infos = Vec::with_capacity(pipeline.stages.len());
        let mut kinds = Vec::with_capacity(pipeline.stages.len());

        for (i, spec) in pipeline.stages.iter().enumerate() {
            if spec.method == "save_intermediate_data" {
                return Err(EngineError::configuration(
                    format!("stages[{i}]"),
                    "save_intermediate_data is reserved for the runner-inserted intermediate writer",
                ));
            }
            if let Some(param) = spec.sweep_parameter() {
                return Err(EngineError::configuration(
                    format!("stages[{i}].{param}"),
                    "tuple-valued parameter (sweep) is not supported by this runner",
                ));
            }

            let info = self.registry.query(&spec.module, &spec.method)?;
            if info.placement == Placement::Device && self.ctx.gpu_id.is_none() {
                return Err(EngineError::capability(
                    format!("stages[{i}].{}.{}", spec.module, spec.method),
                    "this method requires a device section but no --gpu-id was given",
                ));
            }
            let kind = crate::registry::select_wrapper_kind(&spec.module, &spec.method)?;

            bound.push(BoundStage {
                spec: spec.clone(),
                pattern: info.pattern,
                placement: info.placement,
                save_by_default: info.save_by_default,
                swap_output_axes_01: info.swap_output_axes_01,
                changes_output_dims: info.changes_output_dims,
            });
            infos.push(info);
            kinds.push(kind);
        }

        let descriptors = build_descriptors(&bound, &kinds, save_all);
        let loader_pattern = loader_pattern(&pipeline.loader);
        let sectionize = sectionizer::sectionize(loader_pattern, &descriptors)?;

        Ok(PlannedPipeline {
            bound,
            infos,
            kinds,
            loader_pattern,
            sectionize,
        })
    }

    async fn run_sections(
        &self,
        planned: &PlannedPipeline,
        chunk: &mut Chunk,
        side_outputs: &mut HashMap<String, f64>,
        save_all: bool,
    ) -> Result<usize> {
        let mut executed = 0usize;
        let n_sections = planned.sectionize.sections.len();

        for (section_idx, section) in planned.sectionize.sections.iter().enumerate() {
            let slicing_dim = section.pattern.slicing_dim();
            let chunk_shape = chunk.chunk_shape();
            let chunk_len_on_slicing_dim = dim_of(chunk_shape, slicing_dim);
            let non_slice = non_slice_shape(chunk_shape, slicing_dim);

            let method_specs: Vec<MethodMemorySpec> = section
                .method_ids
                .iter()
                .map(|&id| MethodMemorySpec {
                    predict_memory: planned.infos[id].predict_memory,
                    predict_output_shape: planned.infos[id].predict_output_shape,
                    normalizes_with_aux: planned.bound[id].spec.method == "normalize",
                })
                .collect();

            let device_free_bytes = match section.placement {
                Placement::Device => self.device_memory.free_bytes(self.ctx.gpu_id.unwrap_or(0)),
                Placement::Host => 0,
            };

            let plan_input = PlanInput {
                placement: section.placement,
                chunk_len: chunk_len_on_slicing_dim,
                non_slice_shape: non_slice,
                dtype_bytes: std::mem::size_of::<f32>(),
                methods: &method_specs,
                configured_cpu_cap: self.ctx.max_cpu_slices,
                safety_margin: 0.1,
                aux_nbytes: chunk.aux().nbytes_darks_flats(),
                device_free_bytes,
            };
            let max_slices = memory::plan_section(&plan_input)?;

            let mut wrappers = self.build_section_wrappers(
                planned,
                section,
                section_idx,
                n_sections,
                chunk_len_on_slicing_dim,
                chunk_shape.1,
                save_all,
            )?;

            let blocks = block::split(chunk, slicing_dim, max_slices)?;
            let mut aggregator = block::BlockAggregator::new(slicing_dim, chunk_len_on_slicing_dim);

            for block in blocks {
                let mut block = block;
                for (id, wrapper) in wrappers.iter_mut() {
                    let mut env = WrapperEnv {
                        comm: self.comm,
                        aux: chunk.aux_mut(),
                        gpu_id: self.ctx.gpu_id,
                        out_dir: &self.ctx.run_out_dir,
                        task_id: &self.ctx.task_id,
                        side_outputs: &mut *side_outputs,
                    };
                    block = wrapper.execute(block, &mut env).await?;
                    if planned.sectionize.return_to_host.contains(id) {
                        block.to_host();
                    }
                }
                aggregator.append(&block)?;
            }

            let new_data = aggregator.into_chunk()?;
            let new_shape = new_data.shape().to_vec();
            chunk.replace_data(new_data);
            // The two non-slice axes are always fully chunk-resident, so they
            // are the volume's true global extent; the slicing-dim axis is
            // guaranteed unchanged by `Block::set_data`'s invariant. A
            // dimension-changing method (e.g. reconstruction) therefore
            // leaves `global_shape` stale unless refreshed here, which the
            // intermediate writer depends on for its dataset shape.
            chunk.global_shape = GlobalShape(new_shape[0], new_shape[1], new_shape[2]);

            if section.needs_reslice_after {
                let target = planned
                    .sectionize
                    .sections
                    .get(section_idx + 1)
                    .map(|next| next.pattern.slicing_dim())
                    .unwrap_or(slicing_dim);
                let moved = std::mem::replace(chunk, placeholder_chunk());
                *chunk = reslice::reslice(self.comm, moved, target, &self.reslice_mode).await?;
            }

            executed += 1;
        }

        Ok(executed)
    }

    /// Builds one wrapper per section method, inserting a runner-owned
    /// intermediate writer after the section's last method when its result
    /// must be persisted (SPEC_FULL.md §4.8 step 3).
    fn build_section_wrappers(
        &self,
        planned: &PlannedPipeline,
        section: &crate::sectionizer::Section,
        section_idx: usize,
        n_sections: usize,
        chunk_len_on_slicing_dim: usize,
        chunk_axis1_len: usize,
        save_all: bool,
    ) -> Result<Vec<(usize, MethodWrapper)>> {
        let mut wrappers = Vec::with_capacity(section.method_ids.len() + 1);

        for &id in &section.method_ids {
            let stage = planned.bound[id].clone();
            let info = planned.infos[id];
            let kind = planned.kinds[id];
            let wrapper = wrapper::build(
                kind,
                WrapperBuildInput {
                    id,
                    stage,
                    info,
                    chunk_len_on_slicing_dim,
                    chunk_axis1_len,
                    prev_identity: None,
                    intermediate_dir: self.ctx.run_out_dir.clone(),
                },
            )?;
            wrappers.push((id, wrapper));
        }

        if let Some(&last_id) = section.method_ids.last() {
            let explicit_save = planned.bound[last_id].save_result() || save_all;
            let implied_by_next_glob_stats = if section_idx + 1 < n_sections {
                planned
                    .sectionize
                    .sections
                    .get(section_idx + 1)
                    .and_then(|next| next.method_ids.first())
                    .map(|&fid| planned.bound[fid].spec.glob_stats())
                    .unwrap_or(false)
            } else {
                false
            };

            if explicit_save || implied_by_next_glob_stats {
                let last_stage = &planned.bound[last_id];
                let last_kind = planned.kinds[last_id];
                let recon_algorithm = (last_kind == WrapperKind::Reconstruction).then(|| last_stage.spec.method.clone());
                let identity = PrevMethodIdentity {
                    task_id: last_id,
                    package_name: last_stage.spec.module.clone(),
                    method_name: last_stage.spec.method.clone(),
                    recon_algorithm,
                };
                let iw = wrapper::build(
                    WrapperKind::IntermediateWriter,
                    WrapperBuildInput {
                        id: last_id,
                        stage: last_stage.clone(),
                        info: planned.infos[last_id],
                        chunk_len_on_slicing_dim,
                        chunk_axis1_len,
                        prev_identity: Some(identity),
                        intermediate_dir: self.ctx.run_out_dir.clone(),
                    },
                )?;
                wrappers.push((last_id, iw));
            }
        }

        Ok(wrappers)
    }
}

/// Reads the loader's declared slicing pattern from its `pattern` parameter,
/// defaulting to `Projection` when absent (SPEC_FULL.md §3/§4.8: the loader
/// itself carries no registry entry, only a pipeline-document binding).
fn loader_pattern(loader: &LoaderSpec) -> Pattern {
    match loader.params.get("pattern").and_then(|v| v.as_str()) {
        Some("sinogram") => Pattern::Sinogram,
        Some("all") => Pattern::All,
        _ => Pattern::Projection,
    }
}

fn build_descriptors(bound: &[BoundStage], kinds: &[WrapperKind], save_all: bool) -> Vec<MethodDescriptor> {
    bound
        .iter()
        .enumerate()
        .map(|(id, stage)| {
            let is_rotation = kinds[id] == WrapperKind::Rotation;
            let references = if kinds[id] == WrapperKind::Reconstruction && stage.spec.params.get("center").is_none() {
                (0..id)
                    .rev()
                    .find(|&j| kinds[j] == WrapperKind::Rotation)
                    .map(|j| vec![j])
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            MethodDescriptor {
                id,
                pattern: stage.pattern,
                placement: stage.placement,
                save_result: stage.save_result() || save_all,
                is_rotation,
                references,
            }
        })
        .collect()
}

fn non_slice_shape(shape: (usize, usize, usize), slicing_dim: usize) -> (usize, usize) {
    match slicing_dim {
        0 => (shape.1, shape.2),
        1 => (shape.0, shape.2),
        2 => (shape.0, shape.1),
        _ => unreachable!(),
    }
}

fn dim_of(shape: (usize, usize, usize), dim: usize) -> usize {
    match dim {
        0 => shape.0,
        1 => shape.1,
        2 => shape.2,
        _ => unreachable!(),
    }
}

/// A zero-sized stand-in used only for the instant between taking ownership
/// of `chunk` for a reslice and writing the resliced chunk back; never
/// observed by any wrapper.
fn placeholder_chunk() -> Chunk {
    Chunk::new(
        GlobalShape(0, 0, 0),
        0,
        0,
        ndarray::Array3::zeros((0, 0, 0)),
        AuxArrays::new(
            ndarray::Array3::zeros((0, 0, 0)),
            ndarray::Array3::zeros((0, 0, 0)),
            ndarray::Array1::zeros(0),
        ),
    )
}
