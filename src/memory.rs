//! Memory Planner (SPEC_FULL.md §4.6).
//!
//! Grounded on `original_source/httomo/task_runner.py`'s
//! `_get_available_gpu_memory`/`_update_max_slices`, including the special
//! case of subtracting darks/flats residency for methods that normalize
//! against them.

use crate::error::{EngineError, Result};
use crate::pattern::Placement;
use crate::registry::{MemoryEstimator, OutputShapeEstimator};

/// Stands in for a CUDA/ROCm free-memory query; no GPU runtime crate exists
/// in this project's dependency stack (SPEC_FULL.md §4.6), so this is a
/// trait with a constant-value test double shipped.
pub trait DeviceMemoryInfo: Send + Sync {
    fn free_bytes(&self, device_id: u32) -> usize;
}

pub struct ConstantDeviceMemory(pub usize);

impl DeviceMemoryInfo for ConstantDeviceMemory {
    fn free_bytes(&self, _device_id: u32) -> usize {
        self.0
    }
}

/// A section's worth of per-method memory behavior, collapsed from the
/// Method Registry's `MethodInfo` down to just what the planner needs.
#[derive(Clone, Copy)]
pub struct MethodMemorySpec {
    pub predict_memory: Option<MemoryEstimator>,
    pub predict_output_shape: Option<OutputShapeEstimator>,
    /// True for methods (like `normalize`) that read darks/flats and so keep
    /// them resident for the section's duration.
    pub normalizes_with_aux: bool,
}

pub struct PlanInput<'a> {
    pub placement: Placement,
    pub chunk_len: usize,
    pub non_slice_shape: (usize, usize),
    pub dtype_bytes: usize,
    pub methods: &'a [MethodMemorySpec],
    pub configured_cpu_cap: usize,
    pub safety_margin: f64,
    pub aux_nbytes: usize,
    pub device_free_bytes: usize,
}

/// Derives a section's `max_slices`, per SPEC_FULL.md §4.6.
pub fn plan_section(input: &PlanInput) -> Result<usize> {
    let max_slices = match input.placement {
        Placement::Host => input.configured_cpu_cap.min(input.chunk_len),
        Placement::Device => plan_device_section(input)?,
    };

    if max_slices == 0 {
        return Err(EngineError::plan(
            "section",
            "planning yielded zero slices per block",
        ));
    }
    Ok(max_slices)
}

fn plan_device_section(input: &PlanInput) -> Result<usize> {
    let mut avail = (input.device_free_bytes as f64 * (1.0 - input.safety_margin)) as i64;
    if input.methods.iter().any(|m| m.normalizes_with_aux) {
        avail -= input.aux_nbytes as i64;
    }

    let mut shape = input.non_slice_shape;
    let mut max_slices = input.chunk_len;

    for method in input.methods {
        if let Some(estimator) = method.predict_memory {
            let (peak_per_slice, subtract) = estimator(shape, input.dtype_bytes);
            let remaining = avail - subtract as i64;
            if remaining <= 0 || peak_per_slice == 0 {
                return Err(EngineError::plan(
                    "section",
                    "per-slice memory exceeds budget at plan time",
                ));
            }
            let method_slices = remaining as usize / peak_per_slice;
            max_slices = max_slices.min(method_slices);
        }
        if let Some(shape_estimator) = method.predict_output_shape {
            shape = shape_estimator(shape);
        }
    }

    Ok(max_slices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_section_uses_the_configured_cpu_cap() {
        let input = PlanInput {
            placement: Placement::Host,
            chunk_len: 1000,
            non_slice_shape: (128, 160),
            dtype_bytes: 4,
            methods: &[],
            configured_cpu_cap: 32,
            safety_margin: 0.1,
            aux_nbytes: 0,
            device_free_bytes: 0,
        };
        assert_eq!(plan_section(&input).unwrap(), 32);
    }

    #[test]
    fn host_section_respects_a_small_chunk() {
        let input = PlanInput {
            placement: Placement::Host,
            chunk_len: 5,
            non_slice_shape: (128, 160),
            dtype_bytes: 4,
            methods: &[],
            configured_cpu_cap: 32,
            safety_margin: 0.1,
            aux_nbytes: 0,
            device_free_bytes: 0,
        };
        assert_eq!(plan_section(&input).unwrap(), 5);
    }

    // SPEC_FULL.md §8 scenario 6: both the chunk limit and the memory limit
    // are exercised across two test cases.
    #[test]
    fn scenario_6_memory_limit_binds_when_tighter_than_chunk_len() {
        fn estimator(_shape: (usize, usize), dtype_bytes: usize) -> (usize, usize) {
            (1000 * dtype_bytes, 2000) // B = 4000 bytes/slice, S = 2000
        }
        let input = PlanInput {
            placement: Placement::Device,
            chunk_len: 1000,
            non_slice_shape: (10, 10),
            dtype_bytes: 4,
            methods: &[MethodMemorySpec {
                predict_memory: Some(estimator),
                predict_output_shape: None,
                normalizes_with_aux: false,
            }],
            configured_cpu_cap: 0,
            safety_margin: 0.0,
            aux_nbytes: 0,
            device_free_bytes: 42_000, // A = 42000
        };
        // max_slices = floor((42000 - 2000) / 4000) = 10
        assert_eq!(plan_section(&input).unwrap(), 10);
    }

    #[test]
    fn scenario_6_chunk_limit_binds_when_tighter_than_memory() {
        fn estimator(_shape: (usize, usize), dtype_bytes: usize) -> (usize, usize) {
            (10 * dtype_bytes, 0)
        }
        let input = PlanInput {
            placement: Placement::Device,
            chunk_len: 3,
            non_slice_shape: (10, 10),
            dtype_bytes: 4,
            methods: &[MethodMemorySpec {
                predict_memory: Some(estimator),
                predict_output_shape: None,
                normalizes_with_aux: false,
            }],
            configured_cpu_cap: 0,
            safety_margin: 0.0,
            aux_nbytes: 0,
            device_free_bytes: 10_000_000,
        };
        assert_eq!(plan_section(&input).unwrap(), 3);
    }

    #[test]
    fn normalize_subtracts_aux_residency_once() {
        fn estimator(_shape: (usize, usize), dtype_bytes: usize) -> (usize, usize) {
            (100 * dtype_bytes, 0)
        }
        let input = PlanInput {
            placement: Placement::Device,
            chunk_len: 1000,
            non_slice_shape: (10, 10),
            dtype_bytes: 4,
            methods: &[MethodMemorySpec {
                predict_memory: Some(estimator),
                predict_output_shape: None,
                normalizes_with_aux: true,
            }],
            configured_cpu_cap: 0,
            safety_margin: 0.0,
            aux_nbytes: 100_000,
            device_free_bytes: 500_000,
        };
        // avail = 500000 - 100000 = 400000; max_slices = 400000 / 400 = 1000, capped by chunk_len
        assert_eq!(plan_section(&input).unwrap(), 1000);
    }

    #[test]
    fn zero_or_negative_plan_is_an_out_of_memory_error() {
        fn estimator(_shape: (usize, usize), _dtype_bytes: usize) -> (usize, usize) {
            (1, 1_000_000)
        }
        let input = PlanInput {
            placement: Placement::Device,
            chunk_len: 1000,
            non_slice_shape: (10, 10),
            dtype_bytes: 4,
            methods: &[MethodMemorySpec {
                predict_memory: Some(estimator),
                predict_output_shape: None,
                normalizes_with_aux: false,
            }],
            configured_cpu_cap: 0,
            safety_margin: 0.0,
            aux_nbytes: 0,
            device_free_bytes: 1000,
        };
        assert!(plan_section(&input).is_err());
    }
}
