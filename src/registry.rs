//! Method Registry (SPEC_FULL.md §4.1): resolves a `(module, name)` identifier
//! to its declared attributes and to the wrapper variant that should run it.

use crate::error::{EngineError, Result};
use crate::pattern::{Pattern, Placement};

/// `(peak_bytes_per_slice, subtract_bytes)` for a given non-slice shape and dtype.
pub type MemoryEstimator = fn(non_slice_shape: (usize, usize), dtype_bytes: usize) -> (usize, usize);

/// `non_slice_shape -> non_slice_shape'`, for methods that change output dims.
pub type OutputShapeEstimator = fn(non_slice_shape: (usize, usize)) -> (usize, usize);

/// Static attributes of a method, as declared by its (out-of-scope) implementation.
#[derive(Clone, Copy)]
pub struct MethodInfo {
    pub module: &'static str,
    pub name: &'static str,
    pub pattern: Pattern,
    pub placement: Placement,
    pub changes_output_dims: bool,
    pub save_by_default: bool,
    pub swap_output_axes_01: bool,
    pub predict_memory: Option<MemoryEstimator>,
    pub predict_output_shape: Option<OutputShapeEstimator>,
}

/// The wrapper variant selected for a method, a pure function of
/// `(module_suffix, method_name)` (SPEC_FULL.md §4.1 / §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    Generic,
    Reconstruction,
    Rotation,
    Dezinging,
    ImageWriter,
    IntermediateWriter,
    DataReducer,
}

/// Decides the wrapper variant for a method from its module path and name.
/// At most one rule may match; `save_intermediate_data` is reserved for the
/// runner-inserted intermediate writer and is rejected if a user pipeline
/// names it directly (it is not a selectable method, per SPEC_FULL.md §10.5).
pub fn select_wrapper_kind(module: &str, method: &str) -> Result<WrapperKind> {
    let is_algorithm = module.ends_with(".algorithm");
    let is_rotation = module.ends_with(".rotation");
    let is_images = module.ends_with(".images");
    let is_dezinging = method == "remove_outlier3d";
    let is_intermediate = method == "save_intermediate_data";
    let is_datareducer = method == "bin_mean" || method == "crop";

    let matches: Vec<WrapperKind> = [
        is_algorithm.then_some(WrapperKind::Reconstruction),
        is_rotation.then_some(WrapperKind::Rotation),
        is_dezinging.then_some(WrapperKind::Dezinging),
        is_images.then_some(WrapperKind::ImageWriter),
        is_intermediate.then_some(WrapperKind::IntermediateWriter),
        is_datareducer.then_some(WrapperKind::DataReducer),
    ]
    .into_iter()
    .flatten()
    .collect();

    match matches.len() {
        0 => Ok(WrapperKind::Generic),
        1 => Ok(matches[0]),
        _ => Err(EngineError::configuration(
            format!("{module}.{method}"),
            format!("ambiguous wrapper variant selection: {matches:?} all match"),
        )),
    }
}

/// A small, static table of known methods. In a production build this table
/// would be populated from the method implementations' own declarations (the
/// out-of-scope collaborator of SPEC_FULL.md §1); here it is backed by this
/// crate's reference method library (§10.5).
pub struct MethodRegistry {
    methods: &'static [MethodInfo],
}

impl MethodRegistry {
    pub const fn new(methods: &'static [MethodInfo]) -> Self {
        Self { methods }
    }

    pub fn query(&self, module: &str, name: &str) -> Result<MethodInfo> {
        self.methods
            .iter()
            .copied()
            .find(|m| m.module == module && m.name == name)
            .ok_or_else(|| {
                EngineError::configuration(format!("{module}.{name}"), "unknown method")
            })
    }
}

fn normalize_memory(non_slice_shape: (usize, usize), dtype_bytes: usize) -> (usize, usize) {
    // Input plus output buffer, both the size of one projection.
    (2 * non_slice_shape.0 * non_slice_shape.1 * dtype_bytes, 0)
}

fn recon_output_shape(non_slice_shape: (usize, usize)) -> (usize, usize) {
    // A square reconstructed slice sized to the detector width carried on the
    // non-slicing axis that held it before reconstruction.
    (non_slice_shape.1, non_slice_shape.1)
}

fn bin_mean_output_shape(non_slice_shape: (usize, usize)) -> (usize, usize) {
    (non_slice_shape.0 / 2, non_slice_shape.1)
}

/// Known reference methods (SPEC_FULL.md §10.5), declared with the attributes
/// their out-of-scope implementations would normally publish. Memory/shape
/// estimators here are illustrative placeholders for the planner
/// (`src/memory.rs`), not a claim about the reference methods' real
/// footprint; a production build would source these from the method
/// implementations themselves.
pub const REFERENCE_METHODS: &[MethodInfo] = &[
    MethodInfo {
        module: "httomolibgpu.prep.normalize",
        name: "normalize",
        pattern: Pattern::Projection,
        placement: Placement::Device,
        changes_output_dims: false,
        save_by_default: false,
        swap_output_axes_01: false,
        predict_memory: Some(normalize_memory),
        predict_output_shape: None,
    },
    MethodInfo {
        module: "httomolibgpu.prep.normalize",
        name: "minus_log",
        pattern: Pattern::Projection,
        placement: Placement::Device,
        changes_output_dims: false,
        save_by_default: false,
        swap_output_axes_01: false,
        predict_memory: None,
        predict_output_shape: None,
    },
    MethodInfo {
        module: "httomolibgpu.misc.corr",
        name: "remove_outlier3d",
        pattern: Pattern::Projection,
        placement: Placement::Host,
        changes_output_dims: false,
        save_by_default: false,
        swap_output_axes_01: false,
        predict_memory: None,
        predict_output_shape: None,
    },
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
    },
    MethodInfo {
        module: "tomopy.recon.algorithm",
        name: "recon_simple",
        pattern: Pattern::Sinogram,
        placement: Placement::Device,
        changes_output_dims: true,
        save_by_default: true,
        swap_output_axes_01: false,
        predict_memory: None,
        predict_output_shape: Some(recon_output_shape),
    },
    MethodInfo {
        module: "httomolibgpu.misc.morph",
        name: "bin_mean",
        pattern: Pattern::Projection,
        placement: Placement::Host,
        changes_output_dims: true,
        save_by_default: false,
        swap_output_axes_01: false,
        predict_memory: None,
        predict_output_shape: Some(bin_mean_output_shape),
    },
    MethodInfo {
        module: "httomolibgpu.misc.images",
        name: "save_to_images",
        pattern: Pattern::All,
        placement: Placement::Host,
        changes_output_dims: false,
        save_by_default: false,
        swap_output_axes_01: false,
        predict_memory: None,
        predict_output_shape: None,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_table_resolves_every_declared_method() {
        let registry = MethodRegistry::new(REFERENCE_METHODS);
        for info in REFERENCE_METHODS {
            assert!(registry.query(info.module, info.name).is_ok());
        }
    }

    #[test]
    fn reconstruction_suffix_selects_reconstruction() {
        assert_eq!(
            select_wrapper_kind("tomopy.recon.algorithm", "recon_simple").unwrap(),
            WrapperKind::Reconstruction
        );
    }

    #[test]
    fn rotation_suffix_selects_rotation() {
        assert_eq!(
            select_wrapper_kind("tomopy.recon.rotation", "find_center_360").unwrap(),
            WrapperKind::Rotation
        );
    }

    #[test]
    fn remove_outlier3d_selects_dezinging_regardless_of_module() {
        assert_eq!(
            select_wrapper_kind("httomolibgpu.misc.corr", "remove_outlier3d").unwrap(),
            WrapperKind::Dezinging
        );
    }

    #[test]
    fn unrecognized_method_selects_generic() {
        assert_eq!(
            select_wrapper_kind("httomolibgpu.prep.normalize", "normalize").unwrap(),
            WrapperKind::Generic
        );
    }

    #[test]
    fn unknown_method_lookup_is_a_configuration_error() {
        let registry = MethodRegistry::new(&[]);
        let err = registry.query("httomolibgpu.prep.normalize", "normalize");
        assert!(err.is_err());
    }
}
