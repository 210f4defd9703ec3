//! Slicing pattern and host/device placement, shared by the registry, dataset
//! model, and sectionizer.

use serde::Deserialize;

/// The axis a method requires its input to be sliced along.
///
/// Assuming 3D projection data axes `(rotation angle, detector-y, detector-x)`:
/// `Projection` slices on detector-y (axis 1), `Sinogram` on detector-x (axis 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    Projection,
    Sinogram,
    All,
}

impl Pattern {
    /// Two patterns can coexist in the same section if either is `All` or they
    /// are equal.
    pub fn compatible_with(self, other: Pattern) -> bool {
        self == Pattern::All || other == Pattern::All || self == other
    }

    /// The data axis this pattern requires slicing along. `All` has no
    /// intrinsic slicing dimension; by convention it behaves as `Projection`
    /// wherever a concrete dimension is needed before finalization resolves it.
    pub fn slicing_dim(self) -> usize {
        match self {
            Pattern::Projection => 1,
            Pattern::Sinogram => 2,
            Pattern::All => 1,
        }
    }
}

/// Where a data buffer currently lives. Carried as part of the buffer's type
/// rather than as a separate out-of-band flag (SPEC_FULL.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Host,
    Device,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_compatible_with_everything() {
        assert!(Pattern::All.compatible_with(Pattern::Projection));
        assert!(Pattern::Sinogram.compatible_with(Pattern::All));
        assert!(Pattern::All.compatible_with(Pattern::All));
    }

    #[test]
    fn mismatched_concrete_patterns_are_incompatible() {
        assert!(!Pattern::Projection.compatible_with(Pattern::Sinogram));
    }

    #[test]
    fn slicing_dims_match_documented_axis_layout() {
        assert_eq!(Pattern::Projection.slicing_dim(), 1);
        assert_eq!(Pattern::Sinogram.slicing_dim(), 2);
    }
}
