//! Read-only auxiliary arrays (`darks`, `flats`, `angles`) with a lazy
//! per-placement cache and a lock gate, per SPEC_FULL.md §3/§4.2/§9.
//!
//! Grounded on `original_source/httomo/runner/dataset.py`'s
//! `_transfer_if_needed`/`lock`/`unlock` and `is_locked` properties.

use crate::error::{EngineError, Result};
use crate::pattern::Placement;
use ndarray::{Array1, Array3};

pub struct AuxArrays {
    darks_host: Array3<f32>,
    flats_host: Array3<f32>,
    angles: Array1<f32>,
    darks_device: Option<Array3<f32>>,
    flats_device: Option<Array3<f32>>,
    /// A host write (only possible while unlocked) invalidates the device
    /// cache; a device transfer rebuilds it lazily on next access.
    device_cache_dirty: bool,
    locked: bool,
}

impl AuxArrays {
    pub fn new(darks: Array3<f32>, flats: Array3<f32>, angles: Array1<f32>) -> Self {
        Self {
            darks_host: darks,
            flats_host: flats,
            angles,
            darks_device: None,
            flats_device: None,
            device_cache_dirty: true,
            locked: true,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Angles are always host-resident (SPEC_FULL.md §4.2).
    pub fn angles(&self) -> &Array1<f32> {
        &self.angles
    }

    /// A working copy of the angle vector truncated to `len`, for
    /// reconstruction wrappers whose block has fewer projections than the
    /// base angle count (SPEC_FULL.md §4.3 "Reconstruction"). Never mutates
    /// the base array.
    pub fn angles_truncated(&self, len: usize) -> Array1<f32> {
        if len >= self.angles.len() {
            self.angles.clone()
        } else {
            self.angles.slice(ndarray::s![..len]).to_owned()
        }
    }

    pub fn darks(&mut self, placement: Placement) -> &Array3<f32> {
        match placement {
            Placement::Host => &self.darks_host,
            Placement::Device => {
                self.refresh_device_cache();
                self.darks_device.as_ref().expect("populated above")
            }
        }
    }

    pub fn flats(&mut self, placement: Placement) -> &Array3<f32> {
        match placement {
            Placement::Host => &self.flats_host,
            Placement::Device => {
                self.refresh_device_cache();
                self.flats_device.as_ref().expect("populated above")
            }
        }
    }

    fn refresh_device_cache(&mut self) {
        if self.device_cache_dirty || self.darks_device.is_none() {
            self.darks_device = Some(self.darks_host.clone());
            self.flats_device = Some(self.flats_host.clone());
            self.device_cache_dirty = false;
        }
    }

    /// Called when the owning chunk transfers to a device: the cache is
    /// marked dirty so the next access rebuilds it from the (possibly just
    /// mutated) host copy.
    pub fn note_device_bound(&mut self, _device_id: u32) {
        self.device_cache_dirty = true;
    }

    /// Dezinging is the only wrapper permitted to mutate aux arrays, and only
    /// while explicitly unlocked (SPEC_FULL.md §3/§4.3).
    pub fn set_darks(&mut self, darks: Array3<f32>) -> Result<()> {
        if self.locked {
            return Err(EngineError::internal(
                "attempted to write darks while aux arrays are locked",
            ));
        }
        self.darks_host = darks;
        self.device_cache_dirty = true;
        Ok(())
    }

    pub fn set_flats(&mut self, flats: Array3<f32>) -> Result<()> {
        if self.locked {
            return Err(EngineError::internal(
                "attempted to write flats while aux arrays are locked",
            ));
        }
        self.flats_host = flats;
        self.device_cache_dirty = true;
        Ok(())
    }

    pub fn nbytes_darks_flats(&self) -> usize {
        (self.darks_host.len() + self.flats_host.len()) * std::mem::size_of::<f32>()
    }
}
