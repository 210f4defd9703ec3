//! Communicator (SPEC_FULL.md §10.4): the abstraction standing in for the
//! SPMD process group a reslice or rotation-centering collective runs
//! against. No `mpi` crate exists anywhere in this project's dependency
//! stack, so collectives are expressed against this trait, with a
//! single-process implementation shipped; a real multi-process transport is
//! a pluggable implementation of the same trait.

use crate::error::Result;
use async_trait::async_trait;
use ndarray::Array3;

#[async_trait]
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    /// Reslicer in-memory mode (SPEC_FULL.md §4.7): each process's local
    /// re-sliced pieces, one per peer, are exchanged so that `result[i]` is
    /// what peer `i` sent this process.
    async fn all_to_all(&self, send: Vec<Array3<f32>>) -> Result<Vec<Array3<f32>>>;

    /// Rotation-centering gather (SPEC_FULL.md §4.3): gathers one 2D slice
    /// per process to rank 0. Returns `Some(_)` only on rank 0.
    async fn gather_to_root(&self, value: ndarray::Array2<f32>) -> Result<Option<Vec<ndarray::Array2<f32>>>>;

    /// Broadcasts a value computed on rank 0 to every process.
    async fn broadcast(&self, value: Option<f64>) -> Result<f64>;

    async fn barrier(&self);
}

/// The shipped `Communicator`: a single rank, where every collective is an
/// identity or pass-through. This is what every test in this crate runs
/// against; a genuine multi-process deployment plugs in a different
/// `Communicator` at this same seam.
pub struct SingleProcessCommunicator;

#[async_trait]
impl Communicator for SingleProcessCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    async fn all_to_all(&self, send: Vec<Array3<f32>>) -> Result<Vec<Array3<f32>>> {
        Ok(send)
    }

    async fn gather_to_root(&self, value: ndarray::Array2<f32>) -> Result<Option<Vec<ndarray::Array2<f32>>>> {
        Ok(Some(vec![value]))
    }

    async fn broadcast(&self, value: Option<f64>) -> Result<f64> {
        value.ok_or_else(|| crate::error::EngineError::internal("broadcast with no value on the only rank"))
    }

    async fn barrier(&self) {}
}

/// Prints on rank 0 only, mirroring `original_source/httomo/utils.py`'s
/// `print_once` rank-gating idiom, reimplemented against `tracing` instead of
/// bare `print`.
pub fn log_once(comm: &dyn Communicator, message: &str) {
    if comm.rank() == 0 {
        tracing::info!("{message}");
    }
}
