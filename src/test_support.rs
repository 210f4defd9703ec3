//! Test-only fakes shared across unit test modules. Not part of the public
//! API; gated entirely behind `#[cfg(test)]`.

use crate::comm::Communicator;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use ndarray::{Array2, Array3};
use std::sync::Mutex;

/// A fake multi-rank `Communicator`, the equivalent of the original suite's
/// `comm.size = 2` mocks (`test_rotation.py`), for exercising collective call
/// sites at `world_size > 1` without a real transport. `all_to_all` and
/// `gather_to_root` record what this rank sent so a test can assert on the
/// per-peer values a caller computed; `gather_to_root` replays a canned
/// multi-piece result on rank 0 instead of a real cross-process gather.
pub(crate) struct FakeMultiRankCommunicator {
    rank: usize,
    world_size: usize,
    pub last_all_to_all_send: Mutex<Option<Vec<Array3<f32>>>>,
    pub last_gather_send: Mutex<Option<Array2<f32>>>,
    gathered_on_root: Option<Vec<Array2<f32>>>,
}

impl FakeMultiRankCommunicator {
    pub fn new(rank: usize, world_size: usize) -> Self {
        Self {
            rank,
            world_size,
            last_all_to_all_send: Mutex::new(None),
            last_gather_send: Mutex::new(None),
            gathered_on_root: None,
        }
    }

    /// Sets the pieces rank 0 sees from `gather_to_root`, standing in for
    /// what `world_size - 1` peers would otherwise have sent.
    pub fn with_gathered_on_root(mut self, pieces: Vec<Array2<f32>>) -> Self {
        self.gathered_on_root = Some(pieces);
        self
    }
}

#[async_trait]
impl Communicator for FakeMultiRankCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn all_to_all(&self, send: Vec<Array3<f32>>) -> Result<Vec<Array3<f32>>> {
        *self.last_all_to_all_send.lock().unwrap() = Some(send.clone());
        Ok(send)
    }

    async fn gather_to_root(&self, value: Array2<f32>) -> Result<Option<Vec<Array2<f32>>>> {
        *self.last_gather_send.lock().unwrap() = Some(value.clone());
        if self.rank != 0 {
            return Ok(None);
        }
        Ok(Some(self.gathered_on_root.clone().unwrap_or_else(|| vec![value])))
    }

    async fn broadcast(&self, value: Option<f64>) -> Result<f64> {
        value.ok_or_else(|| EngineError::internal("fake multi-rank broadcast called on a non-root rank with no value"))
    }

    async fn barrier(&self) {}
}
