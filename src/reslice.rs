//! Reslicer (SPEC_FULL.md §4.7).
//!
//! Grounded on `original_source/httomo/task_runner.py`'s `_perform_reslice`
//! (in-memory vs file-backed modes), expressed against `crate::comm::Communicator`
//! rather than a literal MPI binding (see `src/comm.rs`).

use crate::comm::Communicator;
use crate::dataset::{Chunk, GlobalShape};
use crate::error::{EngineError, Phase, Result};
use ndarray::{Array3, Axis};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

pub enum ResliceMode {
    InMemory,
    FileBacked { staging_dir: PathBuf },
}

/// Redistributes `chunk`, currently split along `chunk.split_dim`, so the
/// returned chunk is split along `target_dim` instead. Leaves aux arrays
/// untouched and keeps data on host (SPEC_FULL.md §4.7).
pub async fn reslice(
    comm: &dyn Communicator,
    mut chunk: Chunk,
    target_dim: usize,
    mode: &ResliceMode,
) -> Result<Chunk> {
    chunk.to_host();
    let src_dim = chunk.split_dim;
    if src_dim == target_dim {
        return Ok(chunk);
    }

    let global_shape = chunk.global_shape;
    let world_size = comm.world_size();
    let rank = comm.rank();

    let new_data = match mode {
        ResliceMode::InMemory => reslice_in_memory(comm, global_shape, chunk.data(), src_dim, target_dim).await?,
        ResliceMode::FileBacked { staging_dir } => {
            reslice_file_backed(comm, staging_dir, global_shape, chunk.data(), chunk.chunk_start, src_dim, target_dim)
                .await?
        }
    };

    let (new_start, new_len) = global_shape.chunk_bounds(target_dim, rank, world_size);
    if new_data.shape()[target_dim] != new_len {
        return Err(EngineError::internal(format!(
            "reslice produced a chunk of length {} on dim {target_dim}, expected {new_len}",
            new_data.shape()[target_dim]
        )));
    }

    let (_, _, aux) = chunk.into_parts();
    Ok(Chunk::new(global_shape, target_dim, new_start, new_data, aux))
}

async fn reslice_in_memory(
    comm: &dyn Communicator,
    global_shape: GlobalShape,
    data: &Array3<f32>,
    src_dim: usize,
    target_dim: usize,
) -> Result<Array3<f32>> {
    let world_size = comm.world_size();

    let mut send = Vec::with_capacity(world_size);
    for peer in 0..world_size {
        let (t_start, t_len) = global_shape.chunk_bounds(target_dim, peer, world_size);
        send.push(slice_axis_owned(data, target_dim, t_start, t_len));
    }

    let received = comm.all_to_all(send).await?;
    concat_along(&received, src_dim)
}

async fn reslice_file_backed(
    comm: &dyn Communicator,
    staging_dir: &std::path::Path,
    global_shape: GlobalShape,
    data: &Array3<f32>,
    chunk_start: usize,
    src_dim: usize,
    target_dim: usize,
) -> Result<Array3<f32>> {
    let path = staging_dir.join("reslice_staging.bin");
    let total_elements = global_shape.0 * global_shape.1 * global_shape.2;

    {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(&path)
            .map_err(|e| EngineError::io("reslice_staging_open", e))?;
        file.set_len((total_elements * std::mem::size_of::<f32>()) as u64)
            .map_err(|e| EngineError::io("reslice_staging_truncate", e))?;
        write_global_region(&mut file, global_shape, src_dim, chunk_start, data)?;
    }

    comm.barrier().await;

    let (new_start, new_len) = global_shape.chunk_bounds(target_dim, comm.rank(), comm.world_size());
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(&path)
        .map_err(|e| EngineError::io("reslice_staging_reopen", e))?;
    read_global_region(&mut file, global_shape, target_dim, new_start, new_len)
}

fn slice_axis_owned(data: &Array3<f32>, dim: usize, start: usize, len: usize) -> Array3<f32> {
    data.slice_axis(Axis(dim), ndarray::Slice::from(start..start + len))
        .to_owned()
}

/// Concatenates one piece per peer along `dim`, in rank order. Peers are
/// assumed to own disjoint, increasing contiguous ranges on `dim` (the
/// standard chunk split of SPEC_FULL.md §3), so rank order already sorts them.
fn concat_along(pieces: &[Array3<f32>], dim: usize) -> Result<Array3<f32>> {
    if pieces.len() == 1 {
        return Ok(pieces[0].clone());
    }
    let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
    ndarray::concatenate(Axis(dim), &views)
        .map_err(|e| EngineError::internal(format!("reslice concatenation failed: {e}")))
}

/// Writes `data` (a contiguous range `[start, start+len)` along `dim` of the
/// global array) into its row-major position in `file`. Implemented as a
/// per-element seek+write for simplicity; this crate's scope is correctness
/// of the reslice contract, not I/O throughput.
fn write_global_region(
    file: &mut std::fs::File,
    global_shape: GlobalShape,
    dim: usize,
    start: usize,
    data: &Array3<f32>,
) -> Result<()> {
    for ((i0, i1, i2), &value) in data.indexed_iter() {
        let (g0, g1, g2) = local_to_global(dim, start, i0, i1, i2);
        let offset = flat_offset(global_shape, g0, g1, g2);
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| EngineError::io("reslice_staging_seek", e))?;
        file.write_all(&value.to_le_bytes())
            .map_err(|e| EngineError::io("reslice_staging_write", e))?;
    }
    Ok(())
}

fn read_global_region(
    file: &mut std::fs::File,
    global_shape: GlobalShape,
    dim: usize,
    start: usize,
    len: usize,
) -> Result<Array3<f32>> {
    let mut shape = [global_shape.0, global_shape.1, global_shape.2];
    shape[dim] = len;
    let mut out = Array3::zeros((shape[0], shape[1], shape[2]));
    for i0 in 0..shape[0] {
        for i1 in 0..shape[1] {
            for i2 in 0..shape[2] {
                let (g0, g1, g2) = local_to_global(dim, start, i0, i1, i2);
                let offset = flat_offset(global_shape, g0, g1, g2);
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| EngineError::io("reslice_staging_seek", e))?;
                let mut buf = [0u8; 4];
                file.read_exact(&mut buf)
                    .map_err(|e| EngineError::io("reslice_staging_read", e))?;
                out[(i0, i1, i2)] = f32::from_le_bytes(buf);
            }
        }
    }
    Ok(out)
}

fn local_to_global(dim: usize, start: usize, i0: usize, i1: usize, i2: usize) -> (usize, usize, usize) {
    match dim {
        0 => (start + i0, i1, i2),
        1 => (i0, start + i1, i2),
        2 => (i0, i1, start + i2),
        _ => unreachable!(),
    }
}

fn flat_offset(global_shape: GlobalShape, g0: usize, g1: usize, g2: usize) -> u64 {
    (((g0 * global_shape.1 + g1) * global_shape.2 + g2) * std::mem::size_of::<f32>()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcessCommunicator;
    use crate::dataset::AuxArrays;
    use ndarray::Array1;

    fn test_chunk(shape: (usize, usize, usize), split_dim: usize) -> Chunk {
        let mut data = Array3::zeros(shape);
        for ((i0, i1, i2), v) in data.indexed_iter_mut() {
            *v = (i0 * 1000 + i1 * 10 + i2) as f32;
        }
        let aux = AuxArrays::new(
            Array3::zeros((2, shape.1, shape.2)),
            Array3::from_elem((2, shape.1, shape.2), 1.0),
            Array1::linspace(0.0, std::f32::consts::PI, shape.0),
        );
        Chunk::new(GlobalShape(shape.0, shape.1, shape.2), split_dim, 0, data, aux)
    }

    #[tokio::test]
    async fn single_process_reslice_is_a_metadata_only_relabeling() {
        let comm = SingleProcessCommunicator;
        let chunk = test_chunk((8, 4, 4), 0);
        let original = chunk.data().clone();
        let reslice_d = reslice(&comm, chunk, 1, &ResliceMode::InMemory).await.unwrap();
        assert_eq!(reslice_d.split_dim, 1);
        assert_eq!(reslice_d.data(), &original);
    }

    #[tokio::test]
    async fn reslice_is_an_involution_in_memory() {
        let comm = SingleProcessCommunicator;
        let chunk = test_chunk((8, 4, 4), 0);
        let original = chunk.data().clone();
        let resliced = reslice(&comm, chunk, 1, &ResliceMode::InMemory).await.unwrap();
        let back = reslice(&comm, resliced, 0, &ResliceMode::InMemory).await.unwrap();
        assert_eq!(back.data(), &original);
        assert_eq!(back.split_dim, 0);
    }

    /// SPEC_FULL.md §8 scenario 2 / "rotation gather correctness...regardless
    /// of chunk split": at `world_size = 2`, `reslice_in_memory` must compute
    /// each peer's slice from the *global* target-dim bounds, not just split
    /// its own local data in half. With an evenly-divisible extent the two
    /// peer slices sent to `all_to_all` are independently checkable against
    /// `GlobalShape::chunk_bounds`.
    #[tokio::test]
    async fn reslice_in_memory_computes_distinct_per_peer_slices_at_world_size_two() {
        let comm = crate::test_support::FakeMultiRankCommunicator::new(0, 2);
        let chunk = test_chunk((4, 4, 4), 0);
        let original = chunk.data().clone();

        let _ = reslice(&comm, chunk, 1, &ResliceMode::InMemory).await.unwrap();

        let sent = comm.last_all_to_all_send.lock().unwrap().clone().unwrap();
        assert_eq!(sent.len(), 2);

        let global_shape = GlobalShape(4, 4, 4);
        for (peer, piece) in sent.iter().enumerate() {
            let (start, len) = global_shape.chunk_bounds(1, peer, 2);
            assert_eq!(piece.shape()[1], len);
            let expected = original.slice_axis(Axis(1), ndarray::Slice::from(start..start + len));
            assert_eq!(piece, &expected.to_owned());
        }
    }

    #[tokio::test]
    async fn reslice_is_an_involution_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let comm = SingleProcessCommunicator;
        let chunk = test_chunk((4, 3, 3), 0);
        let original = chunk.data().clone();
        let mode = ResliceMode::FileBacked {
            staging_dir: dir.path().to_path_buf(),
        };
        let resliced = reslice(&comm, chunk, 2, &mode).await.unwrap();
        let back = reslice(&comm, resliced, 0, &mode).await.unwrap();
        assert_eq!(back.data(), &original);
    }
}
