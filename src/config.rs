//! Runtime context, run-directory bootstrap, and logging (SPEC_FULL.md §10.3).
//!
//! Grounded on `original_source/httomo/cli.py` (run-directory naming,
//! pipeline-file copy) and `original_source/httomo/logger.py` (dual
//! console+file logging, rank-0-only `user.log`). `RunContext` is
//! constructed once in `main` and threaded by reference through the runner,
//! never exposed as an ambient process global (SPEC_FULL.md §9 "Global
//! state").

use crate::error::{EngineError, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;

/// Everything a run needs that isn't part of the pipeline document itself:
/// where to write output, which device (if any) to bind, and this process's
/// place in the process group.
pub struct RunContext {
    pub run_out_dir: PathBuf,
    pub gpu_id: Option<u32>,
    pub max_cpu_slices: usize,
    pub rank: usize,
    pub world_size: usize,
    /// Unique per-run identifier folded into intermediate-file names
    /// alongside each stage's index (SPEC_FULL.md §4.3 "Intermediate writer").
    pub task_id: String,
}

impl RunContext {
    pub fn new(run_out_dir: PathBuf, gpu_id: Option<u32>, max_cpu_slices: usize, rank: usize, world_size: usize) -> Self {
        Self {
            run_out_dir,
            gpu_id,
            max_cpu_slices,
            rank,
            world_size,
            task_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Creates `<out_dir>/<timestamp>_output` (or `<out_dir>/<folder_name>` when
/// one is given via `--output-folder`), returning the created directory.
pub fn make_run_directory(out_dir: &Path, folder_name: Option<&str>, now: chrono::DateTime<chrono::Local>) -> Result<PathBuf> {
    let name = match folder_name {
        Some(name) => name.to_string(),
        None => format!("{}_output", now.format("%Y%m%d_%H%M%S")),
    };
    let dir = out_dir.join(name);
    std::fs::create_dir_all(&dir).map_err(|e| EngineError::io("config.make_run_directory", e))?;
    Ok(dir)
}

/// Copies the pipeline document into the run directory so a run's output is
/// self-describing (SPEC_FULL.md §6 "Persisted output layout").
pub fn copy_pipeline_file(pipeline_path: &Path, run_out_dir: &Path) -> Result<()> {
    let file_name = pipeline_path
        .file_name()
        .ok_or_else(|| EngineError::configuration("pipeline_path", "pipeline path has no file name"))?;
    std::fs::copy(pipeline_path, run_out_dir.join(file_name))
        .map_err(|e| EngineError::io("config.copy_pipeline_file", e))?;
    Ok(())
}

/// Installs the process's logging layers: stderr on every rank, plus a
/// `user.log` file layer on rank 0 only. The returned guard must be held for
/// the run's duration or the file layer's background writer is torn down.
pub fn init_logging(run_out_dir: &Path, rank: usize) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::new("info");
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if rank == 0 {
        let file_appender = tracing_appender::rolling::never(run_out_dir, "user.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| EngineError::internal(format!("failed to install logging: {e}")))?;
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .try_init()
            .map_err(|e| EngineError::internal(format!("failed to install logging: {e}")))?;
        Ok(None)
    }
}

/// Rank 0's final step (SPEC_FULL.md §4.8 step 6): re-scan `user.log` and
/// strip any ANSI escape sequences. The file layer is already installed
/// without color (`with_ansi(false)`), so this is a defensive re-scan rather
/// than a required transform.
pub fn strip_ansi_from_log(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| EngineError::io("config.strip_ansi_from_log.read", e))?;
    let stripped = strip_ansi_codes(&contents);
    if stripped.len() != contents.len() {
        std::fs::write(path, stripped).map_err(|e| EngineError::io("config.strip_ansi_from_log.write", e))?;
    }
    Ok(())
}

fn strip_ansi_codes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
