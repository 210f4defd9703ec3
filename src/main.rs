//! Binary entry point (SPEC_FULL.md §6 "CLI").
//!
//! Grounded on `original_source/httomo/cli.py`'s `run`/`check` commands:
//! build the run directory and logging, load the pipeline document, and
//! hand off to `Runner`. Everything this binary does beyond argument
//! parsing and process wiring lives in the library (`src/lib.rs`); this
//! file owns no algorithm of its own.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tomo_engine::{
    cli::{Cli, Command},
    config::{self, RunContext},
    error::ErrorCategory,
    memory::ConstantDeviceMemory,
    registry::{MethodRegistry, REFERENCE_METHODS},
    reslice::ResliceMode,
    comm::SingleProcessCommunicator,
    Communicator, PipelineSpec, RawArchive, Runner,
};

/// No GPU runtime crate exists in this project's dependency stack
/// (SPEC_FULL.md §4.6), so the device-memory budget is a configured
/// constant rather than a live query; 4 GiB matches a modest single-GPU
/// development box and is deliberately conservative.
const DEFAULT_DEVICE_MEMORY_BYTES: usize = 4 * 1024 * 1024 * 1024;

/// Caps the global `rayon` pool (used by the per-slice reference numerical
/// methods, `src/methods/mod.rs`) below the machine's full core count,
/// leaving headroom for the async runtime and, in a real multi-process
/// deployment, sibling ranks sharing the node.
fn configure_rayon_pool() {
    let threads = (num_cpus::get() * 3 / 4).max(1);
    let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
}

fn main() -> ExitCode {
    configure_rayon_pool();
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Run(args) => runtime.block_on(run(args)),
        Command::Check(args) => check(args),
    }
}

async fn run(args: tomo_engine::cli::RunArgs) -> ExitCode {
    let now = chrono::Local::now();
    let run_out_dir = match config::make_run_directory(&args.out_dir, args.output_folder.as_deref(), now) {
        Ok(dir) => dir,
        Err(e) => return report_and_fail(&e, None),
    };

    let comm = SingleProcessCommunicator;
    let _log_guard = match config::init_logging(&run_out_dir, comm.rank()) {
        Ok(guard) => guard,
        Err(e) => return report_and_fail(&e, Some(&run_out_dir)),
    };

    if let Err(e) = config::copy_pipeline_file(&args.pipeline_config, &run_out_dir) {
        return report_and_fail(&e, Some(&run_out_dir));
    }

    let pipeline_text = match std::fs::read_to_string(&args.pipeline_config) {
        Ok(text) => text,
        Err(e) => {
            return report_and_fail(
                &tomo_engine::error::EngineError::io("main.read_pipeline_config", e),
                Some(&run_out_dir),
            )
        }
    };
    let pipeline = match PipelineSpec::from_yaml(&pipeline_text) {
        Ok(p) => p,
        Err(e) => return report_and_fail(&e, Some(&run_out_dir)),
    };

    let registry = MethodRegistry::new(REFERENCE_METHODS);
    let device_memory = ConstantDeviceMemory(DEFAULT_DEVICE_MEMORY_BYTES);
    let ctx = RunContext::new(run_out_dir.clone(), args.gpu_id, args.max_cpu_slices, comm.rank(), comm.world_size());
    let reslice_mode = match &args.reslice_dir {
        Some(dir) => ResliceMode::FileBacked { staging_dir: dir.clone() },
        None => ResliceMode::InMemory,
    };

    let runner = Runner {
        registry: &registry,
        comm: &comm,
        device_memory: &device_memory,
        ctx: &ctx,
        reslice_mode,
    };

    let archive = RawArchive::new();
    match runner.run(&archive, &args.in_data_file, &pipeline, args.save_all).await {
        Ok(outcome) => {
            tracing::info!(
                elapsed_ms = outcome.elapsed.as_millis(),
                sections = outcome.sections_executed,
                "run finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => report_and_fail(&e, Some(&run_out_dir)),
    }
}

fn check(args: tomo_engine::cli::CheckArgs) -> ExitCode {
    let pipeline_text = match std::fs::read_to_string(&args.pipeline_config) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("io error reading pipeline config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let pipeline = match PipelineSpec::from_yaml(&pipeline_text) {
        Ok(p) => p,
        Err(e) => return report_and_fail(&e, None),
    };

    if let Some(in_data) = &args.in_data {
        if !in_data.exists() {
            eprintln!("input data file {} does not exist", in_data.display());
            return ExitCode::FAILURE;
        }
    }

    let registry = MethodRegistry::new(REFERENCE_METHODS);
    let comm = SingleProcessCommunicator;
    let device_memory = ConstantDeviceMemory(DEFAULT_DEVICE_MEMORY_BYTES);
    let ctx = RunContext::new(std::env::temp_dir(), Some(0), 64, comm.rank(), comm.world_size());
    let runner = Runner {
        registry: &registry,
        comm: &comm,
        device_memory: &device_memory,
        ctx: &ctx,
        reslice_mode: ResliceMode::InMemory,
    };

    match runner.check(&pipeline, false) {
        Ok(result) => {
            println!("pipeline is valid: {} section(s)", result.sections.len());
            for (i, section) in result.sections.iter().enumerate() {
                println!(
                    "  section {i}: pattern={:?} placement={:?} methods={} needs_reslice_after={}",
                    section.pattern,
                    section.placement,
                    section.method_ids.len(),
                    section.needs_reslice_after
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => report_and_fail(&e, None),
    }
}

/// Uniform failure surface (SPEC_FULL.md §7 "User surface"): write the
/// recognized kind to stderr and, when a run directory already exists, to
/// `user.log` as well.
fn report_and_fail(err: &tomo_engine::error::EngineError, run_out_dir: Option<&Path>) -> ExitCode {
    let category: ErrorCategory = err.category();
    eprintln!("error ({category}): {err}");
    if let Some(dir) = run_out_dir {
        tracing::error!(category = %category, "{err}");
        let _ = config::strip_ansi_from_log(&dir.join("user.log"));
    }
    ExitCode::FAILURE
}
