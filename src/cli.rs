//! Command-line surface (SPEC_FULL.md §6 "External interfaces").
//!
//! Grounded on `original_source/httomo/cli.py`'s `click` command group,
//! reimplemented against `clap`'s derive API per this project's dependency
//! stack.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tomo-engine", about = "Run or validate a tomographic reconstruction pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Loads data, executes the pipeline, and persists its output.
    Run(RunArgs),
    /// Parses and sectionizes the pipeline without loading any data.
    Check(CheckArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Path to the input data archive.
    pub in_data_file: PathBuf,
    /// Path to the pipeline configuration document (YAML).
    pub pipeline_config: PathBuf,
    /// Directory under which the run's output folder is created.
    pub out_dir: PathBuf,

    /// Persist every method's result, not just the ones the pipeline marks.
    #[arg(long)]
    pub save_all: bool,

    /// Device id to bind for sections placed on a device. Omitting this
    /// disables device sections at plan time (SPEC_FULL.md §6 "Environment").
    #[arg(long)]
    pub gpu_id: Option<u32>,

    /// Directory used to stage a file-backed reslice. Defaults to `out_dir`
    /// when omitted.
    #[arg(long)]
    pub reslice_dir: Option<PathBuf>,

    /// Upper bound on slices per block for host-placed sections.
    #[arg(long, default_value_t = 64)]
    pub max_cpu_slices: usize,

    /// Overrides the default `<timestamp>_output` run-directory name.
    #[arg(long)]
    pub output_folder: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    /// Path to the pipeline configuration document (YAML).
    pub pipeline_config: PathBuf,
    /// Optional input data archive, only used to cross-check its declared shape.
    pub in_data: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_subcommand_parses_required_positionals_and_flags() {
        let cli = Cli::parse_from([
            "tomo-engine",
            "run",
            "in.h5",
            "pipeline.yaml",
            "out",
            "--gpu-id",
            "0",
            "--save-all",
        ]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.in_data_file, PathBuf::from("in.h5"));
                assert_eq!(args.pipeline_config, PathBuf::from("pipeline.yaml"));
                assert_eq!(args.out_dir, PathBuf::from("out"));
                assert_eq!(args.gpu_id, Some(0));
                assert!(args.save_all);
                assert_eq!(args.max_cpu_slices, 64);
            }
            Command::Check(_) => panic!("expected Run"),
        }
    }

    #[test]
    fn check_subcommand_accepts_an_optional_input_path() {
        let cli = Cli::parse_from(["tomo-engine", "check", "pipeline.yaml"]);
        match cli.command {
            Command::Check(args) => {
                assert_eq!(args.pipeline_config, PathBuf::from("pipeline.yaml"));
                assert!(args.in_data.is_none());
            }
            Command::Run(_) => panic!("expected Check"),
        }
    }
}
