//! Pipeline configuration (SPEC_FULL.md §10.2 / §6): the parsed YAML
//! document and the in-memory pipeline built from it.
//!
//! Grounded on the teacher's `StageContext`/`StageConfig`/`StageInput`/
//! `StageOutput` shape (a single pluggable async stage, generalized here to
//! this crate's closed list of tomography method stages) and on
//! `original_source/httomo/cli.py`'s `run`/`check` entry points.

use crate::pattern::{Pattern, Placement};
use serde::Deserialize;
use std::collections::HashMap;

/// A parameter value as parsed from YAML. A tuple/list value anywhere is how
/// a parameter sweep shows up (§6/§8 scenario 5) and is rejected by the
/// registry/sectionizer stage that consumes it, not by the parser itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn is_sweep(&self) -> bool {
        matches!(self, ParamValue::List(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(i) if *i >= 0 => Some(*i as usize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

pub type Params = HashMap<String, ParamValue>;

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderSpec {
    pub module: String,
    pub method: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageSpec {
    pub module: String,
    pub method: String,
    #[serde(default)]
    pub params: Params,
}

impl StageSpec {
    pub fn save_result(&self) -> bool {
        self.params
            .get("save_result")
            .and_then(ParamValue::as_bool)
            .unwrap_or(false)
    }

    pub fn glob_stats(&self) -> bool {
        self.params
            .get("glob_stats")
            .and_then(ParamValue::as_bool)
            .unwrap_or(false)
    }

    /// The first parameter whose value is a sweep (tuple/list), if any -
    /// rejected at plan time (§6/§8 scenario 5).
    pub fn sweep_parameter(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|(_, v)| v.is_sweep())
            .map(|(k, _)| k.as_str())
    }
}

/// The full pipeline document: exactly one loader followed by one-or-more
/// method stages (§6 "Pipeline configuration").
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSpec {
    pub loader: LoaderSpec,
    pub stages: Vec<StageSpec>,
}

impl PipelineSpec {
    pub fn from_yaml(text: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(text).map_err(|e| {
            crate::error::EngineError::configuration("pipeline.yaml", format!("malformed pipeline: {e}"))
        })
    }
}

/// A stage bound to its registry-declared attributes, ready for sectionizing.
/// This is the generalization of the teacher's single pluggable `StageHandler`:
/// where the teacher dispatches to one user-supplied trait object per stage,
/// this crate's stages are a closed, known set, selected structurally by
/// `(module, method)` (see `crate::registry::select_wrapper_kind`).
#[derive(Clone)]
pub struct BoundStage {
    pub spec: StageSpec,
    pub pattern: Pattern,
    pub placement: Placement,
    pub save_by_default: bool,
    pub swap_output_axes_01: bool,
    pub changes_output_dims: bool,
}

impl BoundStage {
    pub fn save_result(&self) -> bool {
        self.spec.save_result() || self.save_by_default
    }
}
