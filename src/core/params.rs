use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::domain::CoordType;
use crate::core::error::ConfigError;
use crate::cos::reparam::Parametrization;
use crate::solvers::convergence::Threshold;

// --- Configuration Types ---

/// Where the initial geometries come from and which coordinates to optimize in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeomParams {
    /// XYZ or multi-frame trajectory files, read in order.
    pub files: Vec<PathBuf>,
    pub coord_type: CoordType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolParams {
    /// Images inserted between every pair of input geometries.
    pub between: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CosParams {
    pub param: Parametrization,
    pub reparametrize: bool,
    pub reparam_every: usize,
    pub fix_ends: bool,
    /// Only use the force components perpendicular to the path tangent.
    pub perp_forces: bool,
}

impl Default for CosParams {
    fn default() -> Self {
        Self {
            param: Parametrization::Equal,
            reparametrize: true,
            reparam_every: 1,
            fix_ends: true,
            perp_forces: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptParams {
    /// Stiffness in Hartree/Bohr².
    pub gamma: f64,
    /// Largest allowed absolute step component (Bohr).
    pub max_step: f64,
    /// Cycles left once the string is fully grown. `None` disables the countdown.
    pub stop_in_when_full: Option<u32>,
    pub align: bool,
    pub max_cycles: usize,
    pub thresh: Threshold,
    pub dump: bool,
    pub calc_hessian: bool,
}

impl Default for OptParams {
    fn default() -> Self {
        Self {
            gamma: 1.25,
            max_step: 0.1,
            stop_in_when_full: None,
            align: true,
            max_cycles: 100,
            thresh: Threshold::GauLoose,
            dump: true,
            calc_hessian: false,
        }
    }
}

/// Calculator selection. Everything besides `type` is handed to the factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalcSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

impl Default for CalcSpec {
    fn default() -> Self {
        Self {
            kind: "anapot".to_string(),
            options: BTreeMap::new(),
        }
    }
}

impl CalcSpec {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn option_strings(&self, key: &str) -> Vec<String> {
        match self.options.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShakeParams {
    pub scale: f64,
    pub seed: Option<u64>,
}

impl Default for ShakeParams {
    fn default() -> Self {
        Self {
            scale: 0.1,
            seed: None,
        }
    }
}

/// A complete run plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub geom: GeomParams,
    pub interpol: InterpolParams,
    pub cos: CosParams,
    pub opt: OptParams,
    pub calc: CalcSpec,
    pub shake: Option<ShakeParams>,
    pub threads: usize,
    /// Evaluate images concurrently on the rayon pool.
    pub parallel: bool,
    pub out_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            geom: GeomParams::default(),
            interpol: InterpolParams::default(),
            cos: CosParams::default(),
            opt: OptParams::default(),
            calc: CalcSpec::default(),
            shake: None,
            threads: 4,
            parallel: true,
            out_dir: PathBuf::from("."),
        }
    }
}

impl RunConfig {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Resolves relative geometry paths against the directory of the run file.
    pub fn resolve_paths(&mut self, base: &Path) {
        for file in &mut self.geom.files {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
        if self.out_dir.is_relative() {
            self.out_dir = base.join(&self.out_dir);
        }
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.opt.gamma > 0.0) {
            return Err(ConfigError::invalid("opt.gamma", "must be positive"));
        }
        if !(self.opt.max_step > 0.0) {
            return Err(ConfigError::invalid("opt.max_step", "must be positive"));
        }
        if self.opt.max_cycles == 0 {
            return Err(ConfigError::invalid("opt.max_cycles", "must be at least 1"));
        }
        if self.cos.reparam_every == 0 {
            return Err(ConfigError::invalid("cos.reparam_every", "must be at least 1"));
        }
        if self.threads == 0 {
            return Err(ConfigError::invalid("threads", "must be at least 1"));
        }
        if let Some(shake) = &self.shake {
            if shake.scale < 0.0 {
                return Err(ConfigError::invalid("shake.scale", "must not be negative"));
            }
        }
        Ok(())
    }
}
