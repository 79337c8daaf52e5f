use std::fmt;
use std::str::FromStr;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

/// Named threshold presets, as known from Gaussian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Threshold {
    #[default]
    GauLoose,
    Gau,
    GauTight,
    GauVTight,
}

impl FromStr for Threshold {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gau_loose" => Ok(Threshold::GauLoose),
            "gau" => Ok(Threshold::Gau),
            "gau_tight" => Ok(Threshold::GauTight),
            "gau_vtight" => Ok(Threshold::GauVTight),
            other => Err(ConfigError::UnknownThreshold(other.to_string())),
        }
    }
}

impl TryFrom<String> for Threshold {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Threshold> for String {
    fn from(value: Threshold) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Threshold::GauLoose => "gau_loose",
            Threshold::Gau => "gau",
            Threshold::GauTight => "gau_tight",
            Threshold::GauVTight => "gau_vtight",
        };
        f.write_str(name)
    }
}

/// Limits on forces (Hartree/Bohr) and steps (Bohr).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriteria {
    pub max_force: f64,
    pub rms_force: f64,
    pub max_step: f64,
    pub rms_step: f64,
}

impl From<Threshold> for ConvergenceCriteria {
    fn from(thresh: Threshold) -> Self {
        let (max_force, rms_force, max_step, rms_step) = match thresh {
            Threshold::GauLoose => (2.5e-3, 1.7e-3, 1.0e-2, 6.7e-3),
            Threshold::Gau => (4.5e-4, 3.0e-4, 1.8e-3, 1.2e-3),
            Threshold::GauTight => (1.5e-5, 1.0e-5, 6.0e-5, 4.0e-5),
            Threshold::GauVTight => (2e-6, 1e-6, 6e-6, 4e-6),
        };
        Self {
            max_force,
            rms_force,
            max_step,
            rms_step,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConvergenceMetrics {
    pub max_force: f64,
    pub rms_force: f64,
    pub max_step: f64,
    pub rms_step: f64,
}

impl ConvergenceMetrics {
    pub fn measure(forces: &DVector<f64>, step: &DVector<f64>) -> Self {
        Self {
            max_force: forces.amax(),
            rms_force: rms(forces),
            max_step: step.amax(),
            rms_step: rms(step),
        }
    }
}

impl ConvergenceCriteria {
    /// All four criteria must hold.
    pub fn is_met(&self, metrics: &ConvergenceMetrics) -> bool {
        metrics.max_force <= self.max_force
            && metrics.rms_force <= self.rms_force
            && metrics.max_step <= self.max_step
            && metrics.rms_step <= self.rms_step
    }
}

pub fn rms(v: &DVector<f64>) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    (v.norm_squared() / v.len() as f64).sqrt()
}
