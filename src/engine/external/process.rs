use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use log::{debug, error};
use nalgebra::{DMatrix, DVector};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::engine::evaluator::{CalcRequest, CalcResult, Calculator, Checkpoint, EvaluationError};

/// What the external program receives on stdin.
#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    atoms: &'a [String],
    /// Flat Cartesian coordinates in Bohr.
    coords: &'a [f64],
    request: CalcRequest,
    calc_number: usize,
    calc_counter: usize,
    restart: Option<&'a serde_json::Value>,
}

/// What the external program must print on stdout.
#[derive(Debug, Deserialize)]
struct ProcessResponse {
    energy: f64,
    #[serde(default)]
    forces: Option<Vec<f64>>,
    #[serde(default)]
    hessian: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    checkpoint: Option<serde_json::Value>,
}

/// Drives an external program that speaks a small JSON contract.
///
/// The request is streamed over stdin and the response read from stdout;
/// nothing touches the disk unless the calculation fails, in which case the
/// offending input is saved under `<out_dir>/crashed_<name>/`.
pub struct ExternalCalculator {
    name: String,
    program: String,
    args: Vec<String>,
    calc_number: usize,
    calc_counter: usize,
    out_dir: PathBuf,
    restart: Option<serde_json::Value>,
    last_checkpoint: Option<serde_json::Value>,
}

impl ExternalCalculator {
    /// Creates the calculator for image `calc_number`.
    ///
    /// `$IMAGE` in any argument is replaced by the zero-padded image number,
    /// so every image can get its own scratch directory.
    pub fn new(program: &str, args: &[String], calc_number: usize, out_dir: &Path) -> Self {
        let image = format!("{:03}", calc_number);
        let args = match Regex::new(r"\$IMAGE") {
            Ok(re) => args
                .iter()
                .map(|a| re.replace_all(a, image.as_str()).into_owned())
                .collect(),
            Err(_) => args.to_vec(),
        };

        Self {
            name: format!("external_{}", image),
            program: program.to_string(),
            args,
            calc_number,
            calc_counter: 0,
            out_dir: out_dir.to_path_buf(),
            restart: None,
            last_checkpoint: None,
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn calc_counter(&self) -> usize {
        self.calc_counter
    }

    fn build_input(
        &self,
        atoms: &[String],
        coords: &DVector<f64>,
        request: CalcRequest,
    ) -> Result<String, EvaluationError> {
        let payload = ProcessRequest {
            atoms,
            coords: coords.as_slice(),
            request,
            calc_number: self.calc_number,
            calc_counter: self.calc_counter,
            restart: self.restart.as_ref(),
        };
        serde_json::to_string(&payload).map_err(|e| EvaluationError::Parse {
            name: self.name.clone(),
            reason: format!("could not serialize request: {e}"),
            input: String::new(),
            snapshot: None,
        })
    }

    /// Saves the failed input so the calculation can be reproduced by hand.
    fn save_crash(&self, input: &str) -> Option<PathBuf> {
        let dir = self.out_dir.join(format!("crashed_{}", self.name));
        let path = dir.join("input.json");
        let written = fs::create_dir_all(&dir).and_then(|_| fs::write(&path, input));
        match written {
            Ok(()) => Some(path),
            Err(e) => {
                error!("{}: could not save crashed input to {:?}: {}", self.name, path, e);
                None
            }
        }
    }

    /// Executes the program via stdin/stdout piping.
    fn run_process(&self, input: &str) -> Result<String, EvaluationError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EvaluationError::Spawn {
                name: self.name.clone(),
                program: self.program.clone(),
                source,
            })?;

        // stdin is fed from its own thread while the output pipes are drained
        let stdin = child.stdin.take();
        let output = thread::scope(|s| {
            if let Some(mut stdin) = stdin {
                s.spawn(move || {
                    // A program that ignores its input closes the pipe early; the exit status decides.
                    if let Err(e) = stdin.write_all(input.as_bytes()) {
                        debug!("{}: stdin closed early: {}", self.name, e);
                    }
                });
            }
            child.wait_with_output()
        })
        .map_err(|source| EvaluationError::Spawn {
            name: self.name.clone(),
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(EvaluationError::ProcessFailed {
                name: self.name.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                input: input.to_string(),
                snapshot: self.save_crash(input),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn parse_output(
        &self,
        stdout: &str,
        n_coords: usize,
        input: &str,
    ) -> Result<(CalcResult, Option<serde_json::Value>), EvaluationError> {
        let parse_err = |reason: String| EvaluationError::Parse {
            name: self.name.clone(),
            reason,
            input: input.to_string(),
            snapshot: self.save_crash(input),
        };

        let response: ProcessResponse =
            serde_json::from_str(stdout.trim()).map_err(|e| parse_err(e.to_string()))?;

        let hessian = match response.hessian {
            Some(rows) => {
                if rows.len() != n_coords || rows.iter().any(|r| r.len() != n_coords) {
                    return Err(parse_err(format!(
                        "hessian must be {n} x {n}",
                        n = n_coords
                    )));
                }
                Some(DMatrix::from_fn(n_coords, n_coords, |i, j| rows[i][j]))
            }
            None => None,
        };

        let result = CalcResult {
            energy: response.energy,
            forces: response.forces.map(DVector::from_vec),
            hessian,
        };
        Ok((result, response.checkpoint))
    }
}

impl Calculator for ExternalCalculator {
    fn evaluate(
        &mut self,
        atoms: &[String],
        coords: &DVector<f64>,
        request: CalcRequest,
    ) -> Result<CalcResult, EvaluationError> {
        let input = self.build_input(atoms, coords, request)?;
        debug!(
            "{}: running '{}' (calculation {})",
            self.name, self.program, self.calc_counter
        );

        let stdout = self.run_process(&input)?;
        let (result, checkpoint) = self.parse_output(&stdout, coords.len(), &input)?;

        self.calc_counter += 1;
        self.last_checkpoint = checkpoint;
        Ok(result)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn checkpoint(&self) -> Option<Checkpoint> {
        self.last_checkpoint.clone().map(|payload| Checkpoint {
            source: self.calc_number,
            payload,
        })
    }

    fn accept_checkpoint(&mut self, checkpoint: Checkpoint) -> bool {
        self.restart = Some(checkpoint.payload);
        true
    }
}
