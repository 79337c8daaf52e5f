use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nalgebra::DVector;
use regex::Regex;

use crate::cos::chain::{PathSnapshot, PathState, SplinedHei};
use crate::io::xyz;
use crate::solvers::runner::RunSummary;

pub const ENERGIES_FILE: &str = "energies.csv";
pub const FINAL_PATH_FILE: &str = "final_path.trj";
pub const SPLINED_HEI_FILE: &str = "splined_hei.xyz";
pub const SUMMARY_FILE: &str = "run_summary.json";

pub fn cycle_file_name(cycle: usize) -> String {
    format!("cycle_{:03}.trj", cycle)
}

/// Writes per-cycle trajectories and the energy table.
pub struct Dumper {
    out_dir: PathBuf,
    energies: csv::Writer<File>,
}

impl Dumper {
    /// Appends to an existing energy table, so restarts keep one history.
    pub fn new(out_dir: &Path, n_images: usize) -> Result<Self> {
        fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;

        let csv_path = out_dir.join(ENERGIES_FILE);
        let is_new = !csv_path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&csv_path)
            .with_context(|| format!("Failed to open {:?}", csv_path))?;

        let mut energies = csv::WriterBuilder::new().flexible(true).from_writer(file);
        if is_new {
            let mut header = vec!["cycle".to_string()];
            header.extend((0..n_images).map(|i| format!("image_{}", i)));
            energies.write_record(&header)?;
            energies.flush()?;
        }

        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            energies,
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Writes the path after the cycle's update plus the energies the cycle computed.
    pub fn dump_cycle(&mut self, cycle: usize, path: &PathState, energies: &[f64]) -> Result<()> {
        let frames = path.image_cart_coords();
        let comments: Vec<String> = (0..frames.len())
            .map(|i| format!("cycle {} image {}", cycle, i))
            .collect();
        xyz::write_trj(
            &self.out_dir.join(cycle_file_name(cycle)),
            path.atoms(),
            &frames,
            &comments,
        )?;

        let mut record = vec![cycle.to_string()];
        record.extend(energies.iter().map(|e| format!("{:.10}", e)));
        self.energies.write_record(&record)?;
        self.energies.flush()?;
        Ok(())
    }

    pub fn dump_final(
        &mut self,
        path: &PathState,
        hei: Option<&SplinedHei>,
        summary: &RunSummary,
    ) -> Result<()> {
        let frames = path.image_cart_coords();
        let comments: Vec<String> = path
            .known_energies()
            .iter()
            .enumerate()
            .map(|(i, e)| match e {
                Some(e) => format!("image {} E={:.10}", i, e),
                None => format!("image {}", i),
            })
            .collect();
        xyz::write_trj(&self.out_dir.join(FINAL_PATH_FILE), path.atoms(), &frames, &comments)?;

        if let Some(h) = hei {
            let comment = format!("splined HEI at image {:.4}, E={:.10}", h.frac_index, h.energy);
            let text = xyz::format_frame(path.atoms(), &h.coords, &comment);
            let target = self.out_dir.join(SPLINED_HEI_FILE);
            fs::write(&target, text).with_context(|| format!("Failed to write {:?}", target))?;
        }

        write_summary(&self.out_dir, summary)?;
        Ok(())
    }
}

pub fn write_summary(out_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let target = out_dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(&target, json).with_context(|| format!("Failed to write {:?}", target))?;
    Ok(target)
}

/// Saves the coordinates the path had before a failed cycle.
pub fn write_failed_snapshot(out_dir: &Path, snapshot: &PathSnapshot) -> Result<PathBuf> {
    fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;
    let target = out_dir.join(format!("failed_cycle_{:03}.trj", snapshot.cycle));
    let frames: Vec<DVector<f64>> = snapshot
        .coords
        .iter()
        .map(|c| DVector::from_column_slice(c))
        .collect();
    let comments: Vec<String> = (0..frames.len())
        .map(|i| format!("before cycle {} image {}", snapshot.cycle, i))
        .collect();
    xyz::write_trj(&target, &snapshot.atoms, &frames, &comments)?;
    Ok(target)
}

/// Finds the highest numbered `cycle_NNN.trj` in `out_dir`.
pub fn find_latest_cycle(out_dir: &Path) -> Result<Option<(usize, PathBuf)>> {
    let re = Regex::new(r"^cycle_(\d+)\.trj$")?;
    let mut latest: Option<(usize, PathBuf)> = None;

    let entries = match fs::read_dir(out_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {:?}", out_dir)),
    };

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        let Some(caps) = re.captures(&name) else {
            continue;
        };
        let Ok(cycle) = caps[1].parse::<usize>() else {
            continue;
        };
        if latest.as_ref().map_or(true, |(best, _)| cycle > *best) {
            latest = Some((cycle, entry.path()));
        }
    }
    Ok(latest)
}
