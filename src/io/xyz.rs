use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nalgebra::DVector;

use crate::core::chemistry::{ANG2BOHR, BOHR2ANG};
use crate::core::domain::Geometry;

/// Parses one or more concatenated XYZ frames. Coordinates are converted
/// from Ångström to Bohr.
pub fn parse_frames(text: &str) -> Result<Vec<Geometry>> {
    let mut lines = text.lines().enumerate().peekable();
    let mut frames = Vec::new();

    loop {
        // Skip blank separators between frames
        while matches!(lines.peek(), Some((_, l)) if l.trim().is_empty()) {
            lines.next();
        }
        let Some((line_no, count_line)) = lines.next() else {
            break;
        };

        let n_atoms: usize = count_line
            .trim()
            .parse()
            .with_context(|| format!("line {}: expected an atom count, got '{}'", line_no + 1, count_line.trim()))?;
        // Comment line
        lines.next();

        let mut atoms = Vec::with_capacity(n_atoms);
        let mut coords = Vec::with_capacity(3 * n_atoms);
        for _ in 0..n_atoms {
            let Some((line_no, line)) = lines.next() else {
                bail!("frame {} ends after {} of {} atoms", frames.len(), atoms.len(), n_atoms);
            };
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                bail!("line {}: expected 'symbol x y z', got '{}'", line_no + 1, line.trim());
            }
            atoms.push(parts[0].to_string());
            for token in &parts[1..4] {
                let value: f64 = token
                    .parse()
                    .with_context(|| format!("line {}: invalid coordinate '{}'", line_no + 1, token))?;
                coords.push(value * ANG2BOHR);
            }
        }

        frames.push(Geometry::new(atoms, coords)?);
    }

    if frames.is_empty() {
        bail!("no XYZ frames found");
    }
    Ok(frames)
}

/// Reads every frame of every file, in order.
pub fn load_geometries(files: &[PathBuf]) -> Result<Vec<Geometry>> {
    let mut geometries = Vec::new();
    for file in files {
        let text = fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
        let frames = parse_frames(&text).with_context(|| format!("Failed to parse {:?}", file))?;
        geometries.extend(frames);
    }
    Ok(geometries)
}

/// Formats one frame; `coords` are in Bohr and written in Ångström.
pub fn format_frame(atoms: &[String], coords: &DVector<f64>, comment: &str) -> String {
    let mut s = String::with_capacity(64 * (atoms.len() + 2));
    let _ = writeln!(s, "{}", atoms.len());
    let _ = writeln!(s, "{}", comment.replace('\n', " "));
    for (atom, xyz) in atoms.iter().zip(coords.as_slice().chunks_exact(3)) {
        let _ = writeln!(
            s,
            "{:<3} {:>15.8} {:>15.8} {:>15.8}",
            atom,
            xyz[0] * BOHR2ANG,
            xyz[1] * BOHR2ANG,
            xyz[2] * BOHR2ANG
        );
    }
    s
}

/// Writes several frames into one trajectory file.
pub fn write_trj(
    path: &Path,
    atoms: &[String],
    frames: &[DVector<f64>],
    comments: &[String],
) -> Result<()> {
    let mut s = String::new();
    for (i, frame) in frames.iter().enumerate() {
        let comment = comments.get(i).map(String::as_str).unwrap_or("");
        s.push_str(&format_frame(atoms, frame, comment));
    }
    fs::write(path, s).with_context(|| format!("Failed to write {:?}", path))
}
