// --- Units ---

pub const BOHR2ANG: f64 = 0.52917721067;
pub const ANG2BOHR: f64 = 1.0 / BOHR2ANG;

/// Returns the covalent radius of an element in Bohr.
///
/// Source values are the Å radii of Cordero et al. (2008). The lookup is
/// case-insensitive, so "CL", "cl" and "Cl" all resolve to chlorine.
pub fn covalent_radius(symbol: &str) -> Option<f64> {
    let angstrom = match symbol.trim().to_ascii_lowercase().as_str() {
        "h" => 0.31,
        "he" => 0.28,
        "li" => 1.28,
        "be" => 0.96,
        "b" => 0.84,
        "c" => 0.76,
        "n" => 0.71,
        "o" => 0.66,
        "f" => 0.57,
        "ne" => 0.58,
        "na" => 1.66,
        "mg" => 1.41,
        "al" => 1.21,
        "si" => 1.11,
        "p" => 1.07,
        "s" => 1.05,
        "cl" => 1.02,
        "ar" => 1.06,
        "k" => 2.03,
        "ca" => 1.76,
        "sc" => 1.70,
        "ti" => 1.60,
        "v" => 1.53,
        "cr" => 1.39,
        "mn" => 1.39,
        "fe" => 1.32,
        "co" => 1.26,
        "ni" => 1.24,
        "cu" => 1.32,
        "zn" => 1.22,
        "ga" => 1.22,
        "ge" => 1.20,
        "as" => 1.19,
        "se" => 1.20,
        "br" => 1.20,
        "kr" => 1.16,
        "rb" => 2.20,
        "sr" => 1.95,
        "y" => 1.90,
        "zr" => 1.75,
        "nb" => 1.64,
        "mo" => 1.54,
        "tc" => 1.47,
        "ru" => 1.46,
        "rh" => 1.42,
        "pd" => 1.39,
        "ag" => 1.45,
        "cd" => 1.44,
        "in" => 1.42,
        "sn" => 1.39,
        "sb" => 1.39,
        "te" => 1.38,
        "i" => 1.39,
        "xe" => 1.40,
        _ => return None,
    };
    Some(angstrom * ANG2BOHR)
}

/// A flattened 2D matrix storing pre-computed bond thresholds for every atom pair.
/// Access is O(1) via `index = i * N + j`.
#[derive(Debug, Clone)]
pub struct InteractionGrid {
    num_atoms: usize,
    /// Stores ((radius_i + radius_j) * bond_factor)^2
    /// Squared values avoid sqrt() calls while scanning pairs.
    bond_matrix_sq: Vec<f64>,
}

impl InteractionGrid {
    /// Builds the grid from per-atom covalent radii (Bohr).
    /// `bond_factor`: multiplier on the radius sum (usually ~1.3).
    pub fn new(radii: &[f64], bond_factor: f64) -> Self {
        let n = radii.len();
        let mut grid = vec![0.0; n * n];

        for i in 0..n {
            for j in 0..n {
                let threshold = (radii[i] + radii[j]) * bond_factor;
                grid[i * n + j] = threshold * threshold;
            }
        }

        Self {
            num_atoms: n,
            bond_matrix_sq: grid,
        }
    }

    /// Returns the squared distance below which two atoms count as bonded.
    #[inline(always)]
    pub fn get_bond_sq(&self, i: usize, j: usize) -> f64 {
        self.bond_matrix_sq[i * self.num_atoms + j]
    }
}
