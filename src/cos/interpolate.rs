use crate::core::domain::Geometry;
use crate::core::error::ConfigError;

/// Inserts `between` linearly interpolated images between every pair of
/// consecutive geometries. The input geometries are kept as they are.
pub fn linear(geometries: &[Geometry], between: usize) -> Result<Vec<Geometry>, ConfigError> {
    let Some(first) = geometries.first() else {
        return Ok(Vec::new());
    };

    for (index, geom) in geometries.iter().enumerate().skip(1) {
        if geom.atoms != first.atoms {
            return Err(ConfigError::MismatchedAtoms {
                index,
                expected: first.atoms.clone(),
                found: geom.atoms.clone(),
            });
        }
    }

    let mut out = Vec::with_capacity(geometries.len() + between * geometries.len().saturating_sub(1));
    out.push(first.clone());

    for pair in geometries.windows(2) {
        let (start, end) = (&pair[0], &pair[1]);
        for k in 1..=between {
            let t = k as f64 / (between + 1) as f64;
            let coords = start
                .coords
                .iter()
                .zip(&end.coords)
                .map(|(a, b)| a + t * (b - a))
                .collect();
            out.push(Geometry {
                atoms: start.atoms.clone(),
                coords,
            });
        }
        out.push(end.clone());
    }

    Ok(out)
}
