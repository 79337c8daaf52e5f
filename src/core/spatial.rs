use nalgebra::{DVector, Matrix3, Vector3};

/// Views a flat coordinate vector `[x0, y0, z0, x1, ...]` as one vector per atom.
pub fn coords3d(flat: &DVector<f64>) -> Vec<Vector3<f64>> {
    flat.as_slice()
        .chunks_exact(3)
        .map(|c| Vector3::new(c[0], c[1], c[2]))
        .collect()
}

/// Inverse of [`coords3d`].
pub fn flatten(coords3d: &[Vector3<f64>]) -> DVector<f64> {
    DVector::from_iterator(
        coords3d.len() * 3,
        coords3d.iter().flat_map(|v| [v.x, v.y, v.z]),
    )
}

/// Geometric center. Returns the origin for an empty slice.
pub fn centroid(coords3d: &[Vector3<f64>]) -> Vector3<f64> {
    if coords3d.is_empty() {
        return Vector3::zeros();
    }
    let sum: Vector3<f64> = coords3d.iter().sum();
    sum / coords3d.len() as f64
}

/// Optimal rotation (Kabsch) taking the centered `mobile` set onto the centered
/// `reference` set. Both slices must already be centered on the origin.
///
/// Falls back to the identity if the SVD does not produce both factors.
pub fn kabsch_rotation(mobile: &[Vector3<f64>], reference: &[Vector3<f64>]) -> Matrix3<f64> {
    let mut h = Matrix3::zeros();
    for (p, q) in mobile.iter().zip(reference.iter()) {
        h += p * q.transpose();
    }

    let svd = h.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Matrix3::identity(),
    };
    let v = v_t.transpose();

    // Guard against reflections
    let d = (v * u.transpose()).determinant().signum();
    let mut correction = Matrix3::identity();
    correction[(2, 2)] = if d == 0.0 { 1.0 } else { d };

    v * correction * u.transpose()
}

/// Rigidly superposes `mobile` onto `reference` (rotation + translation, least squares).
///
/// **Invariant**: atom order is untouched, internal distances are preserved.
pub fn superpose(mobile: &DVector<f64>, reference: &DVector<f64>) -> DVector<f64> {
    let mob = coords3d(mobile);
    let refr = coords3d(reference);

    let c_mob = centroid(&mob);
    let c_ref = centroid(&refr);

    let mob_c: Vec<Vector3<f64>> = mob.iter().map(|p| p - c_mob).collect();
    let ref_c: Vec<Vector3<f64>> = refr.iter().map(|p| p - c_ref).collect();

    let rot = kabsch_rotation(&mob_c, &ref_c);
    let aligned: Vec<Vector3<f64>> = mob_c.iter().map(|p| rot * p + c_ref).collect();
    flatten(&aligned)
}

/// Root mean square deviation between two equally sized coordinate sets.
pub fn rmsd(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    let n = (a.len() / 3).max(1) as f64;
    ((a - b).norm_squared() / n).sqrt()
}
