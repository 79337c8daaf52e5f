use std::sync::{Arc, Mutex};

use nalgebra::{DVector, Rotation3, Vector3};
use rxpath::core::domain::{CoordType, Geometry};
use rxpath::core::error::{ConfigError, PathError};
use rxpath::core::spatial;
use rxpath::cos::chain::PathState;
use rxpath::engine::evaluator::{CalcRequest, Calculator, EvaluationError};

mod common;
use crate::common::{
    assert_close, attach, line_geometries, line_path, test_registry, RelayCalculator,
};

#[test]
fn test_path_needs_two_images() {
    let result = PathState::new(line_geometries(1), CoordType::Cartesian);
    assert!(matches!(
        result,
        Err(ConfigError::TooFewImages { needed: 2, got: 1 })
    ));
}

#[test]
fn test_images_must_share_atoms() {
    let mut geoms = line_geometries(3);
    geoms[2].atoms = vec!["Y".to_string()];
    match PathState::new(geoms, CoordType::Cartesian) {
        Err(ConfigError::MismatchedAtoms { index, .. }) => assert_eq!(index, 2),
        other => panic!("expected MismatchedAtoms, got {:?}", other.map(|p| p.len())),
    }
}

#[test]
fn test_redundant_path_needs_known_elements() {
    let result = PathState::new(line_geometries(3), CoordType::Redundant);
    assert!(matches!(result, Err(ConfigError::UnknownElement(e)) if e == "X"));
}

#[test]
fn test_quantities_need_an_evaluation() {
    let path = line_path(4);
    assert!(matches!(path.energies(), Err(PathError::MissingEnergies(0))));
    assert!(matches!(path.hei_index(), Err(PathError::MissingEnergies(0))));
    assert!(matches!(path.forces(), Err(PathError::MissingForces(1))));
    assert_eq!(path.known_energies(), vec![None; 4]);
}

#[test]
fn test_evaluate_only_stale_images() {
    let mut path = line_path(5);
    let registry = test_registry(0.5);
    attach(&mut path, &registry, "parabola");

    let request = CalcRequest::forces();
    assert_eq!(path.stale_images(request).len(), 5);
    assert_eq!(path.evaluate(request, true).unwrap(), 5);
    assert!(path.stale_images(request).is_empty());
    assert_eq!(path.evaluate(request, true).unwrap(), 0);

    let mut coords = path.image_cart_coords();
    coords[3][1] += 0.1;
    path.set_image_cart_coords(coords).unwrap();
    assert_eq!(path.stale_images(request), vec![3]);
    assert_eq!(path.evaluate(request, false).unwrap(), 1);

    // A Hessian request makes everything stale again
    assert_eq!(path.stale_images(request.with_hessian(true)).len(), 5);
}

#[test]
fn test_failed_evaluation_leaves_path_untouched() {
    for parallel in [true, false] {
        let mut path = line_path(5);
        let registry = test_registry(0.5);
        attach(&mut path, &registry, "broken_at_2");

        let err = path.evaluate(CalcRequest::forces(), parallel).unwrap_err();
        assert_eq!(err.image, 2);
        assert!(matches!(err.source, EvaluationError::NonFinite { quantity: "energy", .. }));
        assert_eq!(path.known_energies(), vec![None; 5], "parallel = {}", parallel);
    }
}

#[test]
fn test_missing_calculator_is_an_evaluation_error() {
    let mut path = line_path(3);
    let err = path.evaluate(CalcRequest::forces(), false).unwrap_err();
    assert_eq!(err.image, 0);
    assert!(matches!(err.source, EvaluationError::NoCalculator));
}

#[test]
fn test_unknown_calculator_key() {
    let mut path = line_path(3);
    let registry = test_registry(0.5);
    let result = path.attach_calculators(
        &registry,
        &rxpath::core::params::CalcSpec::new("orca"),
        std::path::Path::new("."),
    );
    assert!(matches!(result, Err(ConfigError::UnknownCalculator(k)) if k == "orca"));
}

#[test]
fn test_sequential_evaluation_hands_over_checkpoints() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let mut registry = test_registry(0.5);
    let shared = Arc::clone(&received);
    registry.register("relay", move |_, ctx| {
        Ok(Box::new(RelayCalculator {
            image: ctx.image,
            received: Arc::clone(&shared),
        }) as Box<dyn Calculator>)
    });

    let mut path = line_path(4);
    attach(&mut path, &registry, "relay");
    path.evaluate(CalcRequest::forces(), false).unwrap();
    assert_eq!(*received.lock().unwrap(), vec![(1, 0), (2, 1), (3, 2)]);

    received.lock().unwrap().clear();
    let mut path = line_path(4);
    attach(&mut path, &registry, "relay");
    path.evaluate(CalcRequest::forces(), true).unwrap();
    assert!(received.lock().unwrap().is_empty());
}

#[test]
fn test_fixed_ends_have_zero_forces_and_do_not_move() {
    let mut path = line_path(5);
    let registry = test_registry(0.5);
    attach(&mut path, &registry, "parabola");
    path.evaluate(CalcRequest::forces(), true).unwrap();

    let forces = path.forces().unwrap();
    assert_eq!(forces.len(), 15);
    assert!(forces.rows(0, 3).iter().all(|&x| x == 0.0));
    assert!(forces.rows(12, 3).iter().all(|&x| x == 0.0));
    // Image 1 at x = 0.25: f = 2 (x - 0.5)
    assert_close(forces[3], -0.5, 1e-12);

    let before = path.image_cart_coords();
    let shifted = path.coords().unwrap().add_scalar(0.1);
    path.set_coords(&shifted).unwrap();
    let after = path.image_cart_coords();
    assert_eq!(after[0], before[0]);
    assert_eq!(after[4], before[4]);
    assert_close(after[2][0], before[2][0] + 0.1, 1e-12);

    assert!(matches!(
        path.set_coords(&DVector::zeros(7)),
        Err(PathError::ShapeMismatch { expected: 15, got: 7 })
    ));
}

#[test]
fn test_set_coords_is_all_or_nothing() {
    let mut path = line_path(5);
    let registry = test_registry(0.5);
    attach(&mut path, &registry, "parabola");
    path.evaluate(CalcRequest::forces(), false).unwrap();

    let before = path.image_cart_coords();
    let mut coords = path.coords().unwrap();
    coords[3] += 0.05;
    coords[6] = f64::NAN;
    assert!(matches!(path.set_coords(&coords), Err(PathError::Coord(_))));

    // Image 1 precedes the bad segment and must not have moved
    assert_eq!(path.image_cart_coords(), before);
    assert!(path.image(1).unwrap().energy().is_some());
}

#[test]
fn test_loose_ends_get_forces() {
    let mut path = line_path(4);
    path.set_fixed_ends(false, true);
    let registry = test_registry(0.5);
    attach(&mut path, &registry, "parabola");
    path.evaluate(CalcRequest::forces(), true).unwrap();
    let forces = path.forces().unwrap();
    assert_close(forces[0], -1.0, 1e-12);
    assert!(!path.is_fixed(0));
    assert!(path.is_fixed(3));
}

#[test]
fn test_tangents_point_uphill() {
    let mut path = line_path(5);
    let registry = test_registry(2.0);
    attach(&mut path, &registry, "parabola");

    // Without energies: central differences, still along x here
    for t in path.tangents().unwrap() {
        assert_close(t.norm(), 1.0, 1e-12);
        assert_close(t[0], 1.0, 1e-12);
    }

    path.evaluate(CalcRequest::forces(), true).unwrap();
    let tangents = path.tangents().unwrap();
    assert_eq!(tangents.len(), 5);
    for t in &tangents {
        assert_close(t[0], 1.0, 1e-12);
    }
}

#[test]
fn test_upwind_tangent_follows_higher_neighbour() {
    // Bent path: the uphill neighbour decides the tangent
    let geoms = vec![
        Geometry::new(vec!["X".into()], vec![0.0, 0.0, 0.0]).unwrap(),
        Geometry::new(vec!["X".into()], vec![0.2, 0.0, 0.0]).unwrap(),
        Geometry::new(vec!["X".into()], vec![0.4, 0.0, 0.0]).unwrap(),
        Geometry::new(vec!["X".into()], vec![0.4, 0.3, 0.0]).unwrap(),
    ];
    let mut path = PathState::new(geoms, CoordType::Cartesian).unwrap();
    let registry = test_registry(5.0);
    attach(&mut path, &registry, "parabola");
    path.evaluate(CalcRequest::forces(), true).unwrap();

    // Energies rise along x up to image 2, image 3 has the same x as image 2
    let t2 = &path.tangents().unwrap()[2];
    assert!(t2[1] > 0.0);
}

#[test]
fn test_perpendicular_forces_remove_tangent_component() {
    let mut path = line_path(5);
    let registry = test_registry(0.3);
    attach(&mut path, &registry, "parabola");
    path.evaluate(CalcRequest::forces(), true).unwrap();

    let perp = path.perpendicular_forces().unwrap();
    let tangents = path.tangents().unwrap();
    for (i, t) in tangents.iter().enumerate() {
        let f = perp.rows(3 * i, 3).into_owned();
        assert_close(f.dot(t), 0.0, 1e-12);
    }
    // All forces on this straight path point along it
    assert_close(perp.norm(), 0.0, 1e-12);
}

#[test]
fn test_hei_index_and_splined_hei() {
    let mut path = line_path(7);
    let registry = test_registry(0.55);
    attach(&mut path, &registry, "parabola");
    path.evaluate(CalcRequest::forces(), true).unwrap();

    // Images at k/6; 0.5 is closest to the peak
    assert_eq!(path.hei_index().unwrap(), 3);

    let hei = path.splined_hei().unwrap();
    assert_close(hei.frac_index, 3.3, 1e-5);
    assert_close(hei.energy, 1.0, 1e-9);
    assert_close(hei.coords[0], 0.55, 1e-5);
    assert_close(hei.tangent[0], 1.0, 1e-9);
}

#[test]
fn test_splined_hei_falls_back_for_short_paths() {
    let mut path = line_path(3);
    let registry = test_registry(0.55);
    attach(&mut path, &registry, "parabola");
    path.evaluate(CalcRequest::forces(), true).unwrap();

    let hei = path.splined_hei().unwrap();
    assert_eq!(hei.frac_index, 1.0);
    assert_eq!(hei.coords, path.image(1).unwrap().cart_coords().clone());
}

#[test]
fn test_arc_length_parameters() {
    let path = PathState::new(
        common::geometries_at(&[0.0, 1.0, 3.0, 4.0]),
        CoordType::Cartesian,
    )
    .unwrap();
    let params = path.arc_length_parameters();
    assert_eq!(params.len(), 4);
    assert_close(params[1], 0.25, 1e-12);
    assert_close(params[2], 0.75, 1e-12);
    assert_close(params[3], 1.0, 1e-12);
}

#[test]
fn test_snapshot_restore() {
    let mut path = line_path(4);
    let snap = path.snapshot(7);
    assert_eq!(snap.cycle, 7);
    assert_eq!(snap.coords.len(), 4);

    let mut coords = path.image_cart_coords();
    for c in &mut coords {
        c[2] = 1.0;
    }
    path.set_image_cart_coords(coords).unwrap();
    assert_eq!(path.image(1).unwrap().cart_coords()[2], 1.0);

    path.restore(&snap).unwrap();
    assert_eq!(path.snapshot(7), snap);
}

#[test]
fn test_set_image_cart_coords_validates_before_applying() {
    let mut path = line_path(3);
    let before = path.image_cart_coords();
    let bad = vec![
        DVector::from_vec(vec![5.0, 5.0, 5.0]),
        DVector::from_vec(vec![5.0, 5.0]),
        DVector::from_vec(vec![5.0, 5.0, 5.0]),
    ];
    assert!(path.set_image_cart_coords(bad).is_err());
    assert_eq!(path.image_cart_coords(), before);
}

fn triangle(offset: Vector3<f64>, angle: f64) -> Geometry {
    let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), angle);
    let base = [
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.8, 0.0, 0.0),
        Vector3::new(0.3, 1.5, 0.4),
    ];
    let coords: Vec<Vector3<f64>> = base.iter().map(|p| rot * p + offset).collect();
    Geometry::new(
        vec!["O".into(), "H".into(), "H".into()],
        spatial::flatten(&coords).as_slice().to_vec(),
    )
    .unwrap()
}

#[test]
fn test_align_superposes_images() {
    let geoms = vec![
        triangle(Vector3::zeros(), 0.0),
        triangle(Vector3::new(2.0, -1.0, 0.5), 1.2),
        triangle(Vector3::new(-3.0, 0.0, 1.0), -0.7),
    ];
    let mut path = PathState::new(geoms, CoordType::Cartesian).unwrap();
    assert!(path.align());

    let coords = path.image_cart_coords();
    for c in &coords[1..] {
        assert!(spatial::rmsd(c, &coords[0]) < 1e-8);
    }
}

#[test]
fn test_align_skips_small_systems() {
    let mut path = line_path(3);
    let before = path.image_cart_coords();
    assert!(!path.align());
    assert_eq!(path.image_cart_coords(), before);
}
