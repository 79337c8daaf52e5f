use nalgebra::{DMatrix, DVector};
use rxpath::core::domain::{CoordType, Geometry};
use rxpath::core::error::{ConfigError, PathError};
use rxpath::cos::chain::PathState;
use rxpath::cos::interpolate;
use rxpath::cos::reparam::{Parametrization, Reparametrizer};
use rxpath::cos::spline::{linspace, ParametricSpline};

mod common;
use crate::common::{assert_close, attach, geometries_at, test_registry};

fn points_on_x(xs: &[f64]) -> Vec<DVector<f64>> {
    xs.iter()
        .map(|&x| DVector::from_column_slice(&[x, 0.0, 0.0]))
        .collect()
}

fn xs(points: &[DVector<f64>]) -> Vec<f64> {
    points.iter().map(|p| p[0]).collect()
}

#[test]
fn test_spline_needs_four_points() {
    let params = linspace(0.0, 1.0, 3);
    let points = DMatrix::from_column_slice(3, 1, &[0.0, 1.0, 0.0]);
    match ParametricSpline::fit(&params, &points) {
        Err(PathError::Config(ConfigError::TooFewControlPoints { needed, got })) => {
            assert_eq!(needed, 4);
            assert_eq!(got, 3);
        }
        other => panic!("expected TooFewControlPoints, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_spline_reproduces_cubic() {
    let params = linspace(0.0, 1.0, 6);
    let f = |x: f64| 2.0 * x.powi(3) - x * x + 0.5;
    let values: Vec<f64> = params.iter().map(|&x| f(x)).collect();
    let spline = ParametricSpline::fit(&params, &DMatrix::from_column_slice(6, 1, &values)).unwrap();

    for x in linspace(0.0, 1.0, 17) {
        assert_close(spline.evaluate(x)[0], f(x), 1e-10);
        assert_close(spline.derivative(x)[0], 6.0 * x * x - 2.0 * x, 1e-8);
    }
    assert_eq!(spline.dim(), 1);
    assert_eq!(spline.knots().len(), 6);
}

#[test]
fn test_equal_mode_spaces_images_evenly() {
    let points = points_on_x(&[0.0, 0.05, 0.1, 0.5, 0.7, 0.9, 1.0]);
    let reparam = Reparametrizer::new(Parametrization::Equal);
    let out = reparam.respace(&points, None, points.len()).unwrap();

    assert_eq!(out.len(), 7);
    for (k, x) in xs(&out).into_iter().enumerate() {
        assert_close(x, k as f64 / 6.0, 1e-9);
    }
    for p in &out {
        assert_close(p[1], 0.0, 1e-12);
        assert_close(p[2], 0.0, 1e-12);
    }
}

#[test]
fn test_endpoints_are_exact() {
    let points: Vec<DVector<f64>> = (0..5)
        .map(|i| {
            let t = i as f64 / 4.0;
            DVector::from_column_slice(&[t.cos() * 1.3, t.sin() * 0.7 + 0.1, t * t])
        })
        .collect();
    let reparam = Reparametrizer::new(Parametrization::Equal);
    let out = reparam.respace(&points, None, 9).unwrap();

    assert_eq!(out.len(), 9);
    assert_eq!(out[0], points[0]);
    assert_eq!(out[8], points[4]);
}

#[test]
fn test_too_few_images_is_config_error() {
    let points = points_on_x(&[0.0, 0.5, 1.0]);
    let reparam = Reparametrizer::new(Parametrization::Equal);
    let err = reparam.respace(&points, None, 3).unwrap_err();
    assert!(matches!(
        err,
        PathError::Config(ConfigError::TooFewControlPoints { needed: 4, got: 3 })
    ));
}

#[test]
fn test_energy_mode_packs_images_near_the_top() {
    let points = points_on_x(&[0.0, 0.1, 0.3, 0.45, 0.7, 0.85, 1.0]);
    let energies = [0.1, 0.3, 0.8, 1.0, 0.8, 0.3, 0.1];

    let equal = xs(&Reparametrizer::new(Parametrization::Equal)
        .respace(&points, Some(&energies), 7)
        .unwrap());
    let weighted = xs(&Reparametrizer::new(Parametrization::Energy)
        .respace(&points, Some(&energies), 7)
        .unwrap());

    for (k, x) in equal.iter().enumerate() {
        assert_close(*x, k as f64 / 6.0, 1e-9);
    }
    for k in 2..4 {
        let mid_gap = weighted[k + 1] - weighted[k];
        let equal_gap = equal[k + 1] - equal[k];
        assert!(
            mid_gap < equal_gap,
            "images should crowd the maximum: gap {} is {} in equal mode {}",
            k,
            mid_gap,
            equal_gap
        );
    }
    assert!(weighted[1] - weighted[0] > equal[1] - equal[0]);
    assert!(weighted[6] - weighted[5] > equal[6] - equal[5]);
    assert_eq!(weighted[0], 0.0);
    assert_eq!(weighted[6], 1.0);
}

#[test]
fn test_energy_weights_follow_segment_means() {
    let points = points_on_x(&[0.0, 1.0, 2.0, 3.0]);
    let energies = [0.0, 2.0, 2.0, 0.0];
    let reparam = Reparametrizer::new(Parametrization::Energy);
    let params = reparam.parameters(&points, Some(&energies)).unwrap();

    // means 1, 2, 1 -> weights sqrt(0.5), 1, sqrt(0.5)
    let w = 0.5f64.sqrt();
    let total = 2.0 * w + 1.0;
    assert_close(params[1], w / total, 1e-12);
    assert_close(params[2], (w + 1.0) / total, 1e-12);
    assert_close(params[3], 1.0, 1e-12);
}

#[test]
fn test_energy_mode_with_zero_energies_is_equal_mode() {
    let points = points_on_x(&[0.0, 0.05, 0.1, 0.5, 0.7, 0.9, 1.0]);
    let zeros = [0.0; 7];
    let energy = Reparametrizer::new(Parametrization::Energy)
        .respace(&points, Some(&zeros), 7)
        .unwrap();
    let equal = Reparametrizer::new(Parametrization::Equal)
        .respace(&points, None, 7)
        .unwrap();
    for (a, b) in energy.iter().zip(&equal) {
        assert_close((a - b).norm(), 0.0, 1e-12);
    }
}

#[test]
fn test_energy_mode_requires_energies() {
    let points = points_on_x(&[0.0, 0.3, 0.6, 1.0]);
    let reparam = Reparametrizer::new(Parametrization::Energy);
    assert!(matches!(
        reparam.parameters(&points, None),
        Err(PathError::MissingEnergies(_))
    ));
    assert!(matches!(
        reparam.parameters(&points, Some(&[1.0, 2.0])),
        Err(PathError::ShapeMismatch { expected: 4, got: 2 })
    ));
}

#[test]
fn test_coincident_images_get_uniform_parameters() {
    let points = points_on_x(&[0.5, 0.5, 0.5, 0.5, 0.5]);
    let reparam = Reparametrizer::new(Parametrization::Equal);
    let params = reparam.parameters(&points, None).unwrap();
    assert_eq!(params, linspace(0.0, 1.0, 5));

    let out = reparam.respace(&points, None, 5).unwrap();
    assert!(out.iter().all(|p| (p[0] - 0.5).abs() < 1e-12));
}

#[test]
fn test_parametrization_names() {
    assert_eq!("equal".parse::<Parametrization>().unwrap(), Parametrization::Equal);
    assert_eq!(" Energy ".parse::<Parametrization>().unwrap(), Parametrization::Energy);
    assert!(matches!(
        "arc".parse::<Parametrization>(),
        Err(ConfigError::UnknownParametrization(_))
    ));
    assert_eq!(Parametrization::Energy.to_string(), "energy");
    assert_eq!(Parametrization::default(), Parametrization::Equal);
}

#[test]
fn test_reparametrize_path_in_place() {
    let mut path = rxpath::cos::chain::PathState::new(
        geometries_at(&[0.0, 0.1, 0.15, 0.2, 1.0]),
        Default::default(),
    )
    .unwrap();
    let registry = test_registry(0.5);
    attach(&mut path, &registry, "parabola");
    path.evaluate(Default::default(), false).unwrap();

    Reparametrizer::new(Parametrization::Equal)
        .reparametrize(&mut path)
        .unwrap();

    let positions: Vec<f64> = path.image_cart_coords().iter().map(|c| c[0]).collect();
    for (k, x) in positions.iter().enumerate() {
        assert_close(*x, k as f64 / 4.0, 1e-9);
    }
    // Endpoints kept their results, moved images lost theirs
    assert!(path.image(0).unwrap().energy().is_some());
    assert!(path.image(4).unwrap().energy().is_some());
    assert!(path.image(2).unwrap().energy().is_none());
}

#[test]
fn test_energy_reparametrize_needs_evaluated_path() {
    let mut path = rxpath::cos::chain::PathState::new(
        geometries_at(&[0.0, 0.25, 0.5, 0.75, 1.0]),
        Default::default(),
    )
    .unwrap();
    let err = Reparametrizer::new(Parametrization::Energy)
        .reparametrize(&mut path)
        .unwrap_err();
    assert!(matches!(err, PathError::MissingEnergies(0)));

    // Energies from an earlier cycle can stand in for the missing ones
    Reparametrizer::new(Parametrization::Energy)
        .reparametrize_with_energies(&mut path, &[0.1, 0.5, 1.0, 0.5, 0.1])
        .unwrap();
    let xs: Vec<f64> = path.image_cart_coords().iter().map(|c| c[0]).collect();
    assert_eq!(xs[0], 0.0);
    assert_eq!(xs[4], 1.0);
    assert_close(xs[2], 0.5, 1e-9);
}

#[test]
fn test_two_images_grow_into_an_even_string() {
    let end = |dx: f64| {
        Geometry::new(
            vec!["O".into(), "H".into(), "H".into()],
            vec![0.0, 0.0, 0.0, 1.8 + dx, 0.0, 0.0, -0.4, 1.7 + dx, 0.3 * dx],
        )
        .unwrap()
    };
    let two = [end(0.0), end(1.2)];
    let geoms = interpolate::linear(&two, 3).unwrap();
    let mut path = PathState::new(geoms, CoordType::Cartesian).unwrap();
    assert_eq!(path.len(), 5);

    Reparametrizer::new(Parametrization::Equal)
        .reparametrize(&mut path)
        .unwrap();

    let params = path.arc_length_parameters();
    for (p, e) in params.iter().zip([0.0, 0.25, 0.5, 0.75, 1.0]) {
        assert_close(*p, e, 1e-9);
    }
    let coords = path.image_cart_coords();
    assert_eq!(coords[0].as_slice(), two[0].coords.as_slice());
    assert_eq!(coords[4].as_slice(), two[1].coords.as_slice());
}
