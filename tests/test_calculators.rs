use std::path::Path;

use nalgebra::DVector;
use rxpath::core::domain::Geometry;
use rxpath::core::error::ConfigError;
use rxpath::core::params::CalcSpec;
use rxpath::engine::analytic::{AnaPot, AnalyticCalculator, MullerBrown, Potential2D};
use rxpath::engine::evaluator::{CalcRequest, CalcResult, Calculator, EvaluationError};
use rxpath::engine::operators::Shaker;
use rxpath::engine::registry::{BuildContext, CalculatorRegistry};

mod common;
use crate::common::{assert_close, line_geometries, scratch_dir};

fn atoms() -> Vec<String> {
    vec!["X".to_string()]
}

fn check_gradient<P: Potential2D>(p: &P, x: f64, y: f64) {
    let h = 1e-6;
    let (gx, gy) = p.gradient(x, y);
    let nx = (p.energy(x + h, y) - p.energy(x - h, y)) / (2.0 * h);
    let ny = (p.energy(x, y + h) - p.energy(x, y - h)) / (2.0 * h);
    assert!((gx - nx).abs() < 1e-5 * (1.0 + gx.abs()), "{} d/dx", p.name());
    assert!((gy - ny).abs() < 1e-5 * (1.0 + gy.abs()), "{} d/dy", p.name());

    let (hxx, hxy, hyy) = p.hessian(x, y);
    let nxx = (p.gradient(x + h, y).0 - p.gradient(x - h, y).0) / (2.0 * h);
    let nxy = (p.gradient(x, y + h).0 - p.gradient(x, y - h).0) / (2.0 * h);
    let nyy = (p.gradient(x, y + h).1 - p.gradient(x, y - h).1) / (2.0 * h);
    assert!((hxx - nxx).abs() < 1e-4 * (1.0 + hxx.abs()));
    assert!((hxy - nxy).abs() < 1e-4 * (1.0 + hxy.abs()));
    assert!((hyy - nyy).abs() < 1e-4 * (1.0 + hyy.abs()));
}

#[test]
fn test_analytic_derivatives() {
    for &(x, y) in &[(-1.0, 1.0), (0.6, 1.5), (1.9, 3.8), (0.2, -0.3)] {
        check_gradient(&AnaPot, x, y);
    }
    for &(x, y) in &[(-0.55, 1.44), (0.62, 0.03), (-0.05, 0.47)] {
        check_gradient(&MullerBrown, x, y);
    }
}

#[test]
fn test_anapot_stationary_points() {
    // Minima and the saddle point between them
    for &(x, y) in &[(-1.05274, 1.02776), (1.94101, 3.85427), (0.61173, 1.49297)] {
        let (gx, gy) = AnaPot.gradient(x, y);
        assert!(gx.abs() < 1e-3 && gy.abs() < 1e-3, "gradient at ({}, {})", x, y);
    }
}

#[test]
fn test_analytic_calculator_forces() {
    let mut calc = AnalyticCalculator::new(AnaPot);
    let coords = DVector::from_vec(vec![0.3, 1.2, 0.7]);
    let result = calc
        .evaluate(&atoms(), &coords, CalcRequest::forces().with_hessian(true))
        .unwrap();

    let (gx, gy) = AnaPot.gradient(0.3, 1.2);
    let forces = result.forces.unwrap();
    assert_close(result.energy, AnaPot.energy(0.3, 1.2), 1e-14);
    assert_close(forces[0], -gx, 1e-14);
    assert_close(forces[1], -gy, 1e-14);
    assert_eq!(forces[2], 0.0);
    let hessian = result.hessian.unwrap();
    assert_eq!(hessian.shape(), (3, 3));
    assert_eq!(hessian[(2, 2)], 0.0);
    assert_eq!(calc.calc_counter(), 1);

    let energy_only = calc.evaluate(&atoms(), &coords, CalcRequest::energy()).unwrap();
    assert!(energy_only.forces.is_none());
    assert_eq!(calc.calc_counter(), 2);
}

#[test]
fn test_analytic_calculator_needs_three_coordinates() {
    let mut calc = AnalyticCalculator::new(MullerBrown);
    let result = calc.evaluate(&atoms(), &DVector::from_vec(vec![0.1]), CalcRequest::energy());
    assert!(matches!(result, Err(EvaluationError::ShapeMismatch { .. })));
}

#[test]
fn test_result_validation() {
    let request = CalcRequest::forces();
    let ok = CalcResult {
        energy: 1.0,
        forces: Some(DVector::zeros(6)),
        hessian: None,
    };
    ok.validate("t", 6, request).unwrap();
    assert!(matches!(
        ok.validate("t", 9, request),
        Err(EvaluationError::ShapeMismatch { quantity: "forces", expected: 9, got: 6, .. })
    ));
    assert!(matches!(
        ok.validate("t", 6, request.with_hessian(true)),
        Err(EvaluationError::Unsupported { what: "hessian", .. })
    ));

    let missing = CalcResult {
        energy: 1.0,
        forces: None,
        hessian: None,
    };
    missing.validate("t", 6, CalcRequest::energy()).unwrap();
    assert!(matches!(
        missing.validate("t", 6, request),
        Err(EvaluationError::Unsupported { what: "forces", .. })
    ));

    let nan = CalcResult {
        energy: 0.0,
        forces: Some(DVector::from_element(6, f64::INFINITY)),
        hessian: None,
    };
    assert!(matches!(
        nan.validate("t", 6, request),
        Err(EvaluationError::NonFinite { quantity: "forces", .. })
    ));
}

#[test]
fn test_registry_lookup() {
    let registry = CalculatorRegistry::with_defaults();
    assert!(registry.contains("AnaPot"));
    assert!(registry.contains("mullerbrown"));
    assert!(registry.contains("external"));
    assert_eq!(registry.keys().count(), 3);

    let ctx = BuildContext {
        image: 4,
        out_dir: Path::new("."),
    };
    let calc = registry.build(&CalcSpec::new("anapot"), ctx).unwrap();
    assert_eq!(calc.name(), "anapot");

    let external = CalcSpec::new("external").with_option("program", serde_json::json!("true"));
    assert_eq!(registry.build(&external, ctx).unwrap().name(), "external_004");

    assert!(matches!(
        registry.build(&CalcSpec::new("external"), ctx),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
        registry.build(&CalcSpec::new("gaussian"), ctx),
        Err(ConfigError::UnknownCalculator(_))
    ));
    assert!(CalculatorRegistry::empty().keys().next().is_none());
}

#[test]
fn test_shaker_moves_only_interior_images() {
    let mut geoms: Vec<Geometry> = line_geometries(5);
    let before = geoms.clone();
    let mut shaker = Shaker::new(0.2, Some(42));
    shaker.shake_interior(&mut geoms);

    assert_eq!(geoms[0], before[0]);
    assert_eq!(geoms[4], before[4]);
    for (g, b) in geoms[1..4].iter().zip(&before[1..4]) {
        assert_ne!(g, b);
        for (x, y) in g.coords.iter().zip(&b.coords) {
            assert!((x - y).abs() <= 0.2);
        }
    }

    // Same seed, same noise
    let mut again = before.clone();
    Shaker::new(0.2, Some(42)).shake_interior(&mut again);
    assert_eq!(again, geoms);

    let v = DVector::from_vec(vec![1.0, 2.0]);
    let r = Shaker::new(0.0, Some(1)).rattle(&v);
    assert_eq!(r, v);
}

#[cfg(unix)]
mod external {
    use super::*;
    use rxpath::engine::evaluator::Checkpoint;
    use rxpath::engine::external::ExternalCalculator;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_external_round_trip() {
        let dir = scratch_dir("external_ok");
        let script = r#"cat > /dev/null; echo '{"energy": -1.5, "forces": [0.1, 0.0, -0.1], "checkpoint": {"guess": "orbitals.bin"}}'"#;
        let mut calc = ExternalCalculator::new("sh", &sh(script), 2, &dir);
        assert_eq!(calc.name(), "external_002");

        let coords = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        let result = calc.evaluate(&atoms(), &coords, CalcRequest::forces()).unwrap();
        assert_eq!(result.energy, -1.5);
        assert_eq!(result.forces.unwrap()[2], -0.1);
        assert_eq!(calc.calc_counter(), 1);

        let checkpoint = calc.checkpoint().unwrap();
        assert_eq!(checkpoint.source, 2);
        assert_eq!(checkpoint.payload["guess"], "orbitals.bin");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_external_receives_request_and_restart() {
        let dir = scratch_dir("external_echo");
        // Answers with the number of characters it read as the energy
        let script = r#"n=$(wc -c); echo "{\"energy\": $n}""#;
        let mut calc = ExternalCalculator::new("sh", &sh(script), 0, &dir);
        let coords = DVector::from_vec(vec![0.0, 0.0, 0.0]);

        let plain = calc.evaluate(&atoms(), &coords, CalcRequest::energy()).unwrap();
        assert!(calc.accept_checkpoint(Checkpoint {
            source: 1,
            payload: serde_json::json!({ "guess": "a long restart payload" }),
        }));
        let restarted = calc.evaluate(&atoms(), &coords, CalcRequest::energy()).unwrap();
        assert!(restarted.energy > plain.energy);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_external_failure_keeps_the_input() {
        let dir = scratch_dir("external_fail");
        let mut calc = ExternalCalculator::new("sh", &sh("cat > /dev/null; echo boom >&2; exit 3"), 1, &dir);
        let coords = DVector::from_vec(vec![0.0, 0.0, 0.0]);

        let err = calc.evaluate(&atoms(), &coords, CalcRequest::forces()).unwrap_err();
        match &err {
            EvaluationError::ProcessFailed { stderr, input, .. } => {
                assert_eq!(stderr, "boom");
                assert!(input.contains("\"calc_number\":1"));
            }
            other => panic!("expected ProcessFailed, got {:?}", other),
        }
        let saved = err.snapshot().unwrap();
        assert_eq!(*saved, dir.join("crashed_external_001").join("input.json"));
        assert!(saved.exists());
        assert_eq!(calc.calc_counter(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_external_talks_while_reading() {
        let dir = scratch_dir("external_chatty");
        // Fills its stdout pipe before it reads any input
        let script = r#"head -c 200000 /dev/zero | tr '\0' ' '; cat > /dev/null; echo '{"energy": 2.5}'"#;
        let mut calc = ExternalCalculator::new("sh", &sh(script), 0, &dir);
        let atoms = vec!["X".to_string(); 20000];
        let coords = DVector::zeros(60000);
        let result = calc.evaluate(&atoms, &coords, CalcRequest::energy()).unwrap();
        assert_eq!(result.energy, 2.5);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_external_garbage_is_a_parse_error() {
        let dir = scratch_dir("external_parse");
        let mut calc = ExternalCalculator::new("sh", &sh("cat > /dev/null; echo not json"), 0, &dir);
        let coords = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        let err = calc.evaluate(&atoms(), &coords, CalcRequest::energy()).unwrap_err();
        assert!(matches!(err, EvaluationError::Parse { .. }));
        assert!(err.snapshot().is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_external_missing_program() {
        let dir = scratch_dir("external_spawn");
        let mut calc = ExternalCalculator::new("/nonexistent/rxpath-calc", &[], 0, &dir);
        let coords = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        let err = calc.evaluate(&atoms(), &coords, CalcRequest::energy()).unwrap_err();
        assert!(matches!(err, EvaluationError::Spawn { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_image_placeholder_in_arguments() {
        let args = vec!["--scratch".to_string(), "img_$IMAGE/run".to_string()];
        let calc = ExternalCalculator::new("calc", &args, 7, Path::new("."));
        assert_eq!(calc.args(), &["--scratch".to_string(), "img_007/run".to_string()]);
    }
}
