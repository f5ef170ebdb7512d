//! Finite-difference gradient tests for every built-in constraint.
//!
//! A fixed 5-point cloud in 3-D is evaluated in f64 on the CPU.
//! `value_and_gradient` produces the autodiff gradient, and every
//! coordinate is compared against a central-difference estimate:
//!
//!     dL/dP_ij  ≈  [ L(P + h e_ij) − L(P − h e_ij) ] / 2h
//!
//! The gradient flows through the pairwise-distance gather, so these tests
//! also cover the backward pass of `PairIndex::distances`.

use candle_core::{DType, Device, Tensor};
use geometric_constraints::constraints::*;
use geometric_constraints::distances::PairIndex;
use geometric_constraints::gradients::{value, value_and_gradient};
use geometric_constraints::points::PointCloud;
use ndarray::{array, Array2};

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// Five points in general position (all pairwise distances distinct).
fn cloud() -> Array2<f64> {
    array![
        [0.0, 0.0, 0.0],
        [1.1, 0.2, -0.3],
        [0.4, 1.7, 0.5],
        [-0.8, 0.6, 1.2],
        [0.3, -0.9, 2.1],
    ]
}

fn eval_loss(points: &Array2<f64>, constraints: &[Box<dyn Constraint>]) -> f64 {
    let cloud = PointCloud::from_array(points, DType::F64, &Device::Cpu).unwrap();
    let pairs = PairIndex::new(points.nrows(), &Device::Cpu).unwrap();
    value(&cloud, &pairs, constraints)
        .unwrap()
        .to_scalar::<f64>()
        .unwrap()
}

fn fd_gradient_check(constraints: &[Box<dyn Constraint>], h: f64, tol_abs: f64, tol_rel: f64) {
    let points = cloud();
    let (n, d) = points.dim();

    // Autodiff gradient
    let pc = PointCloud::from_array(&points, DType::F64, &Device::Cpu).unwrap();
    let pairs = PairIndex::new(n, &Device::Cpu).unwrap();
    let eval = value_and_gradient(&pc, &pairs, constraints).unwrap();
    let grad = eval.gradient.as_ref().expect("loss should depend on the points");
    let grad_ad = Array2::from_shape_vec((n, d), grad.flatten_all().unwrap().to_vec1::<f64>().unwrap()).unwrap();

    // Central differences
    let mut grad_fd = Array2::<f64>::zeros((n, d));
    let mut plus = points.clone();
    let mut minus = points.clone();
    for i in 0..n {
        for k in 0..d {
            plus[[i, k]] = points[[i, k]] + h;
            minus[[i, k]] = points[[i, k]] - h;

            grad_fd[[i, k]] = (eval_loss(&plus, constraints) - eval_loss(&minus, constraints)) / (2.0 * h);

            // Restore
            plus[[i, k]] = points[[i, k]];
            minus[[i, k]] = points[[i, k]];
        }
    }

    // Print diagnostics before asserting
    eprintln!("──────────────────────────────────────────────");
    eprintln!("FD gradient check  (h = {h:.1e}, loss = {:.6e})", eval.loss_value().unwrap());
    for i in 0..n {
        for k in 0..d {
            let (a, f) = (grad_ad[[i, k]], grad_fd[[i, k]]);
            eprintln!("  p[{i},{k}]  autodiff={a:+12.6e}  fd={f:+12.6e}  abs={:.2e}", (a - f).abs());
        }
    }
    eprintln!("──────────────────────────────────────────────");

    for i in 0..n {
        for k in 0..d {
            let (a, f) = (grad_ad[[i, k]], grad_fd[[i, k]]);
            let abs_err = (a - f).abs();
            let rel_err = abs_err / a.abs().max(f.abs()).max(1e-14);
            assert!(
                abs_err < tol_abs || rel_err < tol_rel,
                "p[{i},{k}]: autodiff={a:.8e}, fd={f:.8e}, abs_err={abs_err:.3e}, rel_err={rel_err:.3e}",
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Tests: one constraint at a time
// ─────────────────────────────────────────────────────────────

#[test]
fn fd_target_distance() {
    let constraints: Vec<Box<dyn Constraint>> = vec![Box::new(TargetDistance { weight: 1.5, target: 1.0 })];
    fd_gradient_check(&constraints, 1e-6, 1e-6, 1e-4);
}

#[test]
fn fd_target_pair_distance() {
    let constraints: Vec<Box<dyn Constraint>> = vec![Box::new(
        TargetPairDistance::new(2.0, 5, &[(0, 1), (4, 2), (1, 3)], vec![1.0, 0.5, 2.0]).unwrap(),
    )];
    fd_gradient_check(&constraints, 1e-6, 1e-6, 1e-4);
}

/// Threshold sits inside the spread of distances so some terms are in the
/// steep part of the barrier and some in the flat tail.
#[test]
fn fd_min_distance() {
    let constraints: Vec<Box<dyn Constraint>> = vec![Box::new(MinDistance::new(1.0, 1.5))];
    fd_gradient_check(&constraints, 1e-6, 1e-6, 1e-4);
}

#[test]
fn fd_max_distance() {
    let constraints: Vec<Box<dyn Constraint>> = vec![Box::new(MaxDistance {
        weight: 0.5,
        threshold: 1.8,
        sharpness: 4.0,
    })];
    fd_gradient_check(&constraints, 1e-6, 1e-6, 1e-4);
}

#[test]
fn fd_distance_spread() {
    let constraints: Vec<Box<dyn Constraint>> = vec![Box::new(DistanceSpread { weight: 1.0 })];
    fd_gradient_check(&constraints, 1e-6, 1e-6, 1e-4);
}

#[test]
fn fd_target_points() {
    let target = array![[1.0, 1.0, 1.0], [-1.0, 0.0, 2.0]];
    let constraints: Vec<Box<dyn Constraint>> =
        vec![Box::new(TargetPoints::new(0.7, &[2, 4], target).unwrap())];
    fd_gradient_check(&constraints, 1e-6, 1e-6, 1e-4);
}

#[test]
fn fd_shape_match() {
    let reference = array![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
    ];
    let constraints: Vec<Box<dyn Constraint>> = vec![Box::new(ShapeMatch::new(1.0, &reference))];
    fd_gradient_check(&constraints, 1e-6, 1e-6, 1e-4);
}

/// A caller-supplied closure using the points directly: squared distance
/// of the centroid from the origin.
#[test]
fn fd_custom_closure() {
    let centroid: Box<dyn Constraint> = Box::new(|p: &Tensor, _d: &Tensor| -> candle_core::Result<Tensor> {
        p.mean(0)?.sqr()?.sum_all()
    });
    fd_gradient_check(&[centroid], 1e-6, 1e-6, 1e-4);
}

// ─────────────────────────────────────────────────────────────
//  Tests: aggregate
// ─────────────────────────────────────────────────────────────

#[test]
fn fd_combined() {
    let constraints: Vec<Box<dyn Constraint>> = vec![
        Box::new(TargetDistance { weight: 1.0, target: 1.2 }),
        Box::new(MinDistance::new(0.5, 1.0)),
        Box::new(TargetPoints::new(1.0, &[0], array![[0.5, 0.5, 0.5]]).unwrap()),
        Box::new(|_p: &Tensor, d: &Tensor| -> candle_core::Result<Tensor> { d.sum_all()?.affine(0.1, 0.0) }),
    ];
    fd_gradient_check(&constraints, 1e-6, 1e-6, 1e-4);
}

/// The aggregate is the plain sum of the individual penalties.
#[test]
fn aggregate_is_sum_of_terms() {
    let points = cloud();
    let a: Box<dyn Constraint> = Box::new(TargetDistance { weight: 1.0, target: 1.0 });
    let b: Box<dyn Constraint> = Box::new(DistanceSpread { weight: 2.0 });

    let la = eval_loss(&points, std::slice::from_ref(&a));
    let lb = eval_loss(&points, std::slice::from_ref(&b));
    let both = eval_loss(&points, &[a, b]);

    assert!((both - (la + lb)).abs() < 1e-12, "{both} != {la} + {lb}");
}

/// No constraints: zero loss and no gradient for the points.
#[test]
fn empty_constraint_list_has_no_gradient() {
    let pc = PointCloud::from_array(&cloud(), DType::F64, &Device::Cpu).unwrap();
    let pairs = PairIndex::new(5, &Device::Cpu).unwrap();
    let eval = value_and_gradient(&pc, &pairs, &[]).unwrap();

    assert_eq!(eval.loss_value().unwrap(), 0.0);
    assert!(eval.gradient.is_none());
}

/// Two coincident rows: their distance is exactly zero, and its subgradient
/// is zero rather than NaN, so only the genuine pairs move the points.
#[test]
fn coincident_points_have_finite_gradient() {
    let points = array![[0.5, 0.5], [0.5, 0.5], [2.0, 0.0]];
    let pc = PointCloud::from_array(&points, DType::F64, &Device::Cpu).unwrap();
    let pairs = PairIndex::new(3, &Device::Cpu).unwrap();

    let d = pairs.distances(pc.values()).unwrap().to_vec1::<f64>().unwrap();
    assert_eq!(d[0], 0.0);

    let constraints: Vec<Box<dyn Constraint>> = vec![Box::new(TargetDistance { weight: 1.0, target: 1.0 })];
    let eval = value_and_gradient(&pc, &pairs, &constraints).unwrap();
    let grad = eval.gradient.as_ref().unwrap().to_vec2::<f64>().unwrap();
    assert!(grad.iter().flatten().all(|g| g.is_finite()), "gradient = {grad:?}");

    // Rows 0 and 1 only feel their pair with row 2: 2(d − 1)(p − p2)/d.
    let d02 = d[1];
    let scale = 2.0 * (d02 - 1.0) / d02;
    let expected = [scale * (0.5 - 2.0), scale * 0.5];
    for row in &grad[..2] {
        for (g, e) in row.iter().zip(expected) {
            assert!((g - e).abs() < 1e-12, "{g} vs {e}");
        }
    }
}

/// A single point has no pairs, but the loss still reaches it: the
/// gradient exists and is zero.
#[test]
fn single_point_gradient_is_zero_not_missing() {
    let pc = PointCloud::from_array(&array![[0.3, -1.2, 0.8]], DType::F64, &Device::Cpu).unwrap();
    let pairs = PairIndex::new(1, &Device::Cpu).unwrap();
    let constraints: Vec<Box<dyn Constraint>> = vec![
        Box::new(TargetDistance { weight: 1.0, target: 1.0 }),
        Box::new(DistanceSpread { weight: 1.0 }),
        Box::new(|_p: &Tensor, d: &Tensor| -> candle_core::Result<Tensor> {
            d.affine(1.0, -1.0)?.sqr()?.sum_all()
        }),
    ];

    let eval = value_and_gradient(&pc, &pairs, &constraints).unwrap();
    assert_eq!(eval.loss_value().unwrap(), 0.0);
    let grad = eval.gradient.as_ref().expect("single point should still get a gradient");
    assert_eq!(grad.dims(), &[1, 3]);
    assert!(grad.flatten_all().unwrap().to_vec1::<f64>().unwrap().iter().all(|&g| g == 0.0));
}

#[test]
fn invalid_built_in_arguments_are_rejected() {
    assert!(TargetPairDistance::new(1.0, 4, &[(1, 1)], vec![1.0]).is_err());
    assert!(TargetPairDistance::new(1.0, 4, &[(0, 4)], vec![1.0]).is_err());
    assert!(TargetPairDistance::new(1.0, 4, &[(0, 1)], vec![]).is_err());
    assert!(TargetPoints::new(1.0, &[0, 1], array![[0.0, 0.0]]).is_err());
}
