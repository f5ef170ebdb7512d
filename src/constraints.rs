//! Constraint penalties and the aggregate loss.
//!
//! Every built-in here is a weighted scalar penalty built from ordinary
//! tensor ops, so the gradient w.r.t. the point coordinates comes from
//! autodiff.  Built-ins return a zero scalar when there are no pairs; that
//! zero stays attached to the points, so the optimiser still sees a (zero)
//! gradient and applies weight decay.

use candle_core::Tensor;
use ndarray::{Array1, Array2};

use crate::distances::{condensed_index, num_pairs, pairwise_distances_host};
use crate::types::{GeometryError, Result, DEFAULT_BARRIER_SHARPNESS};

pub use crate::types::Constraint;

// ─────────────────────────────────────────────────────────────
//  Aggregate loss
// ─────────────────────────────────────────────────────────────

/// loss = Σ_c c(points, distances), accumulated from a zero scalar.
///
/// Each term is reshaped to a scalar and cast to the working dtype.  The
/// first failing constraint aborts the evaluation.
pub fn total_loss(
    constraints: &[Box<dyn Constraint>],
    points: &Tensor,
    distances: &Tensor,
) -> Result<Tensor> {
    let mut loss = Tensor::zeros((), points.dtype(), points.device())?;
    for (index, constraint) in constraints.iter().enumerate() {
        let term = constraint
            .evaluate(points, distances)
            .map_err(|source| GeometryError::Constraint {
                index,
                name: constraint.name().to_string(),
                source,
            })?;
        if term.elem_count() != 1 {
            return Err(GeometryError::NonScalarConstraint {
                index,
                name: constraint.name().to_string(),
                shape: term.dims().to_vec(),
            });
        }
        loss = loss.add(&term.reshape(())?.to_dtype(loss.dtype())?)?;
    }
    Ok(loss)
}

// ─────────────────────────────────────────────────────────────
//  Softplus barrier
// ─────────────────────────────────────────────────────────────

/// Numerically stable log(1 + exp(z)) = max(z, 0) + log(1 + exp(−|z|)).
fn log1pexp(z: &Tensor) -> candle_core::Result<Tensor> {
    let tail = z.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    z.relu()?.add(&tail)
}

/// Smooth one-sided barrier, elementwise.
/// `k < 0` ⟹  penalise x < b  (min barrier).
/// `k > 0` ⟹  penalise x > b  (max barrier).
fn softplus(x: &Tensor, b: f64, k: f64) -> candle_core::Result<Tensor> {
    // z = −k(b − x) − 1
    log1pexp(&x.affine(k, -k * b - 1.0)?)
}

/// Sum over an empty slice of `like`: zero, but differentiable w.r.t. it.
fn zero(like: &Tensor) -> candle_core::Result<Tensor> {
    like.flatten_all()?.narrow(0, 0, 0)?.sum_all()
}

// ─────────────────────────────────────────────────────────────
//  Built-in constraints
// ─────────────────────────────────────────────────────────────

/// w · Σ_k (d_k − T)²  over every pair.
#[derive(Debug, Clone)]
pub struct TargetDistance {
    pub weight: f64,
    pub target: f64,
}

impl Constraint for TargetDistance {
    fn evaluate(&self, points: &Tensor, distances: &Tensor) -> candle_core::Result<Tensor> {
        if distances.elem_count() == 0 {
            return zero(points);
        }
        distances
            .affine(1.0, -self.target)?
            .sqr()?
            .sum_all()?
            .affine(self.weight, 0.0)
    }

    fn name(&self) -> &str {
        "TargetDistance"
    }
}

/// w · Σ_i (d[pair_i] − T_i)²  over selected pairs.
#[derive(Debug, Clone)]
pub struct TargetPairDistance {
    weight: f64,
    num_points: usize,
    condensed: Vec<u32>,
    targets: Vec<f64>,
}

impl TargetPairDistance {
    pub fn new(
        weight: f64,
        num_points: usize,
        pairs: &[(usize, usize)],
        targets: Vec<f64>,
    ) -> Result<Self> {
        if pairs.len() != targets.len() {
            return Err(GeometryError::InvalidConfig(format!(
                "{} pairs but {} target distances",
                pairs.len(),
                targets.len()
            )));
        }
        let condensed = pairs
            .iter()
            .map(|&(i, j)| {
                condensed_index(num_points, i, j)
                    .map(|k| k as u32)
                    .ok_or_else(|| {
                        GeometryError::InvalidConfig(format!(
                            "({i}, {j}) is not a pair of distinct points among {num_points}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            weight,
            num_points,
            condensed,
            targets,
        })
    }
}

impl Constraint for TargetPairDistance {
    fn evaluate(&self, points: &Tensor, distances: &Tensor) -> candle_core::Result<Tensor> {
        if self.condensed.is_empty() {
            return zero(points);
        }
        let expected = num_pairs(self.num_points);
        if distances.elem_count() != expected {
            return Err(candle_core::Error::Msg(format!(
                "TargetPairDistance built for {} points ({expected} pairs), got {} distances",
                self.num_points,
                distances.elem_count()
            )));
        }
        let device = distances.device();
        let ids = Tensor::from_slice(&self.condensed, self.condensed.len(), device)?;
        let targets = Tensor::from_slice(&self.targets, self.targets.len(), device)?
            .to_dtype(distances.dtype())?;
        distances
            .index_select(&ids, 0)?
            .sub(&targets)?
            .sqr()?
            .sum_all()?
            .affine(self.weight, 0.0)
    }

    fn name(&self) -> &str {
        "TargetPairDistance"
    }
}

/// w · Σ_k softplus(d_k, threshold, −sharpness): pushes pairs apart.
#[derive(Debug, Clone)]
pub struct MinDistance {
    pub weight: f64,
    pub threshold: f64,
    pub sharpness: f64,
}

impl MinDistance {
    pub fn new(weight: f64, threshold: f64) -> Self {
        Self {
            weight,
            threshold,
            sharpness: DEFAULT_BARRIER_SHARPNESS,
        }
    }
}

impl Constraint for MinDistance {
    fn evaluate(&self, points: &Tensor, distances: &Tensor) -> candle_core::Result<Tensor> {
        if distances.elem_count() == 0 {
            return zero(points);
        }
        softplus(distances, self.threshold, -self.sharpness)?
            .sum_all()?
            .affine(self.weight, 0.0)
    }

    fn name(&self) -> &str {
        "MinDistance"
    }
}

/// w · Σ_k softplus(d_k, threshold, +sharpness): pulls pairs together.
#[derive(Debug, Clone)]
pub struct MaxDistance {
    pub weight: f64,
    pub threshold: f64,
    pub sharpness: f64,
}

impl MaxDistance {
    pub fn new(weight: f64, threshold: f64) -> Self {
        Self {
            weight,
            threshold,
            sharpness: DEFAULT_BARRIER_SHARPNESS,
        }
    }
}

impl Constraint for MaxDistance {
    fn evaluate(&self, points: &Tensor, distances: &Tensor) -> candle_core::Result<Tensor> {
        if distances.elem_count() == 0 {
            return zero(points);
        }
        softplus(distances, self.threshold, self.sharpness)?
            .sum_all()?
            .affine(self.weight, 0.0)
    }

    fn name(&self) -> &str {
        "MaxDistance"
    }
}

/// w · (max d − min d).
#[derive(Debug, Clone)]
pub struct DistanceSpread {
    pub weight: f64,
}

impl Constraint for DistanceSpread {
    fn evaluate(&self, points: &Tensor, distances: &Tensor) -> candle_core::Result<Tensor> {
        if distances.elem_count() == 0 {
            return zero(points);
        }
        distances
            .max(0)?
            .sub(&distances.min(0)?)?
            .affine(self.weight, 0.0)
    }

    fn name(&self) -> &str {
        "DistanceSpread"
    }
}

/// w · Σ_i ‖p[idx_i] − t_i‖²: anchors selected points at target positions.
#[derive(Debug, Clone)]
pub struct TargetPoints {
    weight: f64,
    indices: Vec<u32>,
    target: Array2<f64>,
}

impl TargetPoints {
    /// `target` is `indices.len() × D`.
    pub fn new(weight: f64, indices: &[usize], target: Array2<f64>) -> Result<Self> {
        if indices.len() != target.nrows() {
            return Err(GeometryError::InvalidConfig(format!(
                "{} indices but {} target rows",
                indices.len(),
                target.nrows()
            )));
        }
        let indices = indices
            .iter()
            .map(|&i| {
                u32::try_from(i).map_err(|_| {
                    GeometryError::InvalidConfig(format!("point index {i} out of range"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            weight,
            indices,
            target,
        })
    }
}

impl Constraint for TargetPoints {
    fn evaluate(&self, points: &Tensor, _distances: &Tensor) -> candle_core::Result<Tensor> {
        if self.indices.is_empty() {
            return zero(points);
        }
        let (rows, cols) = points.dims2()?;
        if cols != self.target.ncols() {
            return Err(candle_core::Error::Msg(format!(
                "TargetPoints has {}-dimensional targets, points are {cols}-dimensional",
                self.target.ncols()
            )));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= rows) {
            return Err(candle_core::Error::Msg(format!(
                "TargetPoints index {bad} out of range for {rows} points"
            )));
        }
        let device = points.device();
        let ids = Tensor::from_slice(&self.indices, self.indices.len(), device)?;
        let target = Tensor::from_vec(
            self.target.iter().copied().collect::<Vec<f64>>(),
            self.target.dim(),
            device,
        )?
        .to_dtype(points.dtype())?;
        points
            .index_select(&ids, 0)?
            .sub(&target)?
            .sqr()?
            .sum_all()?
            .affine(self.weight, 0.0)
    }

    fn name(&self) -> &str {
        "TargetPoints"
    }
}

/// w · Σ_k (d_target,k − d_k)²: reproduce the pairwise-distance signature of
/// a reference configuration, up to rigid motion.
#[derive(Debug, Clone)]
pub struct ShapeMatch {
    weight: f64,
    target: Array1<f64>,
}

impl ShapeMatch {
    /// `reference` must have the same number of points as the engine.
    pub fn new(weight: f64, reference: &Array2<f64>) -> Self {
        Self {
            weight,
            target: pairwise_distances_host(reference),
        }
    }
}

impl Constraint for ShapeMatch {
    fn evaluate(&self, points: &Tensor, distances: &Tensor) -> candle_core::Result<Tensor> {
        if distances.elem_count() != self.target.len() {
            return Err(candle_core::Error::Msg(format!(
                "ShapeMatch reference has {} pairs, got {} distances",
                self.target.len(),
                distances.elem_count()
            )));
        }
        if self.target.is_empty() {
            return zero(points);
        }
        let target = Tensor::from_vec(self.target.to_vec(), self.target.len(), distances.device())?
            .to_dtype(distances.dtype())?;
        target
            .sub(distances)?
            .sqr()?
            .sum_all()?
            .affine(self.weight, 0.0)
    }

    fn name(&self) -> &str {
        "ShapeMatch"
    }
}
