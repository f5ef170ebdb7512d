//! Aggregate loss and its gradient w.r.t. the point coordinates.
//!
//! Forward:   P  →  d = pdist(P)  →  L = Σ_c c(P, d)
//! Backward:  reverse-mode autodiff through the whole graph, read off at P.
//!
//! Each call builds its graph from scratch and `backward()` returns a fresh
//! gradient store, so nothing accumulates from one step into the next.

use candle_core::{DType, Tensor};

use crate::constraints::total_loss;
use crate::distances::PairIndex;
use crate::points::PointCloud;
use crate::types::{Constraint, Result};

/// Output of one forward + backward pass.
pub struct Evaluation {
    /// Aggregate loss, a detached scalar in the working dtype.
    pub loss: Tensor,
    /// dL/dP with the same shape as the points.  `None` when the loss does
    /// not depend on the coordinates at all (e.g. no constraints).
    pub gradient: Option<Tensor>,
}

impl Evaluation {
    /// Copy the loss to the host.
    pub fn loss_value(&self) -> Result<f64> {
        scalar_value(&self.loss)
    }
}

pub(crate) fn scalar_value(t: &Tensor) -> Result<f64> {
    Ok(t.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}

/// Forward pass only.
pub fn value(
    cloud: &PointCloud,
    pairs: &PairIndex,
    constraints: &[Box<dyn Constraint>],
) -> Result<Tensor> {
    let distances = pairs.distances(cloud.values())?;
    total_loss(constraints, cloud.values(), &distances)
}

/// Forward pass, then reverse-mode gradient of the loss w.r.t. the points.
///
/// A constraint failure surfaces here, before any gradient exists, so the
/// caller never sees a partial step.
pub fn value_and_gradient(
    cloud: &PointCloud,
    pairs: &PairIndex,
    constraints: &[Box<dyn Constraint>],
) -> Result<Evaluation> {
    let loss = value(cloud, pairs, constraints)?;
    let grads = loss.backward()?;
    let gradient = grads.get(cloud.values()).map(|g| g.detach());
    Ok(Evaluation {
        loss: loss.detach(),
        gradient,
    })
}
