//! Pairwise Euclidean distances in condensed order.
//!
//! For N points the unordered pairs (i, j), i < j, are enumerated
//! lexicographically:
//!
//! ```text
//! (0,1), (0,2), …, (0,N−1), (1,2), …, (N−2,N−1)
//! ```
//!
//! so pair (i, j) sits at `k = N·i − i(i+1)/2 + (j − i − 1)` and there are
//! N(N−1)/2 of them.  The device-side computation is a gather of both
//! endpoints followed by ‖p_i − p_j‖₂, which keeps the whole thing inside
//! the autodiff graph.  A coincident pair contributes a zero gradient.

use candle_core::{Device, Tensor};
use ndarray::{Array1, Array2};

use crate::types::{GeometryError, Result};

/// N(N−1)/2.
pub fn num_pairs(num_points: usize) -> usize {
    num_points * num_points.saturating_sub(1) / 2
}

/// Canonical pair order.
pub fn pairs(num_points: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..num_points).flat_map(move |i| (i + 1..num_points).map(move |j| (i, j)))
}

/// Position of the unordered pair {i, j} in the condensed vector.
/// `None` for i == j or an index out of range.
pub fn condensed_index(num_points: usize, i: usize, j: usize) -> Option<usize> {
    if i == j || i >= num_points || j >= num_points {
        return None;
    }
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    Some(num_points * i - i * (i + 1) / 2 + (j - i - 1))
}

// ─────────────────────────────────────────────────────────────
//  Device-side distances
// ─────────────────────────────────────────────────────────────

/// Endpoint index tensors for every pair, built once per point count.
///
/// Only the indices are kept; the distances themselves are recomputed from
/// the current coordinates on every call.
#[derive(Debug, Clone)]
pub struct PairIndex {
    num_points: usize,
    left: Tensor,
    right: Tensor,
    len: usize,
}

impl PairIndex {
    pub fn new(num_points: usize, device: &Device) -> Result<Self> {
        let (left, right): (Vec<u32>, Vec<u32>) =
            pairs(num_points).map(|(i, j)| (i as u32, j as u32)).unzip();
        let len = left.len();
        Ok(Self {
            num_points,
            left: Tensor::from_vec(left, len, device)?,
            right: Tensor::from_vec(right, len, device)?,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Condensed distances of `points` (N × D).  Differentiable w.r.t. `points`.
    ///
    /// With fewer than two points the result is an empty 1-D tensor, still
    /// attached to `points` in the graph.
    pub fn distances(&self, points: &Tensor) -> Result<Tensor> {
        let rows = points.dim(0)?;
        if rows != self.num_points {
            return Err(GeometryError::InvalidConfig(format!(
                "pair index built for {} points, got {rows}",
                self.num_points
            )));
        }
        if self.is_empty() {
            return Ok(points.flatten_all()?.narrow(0, 0, 0)?);
        }
        let diff = points
            .index_select(&self.left, 0)?
            .sub(&points.index_select(&self.right, 0)?)?;
        Ok(masked_sqrt(&diff.sqr()?.sum(1)?)?)
    }
}

/// √x with a zero subgradient where x == 0.
///
/// Plain `sqrt` backpropagates grad / (2·√x), which is NaN at a coincident
/// pair.  Those entries take √1 instead and are zeroed afterwards.
fn masked_sqrt(squared: &Tensor) -> candle_core::Result<Tensor> {
    let coincident = squared.eq(0.0)?;
    let safe = coincident.where_cond(&squared.ones_like()?, squared)?;
    coincident.where_cond(&squared.zeros_like()?, &safe.sqrt()?)
}

// ─────────────────────────────────────────────────────────────
//  Host-side distances
// ─────────────────────────────────────────────────────────────

/// Same quantity as [`PairIndex::distances`] for a plain host array.
pub fn pairwise_distances_host(points: &Array2<f64>) -> Array1<f64> {
    pairs(points.nrows())
        .map(|(i, j)| {
            let diff = &points.row(i) - &points.row(j);
            diff.dot(&diff).sqrt()
        })
        .collect()
}
