//! AdamW update rule and the fixed-budget optimisation loop.
//!
//! Per step, with gradient g and step count t:
//!
//!   P ← P · (1 − lr·λ)                         (decoupled weight decay)
//!   m ← β₁ m + (1 − β₁) g
//!   v ← β₂ v + (1 − β₂) g²
//!   P ← P − lr · m̂ / (√v̂ + ε),   m̂ = m / (1 − β₁ᵗ),  v̂ = v / (1 − β₂ᵗ)
//!
//! The loop runs exactly the requested number of steps.  There is no
//! convergence test and no finite-value check: a diverging loss still runs
//! to the end of the budget.

use candle_core::Tensor;

use crate::distances::PairIndex;
use crate::gradients::value_and_gradient;
use crate::points::PointCloud;
use crate::types::{AdamWConfig, Constraint, Result};

// ─────────────────────────────────────────────────────────────
//  AdamW
// ─────────────────────────────────────────────────────────────

/// Moment estimates for the point coordinates.
///
/// Lives for one `run`; a fresh optimiser starts from zero moments.
pub struct AdamW {
    config: AdamWConfig,
    /// First moment estimate (mean of gradients).
    m: Tensor,
    /// Second moment estimate (mean of squared gradients).
    v: Tensor,
    /// Number of updates applied so far (for bias correction).
    step: usize,
}

impl AdamW {
    pub fn new(config: AdamWConfig, cloud: &PointCloud) -> Result<Self> {
        let shape = (cloud.num_points(), cloud.dimensions());
        let m = Tensor::zeros(shape, cloud.dtype(), cloud.device())?;
        let v = Tensor::zeros(shape, cloud.dtype(), cloud.device())?;
        Ok(Self {
            config,
            m,
            v,
            step: 0,
        })
    }

    pub fn global_step(&self) -> usize {
        self.step
    }

    pub fn config(&self) -> &AdamWConfig {
        &self.config
    }

    /// Apply one update to `cloud`.
    ///
    /// Without a gradient the parameters are left untouched: no decay, no
    /// moment update, and the step counter does not advance.
    pub fn step(&mut self, cloud: &mut PointCloud, gradient: Option<&Tensor>) -> Result<()> {
        let Some(grad) = gradient else {
            return Ok(());
        };
        self.step += 1;
        let t = self.step as f64;
        let AdamWConfig {
            learning_rate: lr,
            beta1,
            beta2,
            epsilon,
            weight_decay,
        } = self.config;

        let bc1 = 1.0 - beta1.powf(t);
        let bc2 = 1.0 - beta2.powf(t);

        self.m = self
            .m
            .affine(beta1, 0.0)?
            .add(&grad.affine(1.0 - beta1, 0.0)?)?
            .detach();
        self.v = self
            .v
            .affine(beta2, 0.0)?
            .add(&grad.sqr()?.affine(1.0 - beta2, 0.0)?)?
            .detach();

        let m_hat = self.m.affine(1.0 / bc1, 0.0)?;
        let denom = self.v.affine(1.0 / bc2, 0.0)?.sqrt()?.affine(1.0, epsilon)?;
        let update = m_hat.div(&denom)?.affine(lr, 0.0)?;

        let next = cloud
            .values()
            .detach()
            .affine(1.0 - lr * weight_decay, 0.0)?
            .sub(&update)?;
        cloud.assign(&next)
    }
}

// ─────────────────────────────────────────────────────────────
//  Optimisation loop
// ─────────────────────────────────────────────────────────────

/// Run exactly `iterations` AdamW steps on `cloud`.
///
/// Steps are strictly sequential: each one reads the coordinates written by
/// the previous update.  An error from any constraint aborts the loop
/// before that step's update, leaving the coordinates from the last
/// completed step.
pub fn run(
    cloud: &mut PointCloud,
    pairs: &PairIndex,
    constraints: &[Box<dyn Constraint>],
    iterations: usize,
    config: &AdamWConfig,
    report_frequency: usize,
) -> Result<()> {
    let mut optimizer = AdamW::new(config.clone(), cloud)?;

    tracing::info!(
        "Optimisation started: {} steps, {} points × {} dims, {} constraints",
        iterations,
        cloud.num_points(),
        cloud.dimensions(),
        constraints.len(),
    );

    for iteration in 0..iterations {
        let eval = value_and_gradient(cloud, pairs, constraints)?;

        if report_frequency > 0
            && iteration % report_frequency == 0
            && tracing::enabled!(tracing::Level::DEBUG)
        {
            tracing::debug!("step {}: loss = {:.6e}", iteration, eval.loss_value()?);
        }

        optimizer.step(cloud, eval.gradient.as_ref())?;
    }

    tracing::info!(
        "Optimisation finished: {} steps, {} updates applied",
        iterations,
        optimizer.global_step(),
    );
    Ok(())
}
