//! The top-level engine: owns the points and constraints, runs the
//! optimiser at construction, and hands results back as host arrays.

use candle_core::{DType, Device};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::device::describe;
use crate::distances::PairIndex;
use crate::gradients::{self, scalar_value};
use crate::optimizer;
use crate::points::PointCloud;
use crate::types::{Constraint, EngineConfig, Result};

/// N points in D dimensions, optimised against a list of constraints.
///
/// ```no_run
/// use geometric_constraints::{EngineConfig, GeometricConstraints};
/// use geometric_constraints::constraints::TargetDistance;
///
/// let engine = GeometricConstraints::new(
///     EngineConfig::new(4, 3).with_seed(1),
///     vec![Box::new(TargetDistance { weight: 1.0, target: 1.0 })],
/// )?;
/// let xyz = engine.points()?;        // 4 × 3
/// let d = engine.distances()?;       // 6 pairwise distances
/// # Ok::<(), geometric_constraints::GeometryError>(())
/// ```
pub struct GeometricConstraints {
    cloud: PointCloud,
    pairs: PairIndex,
    constraints: Vec<Box<dyn Constraint>>,
    config: EngineConfig,
}

impl GeometricConstraints {
    /// Resolve `config.device`, seed the points and run `config.iterations`
    /// steps.
    pub fn new(config: EngineConfig, constraints: Vec<Box<dyn Constraint>>) -> Result<Self> {
        config.validate()?;
        let device = config.device.resolve()?;
        Self::build(config, constraints, device)
    }

    /// Same as [`new`](Self::new) on an already-resolved device;
    /// `config.device` is ignored.
    pub fn with_device(
        config: EngineConfig,
        constraints: Vec<Box<dyn Constraint>>,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        Self::build(config, constraints, device)
    }

    fn build(
        config: EngineConfig,
        constraints: Vec<Box<dyn Constraint>>,
        device: Device,
    ) -> Result<Self> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let cloud = PointCloud::random(
            config.points,
            config.dimensions,
            config.precision.dtype(),
            &device,
            &mut rng,
        )?;
        let pairs = PairIndex::new(config.points, &device)?;

        tracing::info!(
            "Engine created: {} points × {} dims on {}, {} constraints, {} pairs",
            config.points,
            config.dimensions,
            describe(&device),
            constraints.len(),
            pairs.len(),
        );

        let iterations = config.iterations;
        let mut engine = Self {
            cloud,
            pairs,
            constraints,
            config,
        };
        engine.run(iterations)?;
        Ok(engine)
    }

    /// Run `iterations` further steps with a fresh optimiser state.
    pub fn run(&mut self, iterations: usize) -> Result<()> {
        optimizer::run(
            &mut self.cloud,
            &self.pairs,
            &self.constraints,
            iterations,
            &self.config.optimizer,
            self.config.report_frequency,
        )
    }

    /// Current coordinates, N × D.
    pub fn points(&self) -> Result<Array2<f64>> {
        self.cloud.to_array()
    }

    /// Pairwise distances of the current coordinates in canonical order,
    /// recomputed on every call.
    pub fn distances(&self) -> Result<Array1<f64>> {
        let distances = self.pairs.distances(&self.cloud.values().detach())?;
        let host = distances
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F64)?
            .to_vec1::<f64>()?;
        Ok(Array1::from_vec(host))
    }

    /// Aggregate loss of the current coordinates.
    pub fn loss(&self) -> Result<f64> {
        let loss = gradients::value(&self.cloud, &self.pairs, &self.constraints)?;
        scalar_value(&loss)
    }

    pub fn num_points(&self) -> usize {
        self.cloud.num_points()
    }

    pub fn dimensions(&self) -> usize {
        self.cloud.dimensions()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn device(&self) -> &Device {
        self.cloud.device()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
