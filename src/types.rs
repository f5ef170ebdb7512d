use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::device::DeviceSelector;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Every function in the public Rust API returns `Result<T, GeometryError>`
/// instead of panicking.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// Construction-time validation failed (zero points, zero dimensions,
    /// out-of-range optimiser hyperparameters, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The tensor runtime rejected an operation.
    #[error("tensor backend error: {0}")]
    Backend(#[from] candle_core::Error),
    /// A constraint signalled an error while computing its penalty.
    /// The step in progress is aborted before any update is applied.
    #[error("constraint #{index} ({name}) failed: {source}")]
    Constraint {
        index: usize,
        name: String,
        #[source]
        source: candle_core::Error,
    },
    /// A constraint produced more than one value.
    #[error("constraint #{index} ({name}) returned shape {shape:?}, expected a scalar")]
    NonScalarConstraint {
        index: usize,
        name: String,
        shape: Vec<usize>,
    },
    /// Host array could not be assembled from backend data.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    /// An explicitly requested device is not usable in this build.
    #[error("device unavailable: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, GeometryError>;

// ─────────────────────────────────────────────────────────────
//  Constants
// ─────────────────────────────────────────────────────────────

pub const DEFAULT_ITERATIONS: usize = 2000;
pub const DEFAULT_REPORT_FREQUENCY: usize = 100;
pub const DEFAULT_BARRIER_SHARPNESS: f64 = 10.0;

// ─────────────────────────────────────────────────────────────
//  Constraint trait  (extensible — implement for custom penalties)
// ─────────────────────────────────────────────────────────────

/// A differentiable penalty over the current point configuration.
///
/// `points` is the live `N × D` coordinate tensor and `distances` the
/// condensed `N(N−1)/2` pairwise distances derived from it in the same
/// step.  The returned tensor must hold exactly one element and must be
/// built from `points` / `distances` with ordinary tensor ops so the
/// gradient can flow back to the coordinates.
///
/// Any closure `Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>` is a
/// constraint too.
pub trait Constraint: Send + Sync {
    fn evaluate(&self, points: &Tensor, distances: &Tensor) -> candle_core::Result<Tensor>;

    /// Label used in logs and error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Constraint for F
where
    F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor> + Send + Sync,
{
    fn evaluate(&self, points: &Tensor, distances: &Tensor) -> candle_core::Result<Tensor> {
        self(points, distances)
    }
}

// ─────────────────────────────────────────────────────────────
//  Working precision
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F32,
    F64,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::F64 => DType::F64,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Optimiser options
// ─────────────────────────────────────────────────────────────

/// AdamW hyperparameters.  Defaults are the conventional ones
/// (lr = 1e-3, β = (0.9, 0.999), ε = 1e-8, decay = 1e-2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamWConfig {
    pub learning_rate: f64,
    /// First moment exponential decay rate.
    pub beta1: f64,
    /// Second moment exponential decay rate.
    pub beta2: f64,
    pub epsilon: f64,
    /// Decoupled weight decay coefficient.
    pub weight_decay: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 1e-2,
        }
    }
}

impl AdamWConfig {
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("learning_rate", self.learning_rate),
            ("epsilon", self.epsilon),
            ("weight_decay", self.weight_decay),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(GeometryError::InvalidConfig(format!(
                    "optimizer.{field} must be finite and non-negative, got {value}"
                )));
            }
        }
        for (field, value) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&value) {
                return Err(GeometryError::InvalidConfig(format!(
                    "optimizer.{field} must lie in [0, 1), got {value}"
                )));
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Engine configuration
// ─────────────────────────────────────────────────────────────

fn default_iterations() -> usize {
    DEFAULT_ITERATIONS
}

fn default_report_frequency() -> usize {
    DEFAULT_REPORT_FREQUENCY
}

/// Construction-time options for [`crate::GeometricConstraints`].
///
/// `points` and `dimensions` are required when deserialising; everything
/// else falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of points N.
    pub points: usize,
    /// Dimensionality D.
    pub dimensions: usize,
    /// Update steps run immediately at construction.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default)]
    pub device: DeviceSelector,
    /// Seed for the initial standard-normal draw.  `None` draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub optimizer: AdamWConfig,
    /// Log the aggregate loss every k steps (0 disables).
    #[serde(default = "default_report_frequency")]
    pub report_frequency: usize,
}

impl EngineConfig {
    /// `points × dimensions` with every other option at its default: 2000
    /// iterations, automatic device, entropy seed, f32, torch AdamW
    /// defaults, and the loss logged every 100 steps (`report_frequency`;
    /// 0 disables progress logging, any other value is accepted).
    pub fn new(points: usize, dimensions: usize) -> Self {
        Self {
            points,
            dimensions,
            iterations: DEFAULT_ITERATIONS,
            device: DeviceSelector::default(),
            seed: None,
            precision: Precision::default(),
            optimizer: AdamWConfig::default(),
            report_frequency: DEFAULT_REPORT_FREQUENCY,
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_device(mut self, device: DeviceSelector) -> Self {
        self.device = device;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_report_frequency(mut self, report_frequency: usize) -> Self {
        self.report_frequency = report_frequency;
        self
    }

    pub fn with_optimizer(mut self, optimizer: AdamWConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Reject shapes and hyperparameters the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.points == 0 {
            return Err(GeometryError::InvalidConfig("points must be positive".into()));
        }
        if self.dimensions == 0 {
            return Err(GeometryError::InvalidConfig("dimensions must be positive".into()));
        }
        // Pair indices are materialised as u32 tensors.
        if self.points > u32::MAX as usize {
            return Err(GeometryError::InvalidConfig(format!(
                "points = {} exceeds the supported maximum of {}",
                self.points,
                u32::MAX
            )));
        }
        self.optimizer.validate()
    }
}
