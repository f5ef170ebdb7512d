//! **geometric-constraints** — place points so that pairwise-distance
//! penalties are minimised.
//!
//! This crate implements the complete optimisation pipeline:
//!
//! 1. **Point state** (`points`): an N × D differentiable coordinate array.
//! 2. **Distances** (`distances`): condensed Euclidean pairwise distances.
//! 3. **Constraints** (`constraints`): pluggable penalties + built-in library.
//! 4. **Gradients** (`gradients`): aggregate loss and reverse-mode autodiff via `candle`.
//! 5. **Optimiser** (`optimizer`): AdamW with a fixed iteration budget.
//! 6. **Engine** (`engine`): construction, run, and host-side result extraction.

pub mod types;
pub mod device;
pub mod points;
pub mod distances;
pub mod constraints;
pub mod gradients;
pub mod optimizer;
pub mod engine;

pub use device::DeviceSelector;
pub use engine::GeometricConstraints;
pub use types::{AdamWConfig, Constraint, EngineConfig, GeometryError, Precision, Result};
