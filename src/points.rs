//! Point state: the N × D coordinate array the optimiser tunes.
//!
//! The coordinates live in a `candle_core::Var`, so every tensor derived
//! from them carries a graph back to the variable and `backward()` yields
//! a gradient for it.  Mutation goes through [`PointCloud::assign`], which
//! needs `&mut self`: whoever holds the cloud mutably is the only writer.

use candle_core::{DType, Device, Tensor, Var};
use ndarray::Array2;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::types::{GeometryError, Result};

/// Draw a `rows × cols` array of independent N(0, 1) samples, row-major.
pub fn standard_normal<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_simple_fn((rows, cols), || rng.sample::<f64, _>(StandardNormal))
}

pub struct PointCloud {
    values: Var,
    num_points: usize,
    dimensions: usize,
}

impl PointCloud {
    /// Upload `values` to `device` as a differentiable `dtype` tensor.
    pub fn from_array(values: &Array2<f64>, dtype: DType, device: &Device) -> Result<Self> {
        let (num_points, dimensions) = values.dim();
        if num_points == 0 || dimensions == 0 {
            return Err(GeometryError::InvalidConfig(format!(
                "point cloud must be non-empty, got {num_points} × {dimensions}"
            )));
        }
        // `iter()` walks in logical row-major order regardless of memory layout.
        let data: Vec<f64> = values.iter().copied().collect();
        let tensor = Tensor::from_vec(data, (num_points, dimensions), device)?.to_dtype(dtype)?;
        Ok(Self {
            values: Var::from_tensor(&tensor)?,
            num_points,
            dimensions,
        })
    }

    /// Standard-normal initial state.
    pub fn random<R: Rng>(
        num_points: usize,
        dimensions: usize,
        dtype: DType,
        device: &Device,
        rng: &mut R,
    ) -> Result<Self> {
        Self::from_array(&standard_normal(num_points, dimensions, rng), dtype, device)
    }

    /// The live, gradient-tracked coordinates.
    pub fn values(&self) -> &Tensor {
        self.values.as_tensor()
    }

    /// Overwrite the coordinates in place.  The new values are detached so
    /// no graph survives from one step into the next.
    pub fn assign(&mut self, values: &Tensor) -> Result<()> {
        let expected = [self.num_points, self.dimensions];
        if values.dims() != expected {
            return Err(GeometryError::InvalidConfig(format!(
                "point update has shape {:?}, expected {expected:?}",
                values.dims()
            )));
        }
        self.values.set(&values.detach())?;
        Ok(())
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }

    pub fn device(&self) -> &Device {
        self.values.device()
    }

    /// Copy the coordinates to host memory as `f64`, graph-free.
    pub fn to_array(&self) -> Result<Array2<f64>> {
        let flat = self
            .values
            .as_tensor()
            .detach()
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F64)?
            .flatten_all()?
            .to_vec1::<f64>()?;
        Ok(Array2::from_shape_vec((self.num_points, self.dimensions), flat)?)
    }
}
