//! Raster containers: named spectral index rasters and the stacked feature
//! tensor fed into anomaly detection.
//!
//! Invariants:
//! - all rasters in a run share one (height, width) grid
//! - a prepared `FeatureTensor` is NaN-free

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// A named 2-D index raster over the run's pixel grid.
#[derive(Debug, Clone)]
pub struct SpectralIndexRaster {
    pub name: String,
    pub data: Array2<f64>,
}

impl SpectralIndexRaster {
    pub fn new(name: impl Into<String>, data: Array2<f64>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        let s = self.data.shape();
        (s[0], s[1])
    }
}

/// Raw input for one feature channel: either a single 2-D raster or a
/// (time, height, width) stack that gets collapsed by temporal mean.
#[derive(Debug, Clone)]
pub enum RasterInput {
    Single(Array2<f64>),
    TimeStack(Array3<f64>),
}

impl RasterInput {
    /// Collapse to 2-D. Time stacks are averaged over the time axis,
    /// ignoring NaN samples per pixel (a pixel with no finite sample stays
    /// NaN and is handled by imputation later).
    pub fn collapse(&self, name: &str) -> Result<Array2<f64>, StageError> {
        match self {
            RasterInput::Single(arr) => Ok(arr.clone()),
            RasterInput::TimeStack(stack) => {
                if stack.len_of(Axis(0)) == 0 {
                    return Err(StageError::BadRasterShape {
                        name: name.to_string(),
                        ndim: 3,
                    });
                }
                let (_, h, w) = stack.dim();
                let mut out = Array2::<f64>::zeros((h, w));
                for ((y, x), v) in out.indexed_iter_mut() {
                    let mut sum = 0.0;
                    let mut n = 0usize;
                    for t in 0..stack.len_of(Axis(0)) {
                        let s = stack[[t, y, x]];
                        if s.is_finite() {
                            sum += s;
                            n += 1;
                        }
                    }
                    *v = if n > 0 { sum / n as f64 } else { f64::NAN };
                }
                Ok(out)
            }
        }
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        match self {
            RasterInput::Single(a) => (a.shape()[0], a.shape()[1]),
            RasterInput::TimeStack(a) => (a.shape()[1], a.shape()[2]),
        }
    }
}

/// Stacked, NaN-free feature tensor of shape (height, width, n_features).
#[derive(Debug, Clone)]
pub struct FeatureTensor {
    pub data: Array3<f64>,
    pub feature_names: Vec<String>,
}

impl FeatureTensor {
    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn n_features(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn n_pixels(&self) -> usize {
        self.height() * self.width()
    }

    pub fn is_nan_free(&self) -> bool {
        !self.data.iter().any(|v| v.is_nan())
    }
}

/// Per-run data quality numbers recorded into the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RasterQuality {
    pub nan_pixels_imputed: u64,
    pub channels_all_nan: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn time_stack_collapses_by_mean() {
        let stack = Array3::from_shape_fn((2, 2, 2), |(t, _, _)| if t == 0 { 1.0 } else { 3.0 });
        let flat = RasterInput::TimeStack(stack).collapse("NDVI").unwrap();
        assert_eq!(flat, array![[2.0, 2.0], [2.0, 2.0]]);
    }

    #[test]
    fn collapse_ignores_nan_samples() {
        let mut stack = Array3::from_elem((2, 1, 1), 4.0);
        stack[[0, 0, 0]] = f64::NAN;
        let flat = RasterInput::TimeStack(stack).collapse("NDWI").unwrap();
        assert_eq!(flat[[0, 0]], 4.0);
    }

    #[test]
    fn all_nan_pixel_stays_nan_for_imputation() {
        let stack = Array3::from_elem((2, 1, 1), f64::NAN);
        let flat = RasterInput::TimeStack(stack).collapse("NDWI").unwrap();
        assert!(flat[[0, 0]].is_nan());
    }
}
