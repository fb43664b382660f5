//! Feature preparation: turn named index rasters into a stacked, NaN-free
//! feature tensor.
//!
//! Pure: no side effects beyond the returned tensor and quality counters.

use std::collections::BTreeMap;

use ndarray::{Array3, Axis};
use sentinel_core::{FeatureTensor, RasterInput, RasterQuality, StageError};

/// Output of preparation: the tensor plus imputation counters recorded
/// into the manifest's data-quality block.
#[derive(Debug)]
pub struct PreparedFeatures {
    pub tensor: FeatureTensor,
    pub quality: RasterQuality,
}

/// Stack the selected rasters into (height, width, n_features), collapsing
/// 3-D time stacks by temporal mean first, then impute NaNs per channel
/// with the channel's finite mean (zero when no finite value exists).
pub fn prepare_features(
    rasters: &BTreeMap<String, RasterInput>,
) -> Result<PreparedFeatures, StageError> {
    if rasters.is_empty() {
        return Err(StageError::EmptyFeatures("no rasters selected".into()));
    }

    // Collapse everything to 2-D and check the shared grid invariant.
    let mut names = Vec::with_capacity(rasters.len());
    let mut channels = Vec::with_capacity(rasters.len());
    let mut expected: Option<(usize, usize)> = None;
    for (name, input) in rasters {
        let flat = input.collapse(name)?;
        let shape = (flat.shape()[0], flat.shape()[1]);
        match expected {
            None => expected = Some(shape),
            Some(exp) if exp != shape => {
                return Err(StageError::ShapeMismatch {
                    name: name.clone(),
                    got: shape,
                    expected: exp,
                })
            }
            _ => {}
        }
        names.push(name.clone());
        channels.push(flat);
    }

    let (h, w) = expected.unwrap_or((0, 0));
    if h == 0 || w == 0 {
        return Err(StageError::EmptyFeatures("zero-sized pixel grid".into()));
    }

    let views: Vec<_> = channels.iter().map(|c| c.view()).collect();
    let mut data: Array3<f64> = ndarray::stack(Axis(2), &views).map_err(|_| {
        StageError::EmptyFeatures("channel stack failed despite matching shapes".into())
    })?;

    // Per-channel mean imputation.
    let mut quality = RasterQuality::default();
    for f in 0..data.len_of(Axis(2)) {
        let mut channel = data.index_axis_mut(Axis(2), f);
        let mut sum = 0.0;
        let mut n = 0usize;
        for v in channel.iter() {
            if !v.is_nan() {
                sum += v;
                n += 1;
            }
        }
        let fill = if n > 0 { sum / n as f64 } else { 0.0 };
        if n == 0 {
            quality.channels_all_nan += 1;
        }
        for v in channel.iter_mut() {
            if v.is_nan() {
                *v = fill;
                quality.nan_pixels_imputed += 1;
            }
        }
    }

    let tensor = FeatureTensor {
        data,
        feature_names: names,
    };
    debug_assert!(tensor.is_nan_free());
    tracing::debug!(
        features = tensor.n_features(),
        pixels = tensor.n_pixels(),
        imputed = quality.nan_pixels_imputed,
        "prepared feature tensor"
    );
    Ok(PreparedFeatures { tensor, quality })
}
