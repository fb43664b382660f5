//! Unsupervised anomaly scoring over the feature tensor.
//!
//! The model is a diagonal elliptic envelope: features are standardized
//! with run-local statistics, and each pixel's outlier score is its mean
//! squared deviation across features. The contamination rate decides the
//! binary mask: the top ceil(r * n_pixels) pixels by score are flagged, so
//! the flagged fraction tracks r even when scores tie (an all-constant
//! tensor flags exactly ceil(r * n) pixels instead of all or none).

use ndarray::Array2;
use sentinel_core::{FeatureTensor, StageError};

const VARIANCE_FLOOR: f64 = 1e-6;

/// Binary decision plus continuous intensity surface for one run.
#[derive(Debug, Clone)]
pub struct Detection {
    pub mask: Array2<bool>,
    /// Outlier score min-max normalized to [0,1] over the run. When the
    /// score range is degenerate the surface is the mask cast to float.
    pub surface: Array2<f64>,
    pub stats: DetectionStats,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct DetectionStats {
    pub total_pixels: u64,
    pub anomaly_pixels: u64,
    pub anomaly_fraction: f64,
    pub mean_score: f64,
}

/// Score the tensor at the given contamination rate r in (0,1).
pub fn detect_anomalies(tensor: &FeatureTensor, contamination: f64) -> Result<Detection, StageError> {
    if !(contamination > 0.0 && contamination < 1.0) {
        return Err(StageError::InvalidRequest(format!(
            "contamination must be in (0,1), got {contamination}"
        )));
    }
    let (h, w, n_features) = (tensor.height(), tensor.width(), tensor.n_features());
    let n = h * w;
    if n == 0 {
        return Err(StageError::EmptyFeatures("zero pixels".into()));
    }
    if n_features == 0 {
        return Err(StageError::EmptyFeatures("zero features".into()));
    }

    // Run-local standardization statistics.
    let mut means = vec![0.0f64; n_features];
    let mut vars = vec![0.0f64; n_features];
    for f in 0..n_features {
        let mut sum = 0.0;
        for y in 0..h {
            for x in 0..w {
                sum += tensor.data[[y, x, f]];
            }
        }
        means[f] = sum / n as f64;
    }
    for f in 0..n_features {
        let mut sum_sq = 0.0;
        for y in 0..h {
            for x in 0..w {
                let d = tensor.data[[y, x, f]] - means[f];
                sum_sq += d * d;
            }
        }
        vars[f] = (sum_sq / n as f64).max(VARIANCE_FLOOR);
    }

    // Squared standardized deviation, averaged over features.
    let mut scores = vec![0.0f64; n];
    for y in 0..h {
        for x in 0..w {
            let mut dist = 0.0;
            for f in 0..n_features {
                let z = tensor.data[[y, x, f]] - means[f];
                dist += (z * z) / vars[f];
            }
            scores[y * w + x] = dist / n_features as f64;
        }
    }

    // Binary decision: top-k by score, stable index order on ties.
    let k = ((contamination * n as f64).ceil() as usize).clamp(1, n);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut mask = Array2::<bool>::from_elem((h, w), false);
    for &idx in order.iter().take(k) {
        mask[[idx / w, idx % w]] = true;
    }

    // Continuous surface, min-max normalized over the run.
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    let mut surface = Array2::<f64>::zeros((h, w));
    if range > 0.0 {
        for (i, &s) in scores.iter().enumerate() {
            surface[[i / w, i % w]] = (s - min) / range;
        }
    } else {
        for ((y, x), m) in mask.indexed_iter() {
            surface[[y, x]] = if *m { 1.0 } else { 0.0 };
        }
    }

    let anomaly_pixels = mask.iter().filter(|m| **m).count() as u64;
    let stats = DetectionStats {
        total_pixels: n as u64,
        anomaly_pixels,
        anomaly_fraction: anomaly_pixels as f64 / n as f64,
        mean_score: surface.iter().sum::<f64>() / n as f64,
    };
    tracing::debug!(
        anomaly_pixels,
        total = n,
        fraction = stats.anomaly_fraction,
        "anomaly detection complete"
    );

    Ok(Detection {
        mask,
        surface,
        stats,
    })
}
