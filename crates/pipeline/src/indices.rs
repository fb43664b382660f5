//! Spectral index computation from raw band rasters.
//!
//! Indices are the INDEX stage's first step; each one computed here is
//! recorded in the run manifest as a ComputedIndicator, flagged according
//! to whether the bands came from a live provider or the demo generator.

use std::collections::BTreeMap;

use ndarray::Array2;
use sentinel_core::{ComputedIndicator, SpectralIndexRaster, StageError};

const EPS: f64 = 1e-10;

/// Band names the index formulas consume, in Sentinel-2 nomenclature.
pub const BAND_GREEN: &str = "B03";
pub const BAND_RED: &str = "B04";
pub const BAND_NIR: &str = "B08";

/// Description of one computable index: output name, formula text for the
/// manifest, and required input bands.
struct IndexDef {
    name: &'static str,
    formula: &'static str,
    bands: &'static [&'static str],
    compute: fn(&BTreeMap<String, Array2<f64>>) -> Array2<f64>,
}

fn ndvi(bands: &BTreeMap<String, Array2<f64>>) -> Array2<f64> {
    let nir = &bands[BAND_NIR];
    let red = &bands[BAND_RED];
    (nir - red) / (nir + red + EPS)
}

fn ndwi(bands: &BTreeMap<String, Array2<f64>>) -> Array2<f64> {
    let green = &bands[BAND_GREEN];
    let nir = &bands[BAND_NIR];
    (green - nir) / (green + nir + EPS)
}

fn msavi(bands: &BTreeMap<String, Array2<f64>>) -> Array2<f64> {
    let nir = &bands[BAND_NIR];
    let red = &bands[BAND_RED];
    let mut out = Array2::<f64>::zeros(nir.raw_dim());
    for ((y, x), v) in out.indexed_iter_mut() {
        let n = nir[[y, x]];
        let r = red[[y, x]];
        let disc = (2.0 * n + 1.0).powi(2) - 8.0 * (n - r);
        *v = (2.0 * n + 1.0 - disc.max(0.0).sqrt()) / 2.0;
    }
    out
}

const INDEX_DEFS: &[IndexDef] = &[
    IndexDef {
        name: "NDVI",
        formula: "(B08 - B04) / (B08 + B04)",
        bands: &[BAND_NIR, BAND_RED],
        compute: ndvi,
    },
    IndexDef {
        name: "NDWI",
        formula: "(B03 - B08) / (B03 + B08)",
        bands: &[BAND_GREEN, BAND_NIR],
        compute: ndwi,
    },
    IndexDef {
        name: "MSAVI",
        formula: "(2*B08 + 1 - sqrt((2*B08 + 1)^2 - 8*(B08 - B04))) / 2",
        bands: &[BAND_NIR, BAND_RED],
        compute: msavi,
    },
];

/// Result of the index computation: named rasters plus the manifest
/// indicator records describing them.
#[derive(Debug)]
pub struct ComputedIndices {
    pub rasters: Vec<SpectralIndexRaster>,
    pub indicators: Vec<ComputedIndicator>,
}

/// Compute every index whose input bands are present. Fails only when no
/// index at all is computable (no usable data downstream).
pub fn compute_indices(
    bands: &BTreeMap<String, Array2<f64>>,
    from_real_data: bool,
) -> Result<ComputedIndices, StageError> {
    let mut rasters = Vec::new();
    let mut indicators = Vec::new();

    for def in INDEX_DEFS {
        if !def.bands.iter().all(|b| bands.contains_key(*b)) {
            tracing::debug!(index = def.name, "skipping index, missing bands");
            continue;
        }
        let data = (def.compute)(bands);
        rasters.push(SpectralIndexRaster::new(def.name, data));
        indicators.push(ComputedIndicator {
            name: def.name.to_string(),
            formula: def.formula.to_string(),
            bands_used: def.bands.iter().map(|b| b.to_string()).collect(),
            computed_from_real_data: from_real_data,
        });
    }

    if rasters.is_empty() {
        return Err(StageError::EmptyFeatures(
            "no spectral index could be computed from the available bands".into(),
        ));
    }
    Ok(ComputedIndices {
        rasters,
        indicators,
    })
}
