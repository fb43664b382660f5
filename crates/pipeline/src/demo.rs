//! Deterministic demo imagery for runs without a live provider.
//!
//! Every band is synthesized from low-frequency sine/cosine terrain plus
//! seeded Gaussian noise, min-max normalized per band, with a handful of
//! rectangular spectral disturbances embedded so the downstream stages
//! have something to find. The same seed always yields the same rasters,
//! which keeps demo runs reproducible and testable.

use std::collections::BTreeMap;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use sentinel_core::{AffineTransform, CandidateSite, PriorityTier};

use crate::indices::{BAND_GREEN, BAND_NIR, BAND_RED};

pub const DEMO_GRID_SIZE: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct DemoGenerator {
    pub seed: u64,
}

impl DemoGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Synthesize the three bands the index formulas consume, over the
    /// given bounding box.
    pub fn generate_bands(
        &self,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> (BTreeMap<String, Array2<f64>>, AffineTransform) {
        let n = DEMO_GRID_SIZE;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let noise = Normal::new(0.0, 0.05).expect("valid stddev");

        let mut bands = BTreeMap::new();
        for (band, fx, fy, phase) in [
            (BAND_GREEN, 0.07, 0.11, 0.0),
            (BAND_RED, 0.09, 0.05, 1.3),
            (BAND_NIR, 0.04, 0.08, 2.1),
        ] {
            let mut raster = Array2::from_shape_fn((n, n), |(y, x)| {
                (x as f64 * fx + phase).sin() * (y as f64 * fy).cos() + noise.sample(&mut rng)
            });
            min_max_normalize(&mut raster);
            bands.insert(band.to_string(), raster);
        }

        // A few rectangular disturbances: NIR suppressed, red raised, the
        // spectral signature of disturbed soil over buried structures.
        let patches = rng.gen_range(3..=5);
        for _ in 0..patches {
            let y0 = rng.gen_range(5..n - 12);
            let x0 = rng.gen_range(5..n - 12);
            let size = rng.gen_range(4..8);
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    if let Some(v) = bands.get_mut(BAND_NIR).and_then(|b| b.get_mut((y, x))) {
                        *v = (*v - 0.4).max(0.0);
                    }
                    if let Some(v) = bands.get_mut(BAND_RED).and_then(|b| b.get_mut((y, x))) {
                        *v = (*v + 0.4).min(1.0);
                    }
                }
            }
        }

        let transform = AffineTransform::from_bounds(min_lon, min_lat, max_lon, max_lat, n, n);
        (bands, transform)
    }

    /// Fabricate plausible demo sites directly, bypassing detection.
    /// Used by preview surfaces that only need shaped output.
    pub fn generate_candidate_sites(
        &self,
        count: usize,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Vec<CandidateSite> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(1));
        (0..count)
            .map(|i| {
                let confidence: f64 = rng.gen_range(0.4..0.95);
                let area_m2: f64 = rng.gen_range(400.0..5000.0);
                let perimeter_m = (area_m2.sqrt()) * rng.gen_range(4.0..6.0);
                CandidateSite {
                    id: format!("SITE_{:03}", i + 1),
                    lat: rng.gen_range(min_lat..max_lat),
                    lon: rng.gen_range(min_lon..max_lon),
                    area_m2,
                    perimeter_m,
                    anomaly_intensity: confidence,
                    anomaly_std: rng.gen_range(0.02..0.15),
                    compactness: (4.0 * std::f64::consts::PI * area_m2
                        / (perimeter_m * perimeter_m))
                        .min(1.0),
                    confidence,
                    priority: PriorityTier::from_confidence(confidence),
                    pixel_count: (area_m2 / 100.0) as u64,
                    merged_from: None,
                    likelihood: None,
                }
            })
            .collect()
    }
}

fn min_max_normalize(raster: &mut Array2<f64>) {
    let min = raster.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = raster.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range > 0.0 {
        raster.mapv_inplace(|v| (v - min) / range);
    } else {
        raster.fill(0.0);
    }
}
