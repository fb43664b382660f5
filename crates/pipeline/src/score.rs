//! Archaeology likelihood scoring, the gated SCORE stage.
//!
//! Two evidence components are combined per site: a spectral component
//! built from the index rasters over anomalous pixels (vegetation stress
//! reads as low NDVI, moisture disturbance as extreme NDWI), and a
//! spatial component rewarding clustered sites. The combined score lands
//! on each site as `likelihood` in 0..=100. The orchestrator only calls
//! this when the manifest's likelihood gate is open; scores are never
//! attached to synthetic data.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sentinel_core::{CandidateSite, PriorityTier, SpectralIndexRaster};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Sites within this distance of each other count as neighbors.
    pub clustering_radius_m: f64,
    /// Neighbor count needed before clustering contributes at all.
    pub min_cluster_size: usize,
    pub spectral_weight: f64,
    pub spatial_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            clustering_radius_m: 500.0,
            min_cluster_size: 3,
            spectral_weight: 0.35,
            spatial_weight: 0.25,
        }
    }
}

/// A component contributes as a supporting indicator once it clears this
/// evidence bar.
const INDICATOR_CUTOFF: f64 = 0.5;
const MAX_INDICATORS: f64 = 2.0;

/// Attach likelihood scores to every site in place. Scoring also
/// overwrites `confidence` and `priority`: post-score confidence is the
/// fraction of supporting indicators (spectral, spatial) that cleared
/// the evidence bar, replacing the extraction-time surface mean.
pub fn score_sites(
    sites: &mut [CandidateSite],
    indices: &[SpectralIndexRaster],
    mask: &Array2<bool>,
    config: &ScoringConfig,
) {
    if sites.is_empty() {
        return;
    }

    let spectral = site_spectral_score(indices, mask);
    let spatial = spatial_scores(sites, config);

    let total_weight = config.spectral_weight + config.spatial_weight;
    for (i, site) in sites.iter_mut().enumerate() {
        let combined = if total_weight > 0.0 {
            (spectral * config.spectral_weight + spatial[i] * config.spatial_weight)
                / total_weight
        } else {
            0.0
        };
        site.likelihood = Some((combined * 1000.0).round() / 10.0);

        let mut indicators = 0u32;
        if spectral > INDICATOR_CUTOFF {
            indicators += 1;
        }
        if spatial[i] > INDICATOR_CUTOFF {
            indicators += 1;
        }
        site.confidence = (indicators as f64 / MAX_INDICATORS).min(1.0);
        site.priority = PriorityTier::from_confidence(site.confidence);
    }
    tracing::info!(sites = sites.len(), "attached likelihood scores");
}

/// Mean combined spectral evidence over anomalous pixels. NDVI is min-max
/// normalized then inverted (low vegetation scores high); NDWI extremity
/// peaks at both ends of its normalized range. Falls back to 0.5 when no
/// usable index raster is present.
fn site_spectral_score(indices: &[SpectralIndexRaster], mask: &Array2<bool>) -> f64 {
    let mut component_maps: Vec<Array2<f64>> = Vec::new();

    for raster in indices {
        match raster.name.as_str() {
            "NDVI" => {
                if let Some(norm) = min_max(&raster.data) {
                    component_maps.push(norm.mapv(|v| 1.0 - v));
                }
            }
            "NDWI" => {
                if let Some(norm) = min_max(&raster.data) {
                    component_maps.push(norm.mapv(|v| (v - 0.5).abs() * 2.0));
                }
            }
            _ => {}
        }
    }
    if component_maps.is_empty() {
        return 0.5;
    }

    let mut sum = 0.0;
    let mut n = 0usize;
    for (pos, flagged) in mask.indexed_iter() {
        if !*flagged {
            continue;
        }
        for map in &component_maps {
            sum += map[pos];
        }
        n += component_maps.len();
    }
    if n == 0 {
        0.5
    } else {
        sum / n as f64
    }
}

fn min_max(data: &Array2<f64>) -> Option<Array2<f64>> {
    let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return None;
    }
    Some(data.mapv(|v| (v - min) / range))
}

/// Per-site clustering score: neighbor count within the radius, capped at
/// five neighbors for full score, zero below the minimum cluster size.
/// Fewer than three sites total cannot form a spatial pattern.
fn spatial_scores(sites: &[CandidateSite], config: &ScoringConfig) -> Vec<f64> {
    let n = sites.len();
    if n < 3 {
        return vec![0.0; n];
    }
    let radius_deg = config.clustering_radius_m / 111_000.0;

    (0..n)
        .map(|i| {
            let neighbors = (0..n)
                .filter(|&j| {
                    if i == j {
                        return false;
                    }
                    let dx = sites[i].lon - sites[j].lon;
                    let dy = sites[i].lat - sites[j].lat;
                    (dx * dx + dy * dy).sqrt() < radius_deg
                })
                .count();
            if neighbors >= config.min_cluster_size {
                (neighbors as f64 / 5.0).min(1.0)
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn site(id: &str, lat: f64, lon: f64) -> CandidateSite {
        CandidateSite {
            id: id.to_string(),
            lat,
            lon,
            area_m2: 1000.0,
            perimeter_m: 120.0,
            anomaly_intensity: 0.7,
            anomaly_std: 0.05,
            compactness: 0.8,
            confidence: 0.7,
            priority: PriorityTier::Medium,
            pixel_count: 10,
            merged_from: None,
            likelihood: None,
        }
    }

    fn rasters() -> Vec<SpectralIndexRaster> {
        vec![
            SpectralIndexRaster::new("NDVI", array![[0.1, 0.9], [0.5, 0.3]]),
            SpectralIndexRaster::new("NDWI", array![[0.0, 1.0], [0.5, 0.2]]),
        ]
    }

    #[test]
    fn every_site_gets_a_likelihood_in_range() {
        let mut sites = vec![
            site("SITE_001", 30.0, 31.0),
            site("SITE_002", 30.001, 31.001),
            site("SITE_003", 30.002, 31.0),
        ];
        let mask = array![[true, false], [true, false]];
        score_sites(&mut sites, &rasters(), &mask, &ScoringConfig::default());

        for s in &sites {
            let l = s.likelihood.unwrap();
            assert!((0.0..=100.0).contains(&l), "likelihood out of range: {l}");
        }
    }

    #[test]
    fn clustered_sites_outscore_isolated_ones() {
        // Four sites within meters of each other plus one far away.
        let mut sites = vec![
            site("SITE_001", 30.0, 31.0),
            site("SITE_002", 30.0001, 31.0001),
            site("SITE_003", 30.0002, 31.0),
            site("SITE_004", 30.0001, 31.0002),
            site("SITE_005", 35.0, 40.0),
        ];
        let mask = array![[true, true], [false, false]];
        score_sites(&mut sites, &rasters(), &mask, &ScoringConfig::default());

        let clustered = sites[0].likelihood.unwrap();
        let isolated = sites[4].likelihood.unwrap();
        assert!(clustered > isolated);
    }

    #[test]
    fn no_usable_index_falls_back_to_neutral_spectral_score() {
        let mut sites = vec![site("SITE_001", 30.0, 31.0)];
        let mask = array![[true]];
        score_sites(&mut sites, &[], &mask, &ScoringConfig::default());
        // Single isolated site: spatial 0, spectral 0.5, weights 0.35/0.25.
        let expected: f64 = 0.5 * 0.35 / 0.6 * 100.0;
        let got = sites[0].likelihood.unwrap();
        assert!((got - (expected * 10.0).round() / 10.0).abs() < 1e-9);
    }

    #[test]
    fn scoring_overwrites_confidence_and_priority_from_indicator_count() {
        // Four clustered sites plus one isolated; the index rasters give
        // a spectral evidence score above the indicator cutoff.
        let mut sites = vec![
            site("SITE_001", 30.0, 31.0),
            site("SITE_002", 30.0001, 31.0001),
            site("SITE_003", 30.0002, 31.0),
            site("SITE_004", 30.0001, 31.0002),
            site("SITE_005", 35.0, 40.0),
        ];
        let mask = array![[true, false], [true, false]];
        score_sites(&mut sites, &rasters(), &mask, &ScoringConfig::default());

        // Clustered: spectral + spatial indicators both fire.
        for s in &sites[..4] {
            assert_eq!(s.confidence, 1.0);
            assert_eq!(s.priority, PriorityTier::High);
        }
        // Isolated: spectral only, extraction-time confidence replaced.
        let lone = &sites[4];
        assert_eq!(lone.confidence, 0.5);
        assert_eq!(lone.priority, PriorityTier::Low);
        assert_ne!(lone.confidence, lone.anomaly_intensity);
    }

    #[test]
    fn empty_site_list_is_a_no_op() {
        let mut sites: Vec<CandidateSite> = Vec::new();
        let mask = array![[true]];
        score_sites(&mut sites, &rasters(), &mask, &ScoringConfig::default());
    }
}
