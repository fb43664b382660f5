//! Region extraction: connected anomalous regions to geo-located
//! candidate sites.
//!
//! The extractor thresholds the confidence surface (independent of the
//! scorer's binary mask), labels 4-connected components, drops tiny
//! regions, measures each survivor (area, perimeter via one-pixel
//! erosion, compactness, confidence statistics), projects centroids
//! through the affine transform, then runs a single-link merge pass over
//! nearby centroids and an optional AOI containment filter.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sentinel_core::{AffineTransform, AoiPolygon, CandidateSite, PriorityTier, StageError};

/// Rough meters-per-degree at the equator, used to turn the merge radius
/// into a centroid distance in degrees.
const METERS_PER_DEGREE: f64 = 111_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Minimum confidence-surface value for a pixel to join a region.
    pub confidence_threshold: f64,
    /// Regions below this pixel count are discarded before measurement.
    pub min_area_px: u64,
    /// Sites whose centroids are closer than this are merged.
    pub merge_radius_m: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            min_area_px: 4,
            merge_radius_m: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub regions_labeled: u64,
    pub regions_measured: u64,
    pub sites_after_merge: u64,
    pub sites_dropped_by_aoi: u64,
}

#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub sites: Vec<CandidateSite>,
    pub stats: ExtractionStats,
    pub warnings: Vec<String>,
}

/// Extract candidate sites from a confidence surface. The scorer's mask
/// is accepted for shape validation but the working mask comes from the
/// configured cutoff alone. An empty working mask is a valid empty
/// result, not an error.
pub fn extract_sites(
    mask: &Array2<bool>,
    surface: &Array2<f64>,
    transform: &AffineTransform,
    aoi: Option<&AoiPolygon>,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, StageError> {
    if mask.dim() != surface.dim() {
        return Err(StageError::ShapeMismatch {
            name: "confidence_surface".into(),
            got: surface.dim(),
            expected: mask.dim(),
        });
    }

    let working = surface.mapv(|v| v >= config.confidence_threshold);
    let (labels, n_labels) = label_components(&working);

    let px_area = transform.pixel_area().abs();
    let px_side = px_area.sqrt();

    let mut regions = Vec::new();
    for label in 1..=n_labels {
        let site = measure_region(&labels, surface, label, transform, px_area, px_side);
        if site.pixel_count >= config.min_area_px {
            regions.push(site);
        }
    }
    let stats_measured = regions.len() as u64;

    let mut merged = merge_candidate_sites(regions, config.merge_radius_m);
    for (i, site) in merged.iter_mut().enumerate() {
        site.id = format!("SITE_{:03}", i + 1);
    }
    let sites_after_merge = merged.len() as u64;

    let mut warnings = Vec::new();
    let mut dropped = 0u64;
    let kept: Vec<CandidateSite> = merged
        .into_iter()
        .filter(|s| match aoi {
            Some(poly) if !poly.contains(s.lon, s.lat) => {
                dropped += 1;
                false
            }
            _ => true,
        })
        .collect();
    if dropped > 0 {
        warnings.push(format!(
            "{dropped} site(s) fell outside the area of interest and were dropped"
        ));
    }

    let stats = ExtractionStats {
        regions_labeled: n_labels as u64,
        regions_measured: stats_measured,
        sites_after_merge,
        sites_dropped_by_aoi: dropped,
    };
    tracing::debug!(
        labeled = stats.regions_labeled,
        measured = stats.regions_measured,
        merged = stats.sites_after_merge,
        dropped = stats.sites_dropped_by_aoi,
        "region extraction complete"
    );

    Ok(ExtractionResult {
        sites: kept,
        stats,
        warnings,
    })
}

/// 4-connected component labeling by iterative flood fill. Labels start
/// at 1; 0 means background.
fn label_components(mask: &Array2<bool>) -> (Array2<u32>, u32) {
    let (h, w) = mask.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    let mut next = 0u32;
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if !mask[[y, x]] || labels[[y, x]] != 0 {
                continue;
            }
            next += 1;
            labels[[y, x]] = next;
            stack.push((y, x));
            while let Some((cy, cx)) = stack.pop() {
                for (ny, nx) in neighbors4(cy, cx, h, w) {
                    if mask[[ny, nx]] && labels[[ny, nx]] == 0 {
                        labels[[ny, nx]] = next;
                        stack.push((ny, nx));
                    }
                }
            }
        }
    }
    (labels, next)
}

fn neighbors4(y: usize, x: usize, h: usize, w: usize) -> impl Iterator<Item = (usize, usize)> {
    let mut out = Vec::with_capacity(4);
    if y > 0 {
        out.push((y - 1, x));
    }
    if y + 1 < h {
        out.push((y + 1, x));
    }
    if x > 0 {
        out.push((y, x - 1));
    }
    if x + 1 < w {
        out.push((y, x + 1));
    }
    out.into_iter()
}

fn measure_region(
    labels: &Array2<u32>,
    surface: &Array2<f64>,
    label: u32,
    transform: &AffineTransform,
    px_area: f64,
    px_side: f64,
) -> CandidateSite {
    let (h, w) = labels.dim();
    let mut count = 0u64;
    let mut sum_row = 0.0;
    let mut sum_col = 0.0;
    let mut sum_surf = 0.0;
    let mut sum_surf_sq = 0.0;
    let mut perimeter_px = 0u64;

    for ((y, x), l) in labels.indexed_iter() {
        if *l != label {
            continue;
        }
        count += 1;
        sum_row += y as f64;
        sum_col += x as f64;
        let s = surface[[y, x]];
        sum_surf += s;
        sum_surf_sq += s * s;
        // A pixel is on the boundary when erosion would remove it: any
        // 4-neighbor outside the region, or the grid edge.
        let interior = y > 0
            && y + 1 < h
            && x > 0
            && x + 1 < w
            && labels[[y - 1, x]] == label
            && labels[[y + 1, x]] == label
            && labels[[y, x - 1]] == label
            && labels[[y, x + 1]] == label;
        if !interior {
            perimeter_px += 1;
        }
    }

    let n = count as f64;
    let (lon, lat) = transform.xy(sum_row / n, sum_col / n);
    let mean = (sum_surf / n).clamp(0.0, 1.0);
    let var = (sum_surf_sq / n - mean * mean).max(0.0);
    let area_m2 = n * px_area;
    let perimeter_m = perimeter_px as f64 * px_side;

    CandidateSite {
        id: format!("SITE_{label:03}"),
        lat,
        lon,
        area_m2,
        perimeter_m,
        anomaly_intensity: mean,
        anomaly_std: var.sqrt(),
        compactness: compactness(area_m2, perimeter_m),
        confidence: mean,
        priority: PriorityTier::from_confidence(mean),
        pixel_count: count,
        merged_from: None,
        likelihood: None,
    }
}

fn compactness(area_m2: f64, perimeter_m: f64) -> f64 {
    if perimeter_m > 0.0 {
        (4.0 * std::f64::consts::PI * area_m2 / (perimeter_m * perimeter_m)).min(1.0)
    } else {
        0.0
    }
}

/// Single-link clustering over site centroids: sites closer than the
/// merge radius (converted to degrees) collapse into one. Singletons pass
/// through untouched, so re-running the pass over already-merged output
/// leaves it unchanged.
pub fn merge_candidate_sites(sites: Vec<CandidateSite>, merge_radius_m: f64) -> Vec<CandidateSite> {
    let eps_deg = merge_radius_m / METERS_PER_DEGREE;
    let n = sites.len();
    let mut cluster = vec![usize::MAX; n];
    let mut n_clusters = 0usize;

    for i in 0..n {
        if cluster[i] != usize::MAX {
            continue;
        }
        let id = n_clusters;
        n_clusters += 1;
        cluster[i] = id;
        let mut frontier = vec![i];
        while let Some(cur) = frontier.pop() {
            for j in 0..n {
                if cluster[j] != usize::MAX {
                    continue;
                }
                let dx = sites[cur].lon - sites[j].lon;
                let dy = sites[cur].lat - sites[j].lat;
                if (dx * dx + dy * dy).sqrt() <= eps_deg {
                    cluster[j] = id;
                    frontier.push(j);
                }
            }
        }
    }

    let mut out = Vec::with_capacity(n_clusters);
    for id in 0..n_clusters {
        let members: Vec<&CandidateSite> = sites
            .iter()
            .zip(&cluster)
            .filter(|(_, c)| **c == id)
            .map(|(s, _)| s)
            .collect();
        if members.len() == 1 {
            out.push(members[0].clone());
            continue;
        }
        let m = members.len() as f64;

        let lat = members.iter().map(|s| s.lat).sum::<f64>() / m;
        let lon = members.iter().map(|s| s.lon).sum::<f64>() / m;
        let area_m2 = members.iter().map(|s| s.area_m2).sum::<f64>();
        let perimeter_m = members.iter().map(|s| s.perimeter_m).fold(0.0, f64::max);
        let pixel_count = members.iter().map(|s| s.pixel_count).sum::<u64>();
        let confidence = members
            .iter()
            .map(|s| s.confidence)
            .fold(0.0, f64::max)
            .clamp(0.0, 1.0);
        let anomaly_std = members.iter().map(|s| s.anomaly_std).sum::<f64>() / m;
        let merged_from: u32 = members
            .iter()
            .map(|s| s.merged_from.unwrap_or(1))
            .sum();

        out.push(CandidateSite {
            id: members[0].id.clone(),
            lat,
            lon,
            area_m2,
            perimeter_m,
            anomaly_intensity: confidence,
            anomaly_std,
            compactness: compactness(area_m2, perimeter_m),
            confidence,
            priority: PriorityTier::from_confidence(confidence),
            pixel_count,
            merged_from: Some(merged_from),
            likelihood: None,
        });
    }
    out
}
