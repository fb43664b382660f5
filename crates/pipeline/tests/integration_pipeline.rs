//! End-to-end pipeline runs against provider doubles: live happy path,
//! empty catalog, provider outage with and without the demo fallback, and
//! the demo mode guarantees.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ndarray::Array2;
use sentinel_core::{
    AffineTransform, AoiPolygon, PriorityTier, RunMode, RunStatus, StageError, StepStatus,
};
use sentinel_pipeline::provider::{
    FetchedImagery, ImageryProvider, SceneMetadata, SceneQuery,
};
use sentinel_pipeline::{ExportFormat, Pipeline, PipelineConfig, PipelineRequest};
use tempfile::TempDir;

const GRID: usize = 60;

/// Provider returning one real scene with constant-background bands and a
/// strong spectral disturbance patch at rows/cols 10..16.
struct SyntheticLiveProvider {
    calls: Arc<AtomicU32>,
}

impl SyntheticLiveProvider {
    fn new() -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl ImageryProvider for SyntheticLiveProvider {
    fn name(&self) -> &str {
        "test-catalog"
    }
    fn collection(&self) -> &str {
        "sentinel-2-l2a"
    }

    fn search(&self, _query: &SceneQuery) -> Result<Vec<SceneMetadata>, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![SceneMetadata {
            scene_id: "S2A_TEST_0001".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 5, 10, 10, 0, 0).unwrap(),
            collection: "sentinel-2-l2a".to_string(),
            cloud_cover: Some(3.5),
        }])
    }

    fn fetch_bands(
        &self,
        query: &SceneQuery,
        scenes: &[SceneMetadata],
    ) -> Result<FetchedImagery, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut green = Array2::from_elem((GRID, GRID), 0.30);
        let mut red = Array2::from_elem((GRID, GRID), 0.25);
        let mut nir = Array2::from_elem((GRID, GRID), 0.60);
        for y in 10..16 {
            for x in 10..16 {
                nir[[y, x]] = 0.10;
                red[[y, x]] = 0.60;
                green[[y, x]] = 0.20;
            }
        }
        let mut bands = BTreeMap::new();
        bands.insert("B03".to_string(), green);
        bands.insert("B04".to_string(), red);
        bands.insert("B08".to_string(), nir);

        Ok(FetchedImagery {
            bands,
            transform: AffineTransform::from_bounds(
                query.min_lon,
                query.min_lat,
                query.max_lon,
                query.max_lat,
                GRID,
                GRID,
            ),
            scenes: scenes.to_vec(),
        })
    }
}

struct EmptyCatalog;

impl ImageryProvider for EmptyCatalog {
    fn name(&self) -> &str {
        "empty-catalog"
    }
    fn collection(&self) -> &str {
        "sentinel-2-l2a"
    }
    fn search(&self, _query: &SceneQuery) -> Result<Vec<SceneMetadata>, StageError> {
        Ok(Vec::new())
    }
    fn fetch_bands(
        &self,
        _query: &SceneQuery,
        _scenes: &[SceneMetadata],
    ) -> Result<FetchedImagery, StageError> {
        unreachable!("fetch_bands must not be called when the catalog is empty")
    }
}

struct OutageProvider;

impl ImageryProvider for OutageProvider {
    fn name(&self) -> &str {
        "outage"
    }
    fn collection(&self) -> &str {
        "sentinel-2-l2a"
    }
    fn search(&self, _query: &SceneQuery) -> Result<Vec<SceneMetadata>, StageError> {
        Err(StageError::ProviderUnavailable("catalog timeout".into()))
    }
    fn fetch_bands(
        &self,
        _query: &SceneQuery,
        _scenes: &[SceneMetadata],
    ) -> Result<FetchedImagery, StageError> {
        Err(StageError::ProviderUnavailable("catalog timeout".into()))
    }
}

fn request(mode: RunMode) -> PipelineRequest {
    PipelineRequest {
        mode,
        min_lon: 31.0,
        min_lat: 30.0,
        max_lon: 31.05,
        max_lat: 30.05,
        start: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
        max_cloud_cover: 20.0,
        contamination: 0.02,
        export_formats: vec![ExportFormat::GeoJson, ExportFormat::Csv],
        aoi: None,
    }
}

fn pipeline_with(dir: &TempDir, provider: Box<dyn ImageryProvider>) -> Pipeline {
    Pipeline::builder()
        .config(PipelineConfig::new(dir.path()))
        .provider(provider)
        .build()
        .unwrap()
}

#[test]
fn live_run_with_real_scene_reaches_live_ok_and_scores_sites() {
    let dir = TempDir::new().unwrap();
    let (provider, _calls) = SyntheticLiveProvider::new();
    let result = pipeline_with(&dir, Box::new(provider)).run(&request(RunMode::Live));

    assert!(result.success);
    assert_eq!(result.status, RunStatus::LiveOk);
    assert!(result.manifest.can_compute_likelihood());
    assert!(!result.sites.is_empty());
    // Gate open: every emitted site carries a likelihood in range.
    for site in &result.sites {
        let l = site.likelihood.expect("scored site");
        assert!((0.0..=100.0).contains(&l));
    }
    // The disturbance patch centroid sits inside the query box.
    let top = &result.sites[0];
    assert!((31.0..31.05).contains(&top.lon));
    assert!((30.0..30.05).contains(&top.lat));
    // Scoring replaced the extraction-time confidence (the surface mean,
    // still visible as anomaly_intensity) with the indicator-count
    // confidence and re-derived the tier from it.
    assert_ne!(top.confidence, top.anomaly_intensity);
    assert_eq!(top.priority, PriorityTier::from_confidence(top.confidence));

    // Both export files recorded as artifacts and on disk.
    assert_eq!(result.manifest.outputs.len(), 2);
    for path in result.export_paths.values() {
        assert!(path.exists());
    }
    // The manifest itself persisted.
    let manifest_path = dir
        .path()
        .join(format!("manifest_{}.json", result.manifest.run_id));
    assert!(manifest_path.exists());
}

#[test]
fn live_run_records_real_provenance_chain() {
    let dir = TempDir::new().unwrap();
    let (provider, calls) = SyntheticLiveProvider::new();
    let result = pipeline_with(&dir, Box::new(provider)).run(&request(RunMode::Live));

    assert_eq!(calls.load(Ordering::SeqCst), 2); // search + fetch_bands
    let source = &result.manifest.data_sources[0];
    assert_eq!(source.provider, "test-catalog");
    assert_eq!(source.processed_scenes, 1);
    assert_eq!(source.scene_ids, vec!["S2A_TEST_0001"]);
    assert!(result
        .manifest
        .indicators
        .iter()
        .all(|i| i.computed_from_real_data));

    let step_names: Vec<&str> = result
        .manifest
        .processing_steps
        .iter()
        .map(|s| s.step_name.as_str())
        .collect();
    assert_eq!(
        step_names,
        vec!["FETCH", "INDEX", "DETECT", "EXTRACT", "SCORE", "NORMALIZE", "EXPORT"]
    );
    assert!(result
        .manifest
        .processing_steps
        .iter()
        .all(|s| s.status == StepStatus::Success));
}

#[test]
fn empty_catalog_ends_in_no_data_with_nothing_fabricated() {
    let dir = TempDir::new().unwrap();
    let result = pipeline_with(&dir, Box::new(EmptyCatalog)).run(&request(RunMode::Live));

    assert!(!result.success);
    assert_eq!(result.status, RunStatus::NoData);
    assert!(result.sites.is_empty());
    assert!(result.manifest.failure_reason.is_some());
    assert!(!result.manifest.can_compute_likelihood());
    // Downstream stages were skipped, not silently omitted.
    assert!(result
        .manifest
        .processing_steps
        .iter()
        .skip(1)
        .all(|s| s.status == StepStatus::Skipped));
}

#[test]
fn provider_outage_without_fallback_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let result = pipeline_with(&dir, Box::new(OutageProvider)).run(&request(RunMode::Live));

    assert!(!result.success);
    assert_eq!(result.status, RunStatus::LiveFailed);
    assert!(result.errors.iter().any(|e| e.contains("catalog timeout")));
    assert!(!result.manifest.can_compute_likelihood());
}

#[test]
fn provider_outage_with_fallback_downgrades_to_demo_labeled_output() {
    let dir = TempDir::new().unwrap();
    let mut config = PipelineConfig::new(dir.path());
    config.allow_demo_fallback = true;
    let pipeline = Pipeline::builder()
        .config(config)
        .provider(Box::new(OutageProvider))
        .build()
        .unwrap();

    let result = pipeline.run(&request(RunMode::Live));

    assert!(result.success);
    assert_eq!(result.status, RunStatus::DemoOk);
    assert!(result.manifest.is_demo_labeled());
    assert!(!result.manifest.can_compute_likelihood());
    assert!(result.warnings.iter().any(|w| w.contains("demo")));
    // Downgraded indicators must be flagged synthetic.
    assert!(result
        .manifest
        .indicators
        .iter()
        .all(|i| !i.computed_from_real_data));
    assert!(result.sites.iter().all(|s| s.likelihood.is_none()));
}

#[test]
fn demo_run_is_deterministic_and_never_scored() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let mut req = request(RunMode::Demo);
    req.contamination = 0.05;

    let a = Pipeline::builder()
        .config(PipelineConfig::new(dir_a.path()))
        .build()
        .unwrap()
        .run(&req);
    let b = Pipeline::builder()
        .config(PipelineConfig::new(dir_b.path()))
        .build()
        .unwrap()
        .run(&req);

    assert!(a.success);
    assert_eq!(a.status, RunStatus::DemoOk);
    assert!(a.manifest.is_demo_labeled());
    assert!(!a.manifest.can_compute_likelihood());

    // Same seed, same sites.
    assert_eq!(a.sites.len(), b.sites.len());
    for (sa, sb) in a.sites.iter().zip(&b.sites) {
        assert_eq!(sa.lat, sb.lat);
        assert_eq!(sa.lon, sb.lon);
        assert_eq!(sa.confidence, sb.confidence);
    }
    // The gate stayed closed: SCORE skipped, no likelihood anywhere.
    let score_step = a
        .manifest
        .processing_steps
        .iter()
        .find(|s| s.step_name == "SCORE")
        .unwrap();
    assert_eq!(score_step.status, StepStatus::Skipped);
    assert!(a.sites.iter().all(|s| s.likelihood.is_none()));
}

#[test]
fn demo_run_never_touches_the_provider() {
    let dir = TempDir::new().unwrap();
    let (provider, calls) = SyntheticLiveProvider::new();
    let result = pipeline_with(&dir, Box::new(provider)).run(&request(RunMode::Demo));

    assert!(result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.manifest.data_sources[0].provider, "demo-generator");
}

#[test]
fn aoi_excluding_all_sites_yields_empty_output_with_warning() {
    let dir = TempDir::new().unwrap();
    let (provider, _calls) = SyntheticLiveProvider::new();
    let mut req = request(RunMode::Live);
    // AOI in the far corner, away from the disturbance patch near the
    // grid's top-left.
    req.aoi = Some(AoiPolygon::rect(31.045, 30.0, 31.05, 30.005));
    let result = pipeline_with(&dir, Box::new(provider)).run(&req);

    assert!(result.success, "AOI drops degrade, they do not fail");
    assert!(result.sites.is_empty());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("area of interest")));
}

#[test]
fn geojson_export_round_trips_site_fields() {
    let dir = TempDir::new().unwrap();
    let (provider, _calls) = SyntheticLiveProvider::new();
    let result = pipeline_with(&dir, Box::new(provider)).run(&request(RunMode::Live));

    let path = &result.export_paths["geojson"];
    let parsed = sentinel_pipeline::parse_geojson(path).unwrap();
    assert_eq!(parsed.len(), result.sites.len());
    for (original, reloaded) in result.sites.iter().zip(&parsed) {
        assert_eq!(original.lat, reloaded.lat);
        assert_eq!(original.lon, reloaded.lon);
        assert_eq!(original.confidence, reloaded.confidence);
        assert_eq!(original.priority, reloaded.priority);
        assert_eq!(original.likelihood, reloaded.likelihood);
    }
}
