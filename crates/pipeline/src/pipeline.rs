//! Pipeline orchestrator: FETCH, INDEX, DETECT, EXTRACT, SCORE,
//! NORMALIZE, EXPORT, driven off one request and recorded step by step
//! into the run manifest.
//!
//! Stage failures are data. A fatal stage records its failure in the
//! manifest, the remaining stages are recorded as skipped, and the caller
//! gets a completed PipelineResult either way. The orchestrator never
//! fabricates output: a live run that produced nothing real ends in a
//! failure status with empty sites, and the demo generator is only
//! consulted in demo mode or behind the explicit fallback switch.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sentinel_core::{
    AffineTransform, AoiPolygon, CandidateSite, DataSource, ProcessingStep, RasterInput,
    RunManifest, RunMode, RunStatus, StageError, StepStatus,
};

use crate::demo::DemoGenerator;
use crate::detect::{detect_anomalies, DetectionStats};
use crate::export::{export_sites, ExportFormat};
use crate::extract::{extract_sites, ExtractionConfig, ExtractionStats};
use crate::features::prepare_features;
use crate::indices::compute_indices;
use crate::provider::{FetchedImagery, ImageryProvider, SceneQuery};
use crate::score::{score_sites, ScoringConfig};

const STAGE_FETCH: &str = "FETCH";
const STAGE_INDEX: &str = "INDEX";
const STAGE_DETECT: &str = "DETECT";
const STAGE_EXTRACT: &str = "EXTRACT";
const STAGE_SCORE: &str = "SCORE";
const STAGE_NORMALIZE: &str = "NORMALIZE";
const STAGE_EXPORT: &str = "EXPORT";

const ALL_STAGES: &[&str] = &[
    STAGE_FETCH,
    STAGE_INDEX,
    STAGE_DETECT,
    STAGE_EXTRACT,
    STAGE_SCORE,
    STAGE_NORMALIZE,
    STAGE_EXPORT,
];

// ---------------------------------------------------------------------------
// Request and configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub mode: RunMode,
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_cloud_cover: f64,
    /// Expected anomalous fraction, in (0,1).
    pub contamination: f64,
    pub export_formats: Vec<ExportFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aoi: Option<AoiPolygon>,
}

impl PipelineRequest {
    /// Reject malformed requests before any stage runs.
    pub fn validate(&self) -> Result<(), StageError> {
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(StageError::InvalidRequest(format!(
                "contamination must be in (0,1), got {}",
                self.contamination
            )));
        }
        if !(0.0..=100.0).contains(&self.max_cloud_cover) {
            return Err(StageError::InvalidRequest(format!(
                "max_cloud_cover must be in [0,100], got {}",
                self.max_cloud_cover
            )));
        }
        if self.start >= self.end {
            return Err(StageError::InvalidRequest(
                "start date must precede end date".into(),
            ));
        }
        if self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(StageError::InvalidRequest(
                "bounding box is empty or inverted".into(),
            ));
        }
        if self.export_formats.is_empty() {
            return Err(StageError::InvalidRequest(
                "at least one export format is required".into(),
            ));
        }
        Ok(())
    }

    fn scene_query(&self) -> SceneQuery {
        SceneQuery {
            min_lon: self.min_lon,
            min_lat: self.min_lat,
            max_lon: self.max_lon,
            max_lat: self.max_lat,
            start: self.start,
            end: self.end,
            max_cloud_cover: self.max_cloud_cover,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub extraction: ExtractionConfig,
    pub scoring: ScoringConfig,
    /// When a live fetch fails, fall back to the demo generator instead of
    /// halting. Never silent: the fallback lands in the warnings and the
    /// run stays demo-labeled with synthetic indicators.
    pub allow_demo_fallback: bool,
    pub demo_seed: u64,
}

impl PipelineConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            extraction: ExtractionConfig::default(),
            scoring: ScoringConfig::default(),
            allow_demo_fallback: false,
            demo_seed: 42,
        }
    }
}

// ---------------------------------------------------------------------------
// Result surface
// ---------------------------------------------------------------------------

/// Aggregate statistics shipped with the result and mirrored into the
/// manifest's data-quality block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub detection: Option<DetectionStats>,
    pub extraction: Option<ExtractionStats>,
    pub total_sites: u64,
    pub total_area_m2: f64,
    pub mean_area_m2: f64,
    pub max_area_m2: f64,
    pub mean_confidence: f64,
    pub high_priority: u64,
    pub medium_priority: u64,
    pub low_priority: u64,
}

impl PipelineStats {
    fn fill_site_stats(&mut self, sites: &[CandidateSite]) {
        self.total_sites = sites.len() as u64;
        if sites.is_empty() {
            return;
        }
        let n = sites.len() as f64;
        self.total_area_m2 = sites.iter().map(|s| s.area_m2).sum();
        self.mean_area_m2 = self.total_area_m2 / n;
        self.max_area_m2 = sites.iter().map(|s| s.area_m2).fold(0.0, f64::max);
        self.mean_confidence = sites.iter().map(|s| s.confidence).sum::<f64>() / n;
        for s in sites {
            match s.priority.as_str() {
                "high" => self.high_priority += 1,
                "medium" => self.medium_priority += 1,
                _ => self.low_priority += 1,
            }
        }
    }
}

/// Immutable outcome of one run. `success` means the run ended in a
/// non-failure status; inspect `status` and the manifest for the rest.
#[derive(Debug)]
pub struct PipelineResult {
    pub success: bool,
    pub status: RunStatus,
    pub sites: Vec<CandidateSite>,
    pub stats: PipelineStats,
    pub export_paths: BTreeMap<String, PathBuf>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub manifest: RunManifest,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    provider: Option<Box<dyn ImageryProvider>>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn provider(mut self, provider: Box<dyn ImageryProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Validate collaborators. A provider is optional here; live runs
    /// without one fail at FETCH with a structured error.
    pub fn build(self) -> Result<Pipeline, StageError> {
        let config = self
            .config
            .ok_or_else(|| StageError::MissingComponent("pipeline config".into()))?;
        Ok(Pipeline {
            config,
            provider: self.provider,
        })
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    provider: Option<Box<dyn ImageryProvider>>,
}

// Intermediate carried between FETCH and INDEX.
struct FetchOutcome {
    bands: BTreeMap<String, Array2<f64>>,
    transform: AffineTransform,
    from_real_data: bool,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            config: None,
            provider: None,
        }
    }

    /// Execute one run end to end. Never panics on stage failure; the
    /// outcome is always a complete result with a persisted manifest.
    pub fn run(&self, request: &PipelineRequest) -> PipelineResult {
        let mut manifest = RunManifest::new(request.mode);
        if let Ok(params) = serde_json::to_value(request) {
            if let serde_json::Value::Object(map) = params {
                manifest.request_params.extend(map);
            }
        }
        tracing::info!(run_id = %manifest.run_id, mode = request.mode.as_str(), "pipeline run started");

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut stats = PipelineStats::default();
        let mut export_paths = BTreeMap::new();
        let mut sites = Vec::new();

        if let Err(e) = request.validate() {
            errors.push(e.to_string());
            manifest.set_failure(e.to_string(), fatal_status(request.mode));
            skip_stages(&mut manifest, ALL_STAGES);
        } else {
            self.execute(
                request,
                &mut manifest,
                &mut errors,
                &mut warnings,
                &mut stats,
                &mut export_paths,
                &mut sites,
            );
        }

        stats.fill_site_stats(&sites);
        if let Ok(v) = serde_json::to_value(&stats) {
            manifest.set_quality("run_statistics", v);
        }
        for w in &warnings {
            manifest.add_warning(w.clone());
        }
        manifest.finalize();
        if let Err(e) = manifest.save(&self.config.output_dir) {
            warnings.push(format!("failed to persist run manifest: {e}"));
        }

        let status = manifest.status;
        tracing::info!(
            run_id = %manifest.run_id,
            status = status.as_str(),
            sites = sites.len(),
            "pipeline run finished"
        );
        PipelineResult {
            success: !status.is_failure(),
            status,
            sites,
            stats,
            export_paths,
            errors,
            warnings,
            manifest,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute(
        &self,
        request: &PipelineRequest,
        manifest: &mut RunManifest,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
        stats: &mut PipelineStats,
        export_paths: &mut BTreeMap<String, PathBuf>,
        sites: &mut Vec<CandidateSite>,
    ) {
        // FETCH
        let fetched = record_step(manifest, STAGE_FETCH, |m| {
            self.fetch(request, m, warnings)
        });
        let fetched = match fetched {
            Ok(f) => f,
            Err(e) => {
                let status = match &e {
                    StageError::NoScenes(_) => RunStatus::NoData,
                    _ => fatal_status(request.mode),
                };
                errors.push(e.to_string());
                manifest.set_failure(e.to_string(), status);
                skip_stages(manifest, &ALL_STAGES[1..]);
                return;
            }
        };

        // INDEX: spectral indices, then the stacked feature tensor.
        let prepared = record_step(manifest, STAGE_INDEX, |m| {
            let computed = compute_indices(&fetched.bands, fetched.from_real_data)?;
            for indicator in computed.indicators {
                m.add_indicator(indicator);
            }
            let rasters: BTreeMap<String, RasterInput> = computed
                .rasters
                .iter()
                .map(|r| (r.name.clone(), RasterInput::Single(r.data.clone())))
                .collect();
            let prepared = prepare_features(&rasters)?;
            Ok((computed.rasters, prepared))
        });
        let (index_rasters, prepared) = match prepared {
            Ok(p) => p,
            Err(e) => {
                errors.push(e.to_string());
                manifest.set_failure(e.to_string(), fatal_status(request.mode));
                skip_stages(manifest, &ALL_STAGES[2..]);
                return;
            }
        };
        if let Ok(v) = serde_json::to_value(&prepared.quality) {
            manifest.set_quality("raster_quality", v);
        }

        // The evidence chain is complete once real scenes produced real
        // indicators; the likelihood gate keys off this.
        manifest.mark_live_evidence();

        // DETECT
        let detection = record_step(manifest, STAGE_DETECT, |_| {
            detect_anomalies(&prepared.tensor, request.contamination)
        });
        let detection = match detection {
            Ok(d) => d,
            Err(e) => {
                errors.push(e.to_string());
                manifest.set_failure(e.to_string(), fatal_status(request.mode));
                skip_stages(manifest, &ALL_STAGES[3..]);
                return;
            }
        };
        stats.detection = Some(detection.stats);

        // EXTRACT
        let extraction = record_step(manifest, STAGE_EXTRACT, |_| {
            extract_sites(
                &detection.mask,
                &detection.surface,
                &fetched.transform,
                request.aoi.as_ref(),
                &self.config.extraction,
            )
        });
        let extraction = match extraction {
            Ok(x) => x,
            Err(e) => {
                errors.push(e.to_string());
                manifest.set_failure(e.to_string(), fatal_status(request.mode));
                skip_stages(manifest, &ALL_STAGES[4..]);
                return;
            }
        };
        stats.extraction = Some(extraction.stats);
        warnings.extend(extraction.warnings);
        *sites = extraction.sites;
        if sites.is_empty() {
            warnings.push("extraction produced no candidate sites".to_string());
        }

        // SCORE: gated; skipped runs say so in the manifest.
        if manifest.can_compute_likelihood() {
            let _ = record_step(manifest, STAGE_SCORE, |_| {
                score_sites(sites, &index_rasters, &detection.mask, &self.config.scoring);
                Ok(())
            });
        } else {
            add_skipped_step(
                manifest,
                STAGE_SCORE,
                Some("likelihood gate closed: no complete real-data evidence chain".into()),
            );
        }

        // NORMALIZE: stable presentation order, sequential ids.
        let _ = record_step(manifest, STAGE_NORMALIZE, |_| {
            sites.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            for (i, site) in sites.iter_mut().enumerate() {
                site.id = format!("SITE_{:03}", i + 1);
            }
            Ok(())
        });

        // EXPORT: recoverable on failure, the run keeps its status.
        let exported = record_step(manifest, STAGE_EXPORT, |m| {
            let out = export_sites(
                sites,
                &request.export_formats,
                &self.config.output_dir,
                &m.run_id.clone(),
            )?;
            for artifact in out.artifacts {
                m.add_output(artifact);
            }
            Ok(out.paths)
        });
        match exported {
            Ok(paths) => *export_paths = paths,
            Err(e) => warnings.push(format!("export failed: {e}")),
        }
    }

    fn fetch(
        &self,
        request: &PipelineRequest,
        manifest: &mut RunManifest,
        warnings: &mut Vec<String>,
    ) -> Result<FetchOutcome, StageError> {
        if request.mode == RunMode::Demo {
            return Ok(self.demo_fetch(request, manifest));
        }

        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| StageError::MissingComponent("imagery provider for live mode".into()))?;

        let query = request.scene_query();
        match self.live_fetch(provider.as_ref(), &query, manifest) {
            Ok(outcome) => Ok(outcome),
            Err(e @ StageError::NoScenes(_)) => Err(e),
            Err(e) if self.config.allow_demo_fallback => {
                tracing::warn!(error = %e, "live fetch failed, falling back to demo imagery");
                warnings.push(format!(
                    "live fetch failed ({e}); demo imagery substituted, output is demo-labeled"
                ));
                // A downgraded run must never look live.
                manifest.status = RunStatus::DemoOk;
                Ok(self.demo_fetch(request, manifest))
            }
            Err(e) => Err(e),
        }
    }

    fn live_fetch(
        &self,
        provider: &dyn ImageryProvider,
        query: &SceneQuery,
        manifest: &mut RunManifest,
    ) -> Result<FetchOutcome, StageError> {
        let scenes = provider.search(query)?;
        if scenes.is_empty() {
            return Err(StageError::NoScenes(format!(
                "0 scenes under {}% cloud cover in the query window",
                query.max_cloud_cover
            )));
        }
        let FetchedImagery {
            bands,
            transform,
            scenes,
        } = provider.fetch_bands(query, &scenes)?;

        manifest.add_data_source(DataSource {
            provider: provider.name().to_string(),
            collection: provider.collection().to_string(),
            scene_ids: scenes.iter().map(|s| s.scene_id.clone()).collect(),
            timestamps: scenes.iter().map(|s| s.timestamp.to_rfc3339()).collect(),
            total_scenes: scenes.len() as u32,
            processed_scenes: scenes.len() as u32,
        });
        Ok(FetchOutcome {
            bands,
            transform,
            from_real_data: true,
        })
    }

    fn demo_fetch(&self, request: &PipelineRequest, manifest: &mut RunManifest) -> FetchOutcome {
        let generator = DemoGenerator::new(self.config.demo_seed);
        let (bands, transform) = generator.generate_bands(
            request.min_lon,
            request.min_lat,
            request.max_lon,
            request.max_lat,
        );
        manifest.add_data_source(DataSource {
            provider: "demo-generator".to_string(),
            collection: "synthetic".to_string(),
            scene_ids: Vec::new(),
            timestamps: Vec::new(),
            total_scenes: 0,
            processed_scenes: 0,
        });
        FetchOutcome {
            bands,
            transform,
            from_real_data: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Step bookkeeping
// ---------------------------------------------------------------------------

fn record_step<T>(
    manifest: &mut RunManifest,
    name: &str,
    f: impl FnOnce(&mut RunManifest) -> Result<T, StageError>,
) -> Result<T, StageError> {
    let started_at = Utc::now().to_rfc3339();
    let out = f(manifest);
    manifest.add_step(ProcessingStep {
        step_name: name.to_string(),
        started_at,
        completed_at: Utc::now().to_rfc3339(),
        status: if out.is_ok() {
            StepStatus::Success
        } else {
            StepStatus::Failed
        },
        error_message: out.as_ref().err().map(|e| e.to_string()),
    });
    out
}

/// Status for a fatal failure that is not a specific no-scenes outcome.
/// A demo run can never have failed a live acquisition, so its fatal
/// failures end as NO_DATA instead of LIVE_FAILED.
fn fatal_status(mode: RunMode) -> RunStatus {
    match mode {
        RunMode::Live => RunStatus::LiveFailed,
        RunMode::Demo => RunStatus::NoData,
    }
}

fn add_skipped_step(manifest: &mut RunManifest, name: &str, reason: Option<String>) {
    let now = Utc::now().to_rfc3339();
    manifest.add_step(ProcessingStep {
        step_name: name.to_string(),
        started_at: now.clone(),
        completed_at: now,
        status: StepStatus::Skipped,
        error_message: reason,
    });
}

fn skip_stages(manifest: &mut RunManifest, names: &[&str]) {
    for name in names {
        add_skipped_step(manifest, name, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

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
            contamination: 0.1,
            export_formats: vec![ExportFormat::GeoJson],
            aoi: None,
        }
    }

    fn pipeline(dir: &TempDir) -> Pipeline {
        Pipeline::builder()
            .config(PipelineConfig::new(dir.path()))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_without_config_fails() {
        assert!(Pipeline::builder().build().is_err());
    }

    #[test]
    fn invalid_contamination_fails_before_any_stage() {
        let dir = TempDir::new().unwrap();
        let mut req = request(RunMode::Demo);
        req.contamination = 1.5;
        let result = pipeline(&dir).run(&req);

        assert!(!result.success);
        assert!(result.manifest.data_sources.is_empty());
        assert!(result
            .manifest
            .processing_steps
            .iter()
            .all(|s| s.status == StepStatus::Skipped));
    }

    #[test]
    fn validation_failure_status_matches_the_requested_mode() {
        // A demo run never attempted a live acquisition, so its manifest
        // must not claim one failed.
        let dir = TempDir::new().unwrap();
        let mut req = request(RunMode::Demo);
        req.export_formats.clear();
        let result = pipeline(&dir).run(&req);
        assert_eq!(result.status, RunStatus::NoData);
        assert!(result.manifest.failure_reason.is_some());

        let mut req = request(RunMode::Live);
        req.export_formats.clear();
        let result = pipeline(&dir).run(&req);
        assert_eq!(result.status, RunStatus::LiveFailed);
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut req = request(RunMode::Demo);
        std::mem::swap(&mut req.start, &mut req.end);
        let result = pipeline(&dir).run(&req);
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn live_mode_without_provider_fails_at_fetch() {
        let dir = TempDir::new().unwrap();
        let result = pipeline(&dir).run(&request(RunMode::Live));

        assert!(!result.success);
        assert_eq!(result.status, RunStatus::LiveFailed);
        let fetch = &result.manifest.processing_steps[0];
        assert_eq!(fetch.step_name, "FETCH");
        assert_eq!(fetch.status, StepStatus::Failed);
    }

    #[test]
    fn stats_cover_sites_and_detection() {
        let dir = TempDir::new().unwrap();
        let result = pipeline(&dir).run(&request(RunMode::Demo));

        assert!(result.success);
        let det = result.stats.detection.unwrap();
        assert_eq!(det.total_pixels, 10_000);
        assert_eq!(
            result.stats.total_sites,
            result.sites.len() as u64
        );
    }

    #[test]
    fn normalize_orders_sites_by_confidence_with_sequential_ids() {
        let dir = TempDir::new().unwrap();
        let result = pipeline(&dir).run(&request(RunMode::Demo));

        for (i, s) in result.sites.iter().enumerate() {
            assert_eq!(s.id, format!("SITE_{:03}", i + 1));
            if i > 0 {
                assert!(s.confidence <= result.sites[i - 1].confidence);
            }
        }
    }
}
