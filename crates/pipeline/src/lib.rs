//! Detection-and-provenance pipeline for spectral satellite imagery.
//!
//! One run flows FETCH -> INDEX -> DETECT -> EXTRACT -> SCORE ->
//! NORMALIZE -> EXPORT under a single orchestrator, with every stage
//! recorded in a provenance manifest. The manifest's likelihood gate
//! enforces the no-fake-results policy: scored output only ever exists
//! for runs with a complete real-data evidence chain, and demo output is
//! always demo-labeled.

pub mod demo;
pub mod detect;
pub mod export;
pub mod extract;
pub mod features;
pub mod indices;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod score;

pub use demo::DemoGenerator;
pub use detect::{detect_anomalies, Detection, DetectionStats};
pub use export::{export_sites, parse_geojson, ExportFormat, ExportOutput};
pub use extract::{
    extract_sites, merge_candidate_sites, ExtractionConfig, ExtractionResult, ExtractionStats,
};
pub use features::{prepare_features, PreparedFeatures};
pub use indices::{compute_indices, ComputedIndices};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineConfig, PipelineRequest, PipelineResult, PipelineStats,
};
pub use provider::{FetchedImagery, ImageryProvider, SceneMetadata, SceneQuery};
pub use score::{score_sites, ScoringConfig};
