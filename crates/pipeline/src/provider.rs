//! Imagery provider seam for the FETCH stage.
//!
//! Live acquisition sits behind a trait so the orchestrator never cares
//! which catalog the bands came from. A provider failure is data, not a
//! panic: the fetch returns a structured error and the orchestrator
//! records it in the manifest. Providers must never substitute synthetic
//! imagery on failure; that downgrade is the orchestrator's decision and
//! it is always recorded.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sentinel_core::{AffineTransform, StageError};

/// Catalog metadata for one scene intersecting the query window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub scene_id: String,
    pub timestamp: DateTime<Utc>,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_cover: Option<f64>,
}

/// Spatiotemporal query for the provider catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneQuery {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_cloud_cover: f64,
}

/// Bands plus georeferencing for one fetch, ready for the INDEX stage.
#[derive(Debug, Clone)]
pub struct FetchedImagery {
    pub bands: BTreeMap<String, Array2<f64>>,
    pub transform: AffineTransform,
    pub scenes: Vec<SceneMetadata>,
}

/// A source of real satellite imagery.
pub trait ImageryProvider {
    /// Human-readable provider name recorded in the manifest.
    fn name(&self) -> &str;

    /// Collection identifier recorded in the manifest.
    fn collection(&self) -> &str;

    /// List scenes matching the query. An empty result is `Ok(vec![])`,
    /// not an error; the orchestrator turns it into a NO_DATA run.
    fn search(&self, query: &SceneQuery) -> Result<Vec<SceneMetadata>, StageError>;

    /// Download band rasters for the given scenes over the query window.
    fn fetch_bands(
        &self,
        query: &SceneQuery,
        scenes: &[SceneMetadata],
    ) -> Result<FetchedImagery, StageError>;
}
