//! Shared data model for the spectral anomaly detection pipeline.
//!
//! This crate holds the types every stage agrees on: rasters and the
//! feature tensor, geographic primitives, candidate sites, the provenance
//! manifest with its likelihood gate, and the stage error taxonomy. It
//! performs no imagery I/O of its own.

pub mod error;
pub mod geo;
pub mod manifest;
pub mod raster;
pub mod site;

pub use error::{ErrorClass, StageError};
pub use geo::{AffineTransform, AoiPolygon};
pub use manifest::{
    ComputedIndicator, DataSource, OutputArtifact, ProcessingStep, RunManifest, RunMode,
    RunStatus, StepStatus,
};
pub use raster::{FeatureTensor, RasterInput, RasterQuality, SpectralIndexRaster};
pub use site::{CandidateSite, PriorityTier};
