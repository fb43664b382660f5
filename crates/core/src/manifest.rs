//! Run manifest: append-only provenance record for one pipeline run.
//!
//! No-fake-results policy: the manifest is the single authority on whether
//! likelihood output may ever be shown. A run starts from a conservative
//! status (LIVE_FAILED in live mode, DEMO_OK in demo mode) and only
//! advances to LIVE_OK once a complete real-data evidence chain exists.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Demo,
    Live,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Demo => "demo",
            RunMode::Live => "live",
        }
    }
}

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Demonstration output; must always render demo-labeled.
    #[serde(rename = "DEMO_OK")]
    DemoOk,
    /// Complete real-data evidence chain. Serialized as LIVE_OK; the
    /// legacy SUCCESS spelling is accepted on read.
    #[serde(rename = "LIVE_OK", alias = "SUCCESS")]
    LiveOk,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "LIVE_FAILED")]
    LiveFailed,
    #[serde(rename = "NO_DATA")]
    NoData,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::DemoOk => "DEMO_OK",
            RunStatus::LiveOk => "LIVE_OK",
            RunStatus::Partial => "PARTIAL",
            RunStatus::LiveFailed => "LIVE_FAILED",
            RunStatus::NoData => "NO_DATA",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::LiveFailed | RunStatus::NoData)
    }
}

/// One imagery source consumed during FETCH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub provider: String,
    pub collection: String,
    pub scene_ids: Vec<String>,
    pub timestamps: Vec<String>,
    pub total_scenes: u32,
    /// Scenes actually processed, not just returned by the search.
    pub processed_scenes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// Record of one pipeline stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub step_name: String,
    pub started_at: String,
    pub completed_at: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A derived indicator (NDVI, NDWI, ...) with the flag the likelihood gate
/// hinges on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputedIndicator {
    pub name: String,
    pub formula: String,
    pub bands_used: Vec<String>,
    pub computed_from_real_data: bool,
}

/// A file written during EXPORT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub file_path: String,
    pub file_type: String,
    pub file_size_bytes: u64,
    pub created_at: String,
}

/// Complete provenance manifest for one run. Exclusively owned by the
/// orchestrator while the run is in flight; persisted once at run end and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub mode: RunMode,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: RunStatus,
    pub data_sources: Vec<DataSource>,
    pub processing_steps: Vec<ProcessingStep>,
    pub indicators: Vec<ComputedIndicator>,
    pub outputs: Vec<OutputArtifact>,
    pub data_quality: BTreeMap<String, serde_json::Value>,
    pub failure_reason: Option<String>,
    pub warnings: Vec<String>,
    pub request_params: BTreeMap<String, serde_json::Value>,
}

impl RunManifest {
    pub fn new(mode: RunMode) -> Self {
        // Conservative default: a live run is LIVE_FAILED until a real
        // evidence chain proves otherwise.
        let status = match mode {
            RunMode::Demo => RunStatus::DemoOk,
            RunMode::Live => RunStatus::LiveFailed,
        };
        Self {
            run_id: Uuid::new_v4().to_string(),
            mode,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            status,
            data_sources: Vec::new(),
            processing_steps: Vec::new(),
            indicators: Vec::new(),
            outputs: Vec::new(),
            data_quality: BTreeMap::new(),
            failure_reason: None,
            warnings: Vec::new(),
            request_params: BTreeMap::new(),
        }
    }

    pub fn add_data_source(&mut self, source: DataSource) {
        self.data_sources.push(source);
    }

    pub fn add_step(&mut self, step: ProcessingStep) {
        self.processing_steps.push(step);
    }

    pub fn add_indicator(&mut self, indicator: ComputedIndicator) {
        self.indicators.push(indicator);
    }

    pub fn add_output(&mut self, artifact: OutputArtifact) {
        self.outputs.push(artifact);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn set_quality(&mut self, key: &str, value: serde_json::Value) {
        self.data_quality.insert(key.to_string(), value);
    }

    /// Force a terminal failure. Once set, no downstream stage may compute
    /// likelihood; the first failure reason wins.
    pub fn set_failure(&mut self, reason: impl Into<String>, status: RunStatus) {
        debug_assert!(status.is_failure() || status == RunStatus::Partial);
        if self.failure_reason.is_none() {
            self.failure_reason = Some(reason.into());
            self.status = status;
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failure_reason.is_some()
    }

    /// True once at least one real scene was actually processed.
    fn has_real_scene(&self) -> bool {
        self.data_sources.iter().any(|s| s.processed_scenes > 0)
    }

    fn has_real_indicator(&self) -> bool {
        self.indicators.iter().any(|i| i.computed_from_real_data)
    }

    /// Advance a live run to LIVE_OK once the evidence chain is complete:
    /// at least one real scene consumed by at least one indicator flagged
    /// as computed from real data. No-op for demo runs and failed runs.
    pub fn mark_live_evidence(&mut self) {
        if self.mode == RunMode::Live
            && !self.has_failed()
            && self.has_real_scene()
            && self.has_real_indicator()
        {
            self.status = RunStatus::LiveOk;
        }
    }

    /// The single gate in front of likelihood/heatmap/recommended-area
    /// output. Demo output goes through the separate demo gate and must
    /// never be conflated with this one.
    pub fn can_compute_likelihood(&self) -> bool {
        self.status == RunStatus::LiveOk && self.has_real_indicator()
    }

    /// Demo gate: output may be shown, but only with an explicit demo
    /// label.
    pub fn is_demo_labeled(&self) -> bool {
        self.status == RunStatus::DemoOk
    }

    pub fn finalize(&mut self) {
        self.completed_at = Some(Utc::now().to_rfc3339());
    }

    /// Persist as one self-describing JSON document, suitable for audit
    /// replay.
    pub fn save(&self, output_dir: &Path) -> Result<PathBuf, StageError> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!("manifest_{}.json", self.run_id));
        let doc = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, doc)?;
        Ok(path)
    }
}
