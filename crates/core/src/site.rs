//! Candidate site: one emitted, geo-located detection.

use serde::{Deserialize, Serialize};

/// Priority tier derived from confidence with fixed cutoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Low,
    Medium,
    High,
}

impl PriorityTier {
    /// Confidence is in [0,1]; cutoffs are 0.8 (high) and 0.6 (medium).
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            PriorityTier::High
        } else if confidence >= 0.6 {
            PriorityTier::Medium
        } else {
            PriorityTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::High => "high",
            PriorityTier::Medium => "medium",
            PriorityTier::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(PriorityTier::High),
            "medium" => Some(PriorityTier::Medium),
            "low" => Some(PriorityTier::Low),
            _ => None,
        }
    }
}

/// One detected candidate site. Immutable once emitted by the extractor,
/// except that the optional likelihood scoring pass overwrites
/// `likelihood`, `confidence` and `priority`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSite {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub area_m2: f64,
    pub perimeter_m: f64,
    pub anomaly_intensity: f64,
    pub anomaly_std: f64,
    /// Isoperimetric ratio 4*pi*area/perimeter^2; 1.0 is a perfect circle.
    pub compactness: f64,
    pub confidence: f64,
    pub priority: PriorityTier,
    pub pixel_count: u64,
    /// Number of pre-merge regions folded into this site; None for
    /// singletons that passed through the merge pass untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_from: Option<u32>,
    /// Archaeology likelihood (0-100), present only after a gated
    /// scoring pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<f64>,
}

impl CandidateSite {
    /// Field next-step string shown alongside the site.
    pub fn recommended_action(&self) -> &'static str {
        if self.priority == PriorityTier::High && self.confidence >= 0.8 {
            "Field verification recommended - high probability"
        } else if self.confidence >= 0.6 {
            "Further analysis recommended - medium confidence"
        } else {
            "Monitor for changes - low confidence"
        }
    }
}
