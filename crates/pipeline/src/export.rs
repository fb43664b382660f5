//! Export sink: candidate sites to GeoJSON and CSV on disk.
//!
//! Both formats carry the full site record. Coordinates go out as f64
//! without rounding, so parse-back preserves at least six decimal places.
//! Each written file is returned as an artifact record for the manifest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use sentinel_core::{CandidateSite, OutputArtifact, PriorityTier, StageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    GeoJson,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::GeoJson => "geojson",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "geojson" => Some(ExportFormat::GeoJson),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutput {
    /// Format name to written file path.
    pub paths: BTreeMap<String, PathBuf>,
    pub artifacts: Vec<OutputArtifact>,
}

/// Write the sites in every requested format under `out_dir`, which is
/// created if missing. File names carry the run id.
pub fn export_sites(
    sites: &[CandidateSite],
    formats: &[ExportFormat],
    out_dir: &Path,
    run_id: &str,
) -> Result<ExportOutput, StageError> {
    fs::create_dir_all(out_dir)?;

    let mut paths = BTreeMap::new();
    let mut artifacts = Vec::new();
    for format in formats {
        let path = out_dir.join(format!("sites_{run_id}.{}", format.as_str()));
        match format {
            ExportFormat::GeoJson => write_geojson(sites, &path)?,
            ExportFormat::Csv => write_csv(sites, &path)?,
        }
        let size = fs::metadata(&path)?.len();
        tracing::info!(path = %path.display(), size, "wrote export");
        artifacts.push(OutputArtifact {
            file_path: path.display().to_string(),
            file_type: format.as_str().to_string(),
            file_size_bytes: size,
            created_at: Utc::now().to_rfc3339(),
        });
        paths.insert(format.as_str().to_string(), path);
    }
    Ok(ExportOutput { paths, artifacts })
}

fn write_geojson(sites: &[CandidateSite], path: &Path) -> Result<(), StageError> {
    let features: Vec<serde_json::Value> = sites
        .iter()
        .map(|s| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [s.lon, s.lat],
                },
                "properties": {
                    "id": s.id,
                    "area_m2": s.area_m2,
                    "perimeter_m": s.perimeter_m,
                    "anomaly_intensity": s.anomaly_intensity,
                    "anomaly_std": s.anomaly_std,
                    "compactness": s.compactness,
                    "confidence": s.confidence,
                    "priority": s.priority.as_str(),
                    "pixel_count": s.pixel_count,
                    "merged_from": s.merged_from,
                    "likelihood": s.likelihood,
                    "recommended_action": s.recommended_action(),
                },
            })
        })
        .collect();

    let collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    fs::write(path, serde_json::to_string_pretty(&collection)?)?;
    Ok(())
}

fn write_csv(sites: &[CandidateSite], path: &Path) -> Result<(), StageError> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer
        .write_record([
            "id",
            "lat",
            "lon",
            "area_m2",
            "perimeter_m",
            "anomaly_intensity",
            "anomaly_std",
            "compactness",
            "confidence",
            "priority",
            "pixel_count",
            "merged_from",
            "likelihood",
            "recommended_action",
        ])
        .map_err(csv_err)?;
    for s in sites {
        writer
            .write_record([
                s.id.clone(),
                s.lat.to_string(),
                s.lon.to_string(),
                s.area_m2.to_string(),
                s.perimeter_m.to_string(),
                s.anomaly_intensity.to_string(),
                s.anomaly_std.to_string(),
                s.compactness.to_string(),
                s.confidence.to_string(),
                s.priority.as_str().to_string(),
                s.pixel_count.to_string(),
                s.merged_from.map(|m| m.to_string()).unwrap_or_default(),
                s.likelihood.map(|l| l.to_string()).unwrap_or_default(),
                s.recommended_action().to_string(),
            ])
            .map_err(csv_err)?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_err(e: csv::Error) -> StageError {
    StageError::Export(e.to_string())
}

/// Read a GeoJSON export back into site records. Used by round-trip
/// verification; fields absent from the file come back as defaults.
pub fn parse_geojson(path: &Path) -> Result<Vec<CandidateSite>, StageError> {
    let raw = fs::read_to_string(path)?;
    let doc: serde_json::Value = serde_json::from_str(&raw)?;
    let features = doc["features"]
        .as_array()
        .ok_or_else(|| StageError::Export("missing features array".into()))?;

    let mut sites = Vec::with_capacity(features.len());
    for feature in features {
        let coords = &feature["geometry"]["coordinates"];
        let props = &feature["properties"];
        let priority = props["priority"]
            .as_str()
            .and_then(PriorityTier::parse)
            .ok_or_else(|| StageError::Export("bad priority value".into()))?;
        sites.push(CandidateSite {
            id: props["id"].as_str().unwrap_or_default().to_string(),
            lon: coords[0].as_f64().unwrap_or(f64::NAN),
            lat: coords[1].as_f64().unwrap_or(f64::NAN),
            area_m2: props["area_m2"].as_f64().unwrap_or(0.0),
            perimeter_m: props["perimeter_m"].as_f64().unwrap_or(0.0),
            anomaly_intensity: props["anomaly_intensity"].as_f64().unwrap_or(0.0),
            anomaly_std: props["anomaly_std"].as_f64().unwrap_or(0.0),
            compactness: props["compactness"].as_f64().unwrap_or(0.0),
            confidence: props["confidence"].as_f64().unwrap_or(0.0),
            priority,
            pixel_count: props["pixel_count"].as_u64().unwrap_or(0),
            merged_from: props["merged_from"].as_u64().map(|m| m as u32),
            likelihood: props["likelihood"].as_f64(),
        });
    }
    Ok(sites)
}
