use crate::types::{RegionFeature, StateRecord, SummaryRecord};
use anyhow::{Context, Result};
use geojson::FeatureCollection;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Receivers for the dashboard charts. Each call is a one-shot render.
pub trait ChartSink {
    fn last_state(&self, record: &StateRecord);
    fn last_outcomes(&self, record: &SummaryRecord);
    fn cases_diffusion(&self, records: &[SummaryRecord]);
    /// Regions with their API coordinates, before any correction or reprojection.
    fn region_distribution(&self, features: &[RegionFeature]);
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ChartPayloads {
    pub last_state: Option<Value>,
    pub last_outcomes: Option<Value>,
    pub cases_diffusion: Option<Value>,
    pub region_distribution: Option<Value>,
}

/// Keeps the latest data handed to each chart as JSON, for the front end
/// to draw from.
#[derive(Debug, Default)]
pub struct JsonChartSink {
    payloads: Mutex<ChartPayloads>,
}

impl JsonChartSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ChartPayloads {
        self.payloads().clone()
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, json).with_context(|| format!("Failed to write chart data: {:?}", path))
    }

    fn payloads(&self) -> MutexGuard<'_, ChartPayloads> {
        self.payloads.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(&self, chart: &str, slot: impl FnOnce(&mut ChartPayloads) -> &mut Option<Value>, value: Value) {
        debug!("Chart '{}' updated", chart);
        let mut payloads = self.payloads();
        *slot(&mut *payloads) = Some(value);
    }
}

impl ChartSink for JsonChartSink {
    fn last_state(&self, record: &StateRecord) {
        self.store("last_state", |p| &mut p.last_state, record.clone());
    }

    fn last_outcomes(&self, record: &SummaryRecord) {
        self.store("last_outcomes", |p| &mut p.last_outcomes, to_json(record));
    }

    fn cases_diffusion(&self, records: &[SummaryRecord]) {
        self.store("cases_diffusion", |p| &mut p.cases_diffusion, to_json(records));
    }

    fn region_distribution(&self, features: &[RegionFeature]) {
        let collection = FeatureCollection {
            bbox: None,
            features: features.iter().map(|f| f.to_geojson(f.coordinates)).collect(),
            foreign_members: None,
        };
        self.store("region_distribution", |p| &mut p.region_distribution, to_json(&collection));
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;
    use serde_json::{json, Map};

    #[test]
    fn payloads_start_empty() {
        assert_eq!(JsonChartSink::new().snapshot(), ChartPayloads::default());
    }

    #[test]
    fn region_distribution_keeps_source_coordinates() {
        let sink = JsonChartSink::new();
        let mut properties = Map::new();
        properties.insert("regione".into(), json!("Lazio"));
        sink.region_distribution(&[RegionFeature {
            region_name: "Lazio".into(),
            case_count: 6,
            tests_count: 124,
            active_positives: 3,
            coordinates: Point::new(12.49, 41.89),
            properties,
        }]);

        let payload = sink.snapshot().region_distribution.unwrap();
        assert_eq!(payload["type"], json!("FeatureCollection"));
        assert_eq!(payload["features"][0]["geometry"]["coordinates"], json!([12.49, 41.89]));
        assert_eq!(payload["features"][0]["properties"]["regione"], json!("Lazio"));
    }

    #[test]
    fn writes_snapshot_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charts.json");
        let sink = JsonChartSink::new();
        sink.last_state(&json!({ "ricoverati_con_sintomi": 105 }));
        sink.write_to(&path).unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["last_state"]["ricoverati_con_sintomi"], json!(105));
        assert_eq!(written["last_outcomes"], Value::Null);
    }
}
