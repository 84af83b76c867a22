use anyhow::{anyhow, Result};
use geo::Point;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// One row of `/summary`. Fields other than the two we read are kept so
/// chart collaborators get the record as the API sent it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SummaryRecord {
    #[serde(rename = "totale")]
    pub total_cases: i64,
    #[serde(rename = "aggiornamento")]
    pub last_updated: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `/state` rows are only ever handed to the chart collaborator.
pub type StateRecord = Value;

#[derive(Debug, Deserialize)]
pub struct DistributionResponse {
    pub features: Vec<RawFeature>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawFeature {
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub geometry: RawGeometry,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawGeometry {
    /// A GeoJSON position: lon, lat and possibly an altitude we ignore.
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionFeature {
    pub region_name: String,
    pub case_count: i64,
    pub tests_count: i64,
    pub active_positives: i64,
    /// lon/lat as delivered by the API (EPSG:4326).
    pub coordinates: Point<f64>,
    pub properties: Map<String, Value>,
}

impl RegionFeature {
    /// Fails only when the position has fewer than two values. A missing
    /// region name is kept as an empty one so the marker still draws.
    pub fn from_raw(raw: RawFeature) -> Result<Self> {
        let (lon, lat) = match raw.geometry.coordinates.as_slice() {
            [lon, lat, ..] => (*lon, *lat),
            other => {
                return Err(anyhow!(
                    "Feature position has {} values, expected at least 2",
                    other.len()
                ))
            }
        };
        let region_name = match raw.properties.get("regione").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                warn!("Feature at ({}, {}) has no 'regione' name", lon, lat);
                String::new()
            }
        };

        Ok(Self {
            case_count: count_property(&raw.properties, "numero_casi"),
            tests_count: count_property(&raw.properties, "tamponi"),
            active_positives: count_property(&raw.properties, "totale_positivi"),
            region_name,
            coordinates: Point::new(lon, lat),
            properties: raw.properties,
        })
    }

    /// GeoJSON point feature carrying the full attribute map, placed at `position`.
    pub fn to_geojson(&self, position: Point<f64>) -> geojson::Feature {
        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                position.x(),
                position.y(),
            ]))),
            id: None,
            properties: Some(self.properties.clone()),
            foreign_members: None,
        }
    }
}

/// A region placed in map-projection coordinates (EPSG:3857).
#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectedFeature {
    pub feature: RegionFeature,
    pub position: Point<f64>,
}

// The API has sent counts both as numbers and as numeric strings. Strings are
// read up to the first non-digit; anything unreadable counts as zero.
fn count_property(properties: &Map<String, Value>, key: &str) -> i64 {
    match properties.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => leading_integer(s).unwrap_or(0),
        _ => 0,
    }
}

fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}
