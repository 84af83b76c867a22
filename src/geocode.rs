use crate::config::{CoordinateOverride, GeocodeConfig};
use geo::Point;
use std::collections::HashMap;

/// Per-region coordinate corrections applied before reprojection.
#[derive(Debug, Clone)]
pub struct GeocodeCorrector {
    overrides: HashMap<String, Point<f64>>,
}

impl GeocodeCorrector {
    pub fn new(overrides: &[CoordinateOverride]) -> Self {
        let overrides = overrides
            .iter()
            .map(|o| (o.region.clone(), Point::new(o.lon, o.lat)))
            .collect();
        Self { overrides }
    }

    pub fn from_config(config: &GeocodeConfig) -> Self {
        Self::new(&config.overrides)
    }

    /// Override lon/lat for `region_name`, matched exactly. `None` means keep
    /// the coordinate the API supplied.
    pub fn correct(&self, region_name: &str) -> Option<Point<f64>> {
        self.overrides.get(region_name).copied()
    }

    pub fn resolve(&self, region_name: &str, source: Point<f64>) -> Point<f64> {
        self.correct(region_name).unwrap_or(source)
    }
}

impl Default for GeocodeCorrector {
    fn default() -> Self {
        Self::from_config(&GeocodeConfig::default())
    }
}
