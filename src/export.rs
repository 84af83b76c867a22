use crate::charts::JsonChartSink;
use crate::config::AppConfig;
use crate::dashboard::DashboardState;
use crate::render;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

pub const CENTROIDS_FILE: &str = "centroids.geojson";
pub const CHARTS_FILE: &str = "charts.json";
pub const DISPLAY_FILE: &str = "display.json";

/// Write the refreshed dashboard to the output directory: header text,
/// chart data, the centroid layer and its tiles.
pub fn write_dashboard(config: &AppConfig, state: &DashboardState, charts: &JsonChartSink) -> Result<()> {
    let dir = &config.output.dir;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory: {:?}", dir))?;

    write_json(&dir.join(DISPLAY_FILE), &serde_json::to_string_pretty(&state.display)?)?;
    charts.write_to(&dir.join(CHARTS_FILE))?;
    write_json(&dir.join(CENTROIDS_FILE), &serde_json::to_string(&state.centroids.to_geojson())?)?;
    info!("Wrote {} centroids to {:?}", state.centroids.len(), dir.join(CENTROIDS_FILE));

    let tiles = render::generate_tiles(config, &state.centroids)?;
    info!("Wrote {} tiles to {:?}", tiles, config.output.tile_dir());
    Ok(())
}

fn write_json(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
}
