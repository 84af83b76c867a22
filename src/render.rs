use crate::config::AppConfig;
use crate::layer::FeatureLayer;
use crate::projection::{from_web_mercator, lat_lon_to_global_pixel, TILE_SIZE};
use crate::severity::MarkerStyle;
use anyhow::{Context, Result};
use image::{ImageBuffer, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, Blend};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Rasterize the centroid markers into `{tile_dir}/{layer}/{z}/{x}/{y}.png`.
/// Returns the number of tiles written.
pub fn generate_tiles(config: &AppConfig, layer: &FeatureLayer) -> Result<usize> {
    info!(
        "Generating tiles from min_zoom {} to max_zoom {}...",
        config.output.min_zoom, config.output.max_zoom
    );

    config.output.validate()?;
    let layer_dir = config.output.tile_dir().join(tile_set_name(layer.name()));

    let counts = (config.output.min_zoom..=config.output.max_zoom)
        .into_par_iter()
        .map(|z| render_zoom_level(&layer_dir, z, layer))
        .collect::<Result<Vec<usize>>>()?;

    Ok(counts.into_iter().sum())
}

fn render_zoom_level(layer_dir: &Path, zoom: u8, layer: &FeatureLayer) -> Result<usize> {
    let tiles_per_side = 1u32
        .checked_shl(zoom as u32)
        .with_context(|| format!("Zoom level {} is too deep to render", zoom))?;
    let mut local_tiles: HashMap<(u32, u32), RgbaImage> = HashMap::new();

    // Markers later in the layer paint over earlier ones.
    for marker in layer.features() {
        let lon_lat = from_web_mercator(marker.position);
        let (gx, gy) = lat_lon_to_global_pixel(lon_lat.y(), lon_lat.x(), zoom);
        let style = MarkerStyle::for_cases(marker.feature.case_count);
        let outer = style.outer_radius();

        let tile_range = |lo: f64, hi: f64| {
            let first = (lo / TILE_SIZE as f64).floor().max(0.0) as u32;
            let last = ((hi / TILE_SIZE as f64).floor().max(0.0) as u32).min(tiles_per_side - 1);
            first..=last
        };

        for ty in tile_range(gy - outer, gy + outer) {
            for tx in tile_range(gx - outer, gx + outer) {
                let center = (
                    (gx - tx as f64 * TILE_SIZE as f64).floor() as i32,
                    (gy - ty as f64 * TILE_SIZE as f64).floor() as i32,
                );
                let tile_img = local_tiles
                    .remove(&(tx, ty))
                    .unwrap_or_else(|| ImageBuffer::new(TILE_SIZE, TILE_SIZE));
                let mut canvas = Blend(tile_img);
                draw_marker(&mut canvas, center, &style);
                local_tiles.insert((tx, ty), canvas.0);
            }
        }
    }

    // Save tiles: {layer_dir}/{z}/{x}/{y}.png
    let z_dir = layer_dir.join(zoom.to_string());
    fs::create_dir_all(&z_dir).context("Failed to create zoom directory")?;

    local_tiles.par_iter().try_for_each(|((x, y), img)| {
        let x_dir = z_dir.join(x.to_string());
        fs::create_dir_all(&x_dir)
            .with_context(|| format!("Failed to create tile directory {:?}", x_dir))?;
        let path = x_dir.join(format!("{}.png", y));

        img.save(&path).map_err(|e| {
            error!("Failed to save tile {:?}: {:?}", path, e);
            anyhow::Error::new(e).context(format!("Failed to save tile {:?}", path))
        })
    })?;

    Ok(local_tiles.len())
}

/// Directory-safe name for a layer's tile set.
pub fn tile_set_name(layer_name: &str) -> String {
    layer_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

// Fill first, then a two pixel ring straddling the radius on top of it.
fn draw_marker(canvas: &mut Blend<RgbaImage>, center: (i32, i32), style: &MarkerStyle) {
    let radius = style.radius as i32;
    draw_filled_circle_mut(canvas, center, radius, style.fill);
    for ring in radius..radius + style.stroke_width as i32 {
        draw_hollow_circle_mut(canvas, center, ring, style.stroke);
    }
}
