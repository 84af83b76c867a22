//! EPSG:4326 <-> EPSG:3857 conversion and the pixel geometry of the map view.

use crate::config::MapConfig;
use geo::Point;
use std::f64::consts::PI;

// Constants for Web Mercator
pub const EARTH_RADIUS: f64 = 6378137.0;
pub const TILE_SIZE: u32 = 256;
/// Metres per pixel at zoom 0 for 256px tiles.
const MAX_RESOLUTION: f64 = 2.0 * PI * EARTH_RADIUS / TILE_SIZE as f64;

/// Spherical Mercator forward transform. Input is (lon, lat) in degrees.
pub fn to_web_mercator(lon_lat: Point<f64>) -> Point<f64> {
    let x = EARTH_RADIUS * lon_lat.x().to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lon_lat.y().to_radians() / 2.0).tan().ln();
    Point::new(x, y)
}

pub fn from_web_mercator(xy: Point<f64>) -> Point<f64> {
    let lon = (xy.x() / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (xy.y() / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    Point::new(lon, lat)
}

/// Pixel position in the whole-world raster at `zoom`, origin top-left.
pub fn lat_lon_to_global_pixel(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32);
    let x_t = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat.to_radians();
    let y_t = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n;

    (x_t * TILE_SIZE as f64, y_t * TILE_SIZE as f64)
}

/// The visible map: a projected centre, a zoom level and a pixel size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center: Point<f64>,
    pub zoom: f64,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn from_config(config: &MapConfig) -> Self {
        Self {
            center: to_web_mercator(Point::new(config.center_lon, config.center_lat)),
            zoom: config.zoom,
            width: config.width,
            height: config.height,
        }
    }

    /// Metres per pixel.
    pub fn resolution(&self) -> f64 {
        MAX_RESOLUTION / 2.0_f64.powf(self.zoom)
    }

    pub fn pixel_to_coordinate(&self, pixel: (f64, f64)) -> Point<f64> {
        let res = self.resolution();
        Point::new(
            self.center.x() + (pixel.0 - self.width as f64 / 2.0) * res,
            self.center.y() - (pixel.1 - self.height as f64 / 2.0) * res,
        )
    }

    pub fn coordinate_to_pixel(&self, coordinate: Point<f64>) -> (f64, f64) {
        let res = self.resolution();
        (
            (coordinate.x() - self.center.x()) / res + self.width as f64 / 2.0,
            (self.center.y() - coordinate.y()) / res + self.height as f64 / 2.0,
        )
    }
}
