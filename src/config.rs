use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{ensure, Context, Result};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub map: MapConfig,
    pub geocode: GeocodeConfig,
    pub charts: ChartsConfig,
    pub output: OutputConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: "https://covid19-it-api.herokuapp.com".to_string() }
    }
}

/// Initial map view. Centre is in lon/lat, zoom follows the usual
/// Web-Mercator tile grid.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub center_lon: f64,
    pub center_lat: f64,
    pub zoom: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center_lon: 13.245209,
            center_lat: 42.304227,
            zoom: 6.0,
            width: 1024,
            height: 768,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocodeConfig {
    pub overrides: Vec<CoordinateOverride>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CoordinateOverride {
    pub region: String,
    pub lon: f64,
    pub lat: f64,
}

impl Default for GeocodeConfig {
    // Temporary corrections until the API geocoder places these regions properly.
    fn default() -> Self {
        let entry = |region: &str, lon: f64, lat: f64| CoordinateOverride {
            region: region.to_string(),
            lon,
            lat,
        };
        Self {
            overrides: vec![
                entry("Emilia Romagna", 11.039213647000054, 44.52591084900007),
                entry("Friuli V.G.", 12.5594548, 46.1129993),
                entry("Trento", 10.6469911, 46.1015475),
                entry("Bolzano", 11.37359619140625, 46.538082005463075),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChartsConfig {
    /// Deferral before the last-state chart is drawn, so its container is ready.
    pub last_state_delay_ms: u64,
}

impl Default for ChartsConfig {
    fn default() -> Self {
        Self { last_state_delay_ms: 250 }
    }
}

/// Deepest zoom the tile renderer accepts.
pub const MAX_TILE_ZOOM: u8 = 24;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            min_zoom: 5,
            max_zoom: 7,
        }
    }
}

impl OutputConfig {
    pub fn tile_dir(&self) -> PathBuf {
        self.dir.join("tiles")
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_zoom <= MAX_TILE_ZOOM,
            "output.max_zoom {} is above the supported maximum {}",
            self.max_zoom,
            MAX_TILE_ZOOM
        );
        ensure!(
            self.min_zoom <= self.max_zoom,
            "output.min_zoom {} is greater than output.max_zoom {}",
            self.min_zoom,
            self.max_zoom
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.output.validate()?;
        Ok(config)
    }
}
