use crate::charts::{ChartPayloads, JsonChartSink};
use crate::config::AppConfig;
use crate::dashboard::{DashboardState, DisplayText};
use crate::popup::{Cursor, PointerEvent, PopupState};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

pub struct AppState {
    pub dashboard: Mutex<DashboardState>,
    pub charts: JsonChartSink,
    pub config: AppConfig,
}

impl AppState {
    fn dashboard(&self) -> MutexGuard<'_, DashboardState> {
        self.dashboard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Deserialize)]
pub struct PointerParams {
    x: f64,
    y: f64,
    #[serde(default)]
    dragging: bool,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct PointerResponse {
    visible: bool,
    /// Popup anchor in map coordinates (EPSG:3857).
    position: Option<[f64; 2]>,
    html: Option<String>,
    lines: Vec<String>,
    cursor: Cursor,
}

pub fn router(state: Arc<AppState>) -> Router {
    let tile_service = ServeDir::new(state.config.output.tile_dir());

    Router::new()
        .route("/api/summary", get(summary_handler))
        .route("/api/centroids", get(centroids_handler))
        .route("/api/charts", get(charts_handler))
        .route("/api/pointer", get(pointer_handler))
        .nest_service("/tiles", tile_service)
        .fallback_service(ServeDir::new("."))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: AppState) -> Result<()> {
    let port = state.config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    info!("Starting server on http://{}", addr);

    let app = router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn summary_handler(State(state): State<Arc<AppState>>) -> Json<DisplayText> {
    Json(state.dashboard().display.clone())
}

async fn centroids_handler(State(state): State<Arc<AppState>>) -> Json<FeatureCollection> {
    Json(state.dashboard().centroids.to_geojson())
}

async fn charts_handler(State(state): State<Arc<AppState>>) -> Json<ChartPayloads> {
    Json(state.charts.snapshot())
}

async fn pointer_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointerParams>,
) -> Json<PointerResponse> {
    let event = PointerEvent {
        pixel: (params.x, params.y),
        dragging: params.dragging,
    };
    let mut dashboard = state.dashboard();
    let popup = dashboard.pointer_move(&event);
    let cursor = dashboard.hover.cursor();

    let response = match popup {
        PopupState::Shown { position, content } => PointerResponse {
            visible: true,
            position: Some([position.x(), position.y()]),
            html: Some(content.to_html()),
            lines: content.lines(),
            cursor,
        },
        PopupState::Hidden => PointerResponse {
            visible: false,
            position: None,
            html: None,
            lines: Vec::new(),
            cursor,
        },
    };
    Json(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::ChartSink;
    use crate::types::{RegionFeature, SummaryRecord};
    use geo::Point;
    use serde_json::{json, Map, Value};

    async fn serve(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(state));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn loaded_state() -> AppState {
        let config = AppConfig::default();
        let mut dashboard = DashboardState::new(&config);
        let summary = SummaryRecord {
            total_cases: 1000,
            last_updated: "2020-03-01T12:00:00Z".into(),
            extra: Map::new(),
        };
        dashboard.show_summary(&summary).unwrap();

        let mut properties = Map::new();
        properties.insert("regione".into(), json!("Lazio"));
        dashboard.load_distribution(&[RegionFeature {
            region_name: "Lazio".into(),
            case_count: 6,
            tests_count: 124,
            active_positives: 3,
            // The view centre, so it renders at the middle of the map.
            coordinates: Point::new(config.map.center_lon, config.map.center_lat),
            properties,
        }]);

        let charts = JsonChartSink::new();
        charts.last_outcomes(&summary);
        AppState {
            dashboard: Mutex::new(dashboard),
            charts,
            config,
        }
    }

    async fn get_json(url: String) -> Value {
        reqwest::get(url).await.unwrap().json().await.unwrap()
    }

    #[tokio::test]
    async fn serves_summary_and_layers() {
        let base = serve(loaded_state()).await;

        let summary = get_json(format!("{}/api/summary", base)).await;
        assert_eq!(summary, json!({ "total_cases": "1000", "last_updated": "01 Mar 2020, 12:00" }));

        let centroids = get_json(format!("{}/api/centroids", base)).await;
        assert_eq!(centroids["features"][0]["properties"]["radius"], json!(10));

        let charts = get_json(format!("{}/api/charts", base)).await;
        assert_eq!(charts["last_outcomes"]["totale"], json!(1000));
        assert_eq!(charts["last_state"], Value::Null);
    }

    #[tokio::test]
    async fn pointer_moves_drive_the_popup() {
        let base = serve(loaded_state()).await;

        let hit = get_json(format!("{}/api/pointer?x=512&y=384", base)).await;
        assert_eq!(hit["visible"], json!(true));
        assert_eq!(hit["cursor"], json!("pointer"));
        assert!(hit["html"].as_str().unwrap().contains("Lazio"));
        assert_eq!(hit["lines"], json!(["Lazio", "Tamponi: 124", "Totale casi: 6", "Positivi: 3"]));

        let dragged = get_json(format!("{}/api/pointer?x=5&y=5&dragging=true", base)).await;
        assert_eq!(dragged["visible"], json!(true));

        let miss = get_json(format!("{}/api/pointer?x=5&y=5", base)).await;
        assert_eq!(miss["visible"], json!(false));
        assert_eq!(miss["cursor"], json!("default"));
        assert_eq!(miss["html"], Value::Null);
    }
}
