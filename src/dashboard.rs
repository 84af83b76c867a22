use crate::api::ApiClient;
use crate::charts::ChartSink;
use crate::config::AppConfig;
use crate::geocode::GeocodeCorrector;
use crate::layer::FeatureLayer;
use crate::popup::{HoverController, PointerEvent, PopupState};
use crate::projection::{to_web_mercator, Viewport};
use crate::types::{RegionFeature, ReprojectedFeature, SummaryRecord};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

const DISPLAY_DATE_FORMAT: &str = "%d %b %Y, %H:%M";
const QUERY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Text shown in the dashboard header. `None` until the summary has loaded.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DisplayText {
    pub total_cases: Option<String>,
    pub last_updated: Option<String>,
}

/// Everything the map view owns: header text, the centroid layer and the
/// hover popup.
pub struct DashboardState {
    pub display: DisplayText,
    pub centroids: FeatureLayer,
    pub hover: HoverController,
    pub viewport: Viewport,
    corrector: GeocodeCorrector,
}

impl DashboardState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            display: DisplayText::default(),
            centroids: FeatureLayer::centroids(),
            hover: HoverController::new(),
            viewport: Viewport::from_config(&config.map),
            corrector: GeocodeCorrector::from_config(&config.geocode),
        }
    }

    /// Fill the header from the first summary row and return its update time.
    /// The total is shown even when the timestamp cannot be read.
    pub fn show_summary(&mut self, latest: &SummaryRecord) -> Result<NaiveDateTime> {
        self.display.total_cases = Some(latest.total_cases.to_string());
        let updated = parse_update_time(&latest.last_updated)?;
        self.display.last_updated = Some(updated.format(DISPLAY_DATE_FORMAT).to_string());
        Ok(updated)
    }

    /// Replace the centroid markers with `features`, corrected and reprojected.
    pub fn load_distribution(&mut self, features: &[RegionFeature]) {
        let reprojected = reproject_features(&self.corrector, features);
        self.centroids.replace_features(reprojected);
    }

    pub fn pointer_move(&mut self, event: &PointerEvent) -> PopupState {
        self.hover
            .on_pointer_move(event, &self.centroids, &self.viewport)
            .clone()
    }
}

pub fn reproject_features(
    corrector: &GeocodeCorrector,
    features: &[RegionFeature],
) -> Vec<ReprojectedFeature> {
    features
        .iter()
        .map(|feature| {
            let lon_lat = corrector.resolve(&feature.region_name, feature.coordinates);
            ReprojectedFeature {
                feature: feature.clone(),
                position: to_web_mercator(lon_lat),
            }
        })
        .collect()
}

const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Accepts RFC 3339 (wall-clock time in its own offset), a naive date-time
/// with or without seconds and either separator, or a bare date (midnight).
pub fn parse_update_time(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| anyhow!("Unrecognised update timestamp: {:?}", raw))
}

pub fn query_date(updated: &NaiveDateTime) -> String {
    updated.format(QUERY_DATE_FORMAT).to_string()
}

/// Which parts of the dashboard were populated by a refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub summary: bool,
    pub distribution: bool,
    pub last_state: bool,
}

/// Fetch everything the dashboard shows.
///
/// Two branches run side by side: summary followed by the regional
/// distribution (which needs the summary's update time), and the national
/// state. A failing branch is logged and leaves its part of the dashboard
/// empty; nothing is retried.
pub async fn refresh(
    api: &ApiClient,
    state: &mut DashboardState,
    charts: &dyn ChartSink,
    last_state_delay: Duration,
) -> RefreshReport {
    let summary_branch = async {
        let updated = match load_summary(api, state, charts).await {
            Ok(updated) => updated,
            Err(e) => {
                error!("Summary unavailable: {:#}", e);
                return (false, false);
            }
        };
        match load_distribution(api, state, charts, &updated).await {
            Ok(()) => (true, true),
            Err(e) => {
                error!("Regional distribution unavailable: {:#}", e);
                (true, false)
            }
        }
    };

    let state_branch = async {
        match load_last_state(api, charts, last_state_delay).await {
            Ok(()) => true,
            Err(e) => {
                error!("National state unavailable: {:#}", e);
                false
            }
        }
    };

    let ((summary, distribution), last_state) = tokio::join!(summary_branch, state_branch);
    RefreshReport {
        summary,
        distribution,
        last_state,
    }
}

async fn load_summary(
    api: &ApiClient,
    state: &mut DashboardState,
    charts: &dyn ChartSink,
) -> Result<NaiveDateTime> {
    let records = api.summary().await?;
    let latest = records.first().context("Summary response is empty")?;

    // The charts only need the records, so they are fed before the timestamp
    // decides whether the distribution step can run.
    let updated = state.show_summary(latest);
    charts.last_outcomes(latest);
    charts.cases_diffusion(&records);

    let updated = updated.context("Summary has no usable update time")?;
    info!(
        "Summary: {} cases, updated {}",
        latest.total_cases,
        state.display.last_updated.as_deref().unwrap_or_default()
    );
    Ok(updated)
}

async fn load_distribution(
    api: &ApiClient,
    state: &mut DashboardState,
    charts: &dyn ChartSink,
    updated: &NaiveDateTime,
) -> Result<()> {
    let response = api.distribution(&query_date(updated)).await?;
    let features: Vec<RegionFeature> = response
        .features
        .into_iter()
        .enumerate()
        .filter_map(|(i, raw)| match RegionFeature::from_raw(raw) {
            Ok(feature) => Some(feature),
            Err(e) => {
                warn!("Skipping regional feature {}: {:#}", i, e);
                None
            }
        })
        .collect();

    state.load_distribution(&features);
    info!("Loaded {} region centroids", state.centroids.len());

    charts.region_distribution(&features);
    Ok(())
}

// The last-state chart is drawn after a fixed pause. It has always been
// deferred this way so its container is laid out first; keep it until that
// requirement is confirmed gone.
async fn load_last_state(api: &ApiClient, charts: &dyn ChartSink, delay: Duration) -> Result<()> {
    let records = api.state().await?;
    let latest = records.first().context("State response is empty")?;

    tokio::time::sleep(delay).await;
    charts.last_state(latest);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::JsonChartSink;
    use crate::layer::CENTROIDS_LAYER_NAME;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use geo::Point;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn distribution_body() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "regione": "Lombardia", "numero_casi": 984, "tamponi": 3208, "totale_positivi": 925 },
                    "geometry": { "type": "Point", "coordinates": [9.19, 45.46] }
                },
                {
                    "type": "Feature",
                    "properties": { "regione": "Trento", "numero_casi": 1, "tamponi": 25, "totale_positivi": 1 },
                    "geometry": { "type": "Point", "coordinates": [0.0, 0.0] }
                }
            ]
        })
    }

    struct MockApi {
        base_url: String,
        distribution_queries: Arc<Mutex<Vec<String>>>,
    }

    async fn mock_api(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn healthy_api() -> MockApi {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let recorded = queries.clone();
        let router = Router::new()
            .route(
                "/summary",
                get(|| async {
                    Json(json!([
                        { "totale": 1000, "aggiornamento": "2020-03-01T12:00:00Z", "deceduti": 29 },
                        { "totale": 888, "aggiornamento": "2020-02-29T18:00:00Z", "deceduti": 21 }
                    ]))
                }),
            )
            .route("/state", get(|| async { Json(json!([{ "ricoverati_con_sintomi": 401 }])) }))
            .route(
                "/distribution/regions/overview",
                get(move |Query(params): Query<HashMap<String, String>>| {
                    let recorded = recorded.clone();
                    async move {
                        recorded.lock().unwrap().push(params.get("data").cloned().unwrap_or_default());
                        Json(distribution_body())
                    }
                }),
            );
        MockApi {
            base_url: mock_api(router).await,
            distribution_queries: queries,
        }
    }

    #[test]
    fn timestamps_format_for_display_and_query() {
        let updated = parse_update_time("2020-03-01T12:00:00Z").unwrap();
        assert_eq!(updated.format(DISPLAY_DATE_FORMAT).to_string(), "01 Mar 2020, 12:00");
        assert_eq!(query_date(&updated), "2020-03-01 12:00:00");

        let naive = parse_update_time("2020-03-09 18:00:00").unwrap();
        assert_eq!(query_date(&naive), "2020-03-09 18:00:00");
        let offset = parse_update_time("2020-03-09T18:00:00+01:00").unwrap();
        assert_eq!(query_date(&offset), "2020-03-09 18:00:00");

        assert!(parse_update_time("yesterday").is_err());
    }

    #[test]
    fn timestamps_without_seconds_or_time_are_accepted() {
        let minutes = parse_update_time("2020-03-01T12:00").unwrap();
        assert_eq!(query_date(&minutes), "2020-03-01 12:00:00");
        let spaced = parse_update_time("2020-03-01 17:30").unwrap();
        assert_eq!(query_date(&spaced), "2020-03-01 17:30:00");

        let date_only = parse_update_time("2020-03-01").unwrap();
        assert_eq!(date_only.format(DISPLAY_DATE_FORMAT).to_string(), "01 Mar 2020, 00:00");
        assert_eq!(query_date(&date_only), "2020-03-01 00:00:00");
    }

    #[test]
    fn unreadable_timestamp_still_shows_total() {
        let mut state = DashboardState::new(&AppConfig::default());
        let summary = SummaryRecord {
            total_cases: 1000,
            last_updated: "n/d".into(),
            extra: serde_json::Map::new(),
        };
        assert!(state.show_summary(&summary).is_err());
        assert_eq!(state.display.total_cases.as_deref(), Some("1000"));
        assert_eq!(state.display.last_updated, None);
    }

    #[test]
    fn distribution_applies_corrections_before_reprojecting() {
        let mut state = DashboardState::new(&AppConfig::default());
        let features: Vec<RegionFeature> = distribution_body()["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| RegionFeature::from_raw(serde_json::from_value(f.clone()).unwrap()).unwrap())
            .collect();
        state.load_distribution(&features);

        let markers = state.centroids.features();
        assert_eq!(markers[0].position, to_web_mercator(Point::new(9.19, 45.46)));
        assert_eq!(markers[1].position, to_web_mercator(Point::new(10.6469911, 46.1015475)));
        // Source coordinates are kept on the feature itself.
        assert_eq!(markers[1].feature.coordinates, Point::new(0.0, 0.0));
    }

    #[tokio::test]
    async fn refresh_populates_dashboard() {
        let mock = healthy_api().await;
        let api = ApiClient::new(&mock.base_url).unwrap();
        let mut state = DashboardState::new(&AppConfig::default());
        let charts = JsonChartSink::new();

        let report = refresh(&api, &mut state, &charts, Duration::from_millis(250)).await;

        assert_eq!(report, RefreshReport { summary: true, distribution: true, last_state: true });
        assert_eq!(state.display.total_cases.as_deref(), Some("1000"));
        assert_eq!(state.display.last_updated.as_deref(), Some("01 Mar 2020, 12:00"));
        assert_eq!(*mock.distribution_queries.lock().unwrap(), ["2020-03-01 12:00:00"]);

        assert_eq!(state.centroids.name(), CENTROIDS_LAYER_NAME);
        assert_eq!(state.centroids.len(), 2);

        let payloads = charts.snapshot();
        assert_eq!(payloads.last_outcomes.unwrap()["deceduti"], json!(29));
        assert_eq!(payloads.cases_diffusion.unwrap().as_array().unwrap().len(), 2);
        assert_eq!(payloads.last_state.unwrap()["ricoverati_con_sintomi"], json!(401));
        // Raw coordinates go to the chart, not the corrected ones.
        assert_eq!(
            payloads.region_distribution.unwrap()["features"][1]["geometry"]["coordinates"],
            json!([0.0, 0.0])
        );
    }

    #[tokio::test]
    async fn last_state_chart_waits_for_delay() {
        let mock = healthy_api().await;
        let api = ApiClient::new(&mock.base_url).unwrap();
        let mut state = DashboardState::new(&AppConfig::default());
        let charts = JsonChartSink::new();

        let started = Instant::now();
        let report = refresh(&api, &mut state, &charts, Duration::from_millis(250)).await;
        assert!(report.last_state);
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn refreshing_twice_replaces_markers() {
        let mock = healthy_api().await;
        let api = ApiClient::new(&mock.base_url).unwrap();
        let mut state = DashboardState::new(&AppConfig::default());
        let charts = JsonChartSink::new();

        refresh(&api, &mut state, &charts, Duration::ZERO).await;
        let first = state.centroids.features().to_vec();
        refresh(&api, &mut state, &charts, Duration::ZERO).await;

        assert_eq!(state.centroids.features(), first.as_slice());
    }

    #[tokio::test]
    async fn failed_summary_leaves_other_sections_working() {
        let router = Router::new()
            .route("/summary", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/state", get(|| async { Json(json!([{ "terapia_intensiva": 64 }])) }));
        let api = ApiClient::new(mock_api(router).await).unwrap();
        let mut state = DashboardState::new(&AppConfig::default());
        let charts = JsonChartSink::new();

        let report = refresh(&api, &mut state, &charts, Duration::ZERO).await;

        assert_eq!(report, RefreshReport { summary: false, distribution: false, last_state: true });
        assert_eq!(state.display, DisplayText::default());
        assert!(state.centroids.is_empty());
        assert!(charts.snapshot().last_state.is_some());
    }

    #[tokio::test]
    async fn failed_distribution_keeps_summary() {
        let router = Router::new()
            .route(
                "/summary",
                get(|| async { Json(json!([{ "totale": 5, "aggiornamento": "2020-02-25 18:00:00" }])) }),
            )
            .route("/state", get(|| async { Json(json!([])) }))
            .route("/distribution/regions/overview", get(|| async { StatusCode::NOT_FOUND }));
        let api = ApiClient::new(mock_api(router).await).unwrap();
        let mut state = DashboardState::new(&AppConfig::default());
        let charts = JsonChartSink::new();

        let report = refresh(&api, &mut state, &charts, Duration::ZERO).await;

        assert_eq!(report, RefreshReport { summary: true, distribution: false, last_state: false });
        assert_eq!(state.display.last_updated.as_deref(), Some("25 Feb 2020, 18:00"));
        assert!(charts.snapshot().region_distribution.is_none());
    }

    #[tokio::test]
    async fn bad_summary_timestamp_still_feeds_summary_charts() {
        let router = Router::new()
            .route(
                "/summary",
                get(|| async { Json(json!([{ "totale": 42, "aggiornamento": "ieri" }])) }),
            )
            .route("/state", get(|| async { Json(json!([{ "terapia_intensiva": 64 }])) }));
        let api = ApiClient::new(mock_api(router).await).unwrap();
        let mut state = DashboardState::new(&AppConfig::default());
        let charts = JsonChartSink::new();

        let report = refresh(&api, &mut state, &charts, Duration::ZERO).await;

        assert_eq!(report, RefreshReport { summary: false, distribution: false, last_state: true });
        assert_eq!(state.display.total_cases.as_deref(), Some("42"));
        assert_eq!(state.display.last_updated, None);
        let payloads = charts.snapshot();
        assert_eq!(payloads.last_outcomes.unwrap()["totale"], json!(42));
        assert_eq!(payloads.cases_diffusion.unwrap().as_array().unwrap().len(), 1);
        assert!(state.centroids.is_empty());
    }

    #[tokio::test]
    async fn malformed_region_is_skipped_not_fatal() {
        let router = Router::new()
            .route(
                "/summary",
                get(|| async { Json(json!([{ "totale": 5, "aggiornamento": "2020-02-25 18:00:00" }])) }),
            )
            .route("/state", get(|| async { Json(json!([{}])) }))
            .route(
                "/distribution/regions/overview",
                get(|| async {
                    Json(json!({
                        "features": [
                            { "properties": { "regione": "Veneto", "numero_casi": 43 },
                              "geometry": { "type": "Point", "coordinates": [12.33] } },
                            { "properties": { "numero_casi": 2 },
                              "geometry": { "type": "Point", "coordinates": [11.34, 44.49, 0.0] } },
                            { "properties": { "regione": "Lazio", "numero_casi": 3 },
                              "geometry": { "type": "Point", "coordinates": [12.5, 41.9] } }
                        ]
                    }))
                }),
            );
        let api = ApiClient::new(mock_api(router).await).unwrap();
        let mut state = DashboardState::new(&AppConfig::default());
        let charts = JsonChartSink::new();

        let report = refresh(&api, &mut state, &charts, Duration::ZERO).await;

        assert!(report.distribution);
        let markers = state.centroids.features();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].feature.region_name, "");
        assert_eq!(markers[0].position, to_web_mercator(Point::new(11.34, 44.49)));
        assert_eq!(markers[1].feature.region_name, "Lazio");
        let chart = charts.snapshot().region_distribution.unwrap();
        assert_eq!(chart["features"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn hover_after_refresh_finds_region() {
        let mock = healthy_api().await;
        let api = ApiClient::new(&mock.base_url).unwrap();
        let mut state = DashboardState::new(&AppConfig::default());
        refresh(&api, &mut state, &JsonChartSink::new(), Duration::ZERO).await;

        let lombardia = state.centroids.features()[0].position;
        let pixel = state.viewport.coordinate_to_pixel(lombardia);
        match state.pointer_move(&PointerEvent { pixel, dragging: false }) {
            PopupState::Shown { content, .. } => assert_eq!(content.region_name, "Lombardia"),
            PopupState::Hidden => panic!("expected Lombardia popup"),
        }
    }
}
