use crate::layer::FeatureLayer;
use crate::projection::Viewport;
use crate::types::RegionFeature;
use geo::Point;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    /// Screen pixel relative to the map container's top-left corner.
    pub pixel: (f64, f64),
    pub dragging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cursor {
    Default,
    Pointer,
}

/// Popup text. Counts are shown as the API sent them; the parsed value is
/// only used when the attribute is missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupContent {
    pub region_name: String,
    pub tests_count: String,
    pub total_cases: String,
    pub active_positives: String,
}

impl PopupContent {
    pub fn for_region(feature: &RegionFeature) -> Self {
        let shown = |key: &str, parsed: i64| match feature.properties.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => parsed.to_string(),
        };
        Self {
            region_name: feature.region_name.clone(),
            tests_count: shown("tamponi", feature.tests_count),
            total_cases: shown("numero_casi", feature.case_count),
            active_positives: shown("totale_positivi", feature.active_positives),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        vec![
            self.region_name.clone(),
            format!("Tamponi: {}", self.tests_count),
            format!("Totale casi: {}", self.total_cases),
            format!("Positivi: {}", self.active_positives),
        ]
    }

    /// Markup for the popup content container.
    pub fn to_html(&self) -> String {
        format!(
            "<h5 class='text-danger'>{}</h5>Tamponi: {}<br/>Totale casi: {}<br/>Positivi: {}",
            html_escape::encode_safe(&self.region_name),
            html_escape::encode_safe(&self.tests_count),
            html_escape::encode_safe(&self.total_cases),
            html_escape::encode_safe(&self.active_positives)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PopupState {
    Hidden,
    Shown {
        /// Map coordinate (EPSG:3857) the popup is anchored at.
        position: Point<f64>,
        content: PopupContent,
    },
}

/// Hover handling for the centroid layer: shows the region popup while the
/// pointer is over a marker.
#[derive(Debug)]
pub struct HoverController {
    state: PopupState,
    cursor: Cursor,
}

impl HoverController {
    pub fn new() -> Self {
        Self {
            state: PopupState::Hidden,
            cursor: Cursor::Default,
        }
    }

    pub fn state(&self) -> &PopupState {
        &self.state
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Only `layer` is hit-tested; markers on any other layer never open the popup.
    pub fn on_pointer_move(
        &mut self,
        event: &PointerEvent,
        layer: &FeatureLayer,
        viewport: &Viewport,
    ) -> &PopupState {
        if event.dragging {
            return &self.state;
        }

        match layer.hit_test(viewport, event.pixel) {
            Some(marker) => {
                self.state = PopupState::Shown {
                    position: viewport.pixel_to_coordinate(event.pixel),
                    content: PopupContent::for_region(&marker.feature),
                };
                self.cursor = Cursor::Pointer;
            }
            None => {
                self.state = PopupState::Hidden;
                self.cursor = Cursor::Default;
            }
        }

        &self.state
    }
}

impl Default for HoverController {
    fn default() -> Self {
        Self::new()
    }
}
