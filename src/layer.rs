use crate::projection::Viewport;
use crate::severity::{MarkerStyle, MAX_RADIUS};
use crate::types::ReprojectedFeature;
use geojson::FeatureCollection;
use rstar::{RTree, RTreeObject, AABB};
use serde_json::Value;

pub const CENTROIDS_LAYER_NAME: &str = "Centroidi Regioni";

// Wrapper for RTree indexing
struct MarkerIndex {
    index: usize,
    point: [f64; 2],
}

impl RTreeObject for MarkerIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

/// The region centroid markers currently on the map.
///
/// The whole set is swapped on every refresh; insertion order is draw
/// order, so later markers sit on top of earlier ones.
pub struct FeatureLayer {
    name: String,
    markers: Vec<ReprojectedFeature>,
    tree: RTree<MarkerIndex>,
}

impl FeatureLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            markers: Vec::new(),
            tree: RTree::new(),
        }
    }

    pub fn centroids() -> Self {
        Self::new(CENTROIDS_LAYER_NAME)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn features(&self) -> &[ReprojectedFeature] {
        &self.markers
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Drop every marker and load `features` in their place.
    pub fn replace_features(&mut self, features: Vec<ReprojectedFeature>) {
        let tree_items = features
            .iter()
            .enumerate()
            .map(|(index, f)| MarkerIndex {
                index,
                point: [f.position.x(), f.position.y()],
            })
            .collect();

        self.tree = RTree::bulk_load(tree_items);
        self.markers = features;
    }

    /// Topmost marker whose drawn circle covers `pixel` in `viewport`.
    pub fn hit_test(&self, viewport: &Viewport, pixel: (f64, f64)) -> Option<&ReprojectedFeature> {
        let coordinate = viewport.pixel_to_coordinate(pixel);
        // No marker reaches further than the largest radius plus its stroke.
        let reach = (MAX_RADIUS as f64 + 1.0) * viewport.resolution();
        let envelope = AABB::from_corners(
            [coordinate.x() - reach, coordinate.y() - reach],
            [coordinate.x() + reach, coordinate.y() + reach],
        );

        self.tree
            .locate_in_envelope(&envelope)
            .filter(|candidate| {
                let marker = &self.markers[candidate.index];
                let style = MarkerStyle::for_cases(marker.feature.case_count);
                let (mx, my) = viewport.coordinate_to_pixel(marker.position);
                (mx - pixel.0).hypot(my - pixel.1) <= style.outer_radius()
            })
            .max_by_key(|candidate| candidate.index)
            .map(|candidate| &self.markers[candidate.index])
    }

    /// The layer as GeoJSON in map-projection coordinates, each feature
    /// carrying its attributes plus the computed `radius`.
    pub fn to_geojson(&self) -> FeatureCollection {
        let features = self
            .markers
            .iter()
            .map(|marker| {
                let mut feature = marker.feature.to_geojson(marker.position);
                let radius = MarkerStyle::for_cases(marker.feature.case_count).radius;
                feature.set_property("radius", Value::from(radius));
                feature
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}
