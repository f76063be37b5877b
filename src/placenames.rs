//! Place-name labels around the camera.
//!
//! Names are fetched for the area under a low camera and drawn as labels
//! that stay on the globe once drawn. A fetch is requested only when the
//! camera is below `max_camera_altitude_meters` and has moved at least
//! `reload_distance_meters` across the surface since the last request.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::lod::CameraState;
use crate::render::{place_name_id, MarkerStyle, RenderAdapter};
use crate::GeoPoint;

/// Configuration for place-name loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceNameConfig {
    /// Cameras higher than this request nothing.
    /// Default: 10000.0
    pub max_camera_altitude_meters: f64,

    /// Surface distance the camera must cover before the next request.
    /// Default: 5000.0
    pub reload_distance_meters: f64,

    /// Search radius sent with each request.
    /// Default: 5.0
    pub search_radius_km: f64,

    /// Labels are hidden beyond this camera distance.
    /// Default: 10000.0
    pub show_distance_meters: f64,
}

impl Default for PlaceNameConfig {
    fn default() -> Self {
        Self {
            max_camera_altitude_meters: 10_000.0,
            reload_distance_meters: 5_000.0,
            search_radius_km: 5.0,
            show_distance_meters: 10_000.0,
        }
    }
}

/// A named place as supplied by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceName {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

impl PlaceName {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude, self.altitude)
    }

    /// The name, followed by the altitude in meters unless it is zero.
    pub fn label_text(&self) -> String {
        if self.altitude == 0.0 {
            self.name.clone()
        } else {
            format!("{} [{}m]", self.name, self.altitude)
        }
    }

    pub fn entity_id(&self) -> String {
        place_name_id(&self.name, self.longitude, self.latitude)
    }
}

/// Area to fetch place names for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaceNameQuery {
    pub longitude: f64,
    pub latitude: f64,
    pub radius_km: f64,
}

/// Gates place-name requests on camera movement and tracks drawn labels.
#[derive(Debug, Clone, Default)]
pub struct PlaceNameLayer {
    config: PlaceNameConfig,
    last_request: Option<GeoPoint>,
    shown: HashMap<String, PlaceName>,
}

impl PlaceNameLayer {
    pub fn new(config: PlaceNameConfig) -> Self {
        Self {
            config,
            last_request: None,
            shown: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PlaceNameConfig {
        &self.config
    }

    /// Decide whether `camera` warrants a new request.
    ///
    /// The request position only moves when a request is returned.
    pub fn on_camera_change(&mut self, camera: &CameraState) -> Option<PlaceNameQuery> {
        let position = camera.position;
        if position.altitude > self.config.max_camera_altitude_meters {
            return None;
        }
        if let Some(last) = &self.last_request {
            if haversine_distance(last, &position) < self.config.reload_distance_meters {
                return None;
            }
        }
        self.last_request = Some(position);
        Some(PlaceNameQuery {
            longitude: position.longitude,
            latitude: position.latitude,
            radius_km: self.config.search_radius_km,
        })
    }

    /// Forget the last request position so the next low camera asks again.
    pub fn forget_request(&mut self) {
        self.last_request = None;
    }

    /// Draw labels for names not already on the globe. Returns how many
    /// were added.
    pub fn display<R: RenderAdapter + ?Sized>(&mut self, names: &[PlaceName], renderer: &mut R) -> usize {
        let mut added = 0;
        for place in names {
            let id = place.entity_id();
            if self.shown.contains_key(&id) {
                continue;
            }
            self.draw(&id, place, renderer);
            self.shown.insert(id, place.clone());
            added += 1;
        }
        debug!("[PlaceNames] {} new of {} names", added, names.len());
        added
    }

    /// Draw every known label again after the renderer dropped its entities.
    pub fn redraw<R: RenderAdapter + ?Sized>(&self, renderer: &mut R) {
        for (id, place) in &self.shown {
            self.draw(id, place, renderer);
        }
    }

    pub fn label_count(&self) -> usize {
        self.shown.len()
    }

    fn draw<R: RenderAdapter + ?Sized>(&self, id: &str, place: &PlaceName, renderer: &mut R) {
        let style = MarkerStyle::PlaceName {
            text: place.label_text(),
            show_distance: self.config.show_distance_meters,
        };
        renderer.draw_point_marker(id, place.position(), &style);
        renderer.set_entity_visible(id, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RecordingRenderer;

    fn camera(lat: f64, lng: f64, altitude: f64) -> CameraState {
        CameraState::looking_down(GeoPoint::new(lat, lng, altitude))
    }

    fn place(name: &str, lat: f64, lng: f64, altitude: f64) -> PlaceName {
        PlaceName {
            name: name.to_string(),
            longitude: lng,
            latitude: lat,
            altitude,
        }
    }

    #[test]
    fn test_high_camera_requests_nothing() {
        let mut layer = PlaceNameLayer::default();
        assert_eq!(layer.on_camera_change(&camera(46.0, 7.5, 10_001.0)), None);

        let query = layer.on_camera_change(&camera(46.0, 7.5, 10_000.0)).unwrap();
        assert_eq!(query.latitude, 46.0);
        assert_eq!(query.longitude, 7.5);
        assert_eq!(query.radius_km, 5.0);
    }

    #[test]
    fn test_request_needs_surface_movement() {
        let mut layer = PlaceNameLayer::default();
        assert!(layer.on_camera_change(&camera(46.0, 7.5, 3000.0)).is_some());

        // ~3.3 km north, and a pure climb, both stay inside the reload distance
        assert!(layer.on_camera_change(&camera(46.03, 7.5, 3000.0)).is_none());
        assert!(layer.on_camera_change(&camera(46.0, 7.5, 9000.0)).is_none());

        // ~5.6 km from the first request, not from the ignored position
        assert!(layer.on_camera_change(&camera(46.05, 7.5, 3000.0)).is_some());
    }

    #[test]
    fn test_forget_request_allows_retry() {
        let mut layer = PlaceNameLayer::default();
        assert!(layer.on_camera_change(&camera(46.0, 7.5, 3000.0)).is_some());
        layer.forget_request();
        assert!(layer.on_camera_change(&camera(46.0, 7.5, 3000.0)).is_some());
    }

    #[test]
    fn test_labels_drawn_once() {
        let mut layer = PlaceNameLayer::default();
        let mut renderer = RecordingRenderer::new();
        let names = vec![place("Eiger", 46.577, 8.005, 3967.0), place("Grindelwald", 46.624, 8.041, 0.0)];

        assert_eq!(layer.display(&names, &mut renderer), 2);
        assert_eq!(layer.display(&names[..1], &mut renderer), 0);
        assert_eq!(layer.label_count(), 2);
        assert!(renderer.is_visible(&names[0].entity_id()));

        renderer.remove_all_entities();
        layer.redraw(&mut renderer);
        assert!(renderer.is_visible(&names[1].entity_id()));
    }

    #[test]
    fn test_label_text() {
        assert_eq!(place("Eiger", 46.577, 8.005, 3967.0).label_text(), "Eiger [3967m]");
        assert_eq!(place("Grindelwald", 46.624, 8.041, 0.0).label_text(), "Grindelwald");
        assert_eq!(
            place("Eiger", 46.577, 8.005, 3967.0).entity_id(),
            "placename-Eiger_8.005_46.577"
        );
    }
}
