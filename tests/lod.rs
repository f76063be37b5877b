//! Tests for the level-of-detail controller

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use trackview::clustering::cluster_tracks;
use trackview::{
    Activity, ActivityFilter, AltitudeBand, Bounds, CameraState, ClusterConfig, GeoPoint, LevelOfDetailController,
    LodConfig, LodUpdate, NoFilter, RecordingRenderer, Track, TrackPoint, TrackRepository,
};

/// Two-hour flight with a fix every 20 seconds.
fn flight(id: &str, activity: Activity, lat: f64, lng: f64) -> Track {
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let points = (0..360)
        .map(|i| {
            TrackPoint::new(
                t0 + Duration::seconds(i * 20),
                lat + i as f64 * 0.0001,
                lng,
                1000.0,
            )
        })
        .collect();
    Track::new(id, id, activity, 30.0, points).unwrap()
}

fn setup() -> (TrackRepository, RecordingRenderer, LevelOfDetailController) {
    let tracks = vec![
        flight("para", Activity::Paraglider, 35.0, 139.0),
        flight("hang", Activity::Hangglider, 35.01, 139.01),
        flight("far", Activity::Paraglider, 46.0, 7.5),
    ];
    let groups = cluster_tracks(&tracks, &ClusterConfig::default());
    let mut repo = TrackRepository::default();
    let session = repo.begin_session(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    repo.install(session, tracks, groups).unwrap();

    let mut renderer = RecordingRenderer::new();
    let lod = LevelOfDetailController::new(LodConfig::default());
    lod.initialize_entities(&repo, &mut renderer);
    (repo, renderer, lod)
}

fn camera_at(altitude: f64) -> CameraState {
    CameraState::looking_down(GeoPoint::new(35.0, 139.0, altitude))
}

// ============================================================================
// Hysteresis
// ============================================================================

#[test]
fn test_one_recompute_per_crossing() {
    let (repo, mut renderer, mut lod) = setup();

    let altitudes = [100_000.0, 90_000.0, 80_000.0, 60_000.0, 50_000.0, 40_000.0, 30_000.0];
    let updates: Vec<LodUpdate> = altitudes
        .iter()
        .map(|a| lod.on_camera_change(&camera_at(*a), &repo, &NoFilter, &mut renderer))
        .collect();

    assert_eq!(
        updates,
        vec![
            LodUpdate::Unchanged,
            LodUpdate::Unchanged,
            LodUpdate::Unchanged,
            LodUpdate::Transitioned(AltitudeBand::Low),
            LodUpdate::Unchanged,
            LodUpdate::Unchanged,
            LodUpdate::Unchanged,
        ]
    );
    assert_eq!(lod.render_count(), 1);

    let visibility_after_crossing = renderer.visibility_commands;
    lod.on_camera_change(&camera_at(20_000.0), &repo, &NoFilter, &mut renderer);
    assert_eq!(renderer.visibility_commands, visibility_after_crossing);
}

#[test]
fn test_threshold_is_strict() {
    let (repo, mut renderer, mut lod) = setup();
    assert_eq!(
        lod.on_camera_change(&camera_at(70_000.0), &repo, &NoFilter, &mut renderer),
        LodUpdate::Transitioned(AltitudeBand::Low)
    );
    assert_eq!(
        lod.on_camera_change(&camera_at(70_100.0), &repo, &NoFilter, &mut renderer),
        LodUpdate::Transitioned(AltitudeBand::High)
    );
}

#[test]
fn test_configurable_threshold() {
    let (repo, mut renderer, _) = setup();
    let mut lod = LevelOfDetailController::new(LodConfig {
        altitude_threshold_meters: 10_000.0,
        ..LodConfig::default()
    });
    assert_eq!(
        lod.on_camera_change(&camera_at(20_000.0), &repo, &NoFilter, &mut renderer),
        LodUpdate::Unchanged
    );
    assert_eq!(
        lod.on_camera_change(&camera_at(9_000.0), &repo, &NoFilter, &mut renderer),
        LodUpdate::Transitioned(AltitudeBand::Low)
    );
}

// ============================================================================
// Visibility Policy
// ============================================================================

#[test]
fn test_high_altitude_shows_pins_only() {
    let (repo, mut renderer, mut lod) = setup();
    lod.render(&repo, &NoFilter, &mut renderer);

    assert!(renderer.is_visible("trackgroup-0"));
    assert!(renderer.is_visible("trackgroup-1"));
    assert!(!renderer.is_visible("trackline-para"));
    assert!(!renderer.is_visible("trackpoint-para-3"));
}

#[test]
fn test_low_altitude_shows_selected_lines_and_sparse_points() {
    let (mut repo, mut renderer, mut lod) = setup();
    repo.get_mut("para").unwrap().select(true);

    lod.on_camera_change(&camera_at(5_000.0), &repo, &NoFilter, &mut renderer);

    assert!(!renderer.is_visible("trackgroup-0"));
    assert!(renderer.is_visible("trackline-para"));
    assert!(!renderer.is_visible("trackline-hang"));
    // 20s fixes, 60s spacing: every third fix carries a marker
    assert!(renderer.is_visible("trackpoint-hang-3"));
    assert!(renderer.is_visible("trackpoint-para-6"));
    assert!(!renderer.has_entity("trackpoint-para-4"));
}

#[test]
fn test_filtered_tracks_always_hidden() {
    let (mut repo, mut renderer, mut lod) = setup();
    repo.get_mut("hang").unwrap().select(true);
    let filter = ActivityFilter::hiding([Activity::Hangglider]);

    lod.on_camera_change(&camera_at(5_000.0), &repo, &filter, &mut renderer);

    assert!(!renderer.is_visible("trackline-hang"));
    assert!(!renderer.is_visible("trackpoint-hang-3"));
    assert!(renderer.is_visible("trackpoint-para-3"));
}

#[test]
fn test_tracks_in_perspective_follow_viewport() {
    let (repo, mut renderer, mut lod) = setup();
    let viewport = Bounds {
        min_lat: 34.9,
        max_lat: 35.2,
        min_lng: 138.9,
        max_lng: 139.1,
    };
    lod.on_camera_change(
        &camera_at(5_000.0).with_viewport(viewport),
        &repo,
        &NoFilter,
        &mut renderer,
    );
    assert_eq!(lod.tracks_in_perspective(), ["para".to_string(), "hang".to_string()]);
}
