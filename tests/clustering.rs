//! Tests for launch-point clustering

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use trackview::{cluster_tracks, Activity, ClusterConfig, Track, TrackPoint};

fn launch(id: &str, lat: f64, lng: f64) -> Track {
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
    Track::new(
        id,
        id,
        Activity::Paraglider,
        25.0,
        vec![
            TrackPoint::new(t0, lat, lng, 1200.0),
            TrackPoint::new(t1, lat + 0.2, lng + 0.2, 900.0),
        ],
    )
    .unwrap()
}

/// Deterministic scatter of launches around a few sites.
fn scattered_launches(count: usize) -> Vec<Track> {
    let sites = [(35.0, 139.0), (36.4, 138.1), (46.0, 7.5), (-33.9, 151.2)];
    (0..count)
        .map(|i| {
            let (lat, lng) = sites[i % sites.len()];
            // Offsets of up to ~2.2km, in a fixed pattern
            let dlat = ((i * 7) % 11) as f64 * 0.002;
            let dlng = ((i * 3) % 13) as f64 * 0.0015;
            launch(&format!("t{}", i), lat + dlat, lng + dlng)
        })
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_nearby_pair_and_distant_singleton() {
    let tracks = vec![
        launch("A", 35.0, 139.0),
        launch("B", 35.001, 139.001),
        launch("C", 36.0, 140.0),
    ];
    let config = ClusterConfig {
        epsilon_meters: 5000.0,
        min_points: 1,
    };

    let groups = cluster_tracks(&tracks, &config);

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].group_id, 0);
    assert_eq!(groups[0].track_ids, vec!["A", "B"]);
    assert_eq!(groups[1].group_id, 1);
    assert_eq!(groups[1].track_ids, vec!["C"]);
}

#[test]
fn test_transitive_chain() {
    // A-B and B-C are ~4.4km apart, A-C ~8.9km
    let tracks = vec![
        launch("A", 35.0, 139.0),
        launch("B", 35.04, 139.0),
        launch("C", 35.08, 139.0),
    ];

    let groups = cluster_tracks(&tracks, &ClusterConfig::default());

    assert_eq!(groups.len(), 1);
    let members: HashSet<&str> = groups[0].track_ids.iter().map(String::as_str).collect();
    assert_eq!(members, HashSet::from(["A", "B", "C"]));
}

#[test]
fn test_chain_discovered_from_the_far_end() {
    // First track is at the end of the chain; members join in breadth-first order
    let tracks = vec![
        launch("C", 35.08, 139.0),
        launch("X", 10.0, 10.0),
        launch("A", 35.0, 139.0),
        launch("B", 35.04, 139.0),
    ];

    let groups = cluster_tracks(&tracks, &ClusterConfig::default());

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].track_ids, vec!["C", "B", "A"]);
    assert_eq!(groups[1].track_ids, vec!["X"]);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_partition_property() {
    let tracks = scattered_launches(60);
    let groups = cluster_tracks(&tracks, &ClusterConfig::default());

    let mut seen = HashSet::new();
    for group in &groups {
        assert!(!group.track_ids.is_empty());
        for id in &group.track_ids {
            assert!(seen.insert(id.clone()), "track {} appears in two groups", id);
        }
    }
    let input: HashSet<String> = tracks.iter().map(|t| t.id().to_string()).collect();
    assert_eq!(seen, input);
}

#[test]
fn test_group_ids_are_dense() {
    let tracks = scattered_launches(40);
    let groups = cluster_tracks(&tracks, &ClusterConfig::default());
    for (i, group) in groups.iter().enumerate() {
        assert_eq!(group.group_id, i as u32);
    }
}

#[test]
fn test_deterministic_across_runs() {
    let tracks = scattered_launches(80);
    let config = ClusterConfig::default();
    let first = cluster_tracks(&tracks, &config);
    for _ in 0..5 {
        assert_eq!(cluster_tracks(&tracks, &config), first);
    }
}

#[test]
fn test_membership_independent_of_input_order() {
    let tracks = scattered_launches(48);
    let mut reversed = tracks.clone();
    reversed.reverse();

    let as_sets = |groups: Vec<trackview::TrackGroup>| {
        let mut sets: Vec<Vec<String>> = groups
            .into_iter()
            .map(|g| {
                let mut ids = g.track_ids;
                ids.sort();
                ids
            })
            .collect();
        sets.sort();
        sets
    };

    let config = ClusterConfig::default();
    assert_eq!(
        as_sets(cluster_tracks(&tracks, &config)),
        as_sets(cluster_tracks(&reversed, &config))
    );
}

#[test]
fn test_metadata_tracks_cluster_by_start_position() {
    let metadata = trackview::TrackMetadata {
        pilot_name: "Ken".to_string(),
        activity: Activity::Paraglider,
        distance_km: 12.0,
        start_time: Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap(),
        end_time: Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap(),
        start_position: trackview::GeoPoint::new(35.0005, 139.0005, 1200.0),
        end_position: None,
        max_altitude: None,
        model: String::new(),
    };
    let tracks = vec![launch("A", 35.0, 139.0), Track::from_metadata(metadata)];

    let groups = cluster_tracks(&tracks, &ClusterConfig::default());

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].track_ids, vec!["A", "Ken_20240501020000"]);
}
