//! Launch-point clustering of tracks.
//!
//! Tracks are grouped with DBSCAN over the launch positions (first fix, or
//! the metadata start position). An R-tree pre-filters neighbor candidates by
//! a degree window and the haversine distance makes the final decision.
//!
//! With `min_points = 1` every track is a core point, so the result is the
//! transitive closure of the "closer than epsilon" relation: a partition of
//! the input with no noise. Group ids follow discovery order, which follows
//! input order.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, warn};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::geo_utils::{haversine_distance, meters_to_degrees};
use crate::records::TrackGroupSummary;
use crate::{GeoPoint, Track};

/// Widen the degree search window so the haversine check is the only filter.
const SEARCH_MARGIN: f64 = 1.05;

/// Configuration for launch-point clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Neighborhood radius in meters. Launches strictly closer than this are neighbors.
    /// Default: 5000.0
    pub epsilon_meters: f64,

    /// Neighbors (self included) needed for a track to seed a cluster.
    /// Tracks that can neither seed nor join a cluster are dropped as noise.
    /// Default: 1 (no noise)
    pub min_points: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            epsilon_meters: 5000.0,
            min_points: 1,
        }
    }
}

/// A set of tracks launched close to each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackGroup {
    /// Dense id in discovery order
    pub group_id: u32,
    /// Member track ids, never empty
    pub track_ids: Vec<String>,
    /// Launch position of the first member (pin position)
    pub centroid: GeoPoint,
}

impl TrackGroup {
    pub fn size(&self) -> usize {
        self.track_ids.len()
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.track_ids.iter().any(|id| id == track_id)
    }
}

/// Launch point wrapper for R-tree indexing.
#[derive(Debug, Clone)]
struct LaunchPoint {
    slot: usize,
    position: [f64; 2],
}

impl RTreeObject for LaunchPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Label {
    Unvisited,
    Noise,
    Member(u32),
}

/// Cluster tracks by launch position.
///
/// Tracks without any known launch position are left out.
pub fn cluster_tracks(tracks: &[Track], config: &ClusterConfig) -> Vec<TrackGroup> {
    let launches: Vec<(usize, GeoPoint)> = tracks
        .iter()
        .enumerate()
        .filter_map(|(i, t)| match t.origin() {
            Some(origin) if origin.is_valid() => Some((i, origin)),
            _ => {
                debug!("[Clustering] Track '{}' has no launch position, skipped", t.id());
                None
            }
        })
        .collect();

    if launches.is_empty() {
        return vec![];
    }

    let neighborhoods = neighborhoods(&launches, config.epsilon_meters);
    let min_points = config.min_points.max(1);

    let mut labels = vec![Label::Unvisited; launches.len()];
    let mut groups: Vec<TrackGroup> = Vec::new();

    for seed in 0..launches.len() {
        if labels[seed] != Label::Unvisited {
            continue;
        }
        if neighborhoods[seed].len() < min_points {
            labels[seed] = Label::Noise;
            continue;
        }

        let group_id = groups.len() as u32;
        let mut members = vec![seed];
        labels[seed] = Label::Member(group_id);

        let mut queue: VecDeque<usize> = neighborhoods[seed].iter().copied().collect();
        while let Some(slot) = queue.pop_front() {
            match labels[slot] {
                Label::Member(_) => continue,
                // Border point: joins, but does not expand
                Label::Noise => {
                    labels[slot] = Label::Member(group_id);
                    members.push(slot);
                }
                Label::Unvisited => {
                    labels[slot] = Label::Member(group_id);
                    members.push(slot);
                    if neighborhoods[slot].len() >= min_points {
                        queue.extend(neighborhoods[slot].iter().copied());
                    }
                }
            }
        }

        groups.push(TrackGroup {
            group_id,
            track_ids: members
                .iter()
                .map(|&slot| tracks[launches[slot].0].id().to_string())
                .collect(),
            centroid: launches[seed].1,
        });
    }

    let noise = labels.iter().filter(|l| **l == Label::Noise).count();
    debug!(
        "[Clustering] {} tracks -> {} groups ({} noise, eps={}m, min_points={})",
        launches.len(),
        groups.len(),
        noise,
        config.epsilon_meters,
        min_points
    );

    groups
}

/// Neighbor slots (self included, ascending) for every launch.
fn neighborhoods(launches: &[(usize, GeoPoint)], epsilon: f64) -> Vec<Vec<usize>> {
    let tree = RTree::bulk_load(
        launches
            .iter()
            .enumerate()
            .map(|(slot, (_, p))| LaunchPoint {
                slot,
                position: [p.longitude, p.latitude],
            })
            .collect(),
    );

    #[cfg(feature = "parallel")]
    {
        (0..launches.len())
            .into_par_iter()
            .map(|slot| region_query(&tree, launches, slot, epsilon))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        (0..launches.len())
            .map(|slot| region_query(&tree, launches, slot, epsilon))
            .collect()
    }
}

fn region_query(
    tree: &RTree<LaunchPoint>,
    launches: &[(usize, GeoPoint)],
    slot: usize,
    epsilon: f64,
) -> Vec<usize> {
    let center = launches[slot].1;
    let is_neighbor = |other: usize| {
        other == slot || haversine_distance(&center, &launches[other].1) < epsilon
    };

    let (dlat, _) = meters_to_degrees(epsilon * SEARCH_MARGIN, center.latitude);
    let (_, dlng) = meters_to_degrees(epsilon * SEARCH_MARGIN, center.latitude.abs() + dlat);

    let window = dlng.filter(|dlng| {
        center.longitude - dlng >= -180.0
            && center.longitude + dlng <= 180.0
            && center.latitude.abs() + dlat < 90.0
    });

    let mut result: Vec<usize> = match window {
        Some(dlng) => {
            let envelope = AABB::from_corners(
                [center.longitude - dlng, center.latitude - dlat],
                [center.longitude + dlng, center.latitude + dlat],
            );
            tree.locate_in_envelope(&envelope)
                .map(|p| p.slot)
                .filter(|&other| is_neighbor(other))
                .collect()
        }
        // Window wraps the antimeridian or a pole: check everything
        None => (0..launches.len()).filter(|&other| is_neighbor(other)).collect(),
    };
    result.sort_unstable();
    result
}

/// Build groups from loader-supplied summaries.
///
/// Unknown ids and ids already claimed by an earlier group are dropped, so the
/// result stays a partition of known tracks. Groups left empty, or with no
/// usable pin position, are dropped.
pub fn assemble_groups(summaries: &[TrackGroupSummary], tracks: &[Track]) -> Vec<TrackGroup> {
    let by_id: HashMap<&str, &Track> = tracks.iter().map(|t| (t.id(), t)).collect();
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut groups = Vec::with_capacity(summaries.len());

    for summary in summaries {
        let track_ids: Vec<String> = summary
            .track_ids
            .iter()
            .filter(|id| by_id.contains_key(id.as_str()) && claimed.insert(id.as_str()))
            .cloned()
            .collect();
        if track_ids.is_empty() {
            warn!("[Clustering] Group {} has no known tracks, dropped", summary.group_id);
            continue;
        }
        let centroid = summary
            .position
            .filter(GeoPoint::is_valid)
            .or_else(|| by_id.get(track_ids[0].as_str()).and_then(|t| t.origin()));
        match centroid {
            Some(centroid) => groups.push(TrackGroup {
                group_id: summary.group_id,
                track_ids,
                centroid,
            }),
            None => warn!("[Clustering] Group {} has no position, dropped", summary.group_id),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Activity, TrackPoint};
    use chrono::{TimeZone, Utc};

    fn launch(id: &str, lat: f64, lng: f64) -> Track {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Track::new(id, id, Activity::Paraglider, 10.0, vec![TrackPoint::new(t0, lat, lng, 1000.0)]).unwrap()
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_tracks(&[], &ClusterConfig::default()).is_empty());
    }

    #[test]
    fn test_single_track() {
        let groups = cluster_tracks(&[launch("a", 35.0, 139.0)], &ClusterConfig::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].track_ids, vec!["a"]);
        assert_eq!(groups[0].group_id, 0);
    }

    #[test]
    fn test_zero_epsilon_gives_singletons() {
        let tracks = vec![launch("a", 35.0, 139.0), launch("b", 35.0, 139.0), launch("c", 35.001, 139.0)];
        let config = ClusterConfig {
            epsilon_meters: 0.0,
            ..ClusterConfig::default()
        };
        let groups = cluster_tracks(&tracks, &config);
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.size() == 1));
    }

    #[test]
    fn test_centroid_is_first_member_launch() {
        let tracks = vec![launch("a", 35.0, 139.0), launch("b", 35.01, 139.01)];
        let groups = cluster_tracks(&tracks, &ClusterConfig::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].centroid, GeoPoint::new(35.0, 139.0, 1000.0));
    }

    #[test]
    fn test_min_points_drops_noise() {
        let tracks = vec![
            launch("a", 35.0, 139.0),
            launch("b", 35.001, 139.0),
            launch("lonely", 40.0, 141.0),
        ];
        let config = ClusterConfig {
            min_points: 2,
            ..ClusterConfig::default()
        };
        let groups = cluster_tracks(&tracks, &config);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].track_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_across_antimeridian() {
        let tracks = vec![launch("east", 0.0, 179.99), launch("west", 0.0, -179.99)];
        let groups = cluster_tracks(&tracks, &ClusterConfig::default());
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_assemble_groups_keeps_partition() {
        let tracks = vec![launch("a", 35.0, 139.0), launch("b", 35.5, 139.5)];
        let summaries = vec![
            TrackGroupSummary {
                group_id: 4,
                track_ids: vec!["a".into(), "ghost".into()],
                position: None,
            },
            TrackGroupSummary {
                group_id: 5,
                track_ids: vec!["a".into(), "b".into()],
                position: Some(GeoPoint::new(35.5, 139.5, 0.0)),
            },
            TrackGroupSummary {
                group_id: 6,
                track_ids: vec!["ghost".into()],
                position: None,
            },
        ];
        let groups = assemble_groups(&summaries, &tracks);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].track_ids, vec!["a"]);
        assert_eq!(groups[0].centroid, GeoPoint::new(35.0, 139.0, 1000.0));
        assert_eq!(groups[1].track_ids, vec!["b"]);
    }
}
