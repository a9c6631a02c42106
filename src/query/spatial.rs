//! Spatial candidate pre-filter: group geometry cuts the full hub set down
//! to the region between the users before any pathfinding runs.
//!
//! Two starts define an ellipse (foci at the starts, major axis stretched
//! past their separation so the ellipse has usable width); three or more
//! define a buffered convex hull. A coverage circle around the starts'
//! centroid then trims the far tail. The start hubs themselves always
//! survive the filter.

use geo::{Contains, ConvexHull, MultiPoint, Point, Polygon};
use geo_types::{Coord, LineString};

use crate::config::Config;
use crate::geo_util::haversine_km;
use crate::graph::TransportGraph;

/// Numerical slack on the ellipse boundary; compensates for curvature and
/// float error on near-boundary hubs.
const ELLIPSE_TOLERANCE_FRACTION: f64 = 0.005;

#[derive(Debug, Clone, Copy)]
pub struct SpatialParams {
    pub ellipse_expansion_factor: f64,
    pub hull_buffer_fraction: f64,
    pub coverage_fraction: f64,
}

impl From<&Config> for SpatialParams {
    fn from(config: &Config) -> SpatialParams {
        SpatialParams {
            ellipse_expansion_factor: config.ellipse_expansion_factor,
            hull_buffer_fraction: config.hull_buffer_fraction,
            coverage_fraction: config.coverage_fraction,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartPoint {
    pub hub_id: String,
    pub lat: f64,
    pub lon: f64,
}

/// Sum-of-focal-distances ellipse test. A major axis equal to the focal
/// separation collapses the ellipse onto the segment between the foci,
/// which would reject every off-line hub; the expansion factor keeps a
/// usable tube around the segment.
pub fn ellipse_contains(
    lat: f64,
    lon: f64,
    focus1: (f64, f64),
    focus2: (f64, f64),
    major_axis_km: f64,
) -> bool {
    let d1 = haversine_km(lat, lon, focus1.0, focus1.1);
    let d2 = haversine_km(lat, lon, focus2.0, focus2.1);
    d1 + d2 <= major_axis_km * (1.0 + ELLIPSE_TOLERANCE_FRACTION)
}

/// Convex hull of the starts in (lon, lat) space, pushed outward from its
/// centroid by the buffer fraction.
fn buffered_hull(starts: &[StartPoint], buffer_fraction: f64) -> Polygon<f64> {
    let points: Vec<Point<f64>> = starts.iter().map(|s| Point::new(s.lon, s.lat)).collect();
    let hull = MultiPoint::from(points).convex_hull();
    let exterior: Vec<Coord<f64>> = hull.exterior().coords().copied().collect();
    // The exterior ring is closed: its first coordinate repeats at the
    // end. Leave the duplicate out of the centroid average.
    let vertices = &exterior[..exterior.len().saturating_sub(1)];
    let n = vertices.len().max(1) as f64;
    let cx = vertices.iter().map(|c| c.x).sum::<f64>() / n;
    let cy = vertices.iter().map(|c| c.y).sum::<f64>() / n;
    let scaled: Vec<Coord<f64>> = exterior
        .iter()
        .map(|c| Coord {
            x: cx + (c.x - cx) * (1.0 + buffer_fraction),
            y: cy + (c.y - cy) * (1.0 + buffer_fraction),
        })
        .collect();
    Polygon::new(LineString::from(scaled), vec![])
}

/// Centroid of the starts plus the smallest radius capturing at least the
/// coverage fraction of them.
pub fn coverage_circle(starts: &[StartPoint], coverage_fraction: f64) -> (f64, f64, f64) {
    let n = starts.len();
    let lat = starts.iter().map(|s| s.lat).sum::<f64>() / n as f64;
    let lon = starts.iter().map(|s| s.lon).sum::<f64>() / n as f64;
    let mut distances: Vec<f64> = starts
        .iter()
        .map(|s| haversine_km(lat, lon, s.lat, s.lon))
        .collect();
    distances.sort_by(f64::total_cmp);
    let k = ((n as f64 * coverage_fraction).ceil() as usize).clamp(1, n);
    (lat, lon, distances[k - 1])
}

/// Reduces the graph's hub set to spatial candidates for the given starts.
pub fn filter_candidates(
    graph: &TransportGraph,
    starts: &[StartPoint],
    params: &SpatialParams,
) -> Vec<String> {
    assert!(starts.len() >= 2, "spatial filter needs at least two starts");

    let region: Box<dyn Fn(f64, f64) -> bool> = if starts.len() == 2 {
        let f1 = (starts[0].lat, starts[0].lon);
        let f2 = (starts[1].lat, starts[1].lon);
        let major_axis = haversine_km(f1.0, f1.1, f2.0, f2.1) * params.ellipse_expansion_factor;
        Box::new(move |lat, lon| ellipse_contains(lat, lon, f1, f2, major_axis))
    } else {
        let hull = buffered_hull(starts, params.hull_buffer_fraction);
        Box::new(move |lat, lon| hull.contains(&Point::new(lon, lat)))
    };

    let (c_lat, c_lon, radius_km) = coverage_circle(starts, params.coverage_fraction);

    let mut candidates: Vec<String> = graph
        .hubs()
        .filter(|hub| region(hub.lat, hub.lon))
        .filter(|hub| haversine_km(c_lat, c_lon, hub.lat, hub.lon) <= radius_km)
        .map(|hub| hub.id.clone())
        .collect();

    // The starts themselves are always viable candidates, whatever the
    // coverage trim did to them.
    for start in starts {
        if graph.contains_hub(&start.hub_id) && !candidates.contains(&start.hub_id) {
            candidates.push(start.hub_id.clone());
        }
    }
    candidates.sort();
    log::debug!(
        "spatial filter kept {} of {} hubs",
        candidates.len(),
        graph.node_count()
    );
    candidates
}
