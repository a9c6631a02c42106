//! Stage 2: for every hub, look up nearby rail/metro stops and add
//! null-weighted walking transfers to distinct hubs that share no line
//! edge with it. Emits the unordered pair list stage 3 weights.

use ahash::AHashSet;
use futures::StreamExt;

use crate::error::BuildError;
use crate::geo_util::haversine_m;
use crate::graph::{EdgeData, TRANSFER_KEY, TransportGraph};
use crate::tfl::TflClient;
use crate::tfl::models::NearbyStop;

/// Pure stage-2 core for a single hub: decide transfers from one radius
/// lookup. Returns the primary-id pairs newly scheduled for weighting.
/// Re-running with the same inputs is a no-op.
pub fn apply_nearby_stops(
    graph: &mut TransportGraph,
    hub_id: &str,
    stops: &[NearbyStop],
    radius_m: f64,
) -> Vec<(String, String)> {
    let Some(origin) = graph.hub(hub_id) else {
        return Vec::new();
    };
    let (origin_lat, origin_lon) = (origin.lat, origin.lon);
    let origin_primary = origin.primary_naptan_id.clone();

    let mut pairs = Vec::new();
    let mut considered: AHashSet<String> = AHashSet::new();
    for stop in stops {
        let Some(other_hub_id) = stop.hub_id() else {
            continue;
        };
        if other_hub_id == hub_id || !considered.insert(other_hub_id.to_string()) {
            continue;
        }
        // The graph only brokers transfers between hubs it knows about;
        // nearby stops outside the network (national-rail-only, bus) are
        // simply not nodes.
        let Some(other) = graph.hub(other_hub_id) else {
            continue;
        };
        // The provider's radius search is advisory; re-check the distance.
        let (Some(lat), Some(lon)) = (stop.lat, stop.lon) else {
            continue;
        };
        if haversine_m(origin_lat, origin_lon, lat, lon) > radius_m {
            continue;
        }
        if graph.has_line_edge_between(hub_id, other_hub_id) {
            continue;
        }
        if graph.edge(hub_id, other_hub_id, TRANSFER_KEY).is_some() {
            continue;
        }
        let other_primary = other.primary_naptan_id.clone();
        let other_hub_id = other_hub_id.to_string();
        graph.add_edge(hub_id, &other_hub_id, TRANSFER_KEY, EdgeData::walking_transfer());
        graph.add_edge(&other_hub_id, hub_id, TRANSFER_KEY, EdgeData::walking_transfer());

        let mut pair = [origin_primary.clone(), other_primary];
        pair.sort();
        let [a, b] = pair;
        pairs.push((a, b));
    }
    pairs
}

/// Runs the radius lookups concurrently, then applies them serially so the
/// graph has a single writer.
pub async fn run_proximity_stage(
    client: &TflClient,
    graph: &mut TransportGraph,
    radius_m: f64,
    concurrency: usize,
) -> Result<Vec<(String, String)>, BuildError> {
    let mut hubs: Vec<(String, f64, f64)> = graph
        .hubs()
        .map(|h| (h.id.clone(), h.lat, h.lon))
        .collect();
    hubs.sort_by(|a, b| a.0.cmp(&b.0));

    let lookups = futures::stream::iter(hubs.into_iter().map(|(hub_id, lat, lon)| async move {
        let stops = client.stops_near(lat, lon, radius_m).await;
        (hub_id, stops)
    }))
    .buffer_unordered(concurrency.max(1))
    .collect::<Vec<_>>()
    .await;

    let mut pair_set: AHashSet<(String, String)> = AHashSet::new();
    let mut pairs = Vec::new();
    for (hub_id, stops) in lookups {
        let stops = match stops {
            Ok(stops) => stops,
            Err(e) if e.is_fatal() => {
                return Err(BuildError::Provider {
                    stage: "proximity-transfers",
                    source: e,
                });
            }
            Err(e) => {
                log::warn!("nearby lookup failed for hub {hub_id}: {e}");
                continue;
            }
        };
        for pair in apply_nearby_stops(graph, &hub_id, &stops, radius_m) {
            if pair_set.insert(pair.clone()) {
                pairs.push(pair);
            }
        }
    }
    pairs.sort();
    log::info!("proximity transfers: {} pair(s) scheduled for weighting", pairs.len());
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Mode;
    use crate::graph::test_support::{bare_hub, line_edge};
    use serde_json::json;

    fn nearby(naptan: &str, hub: &str, lat: f64, lon: f64) -> NearbyStop {
        serde_json::from_value(json!({
            "naptanId": naptan,
            "topMostParentId": hub,
            "lat": lat,
            "lon": lon
        }))
        .unwrap()
    }

    fn two_hub_graph() -> TransportGraph {
        let mut g = TransportGraph::new();
        // ~110 m apart.
        g.insert_hub(bare_hub("P", "Latimer Road", 51.501, -0.225));
        g.insert_hub(bare_hub("Q", "Wood Lane", 51.500, -0.226));
        g
    }

    #[test]
    fn adds_reverse_twin_and_records_the_pair_once() {
        let mut g = two_hub_graph();
        let stops = vec![nearby("Q-stn", "Q", 51.500, -0.226)];
        let pairs = apply_nearby_stops(&mut g, "P", &stops, 250.0);

        assert_eq!(pairs, vec![("P-stn".to_string(), "Q-stn".to_string())]);
        assert!(g.edge("P", "Q", TRANSFER_KEY).is_some());
        assert!(g.edge("Q", "P", TRANSFER_KEY).is_some());

        // Second application from the other side is a no-op.
        let stops = vec![nearby("P-stn", "P", 51.501, -0.225)];
        let pairs = apply_nearby_stops(&mut g, "Q", &stops, 250.0);
        assert!(pairs.is_empty());
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn hubs_already_joined_by_a_line_get_no_transfer() {
        let mut g = two_hub_graph();
        g.add_edge("P", "Q", "circle", line_edge("circle", Mode::Tube, None));
        let stops = vec![nearby("Q-stn", "Q", 51.500, -0.226)];
        let pairs = apply_nearby_stops(&mut g, "P", &stops, 250.0);
        assert!(pairs.is_empty());
        assert!(g.edge("P", "Q", TRANSFER_KEY).is_none());
    }

    #[test]
    fn stops_reported_outside_the_radius_are_filtered() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("P", "Latimer Road", 51.501, -0.225));
        // ~1.5 km away despite being "nearby" per the provider.
        g.insert_hub(bare_hub("R", "Shepherd's Bush", 51.504, -0.205));
        let stops = vec![nearby("R-stn", "R", 51.504, -0.205)];
        let pairs = apply_nearby_stops(&mut g, "P", &stops, 250.0);
        assert!(pairs.is_empty());
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn unknown_hubs_are_ignored() {
        let mut g = two_hub_graph();
        let stops = vec![nearby("NR-stn", "NATRAIL-HUB", 51.501, -0.2251)];
        let pairs = apply_nearby_stops(&mut g, "P", &stops, 250.0);
        assert!(pairs.is_empty());
    }
}
