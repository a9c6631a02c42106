//! Stage 1: fold raw line-sequence data into the base hub graph: one node
//! per top-most parent id, null-weighted directed line edges between
//! consecutive hubs on every branch run.

use ahash::AHashMap;
use futures::StreamExt;
use std::collections::BTreeSet;

use super::MalformedCounter;
use crate::error::BuildError;
use crate::graph::{
    ConstituentStation, Direction, EdgeData, Hub, Mode, TransportGraph,
};
use crate::lines::{LINE_CATALOGUE, LineInfo};
use crate::tfl::TflClient;
use crate::tfl::models::RouteSequence;

/// One fetched (line, direction) sequence payload.
pub struct LineSequenceData {
    pub line_id: String,
    pub line_name: String,
    pub mode: Mode,
    pub direction: Direction,
    pub sequence: RouteSequence,
}

pub struct HubGraphBuild {
    pub graph: TransportGraph,
    /// station naptan id -> hub id, for corrections and timetable mapping.
    pub station_to_hub: AHashMap<String, String>,
    pub line_edges_added: usize,
}

/// Fetches both directions of every catalogued line. Individual misses are
/// logged and skipped; auth failures and cancellation abort the stage.
pub async fn fetch_line_sequences(
    client: &TflClient,
    concurrency: usize,
) -> Result<Vec<LineSequenceData>, BuildError> {
    let jobs: Vec<(&'static LineInfo, Direction)> = LINE_CATALOGUE
        .iter()
        .flat_map(|line| [(line, Direction::Inbound), (line, Direction::Outbound)])
        .collect();

    let results = futures::stream::iter(jobs.into_iter().map(|(line, direction)| async move {
        let fetched = client.line_route_sequence(line.id, direction).await;
        (line, direction, fetched)
    }))
    .buffer_unordered(concurrency.max(1))
    .collect::<Vec<_>>()
    .await;

    let mut sequences = Vec::new();
    for (line, direction, fetched) in results {
        match fetched {
            Ok(sequence) => sequences.push(LineSequenceData {
                line_id: line.id.to_string(),
                line_name: line.name.to_string(),
                mode: line.mode,
                direction,
                sequence,
            }),
            Err(e) if e.is_fatal() => {
                return Err(BuildError::Provider {
                    stage: "base-hub-graph",
                    source: e,
                });
            }
            Err(e) => {
                log::warn!(
                    "no sequence data for {} {}: {e}",
                    line.id,
                    direction.as_str()
                );
            }
        }
    }
    Ok(sequences)
}

/// Pure stage-1 core: sequences in, hub graph out.
pub fn build_hub_graph(sequences: &[LineSequenceData]) -> Result<HubGraphBuild, BuildError> {
    let mut graph = TransportGraph::new();
    let mut station_to_hub: AHashMap<String, String> = AHashMap::new();
    // Which mode supplied each hub's representative coordinates so far.
    let mut coord_rank: AHashMap<String, u8> = AHashMap::new();
    let mut malformed = MalformedCounter::new("base-hub-graph");

    // First pass: hubs.
    for data in sequences {
        for run in &data.sequence.stop_point_sequences {
            for stop in &run.stop_point {
                malformed.seen();
                let (Some(station_id), Some(name), Some(lat), Some(lon)) =
                    (stop.station_id(), stop.name.as_deref(), stop.lat, stop.lon)
                else {
                    malformed.record(|| {
                        format!("stop without id/name/coordinates on line {}", data.line_id)
                    });
                    continue;
                };
                let hub_id = stop.hub_id().unwrap_or(station_id).to_string();
                station_to_hub.insert(station_id.to_string(), hub_id.clone());

                let rank = data.mode.coordinate_rank();
                if !graph.contains_hub(&hub_id) {
                    graph.insert_hub(Hub {
                        id: hub_id.clone(),
                        name: name.to_string(),
                        lat,
                        lon,
                        zone: stop.zone.clone(),
                        modes: BTreeSet::new(),
                        lines: BTreeSet::new(),
                        constituent_stations: Vec::new(),
                        primary_naptan_id: hub_id.clone(),
                    });
                    coord_rank.insert(hub_id.clone(), rank);
                }
                let hub = graph.hub_mut(&hub_id).unwrap();

                hub.lines.insert(data.line_id.clone());
                hub.modes.insert(data.mode);
                for m in &stop.modes {
                    if let Some(mode) = Mode::from_id(m) {
                        hub.modes.insert(mode);
                    }
                }
                if hub.zone.is_none() {
                    hub.zone = stop.zone.clone();
                }
                if !hub
                    .constituent_stations
                    .iter()
                    .any(|s| s.naptan_id == station_id)
                {
                    hub.constituent_stations.push(ConstituentStation {
                        name: name.to_string(),
                        naptan_id: station_id.to_string(),
                    });
                }
                let best = coord_rank.entry(hub_id.clone()).or_insert(rank);
                if rank < *best {
                    hub.lat = lat;
                    hub.lon = lon;
                    *best = rank;
                }
            }
        }
    }

    for hub_id in graph.hub_ids().map(str::to_string).collect::<Vec<_>>() {
        let hub = graph.hub_mut(&hub_id).unwrap();
        hub.constituent_stations.sort_by(|a, b| a.naptan_id.cmp(&b.naptan_id));
        hub.recompute_primary_id();
    }

    // Second pass: consecutive-pair line edges per branch run.
    let mut line_edges_added = 0;
    for data in sequences {
        for run in &data.sequence.stop_point_sequences {
            let branch = run.branch_id.map(|b| b.to_string());
            for pair in run.stop_point.windows(2) {
                let (Some(a), Some(b)) = (pair[0].station_id(), pair[1].station_id()) else {
                    continue;
                };
                let (Some(hub_a), Some(hub_b)) = (station_to_hub.get(a), station_to_hub.get(b))
                else {
                    continue;
                };
                if hub_a == hub_b {
                    continue;
                }
                let added = graph.add_edge(
                    hub_a,
                    hub_b,
                    &data.line_id,
                    EdgeData {
                        line: data.line_id.clone(),
                        line_name: data.line_name.clone(),
                        mode: data.mode,
                        direction: data.direction,
                        branch: branch.clone(),
                        transfer: false,
                        weight: None,
                    },
                );
                if added {
                    line_edges_added += 1;
                }
            }
        }
    }

    malformed.check()?;
    log::info!(
        "base hub graph: {} hubs, {} line edges",
        graph.node_count(),
        line_edges_added
    );
    Ok(HubGraphBuild {
        graph,
        station_to_hub,
        line_edges_added,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub fn sequence_from_stops(stops: &[(&str, &str, Option<&str>, f64, f64)]) -> RouteSequence {
        let stop_points: Vec<serde_json::Value> = stops
            .iter()
            .map(|(id, name, parent, lat, lon)| {
                let mut v = json!({"id": id, "name": name, "lat": lat, "lon": lon});
                if let Some(p) = parent {
                    v["topMostParentId"] = json!(p);
                }
                v
            })
            .collect();
        serde_json::from_value(json!({
            "stopPointSequences": [{"branchId": 0, "direction": "inbound", "stopPoint": stop_points}]
        }))
        .unwrap()
    }

    pub fn seq_data(line: &str, mode: Mode, sequence: RouteSequence) -> LineSequenceData {
        LineSequenceData {
            line_id: line.to_string(),
            line_name: line.to_string(),
            mode,
            direction: Direction::Inbound,
            sequence,
        }
    }

    #[test]
    fn stations_sharing_a_parent_fold_into_one_hub() {
        // Three stations, one top-most parent, across two lines and modes.
        let metro = seq_data(
            "mildmay",
            Mode::Overground,
            sequence_from_stops(&[
                ("X1", "Harrington Road", Some("H"), 51.50, -0.10),
                ("Y1", "Elsewhere", None, 51.52, -0.12),
            ]),
        );
        let tube = seq_data(
            "northern",
            Mode::Tube,
            sequence_from_stops(&[
                ("X2", "Harrington Underground", Some("H"), 51.501, -0.101),
                ("X3", "Harrington Deep", Some("H"), 51.502, -0.102),
                ("Z1", "Somewhere", None, 51.48, -0.08),
            ]),
        );

        let built = build_hub_graph(&[metro, tube]).unwrap();
        let hub = built.graph.hub("H").expect("merged hub exists");
        assert_eq!(hub.constituent_stations.len(), 3);
        assert!(hub.modes.contains(&Mode::Tube) && hub.modes.contains(&Mode::Overground));
        assert!(hub.lines.contains("mildmay") && hub.lines.contains("northern"));
        // 3 distinct parents -> 3 nodes.
        assert_eq!(built.graph.node_count(), 3);
    }

    #[test]
    fn consecutive_stations_in_one_hub_produce_no_edge() {
        let data = seq_data(
            "district",
            Mode::Tube,
            sequence_from_stops(&[
                ("A1", "Alpha", Some("HA"), 51.50, -0.10),
                ("A2", "Alpha Side", Some("HA"), 51.501, -0.101),
                ("B1", "Beta", Some("HB"), 51.51, -0.11),
            ]),
        );
        let built = build_hub_graph(&[data]).unwrap();
        assert_eq!(built.line_edges_added, 1);
        assert!(built.graph.edge("HA", "HB", "district").is_some());
    }

    #[test]
    fn tube_coordinates_take_precedence_over_rail() {
        let rail = seq_data(
            "thameslink",
            Mode::NationalRail,
            sequence_from_stops(&[("R1", "Shared", Some("H"), 51.60, -0.20), ("Q1", "Other", None, 51.61, -0.21)]),
        );
        let tube = seq_data(
            "victoria",
            Mode::Tube,
            sequence_from_stops(&[("T1", "Shared Tube", Some("H"), 51.50, -0.10), ("P1", "Else", None, 51.51, -0.11)]),
        );
        // Rail seen first; tube should override the representative point.
        let built = build_hub_graph(&[rail, tube]).unwrap();
        let hub = built.graph.hub("H").unwrap();
        assert!((hub.lat - 51.50).abs() < 1e-9);
    }

    #[test]
    fn every_edge_line_is_in_both_endpoint_line_sets() {
        let data = seq_data(
            "victoria",
            Mode::Tube,
            sequence_from_stops(&[
                ("A", "A", None, 51.50, -0.10),
                ("B", "B", None, 51.51, -0.11),
                ("C", "C", None, 51.52, -0.12),
            ]),
        );
        let built = build_hub_graph(&[data]).unwrap();
        for (s, t, _, e) in built.graph.edges() {
            assert!(built.graph.hub(s).unwrap().lines.contains(&e.line));
            assert!(built.graph.hub(t).unwrap().lines.contains(&e.line));
        }
    }
}
