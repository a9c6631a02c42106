//! Hard-coded fixes for places the provider's sequence data is known to be
//! wrong. Kept apart from the graph builder so the full list of manual
//! interventions is auditable in one place. Every applied correction is
//! logged.

use ahash::AHashMap;

use crate::graph::{Direction, EdgeData, TransportGraph};
use crate::lines::{line_display_name, line_mode};

#[derive(Debug, Clone, Copy)]
pub enum CorrectionOp {
    /// Drop a line from a hub's line-set and remove its incident edges on
    /// that line, both directions.
    RemoveLineMembership { station: &'static str, line: &'static str },
    /// Add a directed line edge the sequence data skips.
    InsertEdge {
        from_station: &'static str,
        to_station: &'static str,
        line: &'static str,
    },
    /// Make sure both directions of a segment exist when either does.
    EnsureReverse {
        station_a: &'static str,
        station_b: &'static str,
        line: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Correction {
    pub op: CorrectionOp,
    pub justification: &'static str,
}

pub const CORRECTIONS: &[Correction] = &[
    Correction {
        op: CorrectionOp::RemoveLineMembership {
            station: "940GZZLUWIG",
            line: "metropolitan",
        },
        justification: "Metropolitan trains pass Willesden Green without stopping; \
                        the sequence data still lists the line there",
    },
    Correction {
        op: CorrectionOp::InsertEdge {
            from_station: "940GZZLUFYR",
            to_station: "940GZZLUWYP",
            line: "metropolitan",
        },
        justification: "fast Metropolitan service runs Finchley Road to Wembley Park \
                        non-stop; sequence data only shows the stopping pattern",
    },
    Correction {
        op: CorrectionOp::InsertEdge {
            from_station: "940GZZLUWYP",
            to_station: "940GZZLUFYR",
            line: "metropolitan",
        },
        justification: "reverse of the Finchley Road to Wembley Park insertion",
    },
    Correction {
        op: CorrectionOp::EnsureReverse {
            station_a: "940GZZLUGGH",
            station_b: "940GZZLUHLT",
            line: "central",
        },
        justification: "the Hainault loop is sequenced in one direction only \
                        between Grange Hill and Hainault",
    },
];

fn manual_edge(line: &str) -> EdgeData {
    EdgeData {
        line: line.to_string(),
        line_name: line_display_name(line).to_string(),
        mode: line_mode(line).expect("corrections only reference catalogued lines"),
        direction: Direction::Unknown,
        branch: None,
        transfer: false,
        weight: None,
    }
}

fn insert_line_edge(graph: &mut TransportGraph, from: &str, to: &str, line: &str) -> bool {
    let added = graph.add_edge(from, to, line, manual_edge(line));
    if added {
        // Keep the edge-line soundness invariant intact for the new edge.
        for hub_id in [from, to] {
            if let Some(hub) = graph.hub_mut(hub_id) {
                hub.lines.insert(line.to_string());
            }
        }
    }
    added
}

/// Applies the full correction list. Returns how many corrections changed
/// the graph.
pub fn apply_corrections(
    graph: &mut TransportGraph,
    station_to_hub: &AHashMap<String, String>,
) -> usize {
    let mut applied = 0;
    for correction in CORRECTIONS {
        let changed = match correction.op {
            CorrectionOp::RemoveLineMembership { station, line } => {
                let Some(hub_id) = station_to_hub.get(station).cloned() else {
                    log::warn!("correction skipped: station {station} not in graph");
                    continue;
                };
                let edges = graph.edges_on_line_touching(&hub_id, line);
                for (s, t, k) in &edges {
                    graph.remove_edge(s, t, k);
                }
                let membership_removed = graph
                    .hub_mut(&hub_id)
                    .map(|hub| hub.lines.remove(line))
                    .unwrap_or(false);
                if !edges.is_empty() || membership_removed {
                    log::info!(
                        "correction: removed {line} from hub {hub_id} ({} edge(s)): {}",
                        edges.len(),
                        correction.justification
                    );
                }
                membership_removed || !edges.is_empty()
            }
            CorrectionOp::InsertEdge {
                from_station,
                to_station,
                line,
            } => {
                let (Some(from), Some(to)) = (
                    station_to_hub.get(from_station).cloned(),
                    station_to_hub.get(to_station).cloned(),
                ) else {
                    log::warn!(
                        "correction skipped: {from_station} or {to_station} not in graph"
                    );
                    continue;
                };
                let added = insert_line_edge(graph, &from, &to, line);
                if added {
                    log::info!(
                        "correction: inserted {line} edge {from} -> {to}: {}",
                        correction.justification
                    );
                }
                added
            }
            CorrectionOp::EnsureReverse {
                station_a,
                station_b,
                line,
            } => {
                let (Some(a), Some(b)) = (
                    station_to_hub.get(station_a).cloned(),
                    station_to_hub.get(station_b).cloned(),
                ) else {
                    log::warn!("correction skipped: {station_a} or {station_b} not in graph");
                    continue;
                };
                let mut added = false;
                if graph.edge(&a, &b, line).is_some() && graph.edge(&b, &a, line).is_none() {
                    added |= insert_line_edge(graph, &b, &a, line);
                }
                if graph.edge(&b, &a, line).is_some() && graph.edge(&a, &b, line).is_none() {
                    added |= insert_line_edge(graph, &a, &b, line);
                }
                if added {
                    log::info!(
                        "correction: completed {line} pair {a} <-> {b}: {}",
                        correction.justification
                    );
                }
                added
            }
        };
        if changed {
            applied += 1;
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{bare_hub, line_edge};
    use crate::graph::Mode;

    fn map(entries: &[(&str, &str)]) -> AHashMap<String, String> {
        entries
            .iter()
            .map(|(s, h)| (s.to_string(), h.to_string()))
            .collect()
    }

    #[test]
    fn removal_strips_membership_and_edges_both_directions() {
        let mut g = TransportGraph::new();
        for id in ["WIG", "KIL", "DOL"] {
            let mut hub = bare_hub(id, id, 51.5, -0.2);
            hub.lines.insert("metropolitan".into());
            hub.lines.insert("jubilee".into());
            g.insert_hub(hub);
        }
        g.add_edge("WIG", "KIL", "metropolitan", line_edge("metropolitan", Mode::Tube, None));
        g.add_edge("DOL", "WIG", "metropolitan", line_edge("metropolitan", Mode::Tube, None));
        g.add_edge("WIG", "KIL", "jubilee", line_edge("jubilee", Mode::Tube, None));

        let stations = map(&[("940GZZLUWIG", "WIG")]);
        apply_corrections(&mut g, &stations);

        assert!(!g.hub("WIG").unwrap().lines.contains("metropolitan"));
        assert!(g.edge("WIG", "KIL", "metropolitan").is_none());
        assert!(g.edge("DOL", "WIG", "metropolitan").is_none());
        assert!(g.edge("WIG", "KIL", "jubilee").is_some());
    }

    #[test]
    fn inserted_edges_keep_line_membership_sound() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("FYR", "Finchley Road", 51.547, -0.180));
        g.insert_hub(bare_hub("WYP", "Wembley Park", 51.563, -0.279));
        let stations = map(&[("940GZZLUFYR", "FYR"), ("940GZZLUWYP", "WYP")]);

        apply_corrections(&mut g, &stations);

        assert!(g.edge("FYR", "WYP", "metropolitan").is_some());
        assert!(g.edge("WYP", "FYR", "metropolitan").is_some());
        assert!(g.hub("FYR").unwrap().lines.contains("metropolitan"));
        assert!(g.hub("WYP").unwrap().lines.contains("metropolitan"));
    }

    #[test]
    fn loop_reverse_is_added_when_one_direction_exists() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("GGH", "Grange Hill", 51.613, 0.092));
        g.insert_hub(bare_hub("HLT", "Hainault", 51.603, 0.093));
        g.add_edge("GGH", "HLT", "central", line_edge("central", Mode::Tube, None));
        let stations = map(&[("940GZZLUGGH", "GGH"), ("940GZZLUHLT", "HLT")]);

        apply_corrections(&mut g, &stations);

        assert!(g.edge("HLT", "GGH", "central").is_some());
    }
}
