//! Stage 8: splice the gated weight records into the graph and apply the
//! pruning policy, producing the final queryable artifact.

use ahash::AHashMap;

use super::CalculatedWeight;
use crate::config::UnweightedTransferPolicy;
use crate::graph::{TRANSFER_KEY, TransportGraph};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub weights_applied: usize,
    pub unmatched_records: usize,
    /// Non-transfer edges still null after the splice; should be zero once
    /// the gate has passed, removed as a fail-safe.
    pub null_line_edges_removed: usize,
    pub transfers_pruned: usize,
}

pub fn merge_weights(
    graph: &mut TransportGraph,
    records: &[CalculatedWeight],
    policy: UnweightedTransferPolicy,
) -> MergeSummary {
    let mut summary = MergeSummary::default();

    let mut lookup: AHashMap<(String, String, String), f64> = AHashMap::new();
    for record in records {
        lookup.insert(
            (
                record.source.clone(),
                record.target.clone(),
                record.line.clone(),
            ),
            record.duration_minutes,
        );
    }

    let line_edges: Vec<(String, String, String, String)> = graph
        .edges()
        .filter(|(_, _, _, e)| !e.transfer)
        .map(|(s, t, k, e)| (s.to_string(), t.to_string(), k.to_string(), e.line.clone()))
        .collect();

    let mut matched = 0usize;
    for (source, target, key, line) in &line_edges {
        if let Some(&weight) = lookup.get(&(source.clone(), target.clone(), line.clone())) {
            if let Some(edge) = graph.edge_mut(source, target, key) {
                edge.weight = Some(weight);
                summary.weights_applied += 1;
            }
            matched += 1;
        }
    }
    summary.unmatched_records = lookup.len().saturating_sub(matched);
    if summary.unmatched_records > 0 {
        log::warn!(
            "{} weight record(s) matched no line edge",
            summary.unmatched_records
        );
    }

    // Fail-safe sweep: a null line edge cannot carry a shortest path.
    for (source, target, key, _) in &line_edges {
        let still_null = graph
            .edge(source, target, key)
            .map(|e| e.weight.is_none())
            .unwrap_or(false);
        if still_null {
            log::warn!("removing unweighted line edge {source} -> {target} ({key})");
            graph.remove_edge(source, target, key);
            summary.null_line_edges_removed += 1;
        }
    }

    if policy == UnweightedTransferPolicy::Prune {
        let null_transfers: Vec<(String, String)> = graph
            .edges()
            .filter(|(_, _, k, e)| *k == TRANSFER_KEY && e.weight.is_none())
            .map(|(s, t, _, _)| (s.to_string(), t.to_string()))
            .collect();
        for (source, target) in null_transfers {
            if graph.remove_edge(&source, &target, TRANSFER_KEY).is_some() {
                summary.transfers_pruned += 1;
            }
            // The twin is null too (gate guarantee); take it with us.
            if graph.remove_edge(&target, &source, TRANSFER_KEY).is_some() {
                summary.transfers_pruned += 1;
            }
        }
    }

    log::info!(
        "merge: {} weight(s) applied, {} null line edge(s) removed, {} transfer(s) pruned",
        summary.weights_applied,
        summary.null_line_edges_removed,
        summary.transfers_pruned
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{bare_hub, line_edge};
    use crate::graph::{EdgeData, Mode};

    fn record(source: &str, target: &str, line: &str, minutes: f64) -> CalculatedWeight {
        CalculatedWeight {
            source: source.to_string(),
            target: target.to_string(),
            line: line.to_string(),
            mode: Mode::Tube,
            duration_minutes: minutes,
            calculated_timestamp: "2025-05-10T11:00:00Z".to_string(),
        }
    }

    fn triangle() -> TransportGraph {
        let mut g = TransportGraph::new();
        for id in ["A", "B", "C"] {
            g.insert_hub(bare_hub(id, id, 51.5, -0.1));
        }
        g.add_edge("A", "B", "victoria", line_edge("victoria", Mode::Tube, None));
        g.add_edge("B", "C", "victoria", line_edge("victoria", Mode::Tube, None));
        g
    }

    #[test]
    fn weights_land_on_matching_edges() {
        let mut g = triangle();
        let summary = merge_weights(
            &mut g,
            &[record("A", "B", "victoria", 2.0), record("B", "C", "victoria", 3.5)],
            UnweightedTransferPolicy::Prune,
        );
        assert_eq!(summary.weights_applied, 2);
        assert_eq!(summary.null_line_edges_removed, 0);
        assert_eq!(g.edge("A", "B", "victoria").unwrap().weight, Some(2.0));
        assert_eq!(g.edge("B", "C", "victoria").unwrap().weight, Some(3.5));
    }

    #[test]
    fn leftover_null_line_edges_are_swept() {
        let mut g = triangle();
        let summary = merge_weights(
            &mut g,
            &[record("A", "B", "victoria", 2.0)],
            UnweightedTransferPolicy::Prune,
        );
        assert_eq!(summary.null_line_edges_removed, 1);
        assert!(g.edge("B", "C", "victoria").is_none());
    }

    #[test]
    fn null_transfers_prune_in_pairs_or_survive_by_policy() {
        let mut g = triangle();
        g.add_edge("A", "C", TRANSFER_KEY, EdgeData::walking_transfer());
        g.add_edge("C", "A", TRANSFER_KEY, EdgeData::walking_transfer());
        let records = [record("A", "B", "victoria", 2.0), record("B", "C", "victoria", 3.0)];

        let mut pruned = g.clone();
        let summary = merge_weights(&mut pruned, &records, UnweightedTransferPolicy::Prune);
        assert_eq!(summary.transfers_pruned, 2);
        assert!(pruned.edge("A", "C", TRANSFER_KEY).is_none());

        let summary = merge_weights(&mut g, &records, UnweightedTransferPolicy::Keep);
        assert_eq!(summary.transfers_pruned, 0);
        assert!(g.edge("A", "C", TRANSFER_KEY).is_some());
    }
}
