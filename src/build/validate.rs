//! Stage 7: the gate between weight collection and the final merge. Every
//! check failure is collected into a report; any failure at all stops the
//! pipeline before stage 8 can write an artifact.

use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use serde_json::Value;

use super::CalculatedWeight;
use crate::graph::{TRANSFER_KEY, TransportGraph};

const MAX_DURATION_MINUTES: f64 = 180.0;
const TWIN_WEIGHT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    /// Weight records whose (source, target, line) has no graph edge.
    pub records_without_edges: Vec<String>,
    /// Non-transfer graph edges with no weight record.
    pub edges_without_records: Vec<String>,
    /// (source, target, line) keys appearing in more than one record.
    pub duplicate_records: Vec<String>,
    /// Durations that are non-finite, non-positive, or over the ceiling.
    pub out_of_range: Vec<String>,
    /// Records that failed the schema check.
    pub malformed_records: Vec<String>,
    /// Transfer edges lacking a reverse twin, or twins whose weights
    /// disagree beyond tolerance.
    pub asymmetric_transfers: Vec<String>,
    /// Twin pairs that are both null: not a failure, the merge prunes them.
    pub transfers_scheduled_for_prune: Vec<String>,
}

impl ValidationReport {
    pub fn failure_count(&self) -> usize {
        self.records_without_edges.len()
            + self.edges_without_records.len()
            + self.duplicate_records.len()
            + self.out_of_range.len()
            + self.malformed_records.len()
            + self.asymmetric_transfers.len()
    }

    pub fn passed(&self) -> bool {
        self.failure_count() == 0
    }
}

/// Cross-checks the raw weight records against the graph. Returns the
/// records that parsed cleanly together with the report; the caller halts
/// unless `report.passed()`.
pub fn validate(graph: &TransportGraph, raw_records: &[Value]) -> (Vec<CalculatedWeight>, ValidationReport) {
    let mut report = ValidationReport::default();
    let mut records = Vec::new();

    for (index, raw) in raw_records.iter().enumerate() {
        match serde_json::from_value::<CalculatedWeight>(raw.clone()) {
            Ok(record) => records.push(record),
            Err(e) => report
                .malformed_records
                .push(format!("record {index}: {e} ({raw})")),
        }
    }

    let mut seen: AHashMap<(String, String, String), usize> = AHashMap::new();
    for record in &records {
        let key = (
            record.source.clone(),
            record.target.clone(),
            record.line.clone(),
        );
        *seen.entry(key).or_insert(0) += 1;
    }
    for ((source, target, line), count) in &seen {
        if *count > 1 {
            report.duplicate_records.push(format!(
                "{count} records for {source} -> {target} on {line}"
            ));
        }
    }

    for record in &records {
        let duration = record.duration_minutes;
        if !duration.is_finite() || duration <= 0.0 || duration > MAX_DURATION_MINUTES {
            report.out_of_range.push(format!(
                "{} -> {} on {} has duration_minutes {duration} (allowed: 0 < d <= {MAX_DURATION_MINUTES})",
                record.source, record.target, record.line
            ));
        }
        let matches_edge = graph
            .edge(&record.source, &record.target, &record.line)
            .map(|e| !e.transfer)
            .unwrap_or(false);
        if !matches_edge {
            report.records_without_edges.push(format!(
                "{} -> {} on {} has no matching line edge",
                record.source, record.target, record.line
            ));
        }
    }

    let recorded: AHashSet<(String, String, String)> = records
        .iter()
        .map(|r| (r.source.clone(), r.target.clone(), r.line.clone()))
        .collect();
    let mut missing: Vec<String> = graph
        .edges()
        .filter(|(_, _, _, e)| !e.transfer)
        .filter(|(s, t, _, e)| {
            !recorded.contains(&(s.to_string(), t.to_string(), e.line.clone()))
        })
        .map(|(s, t, _, e)| format!("{s} -> {t} on {} has no weight record", e.line))
        .collect();
    missing.sort();
    report.edges_without_records = missing;

    for (source, target, _, edge) in graph.edges().filter(|(_, _, k, _)| *k == TRANSFER_KEY) {
        let Some(twin) = graph.edge(target, source, TRANSFER_KEY) else {
            report
                .asymmetric_transfers
                .push(format!("transfer {source} -> {target} has no reverse twin"));
            continue;
        };
        match (edge.weight, twin.weight) {
            (Some(a), Some(b)) => {
                if (a - b).abs() > TWIN_WEIGHT_TOLERANCE {
                    // Each unordered pair would otherwise be reported twice.
                    if source < target {
                        report.asymmetric_transfers.push(format!(
                            "transfer {source} <-> {target} weights disagree: {a} vs {b}"
                        ));
                    }
                }
            }
            (None, None) => {
                if source < target {
                    report
                        .transfers_scheduled_for_prune
                        .push(format!("transfer {source} <-> {target} is unmeasured"));
                }
            }
            (Some(_), None) | (None, Some(_)) => {
                if source < target {
                    report.asymmetric_transfers.push(format!(
                        "transfer {source} <-> {target} weighted in one direction only"
                    ));
                }
            }
        }
    }

    report.records_without_edges.sort();
    report.duplicate_records.sort();
    report.out_of_range.sort();
    report.asymmetric_transfers.sort();
    report.transfers_scheduled_for_prune.sort();

    (records, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{bare_hub, line_edge};
    use crate::graph::{EdgeData, Mode};
    use serde_json::json;

    fn record(source: &str, target: &str, line: &str, minutes: f64) -> Value {
        json!({
            "source": source,
            "target": target,
            "line": line,
            "mode": "tube",
            "duration_minutes": minutes,
            "calculated_timestamp": "2025-05-10T11:00:00Z"
        })
    }

    fn weighted_pair_graph() -> TransportGraph {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("A", "A", 51.5, -0.1));
        g.insert_hub(bare_hub("B", "B", 51.51, -0.11));
        g.add_edge("A", "B", "victoria", line_edge("victoria", Mode::Tube, None));
        g
    }

    #[test]
    fn clean_input_passes() {
        let g = weighted_pair_graph();
        let (records, report) = validate(&g, &[record("A", "B", "victoria", 2.5)]);
        assert!(report.passed(), "unexpected failures: {report:?}");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn out_of_range_duration_names_the_record_and_fails() {
        let g = weighted_pair_graph();
        let (_, report) = validate(&g, &[record("A", "B", "victoria", 250.0)]);
        assert!(!report.passed());
        assert!(report.out_of_range[0].contains("250"));
        assert!(report.out_of_range[0].contains("A -> B"));
    }

    #[test]
    fn records_and_edges_must_match_one_to_one() {
        let g = weighted_pair_graph();
        // A record for an edge that does not exist, and none for one that does.
        let (_, report) = validate(&g, &[record("B", "A", "victoria", 2.0)]);
        assert_eq!(report.records_without_edges.len(), 1);
        assert_eq!(report.edges_without_records.len(), 1);
        assert!(!report.passed());
    }

    #[test]
    fn duplicate_records_fail() {
        let g = weighted_pair_graph();
        let (_, report) = validate(
            &g,
            &[
                record("A", "B", "victoria", 2.0),
                record("A", "B", "victoria", 2.1),
            ],
        );
        assert_eq!(report.duplicate_records.len(), 1);
    }

    #[test]
    fn schema_violations_are_malformed_not_panics() {
        let g = weighted_pair_graph();
        let bad = json!({"source": "A", "target": "B", "line": "victoria",
                         "mode": "tube", "duration_minutes": "fast"});
        let (_, report) = validate(&g, &[record("A", "B", "victoria", 2.0), bad]);
        assert_eq!(report.malformed_records.len(), 1);
    }

    #[test]
    fn transfer_twins_must_exist_and_agree() {
        let mut g = weighted_pair_graph();
        let _ = g.remove_edge("A", "B", "victoria");
        let mut forward = EdgeData::walking_transfer();
        forward.weight = Some(3.0);
        let mut reverse = EdgeData::walking_transfer();
        reverse.weight = Some(6.0);
        g.add_edge("A", "B", TRANSFER_KEY, forward);
        g.add_edge("B", "A", TRANSFER_KEY, reverse);

        let (_, report) = validate(&g, &[]);
        assert_eq!(report.asymmetric_transfers.len(), 1);
    }

    #[test]
    fn unmeasured_twin_pairs_are_scheduled_not_failed() {
        let mut g = weighted_pair_graph();
        let _ = g.remove_edge("A", "B", "victoria");
        g.add_edge("A", "B", TRANSFER_KEY, EdgeData::walking_transfer());
        g.add_edge("B", "A", TRANSFER_KEY, EdgeData::walking_transfer());

        let (_, report) = validate(&g, &[]);
        assert!(report.passed());
        assert_eq!(report.transfers_scheduled_for_prune.len(), 1);
    }
}
