//! Stage 6: weight the overground / suburban-rail / Elizabeth line edges,
//! which have no usable terminal timetables, by asking the journey planner
//! for direct rides over each edge in both directions independently.

use ahash::AHashSet;
use futures::StreamExt;

use super::CalculatedWeight;
use crate::error::BuildError;
use crate::graph::{Mode, TransportGraph};
use crate::tfl::TflClient;

const MIN_JOURNEY_MINUTES: f64 = 1.0;

/// Mean after dropping outliers: observations whose deviation from the
/// median exceeds twice the median absolute deviation are discarded.
/// The result is clamped to ≥ 1.0 and rounded to one decimal.
pub fn mad_filtered_mean(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let median = median_of_sorted(&sorted);
    let mut deviations: Vec<f64> = sorted.iter().map(|v| (v - median).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    let mad = median_of_sorted(&deviations);
    let kept: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|v| (v - median).abs() <= 2.0 * mad)
        .collect();
    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    Some(((mean.max(MIN_JOURNEY_MINUTES)) * 10.0).round() / 10.0)
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Directed edges stage 6 is responsible for: journey-weighted modes,
/// non-transfer, and not already covered by an earlier record.
pub fn journey_weight_targets(
    graph: &TransportGraph,
    covered: &AHashSet<(String, String, String)>,
) -> Vec<(String, String, String, Mode)> {
    let mut targets: Vec<_> = graph
        .edges()
        .filter(|(_, _, _, e)| !e.transfer && e.mode.uses_journey_weights())
        .map(|(s, t, _, e)| (s.to_string(), t.to_string(), e.line.clone(), e.mode))
        .filter(|(s, t, line, _)| !covered.contains(&(line.clone(), s.to_string(), t.to_string())))
        .collect();
    targets.sort();
    targets.dedup();
    targets
}

pub async fn run_journey_weight_stage(
    client: &TflClient,
    graph: &TransportGraph,
    covered: &AHashSet<(String, String, String)>,
    concurrency: usize,
) -> Result<Vec<CalculatedWeight>, BuildError> {
    let targets = journey_weight_targets(graph, covered);
    log::info!("journey weights: {} directed edge(s) to measure", targets.len());

    let fetched = futures::stream::iter(targets.into_iter().map(|(from, to, line, mode)| {
        let from_primary = graph
            .hub(&from)
            .map(|h| h.primary_naptan_id.clone())
            .unwrap_or_else(|| from.clone());
        let to_primary = graph
            .hub(&to)
            .map(|h| h.primary_naptan_id.clone())
            .unwrap_or_else(|| to.clone());
        async move {
            let minutes = client
                .direct_line_minutes(&from_primary, &to_primary, &line, mode)
                .await;
            (from, to, line, mode, minutes)
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .collect::<Vec<_>>()
    .await;

    let mut records = Vec::new();
    let mut gaps = 0usize;
    for (from, to, line, mode, minutes) in fetched {
        let minutes = match minutes {
            Ok(minutes) => minutes,
            Err(e) if e.is_fatal() => {
                return Err(BuildError::Provider {
                    stage: "journey-weights",
                    source: e,
                });
            }
            Err(e) => {
                log::warn!("journey weighting failed for {line} {from} -> {to}: {e}");
                gaps += 1;
                continue;
            }
        };
        let durations: Vec<f64> = minutes.into_iter().map(f64::from).collect();
        match mad_filtered_mean(&durations) {
            Some(mean) => records.push(CalculatedWeight {
                source: from,
                target: to,
                line,
                mode,
                duration_minutes: mean,
                calculated_timestamp: chrono::Utc::now().to_rfc3339(),
            }),
            None => {
                log::warn!("no direct {line} journey for {from} -> {to}; recorded as a gap");
                gaps += 1;
            }
        }
    }
    records.sort_by(|a, b| {
        (&a.line, &a.source, &a.target).cmp(&(&b.line, &b.source, &b.target))
    });
    log::info!("journey weights: {} record(s), {gaps} gap(s)", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{bare_hub, line_edge};

    #[test]
    fn outliers_beyond_twice_the_mad_are_dropped() {
        // median 10.5, MAD 1.0 -> 45 deviates by 34.5 and is dropped.
        assert_eq!(mad_filtered_mean(&[9.0, 10.0, 11.0, 45.0]), Some(10.0));
    }

    #[test]
    fn agreeing_values_average_directly() {
        assert_eq!(mad_filtered_mean(&[7.0, 8.0]), Some(7.5));
        assert_eq!(mad_filtered_mean(&[4.0]), Some(4.0));
        assert_eq!(mad_filtered_mean(&[]), None);
    }

    #[test]
    fn short_hops_clamp_to_one_minute() {
        assert_eq!(mad_filtered_mean(&[0.4, 0.6]), Some(1.0));
    }

    #[test]
    fn targets_cover_both_directions_and_skip_covered_edges() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("A", "A", 51.5, -0.1));
        g.insert_hub(bare_hub("B", "B", 51.51, -0.11));
        g.add_edge("A", "B", "mildmay", line_edge("mildmay", Mode::Overground, None));
        g.add_edge("B", "A", "mildmay", line_edge("mildmay", Mode::Overground, None));
        g.add_edge("A", "B", "victoria", line_edge("victoria", Mode::Tube, None));

        let mut covered = AHashSet::new();
        covered.insert(("mildmay".to_string(), "B".to_string(), "A".to_string()));
        let targets = journey_weight_targets(&g, &covered);
        // Tube edge belongs to stage 5; the covered direction is skipped.
        assert_eq!(
            targets,
            vec![(
                "A".to_string(),
                "B".to_string(),
                "mildmay".to_string(),
                Mode::Overground
            )]
        );
    }
}
