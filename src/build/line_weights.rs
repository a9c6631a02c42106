//! Stage 5: turn cached tube/DLR timetables into per-edge durations.
//! Arrival offsets are walked per branch, translated to hub pairs, and
//! averaged per (line, from, to). A short allow-list of segments the
//! timetables never cover is weighted via the journey endpoint instead.

use ahash::{AHashMap, AHashSet};

use super::timetables::LineTimetableCache;
use super::{CalculatedWeight, MalformedCounter};
use crate::error::BuildError;
use crate::graph::TransportGraph;
use crate::lines::{TIMETABLE_FALLBACK_PAIRS, line_mode};
use crate::tfl::TflClient;
use crate::tfl::models::TimetableResponse;

pub const SPREAD_WARN_MINUTES: f64 = 2.0;
const MIN_SEGMENT_MINUTES: f64 = 0.1;

/// (line, from hub, to hub) -> observed durations.
pub type DurationBag = AHashMap<(String, String, String), Vec<f64>>;

/// Averages one edge's observations: non-positive values are dropped, the
/// survivors clamped to ≥ 0.1, and the mean rounded to one decimal.
pub fn reduce_durations(durations: &[f64]) -> Option<f64> {
    let kept: Vec<f64> = durations
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.max(MIN_SEGMENT_MINUTES))
        .collect();
    if kept.is_empty() {
        return None;
    }
    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    Some((mean * 10.0).round() / 10.0)
}

/// The (min, max) of the kept observations when they disagree by more
/// than the warning threshold.
pub fn duration_spread(durations: &[f64]) -> Option<(f64, f64)> {
    let kept: Vec<f64> = durations
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 0.0)
        .collect();
    let min = kept.iter().copied().fold(f64::INFINITY, f64::min);
    let max = kept.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (kept.len() > 1 && max - min > SPREAD_WARN_MINUTES).then_some((min, max))
}

/// Walks one timetable fetch into directional hub segments.
///
/// Offsets count from the departure terminal; a segment is recorded when
/// the walk crosses from one hub into another, measured since the last
/// hub boundary. Stations missing from the hub graph advance the clock
/// without closing a segment, mirroring how through-running services pass
/// stops the network model does not carry. Only segments the graph knows
/// as a `line`-keyed edge are kept.
pub fn timetable_hub_segments(
    body: &TimetableResponse,
    departure_stop_id: &str,
    line_id: &str,
    station_to_hub: &AHashMap<String, String>,
    graph: &TransportGraph,
    malformed: &mut MalformedCounter,
) -> Vec<((String, String), f64)> {
    let mut segments = Vec::new();
    let Some(timetable) = &body.timetable else {
        return segments;
    };
    for route in &timetable.routes {
        for group in &route.station_intervals {
            let Some(mut last_hub) = station_to_hub.get(departure_stop_id).cloned() else {
                continue;
            };
            let mut last_offset = 0.0_f64;
            for interval in &group.intervals {
                malformed.seen();
                let (Some(stop_id), Some(offset)) =
                    (interval.stop_id.as_deref(), interval.time_to_arrival)
                else {
                    malformed.record(|| {
                        format!("interval without stop id or offset on line {line_id}")
                    });
                    break;
                };
                if !offset.is_finite() {
                    malformed
                        .record(|| format!("non-finite arrival offset on line {line_id}"));
                    break;
                }
                match station_to_hub.get(stop_id) {
                    None => {
                        // Outside the hub graph: the clock moves on.
                        last_offset = offset;
                    }
                    Some(hub) if *hub == last_hub => {
                        last_offset = offset;
                    }
                    Some(hub) => {
                        let duration = offset - last_offset;
                        if graph.edge(&last_hub, hub, line_id).is_some() {
                            segments.push(((last_hub.clone(), hub.clone()), duration));
                        }
                        last_hub = hub.clone();
                        last_offset = offset;
                    }
                }
            }
        }
    }
    segments
}

/// Pure stage-5 core over the loaded per-line caches.
pub fn calculate_timetable_weights(
    caches: &[LineTimetableCache],
    graph: &TransportGraph,
    station_to_hub: &AHashMap<String, String>,
) -> Result<Vec<CalculatedWeight>, BuildError> {
    let mut bag: DurationBag = AHashMap::new();
    let mut malformed = MalformedCounter::new("line-weights");

    for cache in caches {
        for (terminal, body) in &cache.timetables {
            let Some(body) = body else { continue };
            let parsed: TimetableResponse = match serde_json::from_value(body.clone()) {
                Ok(parsed) => {
                    malformed.seen();
                    parsed
                }
                Err(e) => {
                    malformed.seen();
                    malformed.record(|| {
                        format!("unparseable timetable for {} from {terminal}: {e}", cache.line_id)
                    });
                    continue;
                }
            };
            for ((from, to), duration) in timetable_hub_segments(
                &parsed,
                terminal,
                &cache.line_id,
                station_to_hub,
                graph,
                &mut malformed,
            ) {
                bag.entry((cache.line_id.clone(), from, to))
                    .or_default()
                    .push(duration);
            }
        }
    }
    malformed.check()?;

    let mut records = Vec::new();
    let mut keys: Vec<_> = bag.keys().cloned().collect();
    keys.sort();
    for key in keys {
        let (line, from, to) = &key;
        let durations = &bag[&key];
        let Some(mean) = reduce_durations(durations) else {
            log::warn!("no usable duration for {line}: {from} -> {to}");
            continue;
        };
        if let Some((min, max)) = duration_spread(durations) {
            log::warn!(
                "timetable spread for {line} {from} -> {to}: {min:.1}..{max:.1}, keeping mean {mean:.1}"
            );
        }
        records.push(CalculatedWeight {
            source: from.clone(),
            target: to.clone(),
            line: line.clone(),
            mode: line_mode(line).expect("cached lines come from the catalogue"),
            duration_minutes: mean,
            calculated_timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }
    log::info!("timetable weights: {} edge record(s)", records.len());
    Ok(records)
}

/// Weights the allow-listed edges that timetables structurally miss.
/// `covered` holds the (line, from, to) keys stage 5 already produced.
pub async fn run_fallback_weights(
    client: &TflClient,
    graph: &TransportGraph,
    station_to_hub: &AHashMap<String, String>,
    covered: &AHashSet<(String, String, String)>,
) -> Result<Vec<CalculatedWeight>, BuildError> {
    let mut records = Vec::new();
    for (line, station_a, station_b) in TIMETABLE_FALLBACK_PAIRS {
        let (Some(hub_a), Some(hub_b)) =
            (station_to_hub.get(*station_a), station_to_hub.get(*station_b))
        else {
            log::warn!("fallback pair ({station_a}, {station_b}) not in the hub graph");
            continue;
        };
        let mode = line_mode(line).expect("fallback lines come from the catalogue");
        let legs = [
            (hub_a.clone(), hub_b.clone(), *station_a, *station_b),
            (hub_b.clone(), hub_a.clone(), *station_b, *station_a),
        ];
        for (from_hub, to_hub, from_station, to_station) in legs {
            let key = (line.to_string(), from_hub.clone(), to_hub.clone());
            if covered.contains(&key) || graph.edge(&from_hub, &to_hub, line).is_none() {
                continue;
            }
            let minutes = match client
                .direct_line_minutes(from_station, to_station, line, mode)
                .await
            {
                Ok(minutes) => minutes,
                Err(e) if e.is_fatal() => {
                    return Err(BuildError::Provider {
                        stage: "line-weights",
                        source: e,
                    });
                }
                Err(e) => {
                    log::warn!("fallback journey failed for {line} {from_hub} -> {to_hub}: {e}");
                    continue;
                }
            };
            let durations: Vec<f64> = minutes.into_iter().map(f64::from).collect();
            match reduce_durations(&durations) {
                Some(mean) => records.push(CalculatedWeight {
                    source: from_hub,
                    target: to_hub,
                    line: line.to_string(),
                    mode,
                    duration_minutes: mean,
                    calculated_timestamp: chrono::Utc::now().to_rfc3339(),
                }),
                None => {
                    log::warn!("fallback yielded no journeys for {line} {from_hub} -> {to_hub}")
                }
            }
        }
    }
    Ok(records)
}
