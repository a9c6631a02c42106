//! The offline pipeline: eight strictly ordered stages from raw provider
//! payloads to the final weighted graph artifact. Each stage checkpoints
//! to disk, every write is atomic, and the validation gate stands between
//! weight collection and the merge.

pub mod corrections;
pub mod hub_graph;
pub mod journey_weights;
pub mod line_weights;
pub mod merge;
pub mod proximity;
pub mod timetables;
pub mod transfer_weights;
pub mod validate;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::BuildError;
use crate::graph::{Mode, TransportGraph};
use crate::lines::TERMINAL_STATIONS;
use crate::tfl::cache::atomic_write_json;
use crate::tfl::{CancelFlag, TflClient};

/// One consolidated line-weight record, as stored in
/// `calculated_weights.json` (stages 5 and 6 both append here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedWeight {
    pub source: String,
    pub target: String,
    pub line: String,
    pub mode: Mode,
    pub duration_minutes: f64,
    pub calculated_timestamp: String,
}

/// Skip-and-count bookkeeping for per-record failures. A stage that sees
/// more than 1% of its records malformed halts rather than shipping a
/// silently thinner artifact.
pub struct MalformedCounter {
    stage: &'static str,
    seen: usize,
    malformed: usize,
}

impl MalformedCounter {
    pub fn new(stage: &'static str) -> MalformedCounter {
        MalformedCounter {
            stage,
            seen: 0,
            malformed: 0,
        }
    }

    pub fn seen(&mut self) {
        self.seen += 1;
    }

    pub fn record(&mut self, message: impl FnOnce() -> String) {
        self.malformed += 1;
        log::warn!("[{}] malformed record: {}", self.stage, message());
    }

    pub fn check(&self) -> Result<(), BuildError> {
        if self.seen > 0 && self.malformed * 100 > self.seen {
            return Err(BuildError::MalformedRateExceeded {
                stage: self.stage,
                malformed: self.malformed,
                seen: self.seen,
            });
        }
        Ok(())
    }
}

/// Where each pipeline artifact lives under the data directory.
pub struct ArtifactPaths {
    pub data_dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> ArtifactPaths {
        ArtifactPaths {
            data_dir: data_dir.into(),
        }
    }

    pub fn stage1_graph(&self) -> PathBuf {
        self.data_dir.join("stage1_hub_graph.json")
    }

    pub fn stage2_graph(&self) -> PathBuf {
        self.data_dir.join("stage2_graph_with_transfers.json")
    }

    pub fn transfer_pairs(&self) -> PathBuf {
        self.data_dir.join("transfer_pairs.json")
    }

    pub fn stage3_graph(&self) -> PathBuf {
        self.data_dir.join("stage3_graph_transfer_weights.json")
    }

    pub fn calculated_weights(&self) -> PathBuf {
        self.data_dir.join("calculated_weights.json")
    }

    pub fn terminal_hubs(&self) -> PathBuf {
        self.data_dir.join("terminal_hubs.json")
    }

    pub fn validation_report(&self) -> PathBuf {
        self.data_dir.join("validation_report.json")
    }

    pub fn final_graph(&self) -> PathBuf {
        self.data_dir.join("final_graph.json")
    }
}

#[derive(Debug)]
pub struct BuildSummary {
    pub hubs: usize,
    pub edges: usize,
    pub transfer_pairs: usize,
    pub weight_records: usize,
    pub final_graph: PathBuf,
}

/// station naptan id -> hub id, reconstructed from constituent lists so
/// later stages can run from artifacts alone.
pub fn station_to_hub_map(graph: &TransportGraph) -> AHashMap<String, String> {
    let mut map = AHashMap::new();
    for hub in graph.hubs() {
        for station in &hub.constituent_stations {
            map.insert(station.naptan_id.clone(), hub.id.clone());
        }
        map.insert(hub.primary_naptan_id.clone(), hub.id.clone());
    }
    map
}

async fn save_graph(graph: &TransportGraph, path: &Path) -> Result<(), BuildError> {
    atomic_write_json(path, &graph.to_node_link())
        .await
        .map_err(|e| BuildError::io(path, e))
}

fn ensure_live(cancel: &CancelFlag, stage: &'static str) -> Result<(), BuildError> {
    if cancel.is_cancelled() {
        Err(BuildError::Cancelled { stage })
    } else {
        Ok(())
    }
}

/// Runs stages 1-8. Refuses to leave a partial `final_graph.json` behind:
/// the final artifact is only written after the gate passes and the merge
/// completes.
pub async fn run_build(config: &Config, cancel: CancelFlag) -> Result<BuildSummary, BuildError> {
    let client = TflClient::new(config, cancel.clone()).map_err(|source| BuildError::Provider {
        stage: "init",
        source,
    })?;
    let paths = ArtifactPaths::new(&config.data_dir);

    // Stage 1: base hub graph.
    ensure_live(&cancel, "base-hub-graph")?;
    log::info!("stage 1/8: base hub graph");
    let sequences = hub_graph::fetch_line_sequences(&client, config.concurrency_sequence).await?;
    let mut built = hub_graph::build_hub_graph(&sequences)?;
    let applied = corrections::apply_corrections(&mut built.graph, &built.station_to_hub);
    log::info!("applied {applied} data correction(s)");
    save_graph(&built.graph, &paths.stage1_graph()).await?;
    let mut graph = built.graph;

    // Stage 2: proximity transfers.
    ensure_live(&cancel, "proximity-transfers")?;
    log::info!("stage 2/8: proximity transfers");
    let pairs = proximity::run_proximity_stage(
        &client,
        &mut graph,
        config.proximity_radius_m,
        config.concurrency_stoppoint,
    )
    .await?;
    save_graph(&graph, &paths.stage2_graph()).await?;
    atomic_write_json(&paths.transfer_pairs(), &pairs)
        .await
        .map_err(|e| BuildError::io(paths.transfer_pairs(), e))?;

    // Stage 3: transfer weights.
    ensure_live(&cancel, "transfer-weights")?;
    log::info!("stage 3/8: transfer weights");
    transfer_weights::run_transfer_weight_stage(
        &client,
        &mut graph,
        &pairs,
        config.concurrency_journey,
    )
    .await?;
    save_graph(&graph, &paths.stage3_graph()).await?;

    // Stage 4: timetable fetch.
    ensure_live(&cancel, "timetable-fetch")?;
    log::info!("stage 4/8: timetable fetch");
    timetables::run_timetable_stage(&client, &config.data_dir).await?;

    // Stage 5: tube/DLR line weights from timetables (+ fallback pairs).
    ensure_live(&cancel, "line-weights")?;
    log::info!("stage 5/8: tube/DLR line weights");
    let station_to_hub = station_to_hub_map(&graph);
    let caches = timetables::load_timetable_caches(&config.data_dir)?;
    let mut records = line_weights::calculate_timetable_weights(&caches, &graph, &station_to_hub)?;
    let covered: AHashSet<(String, String, String)> = records
        .iter()
        .map(|r| (r.line.clone(), r.source.clone(), r.target.clone()))
        .collect();
    records.extend(
        line_weights::run_fallback_weights(&client, &graph, &station_to_hub, &covered).await?,
    );
    atomic_write_json(&paths.calculated_weights(), &records)
        .await
        .map_err(|e| BuildError::io(paths.calculated_weights(), e))?;

    // Stage 6: journey-derived weights for the remaining modes.
    ensure_live(&cancel, "journey-weights")?;
    log::info!("stage 6/8: overground/suburban line weights");
    let covered: AHashSet<(String, String, String)> = records
        .iter()
        .map(|r| (r.line.clone(), r.source.clone(), r.target.clone()))
        .collect();
    records.extend(
        journey_weights::run_journey_weight_stage(
            &client,
            &graph,
            &covered,
            config.concurrency_journey,
        )
        .await?,
    );
    atomic_write_json(&paths.calculated_weights(), &records)
        .await
        .map_err(|e| BuildError::io(paths.calculated_weights(), e))?;

    // Stage 7: validation gate, run against the artifact as written.
    ensure_live(&cancel, "validation-gate")?;
    log::info!("stage 7/8: validation gate");
    let raw = std::fs::read_to_string(paths.calculated_weights())
        .map_err(|e| BuildError::io(paths.calculated_weights(), e))?;
    let raw_records: Vec<serde_json::Value> =
        serde_json::from_str(&raw).map_err(|e| BuildError::Artifact {
            path: paths.calculated_weights(),
            detail: e.to_string(),
        })?;
    let (gated_records, report) = validate::validate(&graph, &raw_records);
    if !report.passed() {
        atomic_write_json(&paths.validation_report(), &report)
            .await
            .map_err(|e| BuildError::io(paths.validation_report(), e))?;
        log::error!(
            "validation gate failed with {} finding(s); report written to {}",
            report.failure_count(),
            paths.validation_report().display()
        );
        return Err(BuildError::ValidationFailed {
            failures: report.failure_count(),
            report_path: paths.validation_report(),
        });
    }

    // Stage 8: merge and emit.
    ensure_live(&cancel, "graph-merge")?;
    log::info!("stage 8/8: graph merge");
    merge::merge_weights(&mut graph, &gated_records, config.unweighted_transfer_policy);
    save_graph(&graph, &paths.final_graph()).await?;

    let terminal_hubs: BTreeMap<&str, Vec<&str>> = TERMINAL_STATIONS
        .iter()
        .map(|(line, stations)| (*line, stations.to_vec()))
        .collect();
    atomic_write_json(&paths.terminal_hubs(), &terminal_hubs)
        .await
        .map_err(|e| BuildError::io(paths.terminal_hubs(), e))?;

    Ok(BuildSummary {
        hubs: graph.node_count(),
        edges: graph.edge_count(),
        transfer_pairs: pairs.len(),
        weight_records: gated_records.len(),
        final_graph: paths.final_graph(),
    })
}
