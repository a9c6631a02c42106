//! Stage 4: pull raw timetables for every tube/DLR line from each of its
//! terminals and cache them per line. Processing happens in stage 5; this
//! stage only fills the cache so reruns are cheap and offline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, ProviderError};
use crate::lines::TERMINAL_STATIONS;
use crate::tfl::TflClient;
use crate::tfl::cache::atomic_write_json;

/// One line's cached timetable payloads, keyed by the terminal they were
/// fetched from. `None` records a fetch that the provider refused, so a
/// warm rerun does not mistake it for a gap in the terminal list.
#[derive(Debug, Serialize, Deserialize)]
pub struct LineTimetableCache {
    pub line_id: String,
    pub fetched_at: String,
    pub timetables: BTreeMap<String, Option<Value>>,
}

pub fn timetable_cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("timetable_cache")
}

pub fn timetable_cache_path(data_dir: &Path, line_id: &str) -> PathBuf {
    timetable_cache_dir(data_dir).join(format!("{line_id}.json"))
}

pub async fn run_timetable_stage(client: &TflClient, data_dir: &Path) -> Result<(), BuildError> {
    for (line_id, terminals) in TERMINAL_STATIONS {
        let mut cache = LineTimetableCache {
            line_id: line_id.to_string(),
            fetched_at: chrono::Utc::now().to_rfc3339(),
            timetables: BTreeMap::new(),
        };
        for terminal in *terminals {
            match client.timetable_json(line_id, terminal).await {
                Ok(body) => {
                    cache.timetables.insert(terminal.to_string(), Some(body));
                }
                Err(e) if e.is_fatal() => {
                    return Err(BuildError::Provider {
                        stage: "timetable-fetch",
                        source: e,
                    });
                }
                Err(ProviderError::NotFound { .. }) => {
                    log::warn!("{terminal} is not a timetable root for {line_id}");
                    cache.timetables.insert(terminal.to_string(), None);
                }
                Err(e) => {
                    log::warn!("timetable fetch failed for {line_id} from {terminal}: {e}");
                    cache.timetables.insert(terminal.to_string(), None);
                }
            }
        }
        let path = timetable_cache_path(data_dir, line_id);
        atomic_write_json(&path, &cache)
            .await
            .map_err(|e| BuildError::io(&path, e))?;
        log::info!(
            "cached {} timetable payload(s) for {line_id}",
            cache.timetables.values().filter(|v| v.is_some()).count()
        );
    }
    Ok(())
}

pub fn load_timetable_caches(data_dir: &Path) -> Result<Vec<LineTimetableCache>, BuildError> {
    let mut caches = Vec::new();
    for (line_id, _) in TERMINAL_STATIONS {
        let path = timetable_cache_path(data_dir, line_id);
        let raw = std::fs::read_to_string(&path).map_err(|e| BuildError::io(&path, e))?;
        let cache: LineTimetableCache =
            serde_json::from_str(&raw).map_err(|e| BuildError::Artifact {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        caches.push(cache);
    }
    Ok(caches)
}
