use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rendezvous::build;
use rendezvous::config::Config;
use rendezvous::graph::TransportGraph;
use rendezvous::query::{self, UserStart};
use rendezvous::tfl::{CancelFlag, TflClient};

#[derive(Parser, Debug)]
#[command(author, version, about = "Find the fairest transit meeting point in London")]
struct Args {
    /// Path to a JSON config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Provider API token; overrides TFL_API_KEY and the config file.
    #[arg(long)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the eight-stage graph build and write final_graph.json.
    Build,
    /// Rank meeting points for a group of starts.
    Query {
        /// A participant as "Hub Name=walk_minutes"; repeat per person.
        #[arg(long = "start", required = true, num_args = 1..)]
        starts: Vec<String>,

        /// Graph artifact to query; defaults to <data_dir>/final_graph.json.
        #[arg(long)]
        graph: Option<PathBuf>,
    },
}

fn parse_start(raw: &str) -> Result<(String, f64)> {
    let (name, walk) = raw
        .rsplit_once('=')
        .with_context(|| format!("expected \"Hub Name=walk_minutes\", got {raw:?}"))?;
    let minutes: f64 = walk
        .trim()
        .parse()
        .with_context(|| format!("bad walk minutes in {raw:?}"))?;
    anyhow::ensure!(minutes >= 0.0, "walk minutes must be non-negative in {raw:?}");
    Ok((name.trim().to_string(), minutes))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = Config::load(args.config.as_deref(), args.api_key.as_deref())?;

    match args.command {
        Command::Build => {
            config.require_token()?;
            let cancel = CancelFlag::new();
            let ctrl_c_flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("interrupt received: finishing in-flight calls, then stopping");
                    ctrl_c_flag.cancel();
                }
            });

            let summary = build::run_build(&config, cancel).await?;
            println!(
                "Built {} hubs / {} edges ({} transfer pairs, {} weight records)",
                summary.hubs, summary.edges, summary.transfer_pairs, summary.weight_records
            );
            println!("Final graph: {}", summary.final_graph.display());
        }
        Command::Query { starts, graph } => {
            config.require_token()?;
            let graph_path = graph.unwrap_or_else(|| config.data_dir.join("final_graph.json"));
            let graph = TransportGraph::load(&graph_path)
                .with_context(|| format!("run `rendezvous build` first? ({})", graph_path.display()))?;

            let mut users = Vec::new();
            for raw in &starts {
                let (name, walk_minutes) = parse_start(raw)?;
                let hub = query::resolve_hub_by_name(&graph, &name)
                    .with_context(|| format!("no hub named {name:?} in the graph"))?;
                users.push(UserStart::at_hub(hub, walk_minutes));
            }

            let client = TflClient::new(&config, CancelFlag::new())
                .map_err(|e| anyhow::anyhow!("client init failed: {e}"))?;
            let outcome = query::find_meeting_point(&client, &graph, &users, &config)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;

            println!(
                "Considered {} hubs, {} reachable by everyone.\n",
                outcome.candidates_considered, outcome.candidates_estimated
            );
            print_candidate("Best meeting point", &outcome.best);
            for (i, alternative) in outcome.alternatives.iter().enumerate() {
                print_candidate(&format!("Alternative {}", i + 1), alternative);
            }
        }
    }
    Ok(())
}

fn print_candidate(label: &str, candidate: &rendezvous::query::refine::RefinedCandidate) {
    println!(
        "{label}: {} (total {:.0} min, average {:.1} min)",
        candidate.name, candidate.total_minutes, candidate.avg_minutes
    );
    for (i, minutes) in candidate.per_user_minutes.iter().enumerate() {
        println!("    person {}: {:.0} min door to door", i + 1, minutes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_arguments_parse_name_and_walk() {
        let (name, walk) = parse_start("Canary Wharf=12").unwrap();
        assert_eq!(name, "Canary Wharf");
        assert_eq!(walk, 12.0);
        // Names may contain '='-free punctuation and spaces.
        let (name, _) = parse_start("King's Cross St. Pancras=4.5").unwrap();
        assert_eq!(name, "King's Cross St. Pancras");
        assert!(parse_start("no-walk-time").is_err());
        assert!(parse_start("Bank=-3").is_err());
    }
}
