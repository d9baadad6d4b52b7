use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use incidentqa_agent::AskRequest;
use incidentqa_cli::state::AppState;
use incidentqa_cli::{init_tracing, load_settings};
use incidentqa_core::snippet::clip;
use incidentqa_core::types::{SearchFilters, SearchRequest};

#[derive(Debug, Parser)]
#[command(name = "incidentqa", rename_all = "kebab")]
struct Cli {
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Hybrid search without synthesis.
    Search {
        query: String,
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        #[arg(long)]
        product: Option<String>,
        /// Only incidents dated on or after this day (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,
        /// Print the raw response as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Full routing, retrieval and synthesis turn.
    Ask {
        query: String,
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        #[arg(long)]
        product: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Index and counter summary.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (settings, _) = load_settings(cli.config.as_deref())?;
    init_tracing(&settings);
    let state = AppState::from_settings(&settings)?;
    let orchestrator = state.orchestrator;

    match cli.command {
        Command::Search { query, top_k, product, since, json } => {
            let mut request = SearchRequest::new(query, top_k.unwrap_or(settings.retrieval.default_top_k));
            request.filters = SearchFilters { product, since: since.as_deref().map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d")).transpose()?, ..Default::default() };
            let response = orchestrator.search(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }
            println!("🔍 {} results (embed={}, tfidf={})", response.results.len(), response.index_meta.embed_model, response.index_meta.tfidf_version);
            for (i, r) in response.results.iter().enumerate() {
                println!("\n  {}. {}  score={:.4}  source={}", i + 1, r.incident_id, r.fused_score, r.source);
                println!("     Problem: {}", clip(&r.desc, 160));
                println!("     Fix:     {}", clip(&r.resolution, 160));
            }
            for notice in &response.notices {
                println!("\n⚠️  {}", serde_json::to_string(notice)?);
            }
        }
        Command::Ask { query, top_k, product, json } => {
            let mut request = AskRequest::new(query);
            request.top_k = top_k;
            request.filters.product = product;
            let response = orchestrator.ask(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }
            println!("{}\n", response.answer);
            for applied in &response.applied_incidents {
                println!("  • {}: {}", applied.incident_id, applied.why);
            }
            for followup in &response.followups {
                println!("  ? {followup}");
            }
            if response.degraded {
                println!("\n⚠️  degraded: {}", serde_json::to_string(&response.notices)?);
            }
        }
        Command::Health => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.health())?);
        }
    }
    Ok(())
}
