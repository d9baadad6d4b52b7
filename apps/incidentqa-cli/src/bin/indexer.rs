use std::path::PathBuf;

use clap::Parser;

use incidentqa_cli::{init_tracing, load_settings};
use incidentqa_core::data_processor::DataProcessor;
use incidentqa_embed::encoder_from_settings;
use incidentqa_hybrid::store::write_artifacts;

/// Compile incident records into the index artifacts read by the server.
#[derive(Debug, Parser)]
#[command(name = "incidentqa-indexer", rename_all = "kebab")]
struct Args {
    /// Directory of `*.jsonl` incident records (defaults to `data.incidents_dir`).
    data_dir: Option<PathBuf>,
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Output directory (defaults to `data.index_dir`).
    #[arg(long, short = 'o')]
    out: Option<PathBuf>,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (settings, _) = load_settings(args.config.as_deref())?;
    init_tracing(&settings);

    let data_dir = args.data_dir.unwrap_or_else(|| PathBuf::from(&settings.data.incidents_dir));
    let out_dir = args.out.unwrap_or_else(|| PathBuf::from(&settings.data.index_dir));
    println!("Incident indexer\n================");
    println!("Data directory: {}", data_dir.display());
    println!("Index directory: {}", out_dir.display());

    let incidents = DataProcessor::new().process_directory(&data_dir)?;
    if incidents.is_empty() {
        anyhow::bail!("no valid incidents found under {}", data_dir.display());
    }
    let embedder = encoder_from_settings(&settings.embed)?;
    write_artifacts(&out_dir, &incidents, embedder.as_ref(), args.batch_size.max(1))?;

    println!("\n✅ Indexed {} incidents with {}", incidents.len(), embedder.model_id());
    println!("💡 To query, use: incidentqa search '<question>'");
    Ok(())
}
