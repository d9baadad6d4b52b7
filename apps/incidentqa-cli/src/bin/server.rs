use std::path::PathBuf;

use clap::Parser;

use incidentqa_cli::{init_tracing, load_settings, serve};

#[derive(Debug, Parser)]
#[command(name = "incidentqa-server", rename_all = "kebab")]
struct Args {
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Overrides `server.bind`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (mut settings, _) = load_settings(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }
    init_tracing(&settings);
    serve(settings).await
}
