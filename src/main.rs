use clap::Parser;
use combo_watch_lib::config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "combo-watch", version, about = "Live gauge and combo tracker for the Wakfu chat log")]
struct Cli {
    /// TOML configuration file (missing = defaults)
    #[arg(long, default_value = "combo-watch.toml")]
    config: PathBuf,

    /// Log file to tail, overrides `log_path`
    #[arg(long)]
    log: Option<PathBuf>,

    /// Combo definitions (JSON), overrides `definitions_path`
    #[arg(long)]
    definitions: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load_or_default(&cli.config)?;
    if let Some(log) = cli.log {
        cfg.log_path = log;
    }
    if let Some(definitions) = cli.definitions {
        cfg.definitions_path = definitions;
    }

    let _guard = combo_watch_lib::init_logging(&cfg.log_dir);
    if cfg.log_path.as_os_str().is_empty() {
        tracing::warn!("No log file configured, waiting for a `log <path>` command");
    }

    combo_watch_lib::start(cfg).await
}
