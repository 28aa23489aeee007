//! fetch_weights - make sure the detector model file is present

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use parkwatch::weights::ensure_weights;
use parkwatch::ParkwatchConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Download detector weights if they are missing")]
struct Args {
    /// Destination model path (defaults to detector.model_path).
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Download URL (defaults to weights.url).
    #[arg(long)]
    url: Option<String>,

    /// Expected SHA-256 of the file, hex encoded (defaults to weights.sha256).
    #[arg(long)]
    sha256: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ParkwatchConfig::load()?;
    let model_path = args.model_path.unwrap_or(config.detector.model_path);
    let url = args.url.or(config.weights.url);
    let sha256 = args.sha256.or(config.weights.sha256);

    let path = ensure_weights(&model_path, url.as_deref(), sha256.as_deref())?;
    log::info!("detector weights ready at {}", path.display());
    println!("{}", path.display());
    Ok(())
}
