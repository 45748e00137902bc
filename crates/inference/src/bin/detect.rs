use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use inference::{InferenceFactory, InferenceThresholds};

#[derive(Parser, Debug)]
#[command(name = "detect", about = "Print object centroids found in images")]
struct Args {
    /// Checkpoint written by `train`; its JSON manifest must sit next to it.
    #[arg(long)]
    checkpoint: PathBuf,
    /// Minimum class probability for a cell to count as a centroid.
    #[arg(long, default_value_t = 0.5)]
    min_score: f32,
    /// Images to run.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing("info");
    let args = Args::parse();
    let detector = InferenceFactory
        .load_with_manifest(
            &args.checkpoint,
            InferenceThresholds {
                min_score: args.min_score,
            },
        )
        .with_context(|| format!("failed to load {}", args.checkpoint.display()))?;
    for path in &args.images {
        let centroids = detector.detect_path(path)?;
        let line = serde_json::json!({
            "image": path.display().to_string(),
            "centroids": centroids,
        });
        println!("{line}");
    }
    Ok(())
}
