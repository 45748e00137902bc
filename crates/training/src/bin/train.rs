use clap::Parser;
use training::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing("info");
    let outcome = run_train(TrainArgs::parse())?;
    println!(
        "best val F1 {:.4} (epoch {}) saved to {}",
        outcome.best_val_f1,
        outcome
            .best_epoch
            .map(|e| (e + 1).to_string())
            .unwrap_or_else(|| "-".into()),
        outcome.checkpoint.display()
    );
    Ok(())
}
