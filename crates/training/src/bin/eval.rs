use clap::Parser;
use training::{run_eval, EvalArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing("info");
    let eval = run_eval(EvalArgs::parse())?;
    let s = eval.score;
    println!(
        "loss {:.4} | precision {:.3} recall {:.3} f1 {:.3} (tp {} fp {} fn {})",
        eval.loss,
        s.precision(),
        s.recall(),
        s.f1(),
        s.true_positives,
        s.false_positives,
        s.false_negatives
    );
    Ok(())
}
