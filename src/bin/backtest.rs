use clap::Parser;
use paperbot::backtest::{BacktestMetrics, BacktestRunner, MarketScenario, SyntheticDataGenerator};
use paperbot::config::{Settings, DEFAULT_CONFIG_PATH};

#[derive(Parser)]
#[command(name = "backtest")]
#[command(about = "Replay synthetic markets through the rebalancer", long_about = None)]
struct Args {
    /// Settings file (same layering as the live bot)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Fixed sentiment score applied to every cycle, -1.0 to 1.0
    #[arg(short, long, default_value_t = 0.0, allow_hyphen_values = true)]
    sentiment: f64,

    /// Number of 5 minute candles per scenario
    #[arg(short, long, default_value_t = 500)]
    candles: usize,

    /// RNG seed for the synthetic markets
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("paperbot=info")
        .init();

    let args = Args::parse();
    let settings = Settings::load_from(&args.config)?;

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║            PAPERBOT REBALANCER BACKTEST               ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let runner = BacktestRunner::new(&settings).with_sentiment(args.sentiment);
    let mut all_metrics = Vec::new();

    for scenario in MarketScenario::ALL {
        let mut generator = SyntheticDataGenerator::new(args.seed);
        let candles = generator.generate(scenario, args.candles, 5);

        match runner.run_and_report(candles, scenario.label()) {
            Ok(metrics) => all_metrics.push((scenario.label(), metrics)),
            Err(e) => eprintln!("❌ Backtest failed for {}: {}", scenario.label(), e),
        }
    }

    print_summary_comparison(&all_metrics);

    Ok(())
}

fn print_summary_comparison(results: &[(&str, BacktestMetrics)]) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              SCENARIO COMPARISON                      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<16} {:>10} {:>10} {:>8} {:>12} {:>8}",
        "Scenario", "Return%", "B&H%", "Trades", "Fees", "MaxDD%"
    );
    println!("{}", "─".repeat(70));

    for (name, m) in results {
        println!(
            "{:<16} {:>10.2} {:>10.2} {:>8} {:>12} {:>8.2}",
            name,
            m.total_return_pct,
            m.buy_and_hold_return_pct,
            m.total_trades(),
            m.fees_paid.round_dp(0),
            m.max_drawdown_pct
        );
    }

    let beat_hold = results
        .iter()
        .filter(|(_, m)| m.total_return_pct > m.buy_and_hold_return_pct)
        .count();
    println!(
        "\n📊 Rebalancing beat buy & hold in {}/{} scenarios",
        beat_hold,
        results.len()
    );

    println!("\n═══════════════════════════════════════════════════════\n");
}
