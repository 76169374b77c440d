use anyhow::Context;
use clap::{Parser, Subcommand};
use paperbot::api::{CryptoPanicConfig, NewsClient, OpenAiScorer, RedditClient, UpbitClient};
use paperbot::config::{Settings, DEFAULT_CONFIG_PATH};
use paperbot::db::AuditLog;
use paperbot::execution::{Ledger, TradingEngine};
use paperbot::sentiment::{CombinedCorpus, NewsSentiment, SentimentProvider};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "paperbot")]
#[command(about = "Paper-trading rebalancer driven by RSI and news sentiment", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (extension optional, missing file falls back to defaults)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the evaluation loop until Ctrl+C (default)
    Run,

    /// Run a single evaluation cycle and exit
    Once,

    /// Show the recovered ledger and the latest audit records
    Status {
        /// Number of recent decisions to print
        #[arg(short, long, default_value_t = 10)]
        recent: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config).context("loading settings")?;

    let audit_log = AuditLog::connect(&settings.engine.database_url)
        .await
        .with_context(|| format!("opening audit log at {}", settings.engine.database_url))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let mut engine = build_engine(&settings, audit_log).await?;
            print_banner(&settings, &engine);
            engine.run_forever().await?;
            tracing::info!("👋 Stopped");
        }
        Commands::Once => {
            let mut engine = build_engine(&settings, audit_log).await?;
            let report = engine.run_cycle().await?;
            println!(
                "{} @ {} | rsi={} sentiment={:.3}{} target_ratio={:.2}",
                report.decision,
                report.price,
                report
                    .rsi
                    .map(|r| format!("{:.2}", r))
                    .unwrap_or_else(|| "n/a".to_string()),
                report.sentiment,
                if report.sentiment_refreshed { " (refreshed)" } else { "" },
                report.target_ratio
            );
            println!("  {}", report.reason);
            println!(
                "  balance={} position={}",
                report.state.balance, report.state.position
            );
        }
        Commands::Status { recent } => print_status(&settings, &audit_log, recent).await?,
    }

    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paperbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_sentiment(settings: &Settings) -> SentimentProvider {
    let s = &settings.sentiment;
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            let mut news = NewsClient::new(s.news_feeds.clone(), s.headlines_per_feed);
            match std::env::var("CRYPTOPANIC_API_KEY") {
                Ok(api_key) if !api_key.trim().is_empty() => {
                    news = news.with_cryptopanic(CryptoPanicConfig {
                        api_key,
                        base_url: s.cryptopanic_url.clone(),
                        currencies: s.cryptopanic_currencies.clone(),
                    });
                }
                _ => tracing::info!("CRYPTOPANIC_API_KEY not set, reading RSS feeds only"),
            }
            let reddit =
                RedditClient::with_base_url(s.subreddits.clone(), s.posts_per_subreddit, &s.reddit_url);
            let corpus = CombinedCorpus::new(news, reddit);
            let scorer = OpenAiScorer::with_base_url(key, &s.model, &s.openai_url);
            SentimentProvider::News(NewsSentiment::new(corpus, scorer, s.chunk_size))
        }
        _ => {
            tracing::warn!("OPENAI_API_KEY not set, sentiment stays neutral");
            SentimentProvider::Neutral
        }
    }
}

async fn build_engine(
    settings: &Settings,
    audit_log: AuditLog,
) -> anyhow::Result<TradingEngine<UpbitClient, SentimentProvider>> {
    let market = UpbitClient::with_base_url(&settings.market.api_url);
    let engine = TradingEngine::bootstrap(settings, market, build_sentiment(settings), audit_log)
        .await
        .context("restoring engine state")?;
    Ok(engine)
}

fn print_banner(settings: &Settings, engine: &TradingEngine<UpbitClient, SentimentProvider>) {
    let state = engine.ledger_state();
    tracing::info!("🚀 paperbot starting");
    tracing::info!("\n📊 Configuration:");
    tracing::info!(
        "  Market: {} ({})",
        settings.market.instrument,
        settings.market.timeframe
    );
    tracing::info!("  Policy: {}", engine.policy_name());
    tracing::info!(
        "  Fee: {} | Rebalance threshold: {} | Min order: {}",
        settings.trading.fee_rate,
        settings.trading.rebalance_threshold,
        settings.trading.min_order_amount
    );
    tracing::info!(
        "  Sentiment gate: {}% | Interval: {}s",
        settings.sentiment.threshold_percent,
        settings.engine.interval_secs
    );
    tracing::info!("  Ledger: balance={} position={}", state.balance, state.position);
}

async fn print_status(settings: &Settings, audit_log: &AuditLog, recent: i64) -> anyhow::Result<()> {
    let ledger = Ledger::recover(audit_log, settings.trading.seed_state()).await?;
    let state = ledger.state();
    let last_price = audit_log.last_price().await?;

    println!("Ledger");
    println!("  balance:  {}", state.balance);
    println!("  position: {}", state.position);
    if let Some(price) = last_price {
        println!("  value:    {} @ {}", state.total_value(price).round_dp(0), price);
        println!("  ratio:    {:.4}", state.asset_ratio(price));
    }
    println!(
        "  sentiment: {}",
        audit_log
            .last_sentiment()
            .await?
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!(
        "Records: {} trades, {} decisions",
        audit_log.count_trades().await?,
        audit_log.count_decisions().await?
    );

    let decisions = audit_log.recent_decisions(recent).await?;
    if !decisions.is_empty() {
        println!("Recent decisions");
    }
    for d in decisions {
        println!(
            "  {} {:<4} @ {} ratio={:.2} | {}",
            d.timestamp.format("%Y-%m-%d %H:%M:%S"),
            d.decision,
            d.price,
            d.target_ratio,
            d.reason
        );
    }

    Ok(())
}
