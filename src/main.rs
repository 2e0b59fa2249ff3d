use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use proxy_harvest::{
    cycle::{self, Harvester, PollOutcome, RefreshOutcome},
    database::ProxyDatabase,
    models::{Subscription, SubscriptionKind},
    proxy::ProxyParser,
    Config,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Harvests Shadowsocks proxies from subscription feeds and keeps their health up to date
#[derive(Parser)]
#[command(name = "proxy-harvest")]
#[command(about = "Harvests Shadowsocks proxies from subscription feeds and validates them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database connection string
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite://proxies.db")]
    database: String,

    /// Validation oracle endpoint
    #[arg(long, env = "ORACLE_URL", default_value = proxy_harvest::proxy::oracle::DEFAULT_ORACLE_URL)]
    oracle_url: String,

    /// Country lookup base URL
    #[arg(long, env = "COUNTRY_API_URL", default_value = proxy_harvest::proxy::geo::DEFAULT_COUNTRY_API_URL)]
    country_api_url: String,

    /// Self-check endpoint; must answer 204 for a refresh to run
    #[arg(long, env = "CONNECTIVITY_URL", default_value = proxy_harvest::DEFAULT_CONNECTIVITY_URL)]
    connectivity_url: String,

    /// Maximum number of concurrent network calls per cycle
    #[arg(short = 'n', long, env = "WORKERS", default_value = "500")]
    workers: usize,

    /// Timeout in seconds for subscription feed requests
    #[arg(long, env = "FEED_TIMEOUT", default_value = "60")]
    feed_timeout: u64,

    /// Timeout in seconds for oracle calls
    #[arg(long, env = "ORACLE_TIMEOUT", default_value = "30")]
    oracle_timeout: u64,

    /// Timeout in seconds for country lookups
    #[arg(long, env = "LOOKUP_TIMEOUT", default_value = "10")]
    lookup_timeout: u64,

    /// Timeout in seconds for the connectivity self-check
    #[arg(long, env = "CONNECTIVITY_TIMEOUT", default_value = "10")]
    connectivity_timeout: u64,

    /// Minutes between status refresh cycles
    #[arg(long, env = "REFRESH_INTERVAL", default_value = "20", value_parser = clap::value_parser!(u64).range(1..))]
    refresh_interval: u64,

    /// Minutes between subscription poll cycles
    #[arg(long, env = "POLL_INTERVAL", default_value = "360", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            database_url: self.database.clone(),
            oracle_url: self.oracle_url.clone(),
            country_api_url: self.country_api_url.clone(),
            connectivity_url: self.connectivity_url.clone(),
            workers: self.workers,
            feed_timeout: Duration::from_secs(self.feed_timeout),
            oracle_timeout: Duration::from_secs(self.oracle_timeout),
            lookup_timeout: Duration::from_secs(self.lookup_timeout),
            connectivity_timeout: Duration::from_secs(self.connectivity_timeout),
            refresh_interval: Duration::from_secs(self.refresh_interval * 60),
            poll_interval: Duration::from_secs(self.poll_interval * 60),
            ..Config::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run both cycles on their intervals until Ctrl-C
    Run,
    /// Run one status refresh cycle
    Refresh,
    /// Run one subscription poll cycle
    Poll,
    /// Validate specific stored proxies now
    Check {
        /// Proxy URLs (any accepted ss:// form)
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// List stored proxies
    List {
        /// Show only active proxies
        #[arg(short, long)]
        active: bool,
    },
    /// Manage subscriptions
    Subscription {
        #[command(subcommand)]
        command: SubscriptionCommands,
    },
}

#[derive(Subcommand)]
enum SubscriptionCommands {
    /// Add a subscription feed
    Add {
        /// Feed URL
        url: String,
        /// Feed encoding (plain, base64)
        #[arg(short, long, default_value = "plain")]
        kind: SubscriptionKind,
    },
    /// List subscriptions
    List,
    /// Enable polling of a subscription
    Enable { url: String },
    /// Disable polling of a subscription
    Disable { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_harvest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    let db = ProxyDatabase::new(&config.database_url).await?;

    match cli.command {
        Commands::Run => {
            info!(
                refresh_every = ?config.refresh_interval,
                poll_every = ?config.poll_interval,
                workers = config.workers,
                "Starting scheduler"
            );
            let harvester = Arc::new(Harvester::new(config, db)?);
            cycle::run_scheduler(harvester).await?;
        }
        Commands::Refresh => {
            let harvester = Harvester::new(config, db)?;
            match harvester.run_status_refresh().await {
                RefreshOutcome::Completed { summary, persisted } => {
                    println!(
                        "Checked {} proxies: {} active, {} inactive ({} saved)",
                        summary.checked, summary.active, summary.inactive, persisted.saved
                    );
                }
                RefreshOutcome::Skipped => println!("Connectivity check failed, refresh skipped"),
                RefreshOutcome::Aborted => println!("Refresh aborted, see logs"),
            }
        }
        Commands::Poll => {
            let harvester = Harvester::new(config, db)?;
            match harvester.run_subscription_poll().await {
                PollOutcome::Completed {
                    feeds_alive,
                    feeds_failed,
                    discovered,
                    persisted,
                } => {
                    println!(
                        "Polled {} subscriptions ({} failed), discovered {} proxies, saved {}",
                        feeds_alive + feeds_failed,
                        feeds_failed,
                        discovered,
                        persisted.saved
                    );
                }
                PollOutcome::Aborted => println!("Poll aborted, see logs"),
            }
        }
        Commands::Check { urls } => {
            let canonical = urls
                .iter()
                .map(|url| {
                    ProxyParser::canonical_url(url).ok_or_else(|| anyhow!("Not a Shadowsocks proxy: {}", url))
                })
                .collect::<Result<Vec<_>>>()?;

            let harvester = Harvester::new(config, db.clone())?;
            let summary = harvester.refresh_selected(&canonical).await?;
            println!(
                "Checked {} proxies: {} active, {} inactive",
                summary.checked, summary.active, summary.inactive
            );

            for url in &canonical {
                if let Some(proxy) = db.get_proxy_by_url(url).await? {
                    let status = if proxy.is_active { "✓" } else { "✗" };
                    println!("{} {} - {}", status, proxy.url, proxy.location);
                }
            }
        }
        Commands::List { active } => {
            let proxies = if active {
                db.get_proxies_by_status(true).await?
            } else {
                db.get_all_proxies().await?
            };

            if proxies.is_empty() {
                println!("No proxies found.");
            } else {
                for proxy in proxies {
                    let status = if proxy.is_active { "✓" } else { "○" };
                    let last_checked = proxy
                        .last_checked
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{} {} [{}] checked {} quality {:.1}%",
                        status,
                        proxy.url,
                        if proxy.location_country.is_empty() {
                            proxy.location.as_str()
                        } else {
                            proxy.location_country.as_str()
                        },
                        last_checked,
                        proxy.quality()
                    );
                }
            }
        }
        Commands::Subscription { command } => run_subscription_command(&db, command).await?,
    }

    Ok(())
}

async fn run_subscription_command(db: &ProxyDatabase, command: SubscriptionCommands) -> Result<()> {
    match command {
        SubscriptionCommands::Add { url, kind } => {
            let subscription = Subscription::new(url, kind);
            db.insert_subscription(&subscription).await?;
            println!("Subscription added: {} ({})", subscription.url, subscription.kind);
        }
        SubscriptionCommands::List => {
            let subscriptions = db.get_all_subscriptions().await?;
            if subscriptions.is_empty() {
                println!("No subscriptions found.");
            }
            for subscription in subscriptions {
                let enabled = if subscription.enabled { "enabled" } else { "disabled" };
                let health = if subscription.alive { "alive" } else { "dead" };
                println!("{} [{}, {}, {}]", subscription.url, subscription.kind, enabled, health);
                if !subscription.error_message.is_empty() {
                    println!("   {}", subscription.error_message);
                }
            }
        }
        SubscriptionCommands::Enable { url } => set_enabled(db, &url, true).await?,
        SubscriptionCommands::Disable { url } => set_enabled(db, &url, false).await?,
    }

    Ok(())
}

async fn set_enabled(db: &ProxyDatabase, url: &str, enabled: bool) -> Result<()> {
    if let Some(mut subscription) = db.get_subscription_by_url(url).await? {
        subscription.enabled = enabled;
        db.update_subscription(&subscription).await?;
        println!(
            "Subscription {}: {}",
            if enabled { "enabled" } else { "disabled" },
            subscription.url
        );
    } else {
        eprintln!("Subscription not found: {}", url);
    }
    Ok(())
}
