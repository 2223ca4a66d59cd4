use anyhow::Result;
use clap::Parser;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use catalog_harvester::{HarvestConfig, Harvester, SpeedPreset};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Catalog, homepage or product URL to harvest
    url: String,

    /// Maximum number of products
    #[arg(long)]
    limit: Option<usize>,

    /// Use the fast politeness preset
    #[arg(long, default_value_t = false)]
    fast: bool,

    /// Skip detail-page enrichment
    #[arg(long, default_value_t = false)]
    no_enrich: bool,

    /// Maximum number of listing pages to follow
    #[arg(long)]
    max_pages: Option<usize>,

    /// Seed for the politeness delays
    #[arg(long)]
    seed: Option<u64>,

    /// Cron expression to keep harvesting on (overrides HARVEST_SCHEDULE)
    #[arg(long)]
    schedule: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = HarvestConfig::from_env()?;
    if let Some(limit) = args.limit {
        config.options.limit = limit;
    }
    if args.fast {
        config.options.speed = SpeedPreset::Fast;
    }
    if args.no_enrich {
        config.options.enable_detail_enrichment = false;
    }
    if let Some(max_pages) = args.max_pages {
        config.options.max_pages = max_pages;
    }
    if args.seed.is_some() {
        config.options.seed = args.seed;
    }
    if args.schedule.is_some() {
        config.schedule = args.schedule.clone();
    }

    info!("Starting catalog harvester for {}", args.url);
    let harvester = Harvester::new(&config).await?;

    let products = harvester.run(&args.url).await?;
    println!("{}", serde_json::to_string_pretty(&products)?);

    let Some(schedule) = config.schedule else {
        return Ok(());
    };

    let sched = JobScheduler::new().await?;

    let job_harvester = harvester.clone();
    let job_url = args.url.clone();
    sched
        .add(Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let harvester = job_harvester.clone();
            let url = job_url.clone();
            Box::pin(async move {
                if let Err(e) = harvester.run(&url).await {
                    error!("Error harvesting {}: {}", url, e);
                }
            })
        })?)
        .await?;

    info!("Scheduler started with schedule '{}'", schedule);
    sched.start().await?;

    // Keep the program running
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
    }
}
