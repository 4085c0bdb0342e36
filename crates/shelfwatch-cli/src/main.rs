mod backend;
mod crawl;
mod status;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::backend::Backend;
use crate::status::BreakerCommands;

#[derive(Debug, Parser)]
#[command(name = "shelfwatch")]
#[command(about = "Crawl UK grocery and pet retailers and watch their reliability")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl retailer pages and print extracted records as JSON lines
    Crawl {
        /// Start URLs; defaults to the base URL of each selected retailer
        urls: Vec<String>,
        /// Only crawl this retailer slug
        #[arg(long)]
        retailer: Option<String>,
        /// Pages of pagination to follow from each start URL
        #[arg(long, default_value = "1")]
        max_pages: u32,
    },
    /// Inspect or reset per-retailer circuit breakers
    Breaker {
        #[command(subcommand)]
        command: BreakerCommands,
    },
    /// Show rolling crawl health per retailer
    Health {
        /// Limit to one retailer slug
        #[arg(long)]
        retailer: Option<String>,
    },
    /// List retailers with their status
    Retailers,
    /// Database management commands
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Run pending migrations
    Migrate,
    /// Check database connectivity
    Ping,
    /// Delete expired breaker, health and dedup state
    Purge,
}

async fn run_db(config: &shelfwatch_core::AppConfig, command: DbCommands) -> anyhow::Result<()> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for db commands"))?;
    let pool_config = shelfwatch_db::PoolConfig::from_app_config(config);
    let pool = shelfwatch_db::connect_pool(url, pool_config).await?;
    match command {
        DbCommands::Migrate => {
            let applied = shelfwatch_db::run_migrations(&pool).await?;
            println!("applied {applied} migrations");
        }
        DbCommands::Ping => {
            shelfwatch_db::ping(&pool).await?;
            println!("database ok");
        }
        DbCommands::Purge => {
            let removed = shelfwatch_db::PgKvStore::new(pool).purge_expired().await?;
            println!("purged {removed} expired keys");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = shelfwatch_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("shelfwatch: no command given; see --help");
        return Ok(());
    };

    if let Commands::Db { command } = command {
        return run_db(&config, command).await;
    }

    let retailers = shelfwatch_core::load_retailers(&config.retailers_path)?;
    let backend = Backend::connect(&config, &retailers).await?;
    run_command(&config, &backend, &retailers, command).await
}

async fn run_command(
    config: &shelfwatch_core::AppConfig,
    backend: &Backend,
    retailers: &shelfwatch_core::RetailersFile,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Crawl {
            urls,
            retailer,
            max_pages,
        } => {
            crawl::run_crawl(
                config,
                backend,
                retailers,
                retailer.as_deref(),
                &urls,
                max_pages.max(1),
            )
            .await
        }
        Commands::Breaker {
            command: BreakerCommands::Status { retailer },
        } => status::run_breaker_status(backend, retailers, retailer.as_deref()).await,
        Commands::Breaker {
            command: BreakerCommands::Reset { retailer },
        } => status::run_breaker_reset(backend, retailers, &retailer).await,
        Commands::Health { retailer } => {
            status::run_health(backend, retailers, retailer.as_deref()).await
        }
        Commands::Retailers => status::run_retailers(backend, retailers).await,
        Commands::Db { command } => run_db(config, command).await,
    }
}
