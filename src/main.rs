use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod analytics;
mod config;
mod convert;
mod db;
mod error;
mod models;
mod pipeline;
mod report;
mod resolver;
mod shape;

use crate::analytics::{default_start_date, AnalyticsClient, DateRange};
use crate::config::{AnalyticsConfig, Config};
use crate::report::{write_browse_table, write_table};

#[derive(Parser)]
#[command(name = "clark-usage-report")]
#[command(about = "Usage reports for the CLARK learning object catalog", long_about = None)]
struct Cli {
    /// Write the CSV to this file instead of stdout
    #[arg(long, global = true)]
    out: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DateArgs {
    /// First day of the report (defaults to 2015-08-14)
    #[arg(long)]
    start_date: Option<NaiveDate>,
    /// Last day of the report (defaults to today)
    #[arg(long)]
    end_date: Option<NaiveDate>,
}

impl DateArgs {
    fn range(&self) -> DateRange {
        DateRange::new(
            self.start_date.unwrap_or_else(default_start_date),
            self.end_date.unwrap_or_else(|| Utc::now().date_naive()),
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Browse and search behavior, one row per query
    Browse {
        #[command(flatten)]
        dates: DateArgs,
    },
    /// Detail page views per learning object, joined with the catalog
    Details {
        #[command(flatten)]
        dates: DateArgs,
    },
    /// Collection page views
    Collections {
        #[command(flatten)]
        dates: DateArgs,
    },
    /// Export a catalog collection
    Catalog {
        #[arg(value_enum)]
        table: CatalogTable,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CatalogTable {
    LearningObjects,
    Downloads,
    Submissions,
    Ratings,
    Users,
    Organizations,
    Collections,
    Resources,
    CardUsers,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn analytics_client() -> anyhow::Result<AnalyticsClient> {
    let config = AnalyticsConfig::from_env().context("analytics credentials are not configured")?;
    AnalyticsClient::new(config).context("failed to build analytics client")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env();

    let mongo = db::connect(&config.mongodb_uri)
        .await
        .context("failed to connect to MongoDB")?;
    let taxonomies = db::load_taxonomies(&mongo)
        .await
        .context("failed to load taxonomy collections")?;

    let out: Box<dyn Write> = match &cli.out {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    match cli.command {
        Commands::Browse { dates } => {
            let analytics = analytics_client()?;
            let rows = pipeline::browse_report(&analytics, &taxonomies, dates.range()).await?;
            info!(rows = rows.len(), "browse report ready");
            write_browse_table(out, &rows)?;
        }
        Commands::Details { dates } => {
            let analytics = analytics_client()?;
            let rows =
                pipeline::detail_report(&mongo, &analytics, &taxonomies, dates.range()).await?;
            info!(rows = rows.len(), "detail view report ready");
            write_table(out, &rows)?;
        }
        Commands::Collections { dates } => {
            let analytics = analytics_client()?;
            let rows = pipeline::collection_report(&mongo, &analytics, dates.range()).await?;
            info!(rows = rows.len(), "collection view report ready");
            write_table(out, &rows)?;
        }
        Commands::Catalog { table } => match table {
            CatalogTable::LearningObjects => {
                write_table(out, &db::learning_objects(&mongo, &taxonomies).await?)?
            }
            CatalogTable::Downloads => write_table(out, &db::downloads(&mongo).await?)?,
            CatalogTable::Submissions => write_table(out, &db::submissions(&mongo).await?)?,
            CatalogTable::Ratings => write_table(out, &db::ratings(&mongo).await?)?,
            CatalogTable::Users => write_table(out, &db::users(&mongo).await?)?,
            CatalogTable::Organizations => write_table(out, &db::organizations(&mongo).await?)?,
            CatalogTable::Collections => write_table(out, &db::collections(&mongo).await?)?,
            CatalogTable::Resources => {
                write_table(out, &db::resources(&mongo, &taxonomies).await?)?
            }
            CatalogTable::CardUsers => {
                write_table(out, &db::card_users(&mongo, &taxonomies).await?)?
            }
        },
    }

    if let Some(path) = &cli.out {
        info!("Report written to {}.", path.display());
    }

    Ok(())
}
