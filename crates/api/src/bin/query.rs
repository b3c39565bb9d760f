//! `liftride-query`: ad-hoc reports over the persistent ride table.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;

use liftride_infra::{PipelineConfig, PostgresRideStore, queries};

#[derive(Parser)]
#[command(name = "liftride-query")]
#[command(about = "Query stored lift rides (reads DATABASE_URL and TABLE_NAME)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Number of days a skier rode in a season
    Days {
        #[arg(long)]
        skier: String,
        #[arg(long, default_value = "2024")]
        season: String,
    },
    /// Vertical per day for a skier in a season
    VerticalByDay {
        #[arg(long)]
        skier: String,
        #[arg(long, default_value = "2024")]
        season: String,
    },
    /// Lifts ridden per day for a skier in a season
    LiftsByDay {
        #[arg(long)]
        skier: String,
        #[arg(long, default_value = "2024")]
        season: String,
    },
    /// Per-day vertical and lifts for a skier in a season
    Summary {
        #[arg(long)]
        skier: String,
        #[arg(long, default_value = "2024")]
        season: String,
    },
    /// Distinct skiers at a resort on one day
    UniqueSkiers {
        #[arg(long)]
        resort: String,
        #[arg(long, default_value = "2024")]
        season: String,
        #[arg(long)]
        day: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    liftride_observability::init();
    let cli = Cli::parse();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let database_url = config
        .store
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = Arc::new(PostgresRideStore::on_current_runtime(pool, config.store.table_name.clone())?);

    // The store drives its queries with `block_on`; keep it off the runtime threads.
    let report = tokio::task::spawn_blocking(move || run(&cli.command, store.as_ref())).await??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run(command: &Commands, store: &PostgresRideStore) -> anyhow::Result<serde_json::Value> {
    Ok(match command {
        Commands::Days { skier, season } => json!({
            "skierID": skier,
            "seasonID": season,
            "days": queries::skier_days_in_season(store, skier, season)?,
        }),
        Commands::VerticalByDay { skier, season } => json!({
            "skierID": skier,
            "seasonID": season,
            "verticalByDay": queries::skier_vertical_by_day(store, skier, season)?,
        }),
        Commands::LiftsByDay { skier, season } => json!({
            "skierID": skier,
            "seasonID": season,
            "liftsByDay": queries::skier_lifts_by_day(store, skier, season)?,
        }),
        Commands::Summary { skier, season } => json!({
            "skierID": skier,
            "seasonID": season,
            "days": queries::skier_season_summary(store, skier, season)?,
        }),
        Commands::UniqueSkiers { resort, season, day } => json!({
            "resortID": resort,
            "seasonID": season,
            "dayID": day,
            "numSkiers": queries::resort_unique_skiers(store, resort, season, day)?,
        }),
    })
}
