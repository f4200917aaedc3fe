use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use reg_calculator::{CacheRepository, PjmClient};

mod prefetch;
mod verify;

#[derive(Parser)]
#[command(name = "pjm_reg_pipeline")]
#[command(about = "Maintain the PJM regulation price and mileage cache")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the trailing full months into the cache
    Prefetch {
        /// Number of full months before the current one
        #[arg(long, default_value = "24")]
        months: u32,

        /// Refetch months that are already cached
        #[arg(long)]
        force: bool,

        /// Average seconds to wait between months, jittered by 25%
        #[arg(long, default_value = "2.0")]
        sleep: f64,

        /// Cache root holding prices/ and market/ partitions
        #[arg(long, env = "PJM_CACHE_DIR", default_value = "data/markets/pjm")]
        cache_dir: PathBuf,
    },
    /// Check cached partitions for duplicates, gaps, ordering and mileage ratios
    Verify {
        #[arg(long, env = "PJM_CACHE_DIR", default_value = "data/markets/pjm")]
        cache_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Prefetch {
            months,
            force,
            sleep,
            cache_dir,
        } => {
            let client = PjmClient::from_env()?;
            let cache = CacheRepository::new(cache_dir);
            let months = prefetch::prefetch_months(Local::now().date_naive(), months);
            info!(
                "Prefetching {} months into {}",
                months.len(),
                cache.root().display()
            );

            let pb = prefetch::progress_bar(months.len());
            let reports = prefetch::run_prefetch(
                &cache,
                &client,
                &months,
                force,
                prefetch::month_pause(sleep),
                &pb,
            )?;
            prefetch::print_prefetch_report(&cache, &reports)?;
        }
        Command::Verify { cache_dir } => {
            let cache = CacheRepository::new(cache_dir);
            let checks = verify::verify_cache(&cache)?;
            verify::print_verification(&cache, &checks);
        }
    }

    Ok(())
}
