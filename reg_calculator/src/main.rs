use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use reg_calculator::calendar::rolling_12_full_months;
use reg_calculator::{
    AssetParams, CacheRepository, EstimateRequest, PjmClient, RankingMetric, RegulationEstimate,
    RegulationEstimator,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reg_calculator")]
#[command(about = "Estimate PJM regulation revenue for a battery over a historical window")]
struct Args {
    /// Window start (YYYY-MM-DD). Defaults to the trailing 12 full months.
    #[arg(long, requires = "end")]
    start: Option<String>,

    /// Window end, exclusive (YYYY-MM-DD)
    #[arg(long, requires = "start")]
    end: Option<String>,

    /// Battery power in kW
    #[arg(long, default_value = "1000.0")]
    power_kw: f64,

    /// Battery usable energy in kWh
    #[arg(long, default_value = "2000.0")]
    energy_kwh: f64,

    /// Target full cycles per year
    #[arg(long, default_value = "365")]
    annual_cycles: u32,

    /// MWh of throughput per hour of regulation service
    #[arg(long, default_value = "1.0")]
    throughput_ratio: f64,

    /// Performance score (0-1)
    #[arg(long, default_value = "0.9")]
    performance_score: f64,

    /// Hour ranking metric (full, rmccp, rmpcp)
    #[arg(long, value_enum, default_value = "combined")]
    ranking: RankingMetric,

    /// Fetch months missing from the cache
    #[arg(long)]
    allow_fetch: bool,

    /// Cache root holding prices/ and market/ partitions
    #[arg(long, env = "PJM_CACHE_DIR", default_value = "data/markets/pjm")]
    cache_dir: PathBuf,

    /// Rows in the top hours table
    #[arg(long, default_value = "50")]
    top_n: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "summary")]
    output: OutputFormat,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Summary,
}

fn parse_day(raw: &str) -> Result<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", raw))?;
    Ok(date.and_time(NaiveTime::MIN))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let args = Args::parse();

    let (start, end_exclusive) = match (&args.start, &args.end) {
        (Some(start), Some(end)) => (parse_day(start)?, parse_day(end)?),
        _ => rolling_12_full_months(Local::now().date_naive()),
    };
    info!("Estimating regulation revenue for {} to {}", start, end_exclusive);

    let cache = CacheRepository::new(&args.cache_dir);
    let client = if args.allow_fetch {
        match PjmClient::from_env() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("{:#}; running cache-only", e);
                None
            }
        }
    } else {
        None
    };

    let mut estimator = RegulationEstimator::new(&cache).with_top_n(args.top_n);
    if let Some(client) = client.as_ref() {
        estimator = estimator.with_client(client);
    }

    let request = EstimateRequest {
        start,
        end_exclusive,
        asset: AssetParams::from_kw_kwh(args.power_kw, args.energy_kwh),
        annual_cycles: args.annual_cycles,
        throughput_ratio: args.throughput_ratio,
        performance_score: args.performance_score,
        ranking: args.ranking,
        allow_fetch: client.is_some(),
    };
    let estimate = estimator.estimate(&request)?;

    match args.output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&estimate)?;
            println!("{}", json);
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for hour in &estimate.selected {
                writer.serialize(hour)?;
            }
            writer.flush()?;
        }
        OutputFormat::Summary => print_summary(&args, &request, &estimate),
    }

    Ok(())
}

fn print_summary(args: &Args, request: &EstimateRequest, estimate: &RegulationEstimate) {
    let summary = &estimate.summary;
    let fmt_avg = |value: Option<f64>| {
        value
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "n/a".to_string())
    };

    println!("PJM Regulation Estimate");
    println!("=======================");
    println!("Period: {} to {}", request.start, request.end_exclusive);
    println!(
        "Configuration: {} kW / {} kWh battery ({:.2} h), score {:.2}, ranking {:?}",
        args.power_kw,
        args.energy_kwh,
        request.asset.duration_hours,
        request.performance_score,
        request.ranking
    );
    println!();
    println!("Months:");
    for report in &estimate.months {
        let detail = report
            .error_detail
            .as_deref()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default();
        let mileage = if report.neutral_mileage() {
            " [neutral mileage]"
        } else {
            ""
        };
        println!(
            "  {}: {} {} rows{}{}",
            report.month, report.action, report.row_count, mileage, detail
        );
    }
    println!();
    println!("Window hours:      {}", estimate.window_hours);
    println!("Hours budget:      {}", estimate.hours_budget);
    println!("Max run (hours):   {}", estimate.max_consecutive);
    println!("Selected hours:    {}", summary.hour_count);
    println!();
    println!("Capability credit: ${:.2}", summary.capability_credit_sum);
    println!("Performance credit: ${:.2}", summary.performance_credit_sum);
    println!("Total credit:      ${:.2}", summary.total_credit_sum);
    println!(
        "Avg RMCCP {} | Avg RMPCP {} | Avg mileage ratio {}",
        fmt_avg(summary.avg_capability_price),
        fmt_avg(summary.avg_performance_price),
        fmt_avg(summary.avg_mileage_ratio)
    );

    if !estimate.top_hours.is_empty() {
        println!();
        println!("Top {} hours by credit:", estimate.top_hours.len());
        for hour in &estimate.top_hours {
            println!(
                "  {}  RMCCP {:>8.2}  RMPCP {:>8.2}  ratio {:>5.2}  credit ${:.2}",
                hour.timestamp,
                hour.capability_price,
                hour.performance_price,
                hour.mileage_ratio,
                hour.total_credit
            );
        }
    }
}
