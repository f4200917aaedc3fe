use anyhow::Result;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use rand::Rng;
use reg_calculator::calendar::{months_in_window, trailing_full_months};
use reg_calculator::{
    CacheRepository, Dataset, FetchClient, MonthAction, MonthKey, MonthReport, StitchOptions,
    WindowStitcher,
};
use std::time::Duration;

/// Shortest average pause accepted from the command line, in seconds.
pub const MIN_PAUSE_SECS: f64 = 0.5;

/// Months covered by the `count` full months before `today`'s month.
pub fn prefetch_months(today: NaiveDate, count: u32) -> Vec<MonthKey> {
    let (start, end) = trailing_full_months(today, count);
    months_in_window(start, end)
}

/// Average pause between months, floored at `MIN_PAUSE_SECS`.
pub fn month_pause(sleep_secs: f64) -> Duration {
    let secs = if sleep_secs.is_finite() {
        sleep_secs.max(MIN_PAUSE_SECS)
    } else {
        MIN_PAUSE_SECS
    };
    Duration::from_secs_f64(secs)
}

/// `pause` scaled by a random factor in [0.75, 1.25].
pub fn jittered(pause: Duration) -> Duration {
    if pause.is_zero() {
        return pause;
    }
    pause.mul_f64(rand::thread_rng().gen_range(0.75..=1.25))
}

/// Warm the cache month by month, pausing about `pause` between months.
/// Failed months are reported, not raised.
pub fn run_prefetch(
    cache: &CacheRepository,
    client: &dyn FetchClient,
    months: &[MonthKey],
    force_refresh: bool,
    pause: Duration,
    progress: &ProgressBar,
) -> Result<Vec<MonthReport>> {
    let stitcher = WindowStitcher::new(cache).with_client(client);
    let options = StitchOptions {
        allow_fetch: true,
        force_refresh,
    };

    let mut reports = Vec::with_capacity(months.len());
    for (i, month) in months.iter().enumerate() {
        if i > 0 && !pause.is_zero() {
            let wait = jittered(pause);
            debug!("Waiting {:?} before {}", wait, month);
            std::thread::sleep(wait);
        }
        progress.set_message(month.to_string());
        let window = stitcher.stitch_with(month.start(), month.end(), options)?;
        reports.extend(window.months);
        progress.inc(1);
    }
    progress.finish_with_message("done");
    Ok(reports)
}

pub fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

pub fn print_prefetch_report(cache: &CacheRepository, reports: &[MonthReport]) -> Result<()> {
    println!("\n📦 PJM regulation cache prefetch");
    println!("{}", "=".repeat(60));
    println!("Cache root: {}", cache.root().display());

    for dataset in Dataset::ALL {
        let files = cache.list_partitions(dataset)?;
        println!("  {:<8} {} files", dataset.dir_name(), files.len());
    }

    println!("\nMonths:");
    for report in reports {
        let detail = report
            .error_detail
            .as_deref()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default();
        println!(
            "  {}  {:<7} {:>5} rows  mileage: {}{}",
            report.month,
            report.action,
            report.row_count,
            if report.mileage_available { "yes" } else { "no" },
            detail
        );
    }

    let count = |action: MonthAction| reports.iter().filter(|r| r.action == action).count();
    println!("\n{}", "=".repeat(60));
    println!(
        "loaded {}, fetched {}, missing {}, error {}",
        count(MonthAction::Loaded),
        count(MonthAction::Fetched),
        count(MonthAction::Missing),
        count(MonthAction::Error)
    );
    info!("Prefetch finished for {} months", reports.len());
    Ok(())
}
