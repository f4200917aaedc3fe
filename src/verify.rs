use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use std::path::PathBuf;

use reg_calculator::coerce::{
    f64_values, floor_to_hour, timestamp_values, MIN_MEASURABLE_MILEAGE,
};
use reg_calculator::column_mapper::{ColumnMapper, FeedColumn};
use reg_calculator::{CacheRepository, Dataset, MonthKey};

/// Findings for one cached partition file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionCheck {
    pub dataset: Option<Dataset>,
    pub month: Option<MonthKey>,
    pub path: PathBuf,
    pub rows: usize,
    pub unreadable: Option<String>,
    pub missing_timestamp_column: bool,
    pub unparseable_timestamps: usize,
    pub duplicate_timestamps: usize,
    pub out_of_order: usize,
    /// Breaks of more than one hour between consecutive hours.
    pub gaps: usize,
    /// Hours of the month without a row.
    pub missing_hours: usize,
    pub outside_month: usize,
    /// Market rows whose RegD/RegA ratio is undefined and falls back to neutral.
    pub degenerate_ratios: usize,
}

impl PartitionCheck {
    pub fn issues(&self) -> usize {
        usize::from(self.unreadable.is_some())
            + usize::from(self.missing_timestamp_column)
            + self.unparseable_timestamps
            + self.duplicate_timestamps
            + self.out_of_order
            + self.gaps
            + self.outside_month
            + self.degenerate_ratios
    }
}

pub fn verify_cache(cache: &CacheRepository) -> Result<Vec<PartitionCheck>> {
    let mut checks = Vec::new();
    for dataset in Dataset::ALL {
        for (month, path) in cache.list_partitions(dataset)? {
            let check = match cache.read_partition(dataset, month) {
                Ok(Some(df)) => check_partition(dataset, month, &df)
                    .with_context(|| format!("checking {}", path.display()))?,
                Ok(None) => continue,
                Err(e) => PartitionCheck {
                    unreadable: Some(format!("{:#}", e)),
                    ..Default::default()
                },
            };
            checks.push(PartitionCheck {
                dataset: Some(dataset),
                month: Some(month),
                path,
                ..check
            });
        }
    }
    Ok(checks)
}

pub fn check_partition(
    dataset: Dataset,
    month: MonthKey,
    df: &DataFrame,
) -> Result<PartitionCheck> {
    let mut check = PartitionCheck {
        dataset: Some(dataset),
        month: Some(month),
        rows: df.height(),
        ..Default::default()
    };
    let Some(timestamp_col) = ColumnMapper::resolve(df, FeedColumn::Timestamp) else {
        check.missing_timestamp_column = df.height() > 0;
        return Ok(check);
    };

    let duplicate_check = df
        .clone()
        .lazy()
        .group_by([col(timestamp_col.name().as_str())])
        .agg([col(timestamp_col.name().as_str()).count().alias("count")])
        .filter(col("count").gt(lit(1)))
        .collect()?;
    check.duplicate_timestamps = duplicate_check.height();

    let parsed = timestamp_values(timestamp_col);
    check.unparseable_timestamps = parsed.iter().filter(|ts| ts.is_none()).count();
    let hours: Vec<NaiveDateTime> = parsed.into_iter().flatten().map(floor_to_hour).collect();

    check.out_of_order = hours.windows(2).filter(|w| w[1] < w[0]).count();
    check.outside_month = hours
        .iter()
        .filter(|h| **h < month.start() || **h >= month.end())
        .count();

    let mut unique = hours.clone();
    unique.sort();
    unique.dedup();
    check.gaps = unique
        .windows(2)
        .filter(|w| w[1] - w[0] > Duration::hours(1))
        .count();
    let in_month = unique
        .iter()
        .filter(|h| **h >= month.start() && **h < month.end())
        .count();
    check.missing_hours = (month.hours().max(0) as usize).saturating_sub(in_month);

    if dataset == Dataset::RegulationMarket {
        check.degenerate_ratios = count_degenerate_ratios(df);
    }
    Ok(check)
}

fn count_degenerate_ratios(df: &DataFrame) -> usize {
    let (Some(rega), Some(regd)) = (
        ColumnMapper::resolve(df, FeedColumn::RegAMileage),
        ColumnMapper::resolve(df, FeedColumn::RegDMileage),
    ) else {
        return df.height();
    };
    f64_values(regd)
        .into_iter()
        .zip(f64_values(rega))
        .filter(|(regd, rega)| match (regd, rega) {
            (Some(regd), Some(rega)) if rega.abs() >= MIN_MEASURABLE_MILEAGE => {
                let ratio = regd / rega;
                !(ratio.is_finite() && ratio > 0.0)
            }
            _ => true,
        })
        .count()
}

pub fn print_verification(cache: &CacheRepository, checks: &[PartitionCheck]) -> usize {
    println!("\n🔍 PJM Cache Verification");
    println!("{}", "=".repeat(60));
    println!("Cache root: {}", cache.root().display());

    if checks.is_empty() {
        println!("\n⚠️  No cached partitions found");
    }

    let mut total_issues = 0;
    for check in checks {
        let name = check
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("\n  Verifying: {}", name);

        if let Some(error) = &check.unreadable {
            println!("    ❌ Unreadable: {}", error);
            total_issues += check.issues();
            continue;
        }
        if check.missing_timestamp_column {
            println!("    ❌ No timestamp column found");
            total_issues += check.issues();
            continue;
        }

        if check.duplicate_timestamps > 0 {
            println!("    ❌ Found {} duplicate timestamps", check.duplicate_timestamps);
        } else {
            println!("    ✅ No duplicates found");
        }
        if check.unparseable_timestamps > 0 {
            println!("    ⚠️  {} unparseable timestamps", check.unparseable_timestamps);
        }
        if check.gaps > 0 {
            println!(
                "    ⚠️  Found {} gaps ({} hours of the month missing)",
                check.gaps, check.missing_hours
            );
        } else if check.missing_hours > 0 {
            println!("    ⚠️  {} hours of the month missing", check.missing_hours);
        } else {
            println!("    ✅ No gaps in time series");
        }
        if check.out_of_order > 0 {
            println!(
                "    ⚠️  Data is not sorted by timestamp ({} inversions)",
                check.out_of_order
            );
        } else {
            println!("    ✅ Data is properly sorted");
        }
        if check.outside_month > 0 {
            println!("    ⚠️  {} rows outside the partition month", check.outside_month);
        }
        if check.dataset == Some(Dataset::RegulationMarket) {
            if check.degenerate_ratios > 0 {
                println!(
                    "    ⚠️  {} rows with an undefined mileage ratio (neutral used)",
                    check.degenerate_ratios
                );
            } else {
                println!("    ✅ Mileage ratios finite");
            }
        }
        println!("    📊 Total records: {}", check.rows);
        total_issues += check.issues();
    }

    println!("\n{}", "=".repeat(60));
    if total_issues == 0 {
        println!("✅ Cache verification passed! No issues found.");
    } else {
        println!("⚠️  Cache verification found {} issues", total_issues);
    }
    total_issues
}
