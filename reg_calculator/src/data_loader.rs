use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use log::{debug, warn};
use polars::prelude::*;
use std::collections::BTreeMap;

use crate::coerce::{f64_values, floor_to_hour, mileage_ratio, timestamp_values};
use crate::column_mapper::{ColumnMapper, FeedColumn};

/// One row of the price feed after alias resolution and coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRow {
    pub timestamp: NaiveDateTime,
    pub capability_price: f64,
    pub performance_price: f64,
}

/// Read typed price rows out of a raw price frame.
///
/// Rows with an unreadable timestamp are dropped; unreadable prices become 0.0.
/// A frame without any timestamp column cannot be placed in time and is an error.
pub fn load_price_rows(df: &DataFrame) -> Result<Vec<PriceRow>> {
    if df.height() == 0 {
        return Ok(Vec::new());
    }
    let Some(timestamps) = ColumnMapper::resolve(df, FeedColumn::Timestamp) else {
        bail!(
            "price frame has no timestamp column (tried {:?})",
            FeedColumn::Timestamp.aliases()
        );
    };
    let timestamps = timestamp_values(timestamps);
    let capability = price_column(df, FeedColumn::CapabilityPrice);
    let performance = price_column(df, FeedColumn::PerformancePrice);

    let mut rows = Vec::with_capacity(df.height());
    let mut dropped = 0;
    for idx in 0..df.height() {
        let Some(timestamp) = timestamps[idx] else {
            dropped += 1;
            continue;
        };
        rows.push(PriceRow {
            timestamp: floor_to_hour(timestamp),
            capability_price: capability[idx].unwrap_or(0.0),
            performance_price: performance[idx].unwrap_or(0.0),
        });
    }
    if dropped > 0 {
        debug!("Dropped {} price rows with unreadable timestamps", dropped);
    }
    Ok(rows)
}

fn price_column(df: &DataFrame, column: FeedColumn) -> Vec<Option<f64>> {
    match ColumnMapper::resolve(df, column) {
        Some(series) => f64_values(series),
        None => {
            warn!(
                "Price frame has none of {:?}, treating the column as 0.0",
                column.aliases()
            );
            vec![None; df.height()]
        }
    }
}

/// Hourly mileage ratios out of a raw market frame, averaged per hour.
///
/// `None` means the mileage signals cannot be recovered under any known column
/// name and the caller should fall back to the neutral ratio.
pub fn load_mileage_ratios(df: &DataFrame) -> Option<BTreeMap<NaiveDateTime, f64>> {
    if df.height() == 0 {
        return None;
    }
    let Some(columns) = ColumnMapper::resolve_all(
        df,
        &[
            FeedColumn::Timestamp,
            FeedColumn::RegAMileage,
            FeedColumn::RegDMileage,
        ],
    ) else {
        warn!("Market frame is missing mileage columns, using the neutral ratio");
        return None;
    };
    let timestamps = timestamp_values(columns[0]);
    let rega = f64_values(columns[1]);
    let regd = f64_values(columns[2]);

    let mut sums: BTreeMap<NaiveDateTime, (f64, usize)> = BTreeMap::new();
    for idx in 0..df.height() {
        if let Some(timestamp) = timestamps[idx] {
            let ratio = mileage_ratio(regd[idx], rega[idx]);
            let entry = sums.entry(floor_to_hour(timestamp)).or_insert((0.0, 0));
            entry.0 += ratio;
            entry.1 += 1;
        }
    }
    if sums.is_empty() {
        return None;
    }
    Some(
        sums.into_iter()
            .map(|(timestamp, (sum, count))| (timestamp, sum / count as f64))
            .collect(),
    )
}
