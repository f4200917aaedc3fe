use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EstimateError;

/// Neutral mileage multiplier used whenever the mileage feed cannot be measured.
pub const NEUTRAL_MILEAGE_RATIO: f64 = 1.0;

/// One market hour with both feeds merged.
///
/// `timestamp` is the hour-beginning wall-clock time published by the market
/// (`datetime_beginning_ept`). `mileage_ratio` is always finite and positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyRecord {
    pub timestamp: NaiveDateTime,
    pub capability_price: f64,
    pub performance_price: f64,
    pub mileage_ratio: f64,
}

impl HourlyRecord {
    pub fn new(
        timestamp: NaiveDateTime,
        capability_price: f64,
        performance_price: f64,
        mileage_ratio: f64,
    ) -> Self {
        Self {
            timestamp,
            capability_price,
            performance_price,
            mileage_ratio,
        }
    }
}

/// One cache partition: a calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    /// The month containing `timestamp`.
    pub fn of(timestamp: NaiveDateTime) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // Construction guarantees a valid first day.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    /// Inclusive start of the month interval.
    pub fn start(&self) -> NaiveDateTime {
        self.first_day().and_time(NaiveTime::MIN)
    }

    /// Exclusive end of the month interval, the start of the next month.
    pub fn end(&self) -> NaiveDateTime {
        self.next().start()
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn hours(&self) -> i64 {
        (self.end() - self.start()).num_hours()
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Raw feeds kept in the cache, one partition per month each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// Hourly RMCCP/RMPCP clearing prices.
    RegulationPrices,
    /// Hourly RegA/RegD mileage.
    RegulationMarket,
}

impl Dataset {
    pub const ALL: [Dataset; 2] = [Dataset::RegulationPrices, Dataset::RegulationMarket];

    /// Data Miner feed name.
    pub fn feed_name(&self) -> &'static str {
        match self {
            Dataset::RegulationPrices => "reg_zone_prelim_bill",
            Dataset::RegulationMarket => "reg_market_results",
        }
    }

    /// Cache sub-directory and file prefix.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Dataset::RegulationPrices => "prices",
            Dataset::RegulationMarket => "market",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.feed_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthAction {
    Loaded,
    Fetched,
    Missing,
    Error,
}

impl fmt::Display for MonthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MonthAction::Loaded => "loaded",
            MonthAction::Fetched => "fetched",
            MonthAction::Missing => "missing",
            MonthAction::Error => "error",
        };
        f.write_str(label)
    }
}

/// Provenance of one month of a stitched window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthReport {
    pub month: MonthKey,
    pub action: MonthAction,
    pub row_count: usize,
    /// False when the month's mileage ratio fell back to the neutral value.
    pub mileage_available: bool,
    pub error_detail: Option<String>,
}

impl MonthReport {
    pub fn loaded(month: MonthKey, row_count: usize, mileage_available: bool) -> Self {
        Self {
            month,
            action: MonthAction::Loaded,
            row_count,
            mileage_available,
            error_detail: None,
        }
    }

    pub fn fetched(month: MonthKey, row_count: usize, mileage_available: bool) -> Self {
        Self {
            month,
            action: MonthAction::Fetched,
            row_count,
            mileage_available,
            error_detail: None,
        }
    }

    pub fn missing(month: MonthKey) -> Self {
        Self {
            month,
            action: MonthAction::Missing,
            row_count: 0,
            mileage_available: false,
            error_detail: None,
        }
    }

    pub fn error(month: MonthKey, detail: impl Into<String>) -> Self {
        Self {
            month,
            action: MonthAction::Error,
            row_count: 0,
            mileage_available: false,
            error_detail: Some(detail.into()),
        }
    }

    /// The month contributed rows, but every one of them used the neutral ratio.
    pub fn neutral_mileage(&self) -> bool {
        matches!(self.action, MonthAction::Loaded | MonthAction::Fetched) && !self.mileage_available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetParams {
    pub nameplate_power_mw: f64,
    /// Usable energy divided by power.
    pub duration_hours: f64,
}

impl AssetParams {
    pub fn new(nameplate_power_mw: f64, duration_hours: f64) -> Self {
        Self {
            nameplate_power_mw,
            duration_hours,
        }
    }

    /// Build from the kW / kWh figures a project sheet usually carries.
    pub fn from_kw_kwh(power_kw: f64, energy_kwh: f64) -> Self {
        let duration_hours = if power_kw <= 0.0 { 0.0 } else { energy_kwh / power_kw };
        Self {
            nameplate_power_mw: power_kw / 1000.0,
            duration_hours,
        }
    }

    pub fn validate(&self) -> Result<(), EstimateError> {
        if !self.duration_hours.is_finite() || self.duration_hours <= 0.0 {
            return Err(EstimateError::InvalidDuration(self.duration_hours));
        }
        if !self.nameplate_power_mw.is_finite() || self.nameplate_power_mw < 0.0 {
            return Err(EstimateError::InvalidPower(self.nameplate_power_mw));
        }
        Ok(())
    }
}

/// How candidate hours are ranked before selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    /// Capability price plus mileage-scaled performance price.
    #[default]
    #[serde(alias = "full")]
    #[value(alias = "full")]
    Combined,
    #[serde(alias = "rmccp")]
    #[value(alias = "rmccp")]
    CapabilityOnly,
    /// Performance price scaled by mileage, the same convention as `Combined`.
    #[serde(alias = "rmpcp")]
    #[value(alias = "rmpcp")]
    PerformanceOnly,
}

impl RankingMetric {
    /// Per-MW score of an hour. Power and performance score only scale this,
    /// so they are left out of the ranking.
    pub fn score(&self, record: &HourlyRecord) -> f64 {
        match self {
            RankingMetric::Combined => {
                record.capability_price + record.performance_price * record.mileage_ratio
            }
            RankingMetric::CapabilityOnly => record.capability_price,
            RankingMetric::PerformanceOnly => record.performance_price * record.mileage_ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    pub ranking: RankingMetric,
    pub performance_score: f64,
    pub hours_budget: usize,
}

impl SelectionPolicy {
    pub fn validate(&self) -> Result<(), EstimateError> {
        validate_performance_score(self.performance_score)
    }
}

pub fn validate_performance_score(score: f64) -> Result<(), EstimateError> {
    if (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(EstimateError::InvalidPerformanceScore(score))
    }
}

/// A selected hour with its credits. Derived on every estimate, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectedHour {
    pub timestamp: NaiveDateTime,
    pub capability_price: f64,
    pub performance_price: f64,
    pub mileage_ratio: f64,
    pub capability_credit: f64,
    pub performance_credit: f64,
    pub total_credit: f64,
}

impl SelectedHour {
    pub fn record(&self) -> HourlyRecord {
        HourlyRecord::new(
            self.timestamp,
            self.capability_price,
            self.performance_price,
            self.mileage_ratio,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RevenueSummary {
    pub hour_count: usize,
    pub capability_credit_sum: f64,
    pub performance_credit_sum: f64,
    pub total_credit_sum: f64,
    /// `None` when no hour was selected.
    pub avg_capability_price: Option<f64>,
    pub avg_performance_price: Option<f64>,
    pub avg_mileage_ratio: Option<f64>,
}
