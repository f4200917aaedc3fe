use anyhow::Result;
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::cache::CacheRepository;
use crate::calendar::months_in_window;
use crate::client::FetchClient;
use crate::coerce::sanitize_ratio;
use crate::data_loader::{load_mileage_ratios, load_price_rows, PriceRow};
use crate::error::EstimateError;
use crate::models::{
    Dataset, HourlyRecord, MonthAction, MonthKey, MonthReport, NEUTRAL_MILEAGE_RATIO,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StitchOptions {
    /// Fetch months that are not cached yet. Needs a client.
    pub allow_fetch: bool,
    /// Fetch even when a month is cached, replacing its partitions.
    pub force_refresh: bool,
}

impl StitchOptions {
    pub fn cache_only() -> Self {
        Self::default()
    }

    pub fn fetch_missing() -> Self {
        Self {
            allow_fetch: true,
            force_refresh: false,
        }
    }
}

/// A continuous hourly series plus one report per month it covers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StitchedWindow {
    /// Unique timestamps, ascending.
    pub records: Vec<HourlyRecord>,
    pub months: Vec<MonthReport>,
}

impl StitchedWindow {
    pub fn hours(&self) -> usize {
        self.records.len()
    }

    /// Months that contributed nothing because they were missing or failed.
    pub fn gaps(&self) -> impl Iterator<Item = &MonthReport> {
        self.months
            .iter()
            .filter(|report| matches!(report.action, MonthAction::Missing | MonthAction::Error))
    }

    pub fn count(&self, action: MonthAction) -> usize {
        self.months.iter().filter(|r| r.action == action).count()
    }
}

/// Rows of one month after merging, before they join the window.
struct MonthRows {
    records: Vec<HourlyRecord>,
    mileage_available: bool,
}

/// Builds hourly windows out of the monthly cache, fetching what is missing when allowed.
///
/// Duplicate timestamps keep the first occurrence: months are visited in
/// chronological order and rows in partition order.
pub struct WindowStitcher<'a> {
    cache: &'a CacheRepository,
    client: Option<&'a dyn FetchClient>,
}

impl<'a> WindowStitcher<'a> {
    pub fn new(cache: &'a CacheRepository) -> Self {
        Self {
            cache,
            client: None,
        }
    }

    pub fn with_client(mut self, client: &'a dyn FetchClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn stitch(
        &self,
        start: NaiveDateTime,
        end_exclusive: NaiveDateTime,
        allow_fetch: bool,
    ) -> Result<StitchedWindow, EstimateError> {
        let options = StitchOptions {
            allow_fetch,
            force_refresh: false,
        };
        self.stitch_with(start, end_exclusive, options)
    }

    pub fn stitch_with(
        &self,
        start: NaiveDateTime,
        end_exclusive: NaiveDateTime,
        options: StitchOptions,
    ) -> Result<StitchedWindow, EstimateError> {
        if end_exclusive < start {
            return Err(EstimateError::InvalidWindow {
                start,
                end: end_exclusive,
            });
        }
        let can_fetch = options.allow_fetch && self.client.is_some();
        if options.allow_fetch && self.client.is_none() {
            warn!("Fetching requested without a client, reading the cache only");
        }

        let mut window = StitchedWindow::default();
        let mut seen = HashSet::new();
        for month in months_in_window(start, end_exclusive) {
            let lower = start.max(month.start());
            let upper = end_exclusive.min(month.end());
            let (report, records) = self.stitch_month(month, can_fetch, options.force_refresh);

            let mut contributed = 0;
            for record in records {
                if record.timestamp < lower || record.timestamp >= upper {
                    continue;
                }
                if seen.insert(record.timestamp) {
                    window.records.push(record);
                    contributed += 1;
                }
            }
            let report = MonthReport {
                row_count: contributed,
                ..report
            };
            info!(
                "{} {}: {} rows{}",
                month,
                report.action,
                report.row_count,
                report
                    .error_detail
                    .as_deref()
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default()
            );
            window.months.push(report);
        }
        window.records.sort_by_key(|record| record.timestamp);
        Ok(window)
    }

    fn stitch_month(
        &self,
        month: MonthKey,
        can_fetch: bool,
        force_refresh: bool,
    ) -> (MonthReport, Vec<HourlyRecord>) {
        let refresh = force_refresh && can_fetch;
        if !refresh {
            match self.load_cached(month) {
                Ok(Some(rows)) => {
                    let report =
                        MonthReport::loaded(month, rows.records.len(), rows.mileage_available);
                    return (report, rows.records);
                }
                Ok(None) => {}
                Err(e) => return (MonthReport::error(month, format!("{:#}", e)), Vec::new()),
            }
        }
        if !can_fetch {
            return (MonthReport::missing(month), Vec::new());
        }
        let failure = match self.fetch_and_cache(month) {
            Ok(Some(rows)) => {
                let report =
                    MonthReport::fetched(month, rows.records.len(), rows.mileage_available);
                return (report, rows.records);
            }
            Ok(None) => None,
            Err(e) => Some(format!("{:#}", e)),
        };
        if refresh {
            if let Some(kept) = self.keep_cached_after_refresh(month, failure.as_deref()) {
                return kept;
            }
        }
        match failure {
            Some(detail) => (MonthReport::error(month, detail), Vec::new()),
            None => (MonthReport::missing(month), Vec::new()),
        }
    }

    /// A refresh that failed or came back empty leaves the cached month in use.
    fn keep_cached_after_refresh(
        &self,
        month: MonthKey,
        failure: Option<&str>,
    ) -> Option<(MonthReport, Vec<HourlyRecord>)> {
        let rows = match self.load_cached(month) {
            Ok(Some(rows)) => rows,
            Ok(None) => return None,
            Err(e) => {
                warn!("{}: cached partition unreadable after failed refresh ({:#})", month, e);
                return None;
            }
        };
        let detail = match failure {
            Some(detail) => format!("refresh failed, kept cached month: {}", detail),
            None => "refresh returned no rows, kept cached month".to_string(),
        };
        warn!("{}: {}", month, detail);
        let report = MonthReport {
            error_detail: Some(detail),
            ..MonthReport::loaded(month, rows.records.len(), rows.mileage_available)
        };
        Some((report, rows.records))
    }

    fn load_cached(&self, month: MonthKey) -> Result<Option<MonthRows>> {
        let Some(prices) = self.cache.read_partition(Dataset::RegulationPrices, month)? else {
            return Ok(None);
        };
        let market = match self.cache.read_partition(Dataset::RegulationMarket, month) {
            Ok(market) => market,
            Err(e) => {
                warn!("{}: unreadable market partition, neutral mileage ({:#})", month, e);
                None
            }
        };
        let rows = merge_month(month, load_price_rows(&prices)?, market.as_ref());
        Ok(Some(rows))
    }

    /// `Ok(None)` when the price feed has nothing for the month.
    ///
    /// The market partition is written before the price partition, so a cached
    /// price partition always has its mileage next to it when the feed had any.
    fn fetch_and_cache(&self, month: MonthKey) -> Result<Option<MonthRows>> {
        let Some(client) = self.client else {
            return Ok(None);
        };
        let mut prices = client.fetch_month(Dataset::RegulationPrices, month)?;
        if prices.height() == 0 {
            debug!("{}: price feed returned no rows", month);
            return Ok(None);
        }
        let mut market = match client.fetch_month(Dataset::RegulationMarket, month) {
            Ok(df) if df.height() > 0 => Some(df),
            Ok(_) => None,
            Err(e) => {
                warn!("{}: mileage fetch failed, neutral mileage ({:#})", month, e);
                None
            }
        };

        let price_rows = load_price_rows(&prices)?;
        let market_cached = match market.as_mut() {
            Some(df) => match self.cache.write_partition(Dataset::RegulationMarket, month, df) {
                Ok(_) => true,
                Err(e) => {
                    warn!("{}: market partition not cached, neutral mileage ({:#})", month, e);
                    false
                }
            },
            None => false,
        };
        if !market_cached {
            market = None;
        }
        self.cache
            .write_partition(Dataset::RegulationPrices, month, &mut prices)?;
        Ok(Some(merge_month(month, price_rows, market.as_ref())))
    }
}

/// Left-join price rows onto hourly mileage ratios. Hours without a ratio get the neutral one.
///
/// Mileage counts as available only when at least one price hour found a ratio.
fn merge_month(month: MonthKey, prices: Vec<PriceRow>, market: Option<&DataFrame>) -> MonthRows {
    let ratios: Option<BTreeMap<NaiveDateTime, f64>> = market.and_then(load_mileage_ratios);
    let mut matched = 0;
    let records: Vec<HourlyRecord> = prices
        .into_iter()
        .map(|row| {
            let ratio = match ratios.as_ref().and_then(|ratios| ratios.get(&row.timestamp)) {
                Some(ratio) => {
                    matched += 1;
                    sanitize_ratio(*ratio)
                }
                None => NEUTRAL_MILEAGE_RATIO,
            };
            HourlyRecord::new(
                row.timestamp,
                row.capability_price,
                row.performance_price,
                ratio,
            )
        })
        .collect();

    if ratios.is_some() && matched < records.len() {
        warn!(
            "{}: mileage matched {}/{} price hours, the rest use the neutral ratio",
            month,
            matched,
            records.len()
        );
    }
    MonthRows {
        mileage_available: matched > 0,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::Duration;
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn month(year: i32, month: u32) -> MonthKey {
        MonthKey::new(year, month).unwrap()
    }

    fn hours_of(month: MonthKey) -> Vec<NaiveDateTime> {
        (0..month.hours())
            .map(|h| month.start() + Duration::hours(h))
            .collect()
    }

    fn price_frame(hours: &[NaiveDateTime], capability: f64) -> DataFrame {
        let stamps: Vec<String> = hours
            .iter()
            .map(|h| h.format("%Y-%m-%dT%H:%M:%S").to_string())
            .collect();
        let capability: Vec<f64> = vec![capability; hours.len()];
        let performance: Vec<f64> = vec![2.0; hours.len()];
        df!(
            "datetime_beginning_ept" => stamps,
            "rmccp" => capability,
            "rmpcp" => performance
        )
        .unwrap()
    }

    fn market_frame(hours: &[NaiveDateTime], rega: f64, regd: f64) -> DataFrame {
        let stamps: Vec<String> = hours
            .iter()
            .map(|h| h.format("%Y-%m-%dT%H:%M:%S").to_string())
            .collect();
        df!(
            "datetime_beginning_ept" => stamps,
            "rega_hourly" => vec![rega; hours.len()],
            "regd_hourly" => vec![regd; hours.len()]
        )
        .unwrap()
    }

    /// Serves canned frames or failures and records every call.
    #[derive(Default)]
    struct ScriptedClient {
        frames: HashMap<(Dataset, MonthKey), DataFrame>,
        failures: HashMap<(Dataset, MonthKey), String>,
        calls: RefCell<Vec<(Dataset, MonthKey)>>,
    }

    impl FetchClient for ScriptedClient {
        fn fetch_month(&self, dataset: Dataset, month: MonthKey) -> Result<DataFrame> {
            self.calls.borrow_mut().push((dataset, month));
            if let Some(message) = self.failures.get(&(dataset, month)) {
                return Err(anyhow!(message.clone()));
            }
            Ok(self
                .frames
                .get(&(dataset, month))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn seed(cache: &CacheRepository, dataset: Dataset, key: MonthKey, mut df: DataFrame) {
        cache.write_partition(dataset, key, &mut df).unwrap();
    }

    #[test]
    fn test_loaded_month_uses_market_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let jan = month(2024, 1);
        seed(&cache, Dataset::RegulationPrices, jan, price_frame(&hours_of(jan), 10.0));
        seed(&cache, Dataset::RegulationMarket, jan, market_frame(&hours_of(jan), 2.0, 5.0));

        let window = WindowStitcher::new(&cache)
            .stitch(jan.start(), jan.end(), false)
            .unwrap();

        assert_eq!(window.hours(), 744);
        assert_eq!(window.months.len(), 1);
        assert_eq!(window.months[0].action, MonthAction::Loaded);
        assert_eq!(window.months[0].row_count, 744);
        assert!(window.months[0].mileage_available);
        assert!(window.records.iter().all(|r| r.mileage_ratio == 2.5));
        assert!(window.records.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_missing_mileage_is_neutral() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let feb = month(2024, 2);
        seed(&cache, Dataset::RegulationPrices, feb, price_frame(&hours_of(feb), 7.0));

        let window = WindowStitcher::new(&cache)
            .stitch(feb.start(), feb.end(), false)
            .unwrap();

        assert_eq!(window.hours(), 29 * 24);
        assert!(!window.months[0].mileage_available);
        assert!(window.records.iter().all(|r| r.mileage_ratio == 1.0));
        assert!(window.records.iter().all(|r| r.capability_price == 7.0));
        assert!(window.records.iter().all(|r| r.performance_price == 2.0));
    }

    #[test]
    fn test_zero_rega_degrades_to_neutral() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let jan = month(2024, 1);
        let hours = hours_of(jan);
        seed(&cache, Dataset::RegulationPrices, jan, price_frame(&hours, 10.0));
        seed(&cache, Dataset::RegulationMarket, jan, market_frame(&hours, 0.0, 5.0));

        let window = WindowStitcher::new(&cache)
            .stitch(jan.start(), jan.end(), false)
            .unwrap();
        assert!(window
            .records
            .iter()
            .all(|r| r.mileage_ratio.is_finite() && r.mileage_ratio == 1.0));
    }

    #[test]
    fn test_uncached_month_without_fetch_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let client = ScriptedClient::default();
        let jan = month(2024, 1);

        let window = WindowStitcher::new(&cache)
            .with_client(&client)
            .stitch(jan.start(), jan.end(), false)
            .unwrap();

        assert!(window.records.is_empty());
        assert_eq!(window.months[0].action, MonthAction::Missing);
        assert!(client.calls.borrow().is_empty());
    }

    #[test]
    fn test_failed_month_does_not_abort_window() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let (jan, feb, mar) = (month(2024, 1), month(2024, 2), month(2024, 3));
        seed(&cache, Dataset::RegulationPrices, jan, price_frame(&hours_of(jan), 1.0));
        seed(&cache, Dataset::RegulationPrices, mar, price_frame(&hours_of(mar), 3.0));

        let mut client = ScriptedClient::default();
        client.failures.insert(
            (Dataset::RegulationPrices, feb),
            "HTTP 429 Too Many Requests".to_string(),
        );

        let window = WindowStitcher::new(&cache)
            .with_client(&client)
            .stitch(jan.start(), mar.end(), true)
            .unwrap();

        let actions: Vec<MonthAction> = window.months.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![MonthAction::Loaded, MonthAction::Error, MonthAction::Loaded]
        );
        assert!(window.months[1]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("429"));
        assert_eq!(window.hours(), (jan.hours() + mar.hours()) as usize);
        assert!(window
            .records
            .iter()
            .all(|r| MonthKey::of(r.timestamp) != feb));
        assert_eq!(window.gaps().count(), 1);
    }

    #[test]
    fn test_fetched_month_is_cached_for_next_stitch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let jan = month(2024, 1);
        let mut client = ScriptedClient::default();
        client
            .frames
            .insert((Dataset::RegulationPrices, jan), price_frame(&hours_of(jan), 4.0));
        client.failures.insert(
            (Dataset::RegulationMarket, jan),
            "connection reset".to_string(),
        );

        let stitcher = WindowStitcher::new(&cache).with_client(&client);
        let first = stitcher.stitch(jan.start(), jan.end(), true).unwrap();
        assert_eq!(first.months[0].action, MonthAction::Fetched);
        assert!(!first.months[0].mileage_available);
        assert!(cache.has_partition(Dataset::RegulationPrices, jan));
        assert!(!cache.has_partition(Dataset::RegulationMarket, jan));

        let second = stitcher.stitch(jan.start(), jan.end(), true).unwrap();
        assert_eq!(second.months[0].action, MonthAction::Loaded);
        assert_eq!(second.records, first.records);
        assert_eq!(client.calls.borrow().len(), 2);
    }

    #[test]
    fn test_empty_price_feed_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let client = ScriptedClient::default();
        let jan = month(2024, 1);

        let window = WindowStitcher::new(&cache)
            .with_client(&client)
            .stitch(jan.start(), jan.end(), true)
            .unwrap();
        assert_eq!(window.months[0].action, MonthAction::Missing);
        assert!(!cache.has_partition(Dataset::RegulationPrices, jan));
    }

    #[test]
    fn test_force_refresh_refetches_cached_month() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let jan = month(2024, 1);
        seed(&cache, Dataset::RegulationPrices, jan, price_frame(&hours_of(jan), 1.0));
        let mut client = ScriptedClient::default();
        client
            .frames
            .insert((Dataset::RegulationPrices, jan), price_frame(&hours_of(jan), 9.0));

        let window = WindowStitcher::new(&cache)
            .with_client(&client)
            .stitch_with(
                jan.start(),
                jan.end(),
                StitchOptions {
                    allow_fetch: true,
                    force_refresh: true,
                },
            )
            .unwrap();

        assert_eq!(window.months[0].action, MonthAction::Fetched);
        assert!(window.records.iter().all(|r| r.capability_price == 9.0));
    }

    #[test]
    fn test_stitch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let (jan, feb) = (month(2024, 1), month(2024, 2));
        for key in [jan, feb] {
            seed(&cache, Dataset::RegulationPrices, key, price_frame(&hours_of(key), 5.0));
            seed(&cache, Dataset::RegulationMarket, key, market_frame(&hours_of(key), 1.0, 3.0));
        }

        let stitcher = WindowStitcher::new(&cache);
        let first = stitcher.stitch(jan.start(), feb.end(), false).unwrap();
        let second = stitcher.stitch(jan.start(), feb.end(), false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_partial_months_are_clipped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let (jan, feb) = (month(2024, 1), month(2024, 2));
        seed(&cache, Dataset::RegulationPrices, jan, price_frame(&hours_of(jan), 1.0));
        seed(&cache, Dataset::RegulationPrices, feb, price_frame(&hours_of(feb), 2.0));

        let window = WindowStitcher::new(&cache)
            .stitch(ts("2024-01-31 12:00"), ts("2024-02-01 06:00"), false)
            .unwrap();

        assert_eq!(window.hours(), 18);
        assert_eq!(window.records[0].timestamp, ts("2024-01-31 12:00"));
        assert_eq!(window.records[17].timestamp, ts("2024-02-01 05:00"));
        assert_eq!(window.months[0].row_count, 12);
        assert_eq!(window.months[1].row_count, 6);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let jan = month(2024, 1);
        let df = df!(
            "datetime_beginning_ept" => &[
                "2024-01-01T01:00:00",
                "2024-01-01T00:00:00",
                "2024-01-01T01:00:00"
            ],
            "rmccp" => &[1.0, 2.0, 3.0],
            "rmpcp" => &[0.0, 0.0, 0.0]
        )
        .unwrap();
        seed(&cache, Dataset::RegulationPrices, jan, df);

        let window = WindowStitcher::new(&cache)
            .stitch(jan.start(), jan.end(), false)
            .unwrap();
        assert_eq!(window.hours(), 2);
        assert_eq!(window.records[0].capability_price, 2.0);
        assert_eq!(window.records[1].capability_price, 1.0);
    }

    #[test]
    fn test_unmatched_mileage_is_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let jan = month(2024, 1);
        let last_year: Vec<NaiveDateTime> = hours_of(jan)
            .into_iter()
            .map(|h| h - Duration::days(365))
            .collect();
        seed(&cache, Dataset::RegulationPrices, jan, price_frame(&hours_of(jan), 10.0));
        seed(&cache, Dataset::RegulationMarket, jan, market_frame(&last_year, 2.0, 5.0));

        let window = WindowStitcher::new(&cache)
            .stitch(jan.start(), jan.end(), false)
            .unwrap();

        assert_eq!(window.hours(), 744);
        assert!(!window.months[0].mileage_available);
        assert!(window.records.iter().all(|r| r.mileage_ratio == 1.0));
    }

    #[test]
    fn test_partially_matched_mileage_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let jan = month(2024, 1);
        let hours = hours_of(jan);
        seed(&cache, Dataset::RegulationPrices, jan, price_frame(&hours, 10.0));
        seed(&cache, Dataset::RegulationMarket, jan, market_frame(&hours[..24], 2.0, 5.0));

        let window = WindowStitcher::new(&cache)
            .stitch(jan.start(), jan.end(), false)
            .unwrap();

        assert!(window.months[0].mileage_available);
        let matched = window.records.iter().filter(|r| r.mileage_ratio == 2.5).count();
        assert_eq!(matched, 24);
    }

    #[test]
    fn test_failed_refresh_keeps_cached_month() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let jan = month(2024, 1);
        seed(&cache, Dataset::RegulationPrices, jan, price_frame(&hours_of(jan), 6.0));
        let mut client = ScriptedClient::default();
        client.failures.insert(
            (Dataset::RegulationPrices, jan),
            "HTTP 503 Service Unavailable".to_string(),
        );

        let options = StitchOptions {
            allow_fetch: true,
            force_refresh: true,
        };
        let window = WindowStitcher::new(&cache)
            .with_client(&client)
            .stitch_with(jan.start(), jan.end(), options)
            .unwrap();

        let report = &window.months[0];
        assert_eq!(report.action, MonthAction::Loaded);
        assert_eq!(report.row_count, 744);
        assert!(report.error_detail.as_deref().unwrap().contains("503"));
        assert_eq!(window.hours(), 744);
        assert!(window.records.iter().all(|r| r.capability_price == 6.0));
    }

    #[test]
    fn test_failed_refresh_without_cache_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let jan = month(2024, 1);
        let mut client = ScriptedClient::default();
        client
            .failures
            .insert((Dataset::RegulationPrices, jan), "timed out".to_string());

        let options = StitchOptions {
            allow_fetch: true,
            force_refresh: true,
        };
        let window = WindowStitcher::new(&cache)
            .with_client(&client)
            .stitch_with(jan.start(), jan.end(), options)
            .unwrap();
        assert_eq!(window.months[0].action, MonthAction::Error);
        assert!(window.records.is_empty());
    }

    #[test]
    fn test_market_write_failure_keeps_prices_neutral() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        // A plain file where the market directory should be.
        std::fs::write(dir.path().join("market"), b"").unwrap();
        let jan = month(2024, 1);
        let mut client = ScriptedClient::default();
        client
            .frames
            .insert((Dataset::RegulationPrices, jan), price_frame(&hours_of(jan), 4.0));
        client.frames.insert(
            (Dataset::RegulationMarket, jan),
            market_frame(&hours_of(jan), 2.0, 5.0),
        );

        let stitcher = WindowStitcher::new(&cache).with_client(&client);
        let first = stitcher.stitch(jan.start(), jan.end(), true).unwrap();
        assert_eq!(first.months[0].action, MonthAction::Fetched);
        assert!(first.months[0].error_detail.is_none());
        assert!(!first.months[0].mileage_available);
        assert!(first.records.iter().all(|r| r.mileage_ratio == 1.0));

        let second = stitcher.stitch(jan.start(), jan.end(), false).unwrap();
        assert_eq!(second.months[0].action, MonthAction::Loaded);
        assert_eq!(second.records, first.records);
    }

    #[test]
    fn test_reversed_window_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheRepository::new(dir.path());
        let result = WindowStitcher::new(&cache).stitch(
            ts("2024-02-01 00:00"),
            ts("2024-01-01 00:00"),
            false,
        );
        assert!(matches!(result, Err(EstimateError::InvalidWindow { .. })));
    }
}
