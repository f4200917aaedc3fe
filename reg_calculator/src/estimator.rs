use chrono::NaiveDateTime;
use log::info;
use serde::{Deserialize, Serialize};

use crate::budget::hours_budget;
use crate::cache::CacheRepository;
use crate::calculator::{top_hours, PaymentCalculator};
use crate::client::FetchClient;
use crate::error::EstimateError;
use crate::models::{
    validate_performance_score, AssetParams, MonthReport, RankingMetric, RevenueSummary,
    SelectedHour, SelectionPolicy,
};
use crate::selector::{max_consecutive_hours, DurationFeasibleSelector};
use crate::stitcher::{StitchOptions, WindowStitcher};

/// Hours listed in `RegulationEstimate::top_hours`.
pub const DEFAULT_TOP_HOURS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateRequest {
    pub start: NaiveDateTime,
    pub end_exclusive: NaiveDateTime,
    pub asset: AssetParams,
    pub annual_cycles: u32,
    /// MWh of throughput per hour of regulation service.
    pub throughput_ratio: f64,
    pub performance_score: f64,
    pub ranking: RankingMetric,
    pub allow_fetch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulationEstimate {
    pub window_hours: usize,
    pub hours_budget: usize,
    pub max_consecutive: usize,
    pub policy: SelectionPolicy,
    pub summary: RevenueSummary,
    pub selected: Vec<SelectedHour>,
    pub top_hours: Vec<SelectedHour>,
    pub months: Vec<MonthReport>,
}

/// Stitch, budget, select and price in one call.
pub struct RegulationEstimator<'a> {
    stitcher: WindowStitcher<'a>,
    top_n: usize,
}

impl<'a> RegulationEstimator<'a> {
    pub fn new(cache: &'a CacheRepository) -> Self {
        Self {
            stitcher: WindowStitcher::new(cache),
            top_n: DEFAULT_TOP_HOURS,
        }
    }

    pub fn with_client(mut self, client: &'a dyn FetchClient) -> Self {
        self.stitcher = self.stitcher.with_client(client);
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn estimate(&self, request: &EstimateRequest) -> Result<RegulationEstimate, EstimateError> {
        request.asset.validate()?;
        validate_performance_score(request.performance_score)?;
        let max_consecutive = max_consecutive_hours(request.asset.duration_hours)?;
        // Reject a bad throughput before touching the cache.
        hours_budget(&request.asset, request.annual_cycles, request.throughput_ratio, 0)?;

        let options = StitchOptions {
            allow_fetch: request.allow_fetch,
            force_refresh: false,
        };
        let window = self
            .stitcher
            .stitch_with(request.start, request.end_exclusive, options)?;
        let window_hours = window.hours();
        let budget = hours_budget(
            &request.asset,
            request.annual_cycles,
            request.throughput_ratio,
            window_hours,
        )?;
        let policy = SelectionPolicy {
            ranking: request.ranking,
            performance_score: request.performance_score,
            hours_budget: budget,
        };

        let chosen = DurationFeasibleSelector::new(policy.ranking, max_consecutive)
            .select(&window.records, policy.hours_budget);
        let (selected, summary) =
            PaymentCalculator::new(request.asset.nameplate_power_mw, policy.performance_score)
                .price(&chosen);
        info!(
            "Selected {} of {} hours (budget {}, max run {}), total credit {:.2}",
            summary.hour_count, window_hours, budget, max_consecutive, summary.total_credit_sum
        );

        Ok(RegulationEstimate {
            window_hours,
            hours_budget: budget,
            max_consecutive,
            policy,
            summary,
            top_hours: top_hours(&selected, self.top_n),
            selected,
            months: window.months,
        })
    }
}
