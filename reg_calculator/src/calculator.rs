use crate::models::{HourlyRecord, RevenueSummary, SelectedHour};

/// Market interval length. Credits are per MW per interval, so one hour of
/// regulation at `P` MW counts as `P * HOURS_PER_INTERVAL` MWh.
pub const HOURS_PER_INTERVAL: f64 = 1.0;

/// Capability and performance credits for a set of dispatched hours.
pub struct PaymentCalculator {
    asset_power_mw: f64,
    performance_score: f64,
}

impl PaymentCalculator {
    pub fn new(asset_power_mw: f64, performance_score: f64) -> Self {
        Self {
            asset_power_mw,
            performance_score,
        }
    }

    pub fn credit_hour(&self, record: &HourlyRecord) -> SelectedHour {
        let energy_mwh = self.asset_power_mw * HOURS_PER_INTERVAL;
        let capability_credit = record.capability_price * energy_mwh * self.performance_score;
        let performance_credit = record.performance_price
            * energy_mwh
            * record.mileage_ratio
            * self.performance_score;
        SelectedHour {
            timestamp: record.timestamp,
            capability_price: record.capability_price,
            performance_price: record.performance_price,
            mileage_ratio: record.mileage_ratio,
            capability_credit,
            performance_credit,
            total_credit: capability_credit + performance_credit,
        }
    }

    pub fn price(&self, selected: &[HourlyRecord]) -> (Vec<SelectedHour>, RevenueSummary) {
        let hours: Vec<SelectedHour> = selected.iter().map(|r| self.credit_hour(r)).collect();
        let summary = summarize(&hours);
        (hours, summary)
    }
}

/// Sums and averages over priced hours. Averages are `None` for an empty set.
pub fn summarize(hours: &[SelectedHour]) -> RevenueSummary {
    if hours.is_empty() {
        return RevenueSummary::default();
    }
    let count = hours.len() as f64;
    let mean = |value: fn(&SelectedHour) -> f64| hours.iter().map(value).sum::<f64>() / count;

    RevenueSummary {
        hour_count: hours.len(),
        capability_credit_sum: hours.iter().map(|h| h.capability_credit).sum(),
        performance_credit_sum: hours.iter().map(|h| h.performance_credit).sum(),
        total_credit_sum: hours.iter().map(|h| h.total_credit).sum(),
        avg_capability_price: Some(mean(|h| h.capability_price)),
        avg_performance_price: Some(mean(|h| h.performance_price)),
        avg_mileage_ratio: Some(mean(|h| h.mileage_ratio)),
    }
}

/// Price the selected hours for an asset of `asset_power_mw` at `performance_score`.
pub fn price(
    selected: &[HourlyRecord],
    asset_power_mw: f64,
    performance_score: f64,
) -> (Vec<SelectedHour>, RevenueSummary) {
    PaymentCalculator::new(asset_power_mw, performance_score).price(selected)
}

/// The `n` best-paying hours, highest total credit first, ties in time order.
pub fn top_hours(hours: &[SelectedHour], n: usize) -> Vec<SelectedHour> {
    let mut ranked = hours.to_vec();
    ranked.sort_by(|a, b| {
        b.total_credit
            .total_cmp(&a.total_credit)
            .then(a.timestamp.cmp(&b.timestamp))
    });
    ranked.truncate(n);
    ranked
}
