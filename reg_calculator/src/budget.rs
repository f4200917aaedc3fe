use crate::error::EstimateError;
use crate::models::AssetParams;

/// Throughput ratios below this are raised to it so the budget stays bounded.
pub const MIN_THROUGHPUT_RATIO: f64 = 1e-6;

/// Hours the asset may spend in the regulation market for a target cycle count.
///
/// `hours_per_cycle = duration / throughput_ratio`, the budget is
/// `floor(hours_per_cycle * annual_cycles)` clamped to `[0, window_hours]`.
pub fn hours_budget(
    asset: &AssetParams,
    annual_cycles: u32,
    throughput_ratio_mwh_per_hour: f64,
    window_hours: usize,
) -> Result<usize, EstimateError> {
    if !asset.duration_hours.is_finite() || asset.duration_hours <= 0.0 {
        return Err(EstimateError::InvalidDuration(asset.duration_hours));
    }
    if !throughput_ratio_mwh_per_hour.is_finite() || throughput_ratio_mwh_per_hour <= 0.0 {
        return Err(EstimateError::InvalidThroughputRatio(
            throughput_ratio_mwh_per_hour,
        ));
    }
    let throughput = throughput_ratio_mwh_per_hour.max(MIN_THROUGHPUT_RATIO);
    let hours_per_cycle = asset.duration_hours / throughput;
    let raw_hours = (hours_per_cycle * f64::from(annual_cycles)).floor();

    // Saturating cast.
    Ok((raw_hours.max(0.0) as usize).min(window_hours))
}
