use polars::prelude::*;

/// Typed fields the engine reads out of raw feed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedColumn {
    Timestamp,
    CapabilityPrice,
    PerformancePrice,
    RegAMileage,
    RegDMileage,
}

impl FeedColumn {
    /// Known column names across feed vintages, preferred name first.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            FeedColumn::Timestamp => &[
                "datetime_beginning_ept",
                "timestamp",
                "ts",
                "datetime_beginning_utc",
            ],
            FeedColumn::CapabilityPrice => &["rmccp", "capability_price", "reg_ccp"],
            FeedColumn::PerformancePrice => &["rmpcp", "performance_price", "reg_pcp"],
            FeedColumn::RegAMileage => &[
                "rega_hourly",
                "reg_a_hourly",
                "rega_mileage",
                "mileage_signal_a",
            ],
            FeedColumn::RegDMileage => &[
                "regd_hourly",
                "reg_d_hourly",
                "regd_mileage",
                "mileage_signal_b",
            ],
        }
    }
}

/// Resolves feed columns against a frame once, at ingestion.
pub struct ColumnMapper;

impl ColumnMapper {
    /// First column matching an alias, in alias order. Names compare case-insensitively.
    pub fn resolve<'a>(df: &'a DataFrame, column: FeedColumn) -> Option<&'a Series> {
        column.aliases().iter().find_map(|alias| {
            df.get_columns()
                .iter()
                .find(|series| series.name().eq_ignore_ascii_case(alias))
        })
    }

    pub fn resolve_all<'a>(
        df: &'a DataFrame,
        columns: &[FeedColumn],
    ) -> Option<Vec<&'a Series>> {
        columns
            .iter()
            .map(|column| Self::resolve(df, *column))
            .collect()
    }
}
