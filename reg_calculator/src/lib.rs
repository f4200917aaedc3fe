pub mod budget;
pub mod cache;
pub mod calculator;
pub mod calendar;
pub mod client;
pub mod coerce;
pub mod column_mapper;
pub mod data_loader;
pub mod error;
pub mod estimator;
pub mod models;
pub mod selector;
pub mod stitcher;

pub use budget::hours_budget;
pub use cache::CacheRepository;
pub use calculator::PaymentCalculator;
pub use client::{FetchClient, PjmClient, PjmCredentials};
pub use error::EstimateError;
pub use estimator::{EstimateRequest, RegulationEstimate, RegulationEstimator};
pub use models::{
    AssetParams, Dataset, HourlyRecord, MonthAction, MonthKey, MonthReport, RankingMetric,
    RevenueSummary, SelectedHour, SelectionPolicy,
};
pub use selector::{max_consecutive_hours, DurationFeasibleSelector};
pub use stitcher::{StitchOptions, StitchedWindow, WindowStitcher};
