use anyhow::{anyhow, bail, Context, Result};
use chrono::Duration as ChronoDuration;
use log::{info, warn};
use polars::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

use crate::models::{Dataset, MonthKey};

/// Source of raw monthly feed frames.
///
/// Implementations own retries and timeouts; callers only see success or failure.
pub trait FetchClient {
    fn fetch_month(&self, dataset: Dataset, month: MonthKey) -> Result<DataFrame>;
}

/// Data Miner subscription keys.
#[derive(Clone)]
pub struct PjmCredentials {
    primary_key: String,
    secondary_key: Option<String>,
}

impl PjmCredentials {
    /// Checked in order, first non-empty wins.
    pub const PRIMARY_KEY_VARS: [&'static str; 4] = [
        "PJM_API_PRIMARY_KEY",
        "PJM_API_KEY",
        "PJM_PRIMARY_KEY",
        "PJM_KEY",
    ];
    pub const SECONDARY_KEY_VAR: &'static str = "PJM_API_SECONDARY_KEY";

    pub fn new(primary_key: impl Into<String>, secondary_key: Option<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            secondary_key,
        }
    }

    /// `None` when no primary key is configured.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let primary_key = Self::PRIMARY_KEY_VARS.iter().find_map(|name| non_empty(*name))?;
        Some(Self {
            primary_key,
            secondary_key: non_empty(Self::SECONDARY_KEY_VAR),
        })
    }
}

impl std::fmt::Debug for PjmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PjmCredentials")
            .field("primary_key", &"***")
            .field("secondary_key", &self.secondary_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Deserialize)]
struct ItemsPage {
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

/// Blocking client for the PJM Data Miner v1 regulation feeds.
pub struct PjmClient {
    agent: ureq::Agent,
    base_url: String,
    credentials: PjmCredentials,
    max_attempts: u32,
    backoff: Duration,
}

impl PjmClient {
    pub const BASE_URL: &'static str = "https://api.pjm.com/api/v1";
    /// Large enough for a month of hourly rows in one page.
    pub const ROW_COUNT: usize = 50_000;

    pub fn new(credentials: PjmCredentials) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(60))
            .build();
        Self {
            agent,
            base_url: Self::BASE_URL.to_string(),
            credentials,
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }

    pub fn from_env() -> Result<Self> {
        let credentials = PjmCredentials::from_env().ok_or_else(|| {
            anyhow!(
                "no PJM API key found, set {} (or one of {:?})",
                PjmCredentials::PRIMARY_KEY_VARS[0],
                &PjmCredentials::PRIMARY_KEY_VARS[1..]
            )
        })?;
        Ok(Self::new(credentials))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Data Miner ranges are inclusive, so the month end is pulled back one second.
    pub fn ept_range(month: MonthKey) -> String {
        let end_inclusive = month.end() - ChronoDuration::seconds(1);
        format!(
            "{} to {}",
            month.start().format("%Y-%m-%d %H:%M:%S"),
            end_inclusive.format("%Y-%m-%d %H:%M:%S")
        )
    }

    fn get_items(&self, feed: &str, range: &str) -> Result<Vec<Map<String, Value>>> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), feed);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .agent
                .get(&url)
                .set("Ocp-Apim-Subscription-Key", &self.credentials.primary_key)
                .query("datetime_beginning_ept", range)
                .query("rowCount", &Self::ROW_COUNT.to_string())
                .query("startRow", "1");
            if let Some(secondary) = &self.credentials.secondary_key {
                request = request.set("Ocp-Apim-Subscription-Key-Secondary", secondary);
            }

            let retryable = match request.call() {
                Ok(response) => {
                    let page: ItemsPage = response
                        .into_json()
                        .with_context(|| format!("parsing {} response", feed))?;
                    return Ok(page.items);
                }
                Err(ureq::Error::Status(code, _)) if code == 429 || code >= 500 => {
                    format!("HTTP {}", code)
                }
                Err(ureq::Error::Status(code, response)) => {
                    let body = response.into_string().unwrap_or_default();
                    bail!("{} returned HTTP {}: {}", feed, code, body.trim());
                }
                Err(ureq::Error::Transport(transport)) => transport.to_string(),
            };

            if attempt >= self.max_attempts {
                bail!("{} failed after {} attempts: {}", feed, attempt, retryable);
            }
            let wait = self.backoff * attempt;
            warn!(
                "{} attempt {} failed ({}), retrying in {:?}",
                feed, attempt, retryable, wait
            );
            std::thread::sleep(wait);
        }
    }
}

impl FetchClient for PjmClient {
    fn fetch_month(&self, dataset: Dataset, month: MonthKey) -> Result<DataFrame> {
        let items = self.get_items(dataset.feed_name(), &Self::ept_range(month))?;
        info!("Fetched {} {} rows for {}", items.len(), dataset, month);
        items_to_frame(&items)
    }
}

/// Turn JSON items into a frame with lower-cased column names.
///
/// A column whose non-null values are all numbers becomes `Float64`, anything
/// else is kept as strings so coercion can happen at ingestion.
pub fn items_to_frame(items: &[Map<String, Value>]) -> Result<DataFrame> {
    let mut names: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for item in items {
        for key in item.keys() {
            if seen.insert(key.clone()) {
                names.push(key.clone());
            }
        }
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in &names {
        let values: Vec<Option<&Value>> = items
            .iter()
            .map(|item| item.get(name).filter(|v| !v.is_null()))
            .collect();
        let column_name = name.to_lowercase();
        let numeric = values.iter().flatten().all(|v| v.is_number());
        let series = if numeric {
            let floats: Vec<Option<f64>> = values
                .iter()
                .map(|v| v.and_then(Value::as_f64))
                .collect();
            Series::new(column_name.as_str().into(), floats)
        } else {
            let strings: Vec<Option<String>> = values
                .iter()
                .map(|v| {
                    v.map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                })
                .collect();
            Series::new(column_name.as_str().into(), strings)
        };
        columns.push(series);
    }
    Ok(DataFrame::new(columns)?)
}
