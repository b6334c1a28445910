//! National Grid ESO system frequency data.
//!
//! The operator publishes one CSV per month (`dtm,f`, one row per second)
//! listed in a CKAN data package. A cache miss downloads every month the
//! missing dates touch, once, and keeps the rows on those dates.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use enf_core::{Dataset, FrequencySample, ReferenceProvider, YearMonth};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const ESO_DATASET: &str = "eso";
pub const ESO_NOMINAL_FREQUENCY: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct EsoConfig {
    /// CKAN action API root.
    pub base_url: String,
    pub package_id: String,
    pub timeout: Duration,
}

impl Default for EsoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.neso.energy/api/3/action".to_string(),
            package_id: "system-frequency-data".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Error)]
pub enum EsoError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("data package '{0}' could not be loaded")]
    Catalogue(String),

    #[error("malformed frequency CSV: {0}")]
    Format(String),
}

#[derive(Debug, Deserialize)]
struct CkanResponse {
    success: bool,
    result: Option<CkanPackage>,
}

#[derive(Debug, Deserialize)]
struct CkanPackage {
    #[serde(default)]
    resources: Vec<CkanResource>,
}

#[derive(Debug, Deserialize)]
struct CkanResource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

pub struct EsoProvider {
    client: Client,
    config: EsoConfig,
}

impl EsoProvider {
    pub fn new(config: EsoConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("enf-locator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// Register under [`ESO_DATASET`] with a 50 Hz nominal frequency.
    pub fn into_dataset(self) -> Dataset {
        Dataset::new(ESO_DATASET, ESO_NOMINAL_FREQUENCY, Arc::new(self))
    }

    /// Month -> CSV download URL.
    pub async fn resources(&self) -> Result<BTreeMap<YearMonth, String>, EsoError> {
        let url = format!(
            "{}/datapackage_show?id={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.package_id
        );
        let response: CkanResponse = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| EsoError::Http {
                url: url.clone(),
                source,
            })?
            .json()
            .await
            .map_err(|source| EsoError::Http { url, source })?;

        let package = match response {
            CkanResponse {
                success: true,
                result: Some(package),
            } => package,
            _ => return Err(EsoError::Catalogue(self.config.package_id.clone())),
        };
        Ok(monthly_resources(package.resources))
    }

    async fn fetch_csv(&self, url: &str) -> Result<String, EsoError> {
        let http = |source| EsoError::Http {
            url: url.to_string(),
            source,
        };
        self.client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http)?
            .text()
            .await
            .map_err(http)
    }
}

#[async_trait]
impl ReferenceProvider for EsoProvider {
    async fn query_dates(
        &self,
        dataset: &str,
        dates: &BTreeSet<NaiveDate>,
    ) -> anyhow::Result<Vec<FrequencySample>> {
        if dates.is_empty() {
            return Ok(Vec::new());
        }

        let resources = self.resources().await?;
        let months: BTreeSet<YearMonth> = dates.iter().map(|d| YearMonth::of(*d)).collect();

        let mut samples = Vec::new();
        for month in months {
            let Some(url) = resources.get(&month) else {
                debug!(%month, "month not published");
                continue;
            };
            let body = self.fetch_csv(url).await?;
            let (rows, skipped) = parse_month_csv(dataset, &body)?;
            if skipped > 0 {
                warn!(%month, skipped, "ignored unparsable rows");
            }
            samples.extend(rows.into_iter().filter(|s| dates.contains(&s.date())));
        }

        info!(
            dataset,
            days = dates.len(),
            samples = samples.len(),
            "fetched reference data"
        );
        Ok(samples)
    }

    async fn catalogue(&self) -> anyhow::Result<Vec<YearMonth>> {
        Ok(self.resources().await?.into_keys().collect())
    }
}

fn monthly_resources(resources: Vec<CkanResource>) -> BTreeMap<YearMonth, String> {
    resources
        .into_iter()
        .filter(|r| !r.url.is_empty())
        .filter_map(|r| {
            let month = resource_month(&r.name).or_else(|| resource_month(&r.url))?;
            Some((month, r.url))
        })
        .collect()
}

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Reads the month out of names such as `f-2023-2`, `fnew-2023-02.csv` or
/// `System Frequency Data - February 2023`.
pub fn resource_month(text: &str) -> Option<YearMonth> {
    let lower = text.to_ascii_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let is_year = |t: &str| t.len() == 4 && t.parse::<i32>().is_ok_and(|y| (1990..=2100).contains(&y));

    for (i, token) in tokens.iter().enumerate() {
        if !is_year(token) {
            continue;
        }
        let year: i32 = token.parse().ok()?;
        if let Some(month) = tokens
            .get(i + 1)
            .filter(|t| t.len() <= 2)
            .and_then(|t| t.parse::<u32>().ok())
        {
            if let Ok(ym) = YearMonth::new(year, month) {
                return Some(ym);
            }
        }
        if let Some(month) = tokens.iter().find_map(|t| {
            MONTH_NAMES
                .iter()
                .position(|name| t.starts_with(name))
                .map(|idx| idx as u32 + 1)
        }) {
            return YearMonth::new(year, month).ok();
        }
    }
    None
}

/// Parse one month file. Returns the samples and the number of rows skipped.
pub fn parse_month_csv(
    dataset: &str,
    body: &str,
) -> Result<(Vec<FrequencySample>, usize), EsoError> {
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| EsoError::Format("empty file".to_string()))?;
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().trim_matches('"').to_ascii_lowercase())
        .collect();
    let column = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| EsoError::Format(format!("missing '{name}' column in '{header}'")))
    };
    let (dtm, f) = (column("dtm")?, column("f")?);

    let mut samples = Vec::new();
    let mut skipped = 0;
    for line in lines {
        let fields: Vec<&str> = line.split(',').map(|v| v.trim().trim_matches('"')).collect();
        let parsed = fields
            .get(dtm)
            .and_then(|raw| parse_timestamp(raw))
            .zip(fields.get(f).and_then(|raw| raw.parse::<f64>().ok()));
        match parsed {
            Some((timestamp, frequency)) if frequency.is_finite() => {
                samples.push(FrequencySample::new(dataset, timestamp, frequency))
            }
            _ => skipped += 1,
        }
    }
    Ok((samples, skipped))
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%d/%m/%Y %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
