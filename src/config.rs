use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::ranking::client::RetryPolicy;
use crate::ranking::gemini::GEMINI_API_BASE;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_recipient_name")]
    pub recipient_name: String,
    /// Offset from UTC used for the snapshot date
    #[serde(default)]
    pub timezone_offset_hours: i32,
    /// Date of edition 1, written as a quoted `YYYY-MM-DD` string
    #[serde(default)]
    pub edition_start: Option<NaiveDate>,
    /// Section names that are never fetched
    #[serde(default)]
    pub skip: Vec<String>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub hacker_news: HackerNewsConfig,
    #[serde(default)]
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub github_trending: GithubTrendingConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub stocks: StocksConfig,
    #[serde(default)]
    pub exchange_rates: ExchangeRatesConfig,
    /// Only ever read from `GEMINI_API_KEY`
    #[serde(skip)]
    pub gemini_api_key: Option<String>,
}

fn default_recipient_name() -> String {
    "Reader".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub max_workers: usize,
    /// Aggregate deadline for the whole fetch phase
    pub deadline_secs: Option<u64>,
    pub request_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_workers: crate::orchestrator::DEFAULT_MAX_WORKERS,
            deadline_secs: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    pub enabled: bool,
    pub fetch_multiplier: usize,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub min_call_gap_secs: f64,
    pub max_retries: u32,
    pub backoff_base_secs: f64,
    pub api_base: String,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fetch_multiplier: 2,
            model: "gemini-2.5-flash".to_string(),
            fallback_models: vec![
                "gemini-2.5-flash".to_string(),
                "gemini-2.5-flash-lite".to_string(),
            ],
            min_call_gap_secs: 1.0,
            max_retries: 2,
            backoff_base_secs: 2.0,
            api_base: GEMINI_API_BASE.to_string(),
        }
    }
}

impl RankingConfig {
    /// Primary model followed by the fallbacks, duplicates removed.
    pub fn model_candidates(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        std::iter::once(&self.model)
            .chain(&self.fallback_models)
            .filter(|m| !m.is_empty() && seen.insert(m.as_str()))
            .cloned()
            .collect()
    }

    pub fn min_call_gap(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_call_gap_secs).unwrap_or(Duration::ZERO)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_secs: self.backoff_base_secs,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NewsConfig {
    pub feeds: Vec<String>,
    pub max_items: usize,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            max_items: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HackerNewsConfig {
    pub max_stories: usize,
    pub api_base: String,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            max_stories: 5,
            api_base: "https://hacker-news.firebaseio.com/v0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ArxivConfig {
    pub api_base: String,
    pub queries: Vec<ArxivQuery>,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            api_base: "https://export.arxiv.org".to_string(),
            queries: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ArxivQuery {
    pub query: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_arxiv_max_results")]
    pub max_results: usize,
}

fn default_arxiv_max_results() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GithubTrendingConfig {
    pub languages: Vec<String>,
    pub max_per_lang: usize,
    pub api_base: String,
}

impl Default for GithubTrendingConfig {
    fn default() -> Self {
        Self {
            languages: Vec::new(),
            max_per_lang: 3,
            api_base: "https://api.github.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WeatherConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub location: String,
    pub api_base: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            latitude: 37.3688,
            longitude: -122.0363,
            location: "Sunnyvale, CA".to_string(),
            api_base: "https://api.open-meteo.com".to_string(),
        }
    }
}

pub const YAHOO_CHART_API_BASE: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StocksConfig {
    /// Ticker symbols, e.g. `AAPL`
    pub symbols: Vec<String>,
    /// Display names keyed by symbol; the symbol itself is used when absent
    pub names: BTreeMap<String, String>,
    pub api_base: String,
}

impl Default for StocksConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            names: BTreeMap::new(),
            api_base: YAHOO_CHART_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExchangeRatesConfig {
    /// Currency pairs written `BASE/QUOTE`, e.g. `USD/CNY`
    pub pairs: Vec<String>,
    pub names: BTreeMap<String, String>,
    pub api_base: String,
}

impl Default for ExchangeRatesConfig {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            names: BTreeMap::new(),
            api_base: YAHOO_CHART_API_BASE.to_string(),
        }
    }
}

/// Final display counts per ranked section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quotas {
    pub news: usize,
    pub hn: usize,
    pub arxiv: usize,
    pub github: usize,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in the binary.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.gemini_api_key = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty());

        if let Some(v) = lookup("RANKING_ENABLED") {
            self.ranking.enabled = parse_bool(&v)
                .with_context(|| format!("RANKING_ENABLED must be true or false, got '{}'", v))?;
        }
        if let Some(v) = lookup("NEWS_MAX_ITEMS") {
            self.news.max_items = v.trim().parse::<usize>().context("NEWS_MAX_ITEMS")?;
        }
        if let Some(v) = lookup("HN_MAX_STORIES") {
            self.hacker_news.max_stories = v.trim().parse::<usize>().context("HN_MAX_STORIES")?;
        }
        if let Some(v) = lookup("STOCK_SYMBOLS") {
            let symbols: Vec<String> = csv(&v).collect();
            if !symbols.is_empty() {
                self.stocks.symbols = symbols;
            }
        }
        if let Some(v) = lookup("SKIP_SECTIONS") {
            self.skip.extend(csv(&v));
        }
        Ok(())
    }

    pub fn quotas(&self) -> Quotas {
        Quotas {
            news: self.news.max_items,
            hn: self.hacker_news.max_stories,
            arxiv: self
                .arxiv
                .queries
                .iter()
                .fold(0usize, |total, q| total.saturating_add(q.max_results)),
            github: self
                .github_trending
                .max_per_lang
                .saturating_mul(self.github_trending.languages.len()),
        }
    }

    /// How many times the display quota each source should fetch.
    pub fn fetch_multiplier(&self) -> usize {
        if self.ranking.enabled {
            self.ranking.fetch_multiplier.max(1)
        } else {
            1
        }
    }

    pub fn skip_set(&self) -> HashSet<String> {
        self.skip.iter().map(|s| s.trim().to_string()).collect()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.fetch.deadline_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.request_timeout_secs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn csv(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
