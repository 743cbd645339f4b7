use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use feed_rs::parser;
use regex::Regex;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::FetchError;
use crate::orchestrator::FetchTask;
use crate::section::{SectionPayload, SectionShape};

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));

const SUMMARY_MAX_CHARS: usize = 200;

const SUN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Placeholder shown when sunrise and sunset could not be fetched.
pub fn astronomy_fallback() -> SectionPayload {
    let mut fields = Map::new();
    for key in ["sunrise", "sunset", "dayLength"] {
        fields.insert(key.to_string(), json!("--"));
    }
    SectionPayload::Record(fields)
}

/// HTTP adapters for every content source. Each `fetch_*` is a zero-argument
/// operation from the orchestrator's point of view.
pub struct Fetcher {
    client: Client,
    config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
struct HnItem {
    #[serde(default)]
    title: String,
    url: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    descendants: i64,
}

#[derive(Debug, Deserialize)]
struct RepoSearch {
    #[serde(default)]
    items: Vec<Repo>,
}

#[derive(Debug, Deserialize)]
struct Repo {
    full_name: String,
    html_url: String,
    description: Option<String>,
    #[serde(default)]
    stargazers_count: i64,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SunForecast {
    daily: DailySun,
}

#[derive(Debug, Deserialize)]
struct DailySun {
    #[serde(default)]
    sunrise: Vec<String>,
    #[serde(default)]
    sunset: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: QuoteMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
}

/// Last traded price and, when known, the previous session's close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    current: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    weather_code: i64,
    wind_speed_10m: f64,
}

impl Fetcher {
    pub fn new(config: Arc<Config>) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent("DailyBrief/1.0 (Newsletter Aggregator)")
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// One task per section, in a stable order.
    pub fn tasks(self: &Arc<Self>) -> Vec<FetchTask> {
        let news = self.clone();
        let hn = self.clone();
        let arxiv = self.clone();
        let github = self.clone();
        let weather = self.clone();
        let stocks = self.clone();
        let astronomy = self.clone();
        let exchange_rates = self.clone();

        vec![
            FetchTask::new("news", SectionShape::List, move || async move {
                news.fetch_news().await
            }),
            FetchTask::new("hn", SectionShape::List, move || async move {
                hn.fetch_hn().await
            }),
            FetchTask::new("arxiv", SectionShape::List, move || async move {
                arxiv.fetch_arxiv().await
            }),
            FetchTask::new("github_trending", SectionShape::List, move || async move {
                github.fetch_github_trending().await
            }),
            FetchTask::new("weather", SectionShape::Record, move || async move {
                weather.fetch_weather().await
            }),
            FetchTask::new("stocks", SectionShape::List, move || async move {
                stocks.fetch_stocks().await
            }),
            FetchTask::new("astronomy", SectionShape::Record, move || async move {
                astronomy.fetch_astronomy().await
            })
            .with_fallback(astronomy_fallback()),
            FetchTask::new("exchange_rates", SectionShape::List, move || async move {
                exchange_rates.fetch_exchange_rates().await
            }),
        ]
    }

    /// `quota` scaled by the over-fetch multiplier, saturating on absurd config.
    pub fn over_fetch(&self, quota: usize) -> usize {
        quota.saturating_mul(self.config.fetch_multiplier())
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Response, FetchError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    pub async fn fetch_news(&self) -> Result<SectionPayload, FetchError> {
        let feeds = &self.config.news.feeds;
        if feeds.is_empty() {
            return Ok(SectionPayload::List(Vec::new()));
        }

        let effective_max = self.over_fetch(self.config.news.max_items);
        let per_feed = Self::per_feed_limit(effective_max, feeds.len());

        let mut entries = Vec::new();
        let mut failures = 0;
        for url in feeds {
            match self.fetch_feed(url, per_feed).await {
                Ok(items) => entries.extend(items),
                Err(e) => {
                    failures += 1;
                    warn!("Failed to fetch feed {}: {}", url, e);
                }
            }
        }
        if failures == feeds.len() {
            return Err(FetchError::Source(format!("all {} news feeds failed", failures)));
        }

        let mut unique = Self::dedupe_headlines(entries);
        unique.truncate(effective_max);
        info!("Collected {} news stories from {} feeds", unique.len(), feeds.len());
        Ok(SectionPayload::List(unique))
    }

    async fn fetch_feed(&self, url: &str, limit: usize) -> Result<Vec<Value>, FetchError> {
        let bytes = self.get(url, &[]).await?.bytes().await?;
        let parsed = parser::parse(&bytes[..])?;

        let source = parsed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| url.to_string());

        Ok(parsed
            .entries
            .into_iter()
            .take(limit)
            .map(|entry| {
                let summary = entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body))
                    .unwrap_or_default();
                json!({
                    "headline": entry.title.map(|t| t.content).unwrap_or_default(),
                    "summary": Self::clean_summary(&summary),
                    "source": source,
                    "url": entry.links.first().map(|l| l.href.clone()).unwrap_or_else(|| "#".to_string()),
                    "category": entry
                        .categories
                        .first()
                        .map(|c| c.label.clone().unwrap_or_else(|| c.term.clone()))
                        .unwrap_or_default(),
                })
            })
            .collect())
    }

    /// At least two stories per feed, so no single source dominates.
    pub fn per_feed_limit(effective_max: usize, feed_count: usize) -> usize {
        (effective_max / feed_count.max(1)).saturating_add(1).max(2)
    }

    /// Drop stories whose headline repeats an earlier one, ignoring case.
    pub fn dedupe_headlines(items: Vec<Value>) -> Vec<Value> {
        let mut seen = HashSet::new();
        items
            .into_iter()
            .filter(|item| {
                let key = item
                    .get("headline")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .trim()
                    .to_lowercase();
                seen.insert(key)
            })
            .collect()
    }

    /// Strip markup and common entities, capped at 200 characters.
    pub fn clean_summary(html: &str) -> String {
        let text = HTML_TAG
            .replace_all(html, "")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&#39;", "'")
            .replace("&quot;", "\"");
        let text = text.trim();
        if text.chars().count() > SUMMARY_MAX_CHARS {
            let cut: String = text.chars().take(SUMMARY_MAX_CHARS - 3).collect();
            format!("{}…", cut.trim_end())
        } else {
            text.to_string()
        }
    }

    pub async fn fetch_hn(&self) -> Result<SectionPayload, FetchError> {
        let base = self.config.hacker_news.api_base.trim_end_matches('/');
        let limit = self.over_fetch(self.config.hacker_news.max_stories);

        let ids: Vec<u64> = self
            .get(&format!("{}/topstories.json", base), &[])
            .await?
            .json()
            .await?;

        let mut stories = Vec::new();
        for id in ids.into_iter().take(limit) {
            let discussion = format!("https://news.ycombinator.com/item?id={}", id);
            let item = match self.fetch_hn_item(base, id).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to fetch HN story {}: {}", id, e);
                    continue;
                }
            };
            stories.push(json!({
                "title": item.title,
                "url": item.url.unwrap_or_else(|| discussion.clone()),
                "points": item.score,
                "commentCount": item.descendants,
                "hnUrl": discussion,
            }));
        }
        Ok(SectionPayload::List(stories))
    }

    async fn fetch_hn_item(&self, base: &str, id: u64) -> Result<Option<HnItem>, FetchError> {
        let item = self
            .get(&format!("{}/item/{}.json", base, id), &[])
            .await?
            .json()
            .await?;
        Ok(item)
    }

    pub async fn fetch_arxiv(&self) -> Result<SectionPayload, FetchError> {
        let queries = &self.config.arxiv.queries;
        let url = format!("{}/api/query", self.config.arxiv.api_base.trim_end_matches('/'));

        let mut papers = Vec::new();
        let mut failures = 0;
        for query in queries {
            let max_results = self.over_fetch(query.max_results);
            let params = [
                ("search_query", query.query.clone()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
                ("max_results", max_results.to_string()),
            ];
            let result = async {
                let bytes = self.get(&url, &params).await?.bytes().await?;
                Ok::<_, FetchError>(parser::parse(&bytes[..])?)
            }
            .await;

            match result {
                Ok(feed) => {
                    papers.extend(feed.entries.into_iter().take(max_results).map(|entry| {
                        let names: Vec<String> =
                            entry.authors.iter().map(|a| a.name.clone()).collect();
                        json!({
                            "title": entry.title.map(|t| collapse_whitespace(&t.content)).unwrap_or_default(),
                            "summary": entry.summary.map(|s| collapse_whitespace(&s.content)).unwrap_or_default(),
                            "authors": Self::author_line(&names),
                            "url": entry.id,
                            "category": query.label,
                        })
                    }));
                }
                Err(e) => {
                    failures += 1;
                    warn!("Failed to fetch arXiv ({}): {}", query.label, e);
                }
            }
        }

        if failures > 0 && failures == queries.len() {
            return Err(FetchError::Source(format!("all {} arXiv queries failed", failures)));
        }
        Ok(SectionPayload::List(papers))
    }

    /// First three authors, then "et al."
    pub fn author_line(names: &[String]) -> String {
        let mut line = names.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        if names.len() > 3 {
            line.push_str(" et al.");
        }
        line
    }

    pub async fn fetch_github_trending(&self) -> Result<SectionPayload, FetchError> {
        let cfg = &self.config.github_trending;
        let url = format!("{}/search/repositories", cfg.api_base.trim_end_matches('/'));
        let per_lang = self.over_fetch(cfg.max_per_lang);
        let since = (Utc::now() - ChronoDuration::days(7)).format("%Y-%m-%d");

        let mut repos = Vec::new();
        let mut failures = 0;
        for lang in &cfg.languages {
            let params = [
                ("q", format!("language:{} created:>{}", lang, since)),
                ("sort", "stars".to_string()),
                ("order", "desc".to_string()),
                ("per_page", per_lang.to_string()),
            ];
            let result = async {
                let search: RepoSearch = self.get(&url, &params).await?.json().await?;
                Ok::<_, FetchError>(search)
            }
            .await;

            match result {
                Ok(search) => {
                    repos.extend(search.items.into_iter().take(per_lang).map(|repo| {
                        json!({
                            "name": repo.full_name,
                            "url": repo.html_url,
                            "description": repo.description.unwrap_or_default(),
                            "stars": repo.stargazers_count,
                            "language": repo.language.unwrap_or_else(|| lang.clone()),
                        })
                    }));
                }
                Err(e) => {
                    failures += 1;
                    warn!("Failed to fetch GitHub trending for {}: {}", lang, e);
                }
            }
        }

        if failures > 0 && failures == cfg.languages.len() {
            return Err(FetchError::Source(format!("all {} languages failed", failures)));
        }
        Ok(SectionPayload::List(repos))
    }

    pub async fn fetch_weather(&self) -> Result<SectionPayload, FetchError> {
        let cfg = &self.config.weather;
        let url = format!("{}/v1/forecast", cfg.api_base.trim_end_matches('/'));
        let params = [
            ("latitude", cfg.latitude.to_string()),
            ("longitude", cfg.longitude.to_string()),
            ("current", "temperature_2m,weather_code,wind_speed_10m".to_string()),
        ];

        let forecast: Forecast = self.get(&url, &params).await?.json().await?;
        let current = forecast.current;

        let mut fields = Map::new();
        fields.insert("location".to_string(), json!(cfg.location));
        fields.insert("temperature".to_string(), json!(current.temperature_2m.round()));
        fields.insert("condition".to_string(), json!(Self::describe_weather(current.weather_code)));
        fields.insert("windSpeed".to_string(), json!(current.wind_speed_10m.round()));
        Ok(SectionPayload::Record(fields))
    }

    /// WMO weather interpretation code to a short description.
    pub fn describe_weather(code: i64) -> &'static str {
        match code {
            0 => "Clear",
            1 => "Mostly clear",
            2 => "Partly cloudy",
            3 => "Overcast",
            45 | 48 => "Fog",
            51 | 53 | 55 => "Drizzle",
            61 | 63 | 65 => "Rain",
            66 | 67 => "Freezing rain",
            71 | 73 | 75 | 77 => "Snow",
            80..=82 => "Showers",
            85 | 86 => "Snow showers",
            95..=99 => "Thunderstorm",
            _ => "Unknown",
        }
    }
    pub async fn fetch_astronomy(&self) -> Result<SectionPayload, FetchError> {
        let cfg = &self.config.weather;
        let url = format!("{}/v1/forecast", cfg.api_base.trim_end_matches('/'));
        let params = [
            ("latitude", cfg.latitude.to_string()),
            ("longitude", cfg.longitude.to_string()),
            ("daily", "sunrise,sunset".to_string()),
            ("timezone", "auto".to_string()),
            ("forecast_days", "1".to_string()),
        ];

        let forecast: SunForecast = self.get(&url, &params).await?.json().await?;
        let (Some(sunrise), Some(sunset)) =
            (forecast.daily.sunrise.first(), forecast.daily.sunset.first())
        else {
            return Err(FetchError::Source("forecast has no sunrise/sunset".to_string()));
        };
        Self::sun_times(sunrise, sunset).map(SectionPayload::Record)
    }

    /// Local `HH:MM` sunrise, sunset and golden hour (30 minutes before sunset),
    /// plus the day length.
    pub fn sun_times(sunrise: &str, sunset: &str) -> Result<Map<String, Value>, FetchError> {
        let parse = |value: &str| {
            NaiveDateTime::parse_from_str(value, SUN_TIME_FORMAT)
                .map_err(|e| FetchError::Source(format!("bad sun time '{}': {}", value, e)))
        };
        let rise = parse(sunrise)?;
        let set = parse(sunset)?;
        let day = set - rise;
        if day < ChronoDuration::zero() {
            return Err(FetchError::Source(format!("sunset {} precedes sunrise {}", sunset, sunrise)));
        }
        let golden = set - ChronoDuration::minutes(30);

        let mut fields = Map::new();
        fields.insert("sunrise".to_string(), json!(rise.format("%H:%M").to_string()));
        fields.insert("sunset".to_string(), json!(set.format("%H:%M").to_string()));
        fields.insert(
            "dayLength".to_string(),
            json!(format!("{}h {:02}m", day.num_hours(), day.num_minutes() % 60)),
        );
        fields.insert("goldenHour".to_string(), json!(golden.format("%H:%M").to_string()));
        fields.insert("note".to_string(), json!(""));
        Ok(fields)
    }

    async fn fetch_quote(&self, api_base: &str, symbol: &str) -> Result<Option<Quote>, FetchError> {
        let url = format!("{}/v8/finance/chart/{}", api_base.trim_end_matches('/'), symbol);
        let params = [("range", "5d".to_string()), ("interval", "1d".to_string())];
        let envelope: ChartEnvelope = self.get(&url, &params).await?.json().await?;

        let meta = match envelope.chart.result.and_then(|r| r.into_iter().next()) {
            Some(result) => result.meta,
            None => return Ok(None),
        };
        Ok(meta.regular_market_price.map(|price| Quote {
            price,
            previous_close: meta.previous_close.or(meta.chart_previous_close),
        }))
    }

    pub async fn fetch_stocks(&self) -> Result<SectionPayload, FetchError> {
        let cfg = &self.config.stocks;

        let mut rows = Vec::new();
        let mut failures = 0;
        for symbol in &cfg.symbols {
            match self.fetch_quote(&cfg.api_base, symbol).await {
                Ok(Some(Quote {
                    price,
                    previous_close: Some(previous),
                })) => {
                    let change = price - previous;
                    rows.push(json!({
                        "symbol": symbol,
                        "companyName": cfg.names.get(symbol).unwrap_or(symbol),
                        "price": round_to(price, 2),
                        "change": round_to(change, 2),
                        "changePercent": round_to(percent_of(change, previous), 2),
                    }));
                }
                Ok(_) => warn!("No quote for {}", symbol),
                Err(e) => {
                    failures += 1;
                    warn!("Failed to fetch stock {}: {}", symbol, e);
                }
            }
        }

        if failures > 0 && failures == cfg.symbols.len() {
            return Err(FetchError::Source(format!("all {} stock quotes failed", failures)));
        }
        Ok(SectionPayload::List(rows))
    }

    pub async fn fetch_exchange_rates(&self) -> Result<SectionPayload, FetchError> {
        let cfg = &self.config.exchange_rates;

        let mut rows = Vec::new();
        let mut failures = 0;
        for pair in &cfg.pairs {
            let ticker = format!("{}=X", pair.replace('/', ""));
            match self.fetch_quote(&cfg.api_base, &ticker).await {
                Ok(Some(quote)) => {
                    let previous = quote.previous_close.filter(|p| *p != 0.0);
                    let change = previous.map(|p| quote.price - p).unwrap_or(0.0);
                    rows.push(json!({
                        "pair": pair,
                        "rate": round_to(quote.price, 4),
                        "change": round_to(change, 4),
                        "changePercent": round_to(previous.map(|p| percent_of(change, p)).unwrap_or(0.0), 2),
                        "displayName": cfg.names.get(pair).unwrap_or(pair),
                    }));
                }
                Ok(None) => warn!("No rate for {}", pair),
                Err(e) => {
                    failures += 1;
                    warn!("Failed to fetch rate for {}: {}", pair, e);
                }
            }
        }

        if failures > 0 && failures == cfg.pairs.len() {
            return Err(FetchError::Source(format!("all {} exchange rates failed", failures)));
        }
        Ok(SectionPayload::List(rows))
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

fn percent_of(change: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        change / base * 100.0
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
