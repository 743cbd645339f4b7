use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::section::{list_items, SectionMap, SectionStatus};

/// The single JSON document produced by a run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub recipient_name: String,
    pub date: String,
    pub edition_number: i64,
    pub weather: Map<String, Value>,
    pub top_news: Vec<Value>,
    pub stocks: Vec<Value>,
    pub hn_stories: Vec<Value>,
    pub arxiv_papers: Vec<Value>,
    pub github_trending: Vec<Value>,
    pub exchange_rates: Vec<Value>,
    pub section_status: BTreeMap<String, SectionStatus>,
}

impl Snapshot {
    pub fn assemble(config: &Config, sections: &SectionMap, today: NaiveDate) -> Self {
        let mut weather = record(sections, "weather");
        merge_astronomy(&mut weather, &record(sections, "astronomy"));

        Self {
            recipient_name: config.recipient_name.clone(),
            date: date_string(today),
            edition_number: edition_number(config.edition_start, today),
            weather,
            top_news: list_items(sections, "news").to_vec(),
            stocks: list_items(sections, "stocks").to_vec(),
            hn_stories: list_items(sections, "hn").to_vec(),
            arxiv_papers: list_items(sections, "arxiv").to_vec(),
            github_trending: list_items(sections, "github_trending").to_vec(),
            exchange_rates: list_items(sections, "exchange_rates").to_vec(),
            section_status: sections
                .iter()
                .map(|(name, result)| (name.clone(), result.status))
                .collect(),
        }
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

fn record(sections: &SectionMap, name: &str) -> Map<String, Value> {
    sections
        .get(name)
        .and_then(|s| s.payload.as_record())
        .cloned()
        .unwrap_or_default()
}

/// Sun times are shown alongside the weather. Missing fields become "".
fn merge_astronomy(weather: &mut Map<String, Value>, astronomy: &Map<String, Value>) {
    if astronomy.is_empty() {
        return;
    }
    for (from, to) in [
        ("sunrise", "sunrise"),
        ("sunset", "sunset"),
        ("dayLength", "dayLength"),
        ("goldenHour", "goldenHour"),
        ("note", "astroNote"),
    ] {
        let value = astronomy.get(from).cloned().unwrap_or_else(|| Value::from(""));
        weather.insert(to.to_string(), value);
    }
}

/// Today's date at a fixed UTC offset; out-of-range offsets fall back to UTC.
pub fn today(offset_hours: i32) -> NaiveDate {
    let now = Utc::now();
    match FixedOffset::east_opt(offset_hours.saturating_mul(3600)) {
        Some(offset) => now.with_timezone(&offset).date_naive(),
        None => now.date_naive(),
    }
}

pub fn date_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d · %A").to_string()
}

/// Days since `start`, counting `start` itself as edition 1.
pub fn edition_number(start: Option<NaiveDate>, today: NaiveDate) -> i64 {
    match start {
        Some(start) => ((today - start).num_days() + 1).max(1),
        None => 1,
    }
}
