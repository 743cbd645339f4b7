use std::collections::BTreeMap;
use std::fmt::Write;

use serde_json::Value;
use tracing::{info, warn};

use super::client::RankingClient;
use super::parse::{parse_ranking, ParseError, RankingResponse};
use super::reorder::{reorder, truncate};
use crate::config::Quotas;
use crate::section::{SectionMap, SectionPayload};

pub type ItemRenderer = fn(&Value) -> String;
pub type PromptBuilder = fn(&RankingGroup) -> String;
pub type ResponseParser = fn(&str) -> Result<RankingResponse, ParseError>;

/// One candidate list inside a ranking group.
#[derive(Clone)]
pub struct Lane {
    /// Section the items came from and are written back to
    pub section: String,
    /// Key the model uses for this lane in its reply
    pub key: String,
    /// Heading shown above the items in the prompt
    pub label: String,
    /// Letter prepended to each item's index in the prompt
    pub prefix: char,
    pub quota: usize,
    pub items: Vec<Value>,
    pub render: ItemRenderer,
}

/// Correlated lanes ranked together in a single completion call.
#[derive(Clone)]
pub struct RankingGroup {
    pub name: String,
    pub editor: String,
    pub criteria: Vec<String>,
    pub lanes: Vec<Lane>,
    pub prompt_builder: PromptBuilder,
    pub response_parser: ResponseParser,
}

impl RankingGroup {
    pub fn new(name: impl Into<String>, editor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            editor: editor.into(),
            criteria: Vec::new(),
            lanes: Vec::new(),
            prompt_builder: build_prompt,
            response_parser: parse_ranking,
        }
    }

    pub fn criterion(mut self, criterion: impl Into<String>) -> Self {
        self.criteria.push(criterion.into());
        self
    }

    pub fn lane(mut self, lane: Lane) -> Self {
        self.lanes.push(lane);
        self
    }

    fn truncated(self) -> BTreeMap<String, Vec<Value>> {
        self.lanes
            .into_iter()
            .map(|lane| (lane.key, truncate(lane.items, lane.quota)))
            .collect()
    }
}

/// Default prompt: criteria, every lane's items tagged `{prefix}{index}`, then
/// the per-lane quotas and the exact reply shape.
pub fn build_prompt(group: &RankingGroup) -> String {
    let mut prompt = format!(
        "You are a {}. Rank the items below using these criteria:\n",
        group.editor
    );
    for (i, criterion) in group.criteria.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {}", i + 1, criterion);
    }

    for lane in &group.lanes {
        let _ = writeln!(prompt, "\n=== {} ===", lane.label);
        for (i, item) in lane.items.iter().enumerate() {
            let _ = writeln!(prompt, "{}{}: {}", lane.prefix, i, (lane.render)(item));
        }
    }

    let picks: Vec<String> = group
        .lanes
        .iter()
        .map(|lane| format!("the {} most important from {}", lane.quota, lane.label))
        .collect();
    let _ = writeln!(prompt, "\nSelect {}.", picks.join(", and "));

    let example: Vec<String> = group
        .lanes
        .iter()
        .map(|lane| format!("\"{}\": [0, 2, 1]", lane.key))
        .collect();
    let _ = writeln!(
        prompt,
        "Reply with JSON only, exactly in this shape and nothing else:\n{{{}}}",
        example.join(", ")
    );

    let tags: Vec<String> = group
        .lanes
        .iter()
        .map(|lane| format!("{0}0, {0}2, ...", lane.prefix))
        .collect();
    let _ = write!(
        prompt,
        "Each array holds the original item numbers (without the letter: {}) in recommended order.",
        tags.join(" / ")
    );
    prompt
}

/// Reorders and trims over-fetched sections with a completion model, or
/// truncates them in their original order when ranking is unavailable.
pub struct Reranker {
    enabled: bool,
    client: Option<RankingClient>,
    models: Vec<String>,
}

impl Reranker {
    pub fn new(enabled: bool, client: Option<RankingClient>, models: Vec<String>) -> Self {
        Self {
            enabled,
            client,
            models,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, None, Vec::new())
    }

    /// Rank every lane of `group` with one completion call. Returns the final
    /// items keyed by lane key; each list has at most its lane's quota.
    pub async fn rank_group(&self, group: RankingGroup) -> BTreeMap<String, Vec<Value>> {
        let client = match (&self.client, self.enabled) {
            (Some(client), true) => client,
            (_, false) => return group.truncated(),
            (None, true) => {
                warn!("Ranking '{}' skipped: no completion client", group.name);
                return group.truncated();
            }
        };

        if group.lanes.iter().all(|lane| lane.items.is_empty()) {
            return group.truncated();
        }

        info!("Ranking '{}' ({} lanes)", group.name, group.lanes.len());
        let prompt = (group.prompt_builder)(&group);
        let Some(text) = client.generate(&prompt, &self.models).await else {
            warn!("Ranking '{}' fell back to original order: no model response", group.name);
            return group.truncated();
        };

        let response = (group.response_parser)(&text).unwrap_or_else(|e| {
            warn!("Ranking '{}' response unusable: {}", group.name, e);
            RankingResponse::default()
        });

        let name = group.name;
        let ranked: BTreeMap<String, Vec<Value>> = group
            .lanes
            .into_iter()
            .map(|lane| {
                let indices = response.indices(&lane.key);
                if indices.is_empty() && !lane.items.is_empty() {
                    warn!("Ranking '{}' gave no order for '{}'", name, lane.key);
                }
                let ranked = reorder(lane.items, indices, lane.quota);
                (lane.key, ranked)
            })
            .collect();
        info!("Ranking '{}' done", name);
        ranked
    }

    /// Current events (news + hn), then tech content (arxiv + github_trending).
    /// Groups run one after the other so their calls share the rate gate in order.
    pub async fn rank_sections(&self, sections: &mut SectionMap, quotas: &Quotas) {
        let groups = [current_events_group as GroupFactory, tech_content_group];
        for factory in groups {
            let group = factory(sections, quotas);
            let targets: Vec<(String, String)> = group
                .lanes
                .iter()
                .map(|lane| (lane.key.clone(), lane.section.clone()))
                .collect();

            let mut ranked = self.rank_group(group).await;
            for (key, section) in targets {
                if let Some(items) = ranked.remove(&key) {
                    put_items(sections, &section, items);
                }
            }
        }
        info!("Ranking complete");
    }
}

type GroupFactory = fn(&mut SectionMap, &Quotas) -> RankingGroup;

fn take_items(sections: &mut SectionMap, name: &str) -> Vec<Value> {
    match sections.get_mut(name).map(|s| &mut s.payload) {
        Some(SectionPayload::List(items)) => std::mem::take(items),
        _ => Vec::new(),
    }
}

fn put_items(sections: &mut SectionMap, name: &str, ranked: Vec<Value>) {
    if let Some(SectionPayload::List(items)) = sections.get_mut(name).map(|s| &mut s.payload) {
        *items = ranked;
    }
}

fn text_field<'a>(item: &'a Value, keys: &[&str]) -> &'a str {
    keys.iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str))
        .unwrap_or("")
}

fn number_field(item: &Value, key: &str) -> i64 {
    item.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn render_news(item: &Value) -> String {
    format!(
        "[{}] {}",
        text_field(item, &["source"]),
        text_field(item, &["headline", "title"])
    )
}

fn render_hn(item: &Value) -> String {
    format!(
        "[points={}] {}",
        number_field(item, "points"),
        text_field(item, &["title"])
    )
}

fn render_arxiv(item: &Value) -> String {
    format!(
        "[{}] {}",
        text_field(item, &["category"]),
        text_field(item, &["title"])
    )
}

fn render_github(item: &Value) -> String {
    format!(
        "[{}, stars={}] {} - {}",
        text_field(item, &["language"]),
        number_field(item, "stars"),
        text_field(item, &["name"]),
        text_field(item, &["description"])
    )
}

pub fn current_events_group(sections: &mut SectionMap, quotas: &Quotas) -> RankingGroup {
    RankingGroup::new("current-events", "news editor")
        .criterion("Importance and impact")
        .criterion("Informational value")
        .criterion("Topic diversity (avoid repeated topics)")
        .lane(Lane {
            section: "news".to_string(),
            key: "news".to_string(),
            label: "NEWS".to_string(),
            prefix: 'N',
            quota: quotas.news,
            items: take_items(sections, "news"),
            render: render_news,
        })
        .lane(Lane {
            section: "hn".to_string(),
            key: "hn".to_string(),
            label: "HACKER NEWS".to_string(),
            prefix: 'H',
            quota: quotas.hn,
            items: take_items(sections, "hn"),
            render: render_hn,
        })
}

pub fn tech_content_group(sections: &mut SectionMap, quotas: &Quotas) -> RankingGroup {
    RankingGroup::new("tech-content", "technology editor")
        .criterion("Technical novelty and impact")
        .criterion("Practical and learning value")
        .criterion("Topic diversity")
        .lane(Lane {
            section: "arxiv".to_string(),
            key: "arxiv".to_string(),
            label: "ARXIV PAPERS".to_string(),
            prefix: 'A',
            quota: quotas.arxiv,
            items: take_items(sections, "arxiv"),
            render: render_arxiv,
        })
        .lane(Lane {
            section: "github_trending".to_string(),
            key: "github".to_string(),
            label: "GITHUB TRENDING".to_string(),
            prefix: 'G',
            quota: quotas.github,
            items: take_items(sections, "github_trending"),
            render: render_github,
        })
}
