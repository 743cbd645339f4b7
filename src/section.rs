use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// The declared shape of a section, used to pick its fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionShape {
    List,
    Record,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SectionPayload {
    List(Vec<Value>),
    Record(Map<String, Value>),
}

impl SectionPayload {
    pub fn empty(shape: SectionShape) -> Self {
        match shape {
            SectionShape::List => SectionPayload::List(Vec::new()),
            SectionShape::Record => SectionPayload::Record(Map::new()),
        }
    }

    pub fn shape(&self) -> SectionShape {
        match self {
            SectionPayload::List(_) => SectionShape::List,
            SectionPayload::Record(_) => SectionShape::Record,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            SectionPayload::List(items) => Some(items),
            SectionPayload::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&Map<String, Value>> {
        match self {
            SectionPayload::Record(fields) => Some(fields),
            SectionPayload::List(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SectionPayload::List(items) => items.len(),
            SectionPayload::Record(fields) => fields.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Ok,
    Failed,
    Skipped,
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SectionStatus::Ok => "ok",
            SectionStatus::Failed => "failed",
            SectionStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Outcome of one fetch task. A failed or skipped section always carries
/// the fallback payload for its declared shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionResult {
    pub name: String,
    pub status: SectionStatus,
    pub payload: SectionPayload,
    pub error: Option<String>,
}

impl SectionResult {
    pub fn ok(name: impl Into<String>, payload: SectionPayload) -> Self {
        Self {
            name: name.into(),
            status: SectionStatus::Ok,
            payload,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, fallback: SectionPayload, error: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            status: SectionStatus::Failed,
            payload: fallback,
            error: Some(error.to_string()),
        }
    }

    pub fn skipped(name: impl Into<String>, fallback: SectionPayload) -> Self {
        Self {
            name: name.into(),
            status: SectionStatus::Skipped,
            payload: fallback,
            error: None,
        }
    }
}

/// Results keyed by section name. Ordered so that logs and snapshots are stable.
pub type SectionMap = BTreeMap<String, SectionResult>;

/// List items of a section, or an empty slice when the section is missing or
/// not list-shaped.
pub fn list_items<'a>(sections: &'a SectionMap, name: &str) -> &'a [Value] {
    sections
        .get(name)
        .and_then(|s| s.payload.as_list())
        .unwrap_or(&[])
}
