use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The four entity collections the terminal knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Jobs,
    Properties,
    People,
    Opportunities,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Jobs,
        EntityKind::Properties,
        EntityKind::People,
        EntityKind::Opportunities,
    ];

    /// Resolve a `list`/`count` argument, including the synonyms the
    /// terminal accepts (`staff`/`users` for people, `opps` for
    /// opportunities).
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "jobs" => Some(EntityKind::Jobs),
            "properties" => Some(EntityKind::Properties),
            "people" | "staff" | "users" => Some(EntityKind::People),
            "opps" | "opportunities" | "service-opportunities" => Some(EntityKind::Opportunities),
            _ => None,
        }
    }

    /// Resolve a `find`/`search` type argument (singular forms).
    pub fn parse_search(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "job" | "jobs" => Some(EntityKind::Jobs),
            "property" | "properties" => Some(EntityKind::Properties),
            "person" | "people" => Some(EntityKind::People),
            "opp" | "opps" | "opportunity" | "opportunities" => Some(EntityKind::Opportunities),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Jobs => "Jobs",
            EntityKind::Properties => "Properties",
            EntityKind::People => "People",
            EntityKind::Opportunities => "Service Opportunities",
        }
    }

    /// Short tag used for export buffers and CSV column projection.
    pub fn export_tag(&self) -> &'static str {
        match self {
            EntityKind::Jobs => "jobs",
            EntityKind::Properties => "properties",
            EntityKind::People => "people",
            EntityKind::Opportunities => "opps",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Wire shape of a data-service read: a success flag, the records, or an
/// error message. A missing array on success means an empty result set.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct FetchOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchOutcome {
    pub fn ok(records: Vec<Value>) -> Self {
        Self {
            success: true,
            records: Some(records),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            records: None,
            error: Some(message.into()),
        }
    }

    /// `success: false` becomes an error carrying the service's message;
    /// a missing array becomes an empty one.
    pub fn into_result(self) -> Result<Vec<Value>> {
        if self.success {
            Ok(self.records.unwrap_or_default())
        } else {
            Err(anyhow!(self
                .error
                .unwrap_or_else(|| "unknown data service error".to_string())))
        }
    }
}

/// Read-only entity data service. `Send + Sync` so `refresh` and `count all`
/// can fan out the four fetches across scoped threads.
pub trait DataService: Send + Sync {
    fn fetch(&self, kind: EntityKind) -> FetchOutcome;
}

/// Maps a resolved route path to an actual view transition.
pub trait Navigator {
    fn navigate(&self, path: &str);
}

/// Clipboard sink. Write failures surface their message verbatim in the
/// transcript.
pub trait Clipboard {
    fn write_text(&self, text: &str) -> Result<()>;
}

/// Named-blob delivery. Fire-and-forget from the interpreter's perspective;
/// there is no failure path observable to the core.
pub trait FileSink {
    fn deliver(&self, filename: &str, content: &str);
}

/// String field lookup on a JSON record.
pub fn str_field<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// String lookup along a nested path, e.g. `["properties", "name"]`.
pub fn nested_str<'a>(record: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = record;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_str()
}

/// Render any field as display text; numbers and bools keep their JSON form.
pub fn field_text(record: &Value, key: &str) -> Option<String> {
    match record.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// First eight characters of the record id, for compact link labels.
pub fn short_id(record: &Value) -> String {
    field_text(record, "id")
        .unwrap_or_default()
        .chars()
        .take(8)
        .collect()
}
