use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Styling class of a transcript segment.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Normal,
    Command,
    Info,
    Success,
    Error,
    System,
    Help,
    Link,
}

/// One styled span of a transcript line. `link` carries a navigable route
/// reference for link-kind segments.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Segment {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Segment {
    pub fn new(text: impl Into<String>, kind: SegmentKind) -> Self {
        Self {
            text: text.into(),
            kind,
            link: None,
        }
    }

    pub fn link(text: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: SegmentKind::Link,
            link: Some(href.into()),
        }
    }
}

/// A transcript line: an ordered sequence of segments plus a creation
/// timestamp. Immutable once appended to the transcript.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputLine {
    pub content: Vec<Segment>,
    pub timestamp: DateTime<Utc>,
}

impl OutputLine {
    pub fn plain(text: impl Into<String>, kind: SegmentKind) -> Self {
        Self {
            content: vec![Segment::new(text, kind)],
            timestamp: Utc::now(),
        }
    }

    pub fn segments(content: Vec<Segment>) -> Self {
        Self {
            content,
            timestamp: Utc::now(),
        }
    }

    /// Flatten to plain text by concatenating segment texts. Used by both the
    /// capture path and file/clipboard exports.
    pub fn flatten(&self) -> String {
        self.content.iter().map(|seg| seg.text.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_concatenates_segments() {
        let line = OutputLine::segments(vec![
            Segment::new("  #abc123...", SegmentKind::Link),
            Segment::new(" [ACTIVE] Main St", SegmentKind::Normal),
        ]);
        assert_eq!(line.flatten(), "  #abc123... [ACTIVE] Main St");
    }

    #[test]
    fn test_segment_serde_shape() {
        let seg = Segment::link("x", "/jobs?id=1");
        let json = serde_json::to_value(&seg).unwrap();
        assert_eq!(json["type"], "link");
        assert_eq!(json["link"], "/jobs?id=1");

        let plain = Segment::new("y", SegmentKind::Error);
        let json = serde_json::to_value(&plain).unwrap();
        assert_eq!(json["type"], "error");
        assert!(json.get("link").is_none());
    }
}
