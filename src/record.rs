// Protocol records as returned by feed queries, plus the timestamp formats
// posts are known to carry.

use crate::error::{Error, Result};
use crate::richtext::{Span, SpanKind};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeedViewPost {
    pub post: PostView,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    #[serde(default)]
    pub cid: String,
    pub author: Author,
    pub record: FeedPost,
    #[serde(default)]
    pub embed: Option<EmbedView>,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub repost_count: Option<i64>,
    #[serde(default)]
    pub reply_count: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub text: String,
    pub created_at: String,
    #[serde(default)]
    pub entities: Option<Vec<Entity>>,
    #[serde(default)]
    pub facets: Option<Vec<Facet>>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
}

/// Legacy annotation with code-point offsets.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Entity {
    pub index: TextSlice,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct TextSlice {
    pub start: i64,
    pub end: i64,
}

/// Rich-text facet with UTF-8 byte offsets.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Facet {
    pub index: ByteSlice,
    #[serde(default)]
    pub features: Vec<FacetFeature>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: i64,
    pub byte_end: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FacetFeature {
    #[serde(rename = "$type")]
    pub kind: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplyRef {
    #[serde(default)]
    pub parent: Option<StrongRef>,
    #[serde(default)]
    pub root: Option<StrongRef>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StrongRef {
    pub uri: String,
    #[serde(default)]
    pub cid: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct EmbedView {
    #[serde(default)]
    pub images: Vec<ImageView>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImageView {
    pub fullsize: String,
    #[serde(default)]
    pub alt: String,
}

impl FeedPost {
    /// All annotation spans in code-point units, unsorted and unclamped.
    pub fn spans(&self) -> Vec<Span> {
        let mut spans = Vec::new();
        if let Some(entities) = &self.entities {
            for e in entities {
                let kind = if e.kind == "mention" {
                    SpanKind::Mention
                } else {
                    SpanKind::Link
                };
                spans.push(Span::new(e.index.start, e.index.end, kind));
            }
        }
        if let Some(facets) = &self.facets {
            for f in facets {
                let Some(kind) = f.features.iter().find_map(|feat| facet_kind(&feat.kind)) else {
                    continue;
                };
                let start = byte_to_char_offset(&self.text, f.index.byte_start);
                let end = byte_to_char_offset(&self.text, f.index.byte_end);
                spans.push(Span::new(start, end, kind));
            }
        }
        spans
    }

    pub fn created_at(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }
}

fn facet_kind(kind: &str) -> Option<SpanKind> {
    match kind {
        "app.bsky.richtext.facet#mention" => Some(SpanKind::Mention),
        "app.bsky.richtext.facet#link" => Some(SpanKind::Link),
        _ => None,
    }
}

/// Map a byte offset to the index of the character containing it. Offsets
/// outside the text pass through so the renderer can clamp them.
fn byte_to_char_offset(text: &str, byte: i64) -> i64 {
    if byte <= 0 {
        return byte;
    }
    let byte = byte as usize;
    if byte >= text.len() {
        return text.chars().count() as i64 + (byte - text.len()) as i64;
    }
    text.char_indices().take_while(|(i, _)| *i < byte).count() as i64
        - i64::from(!text.is_char_boundary(byte))
}

// `%.f` takes an optional fraction of any width, as the posting clients
// emit anything from no fraction to nanoseconds.
const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
const OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

/// Parse a record timestamp. Anything outside the accepted formats is an
/// error; there is no default time to fall back to.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    for f in [NAIVE_FORMAT, UTC_FORMAT] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, f) {
            return Ok(t.and_utc());
        }
    }
    if let Ok(t) = DateTime::parse_from_str(s, OFFSET_FORMAT) {
        return Ok(t.with_timezone(&Utc));
    }
    Err(Error::Format(format!("unrecognized timestamp {:?}", s)))
}

/// Millisecond-precision UTC form, accepted by `parse_timestamp`.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}
