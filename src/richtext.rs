// Rich-text rendering: overlay mention/link spans onto post text.
//
// Span offsets are Unicode code points, half-open. They arrive from the
// network unsorted and possibly out of range, so they are clamped and
// stable-sorted before the single left-to-right walk.

use crossterm::style::Stylize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Mention,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: i64,
    pub end: i64,
    pub kind: SpanKind,
}

impl Span {
    pub fn new(start: i64, end: i64, kind: SpanKind) -> Self {
        Span { start, end, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Mention,
    Link,
}

impl From<SpanKind> for Style {
    fn from(kind: SpanKind) -> Self {
        match kind {
            SpanKind::Mention => Style::Mention,
            SpanKind::Link => Style::Link,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub style: Style,
}

/// Clamp every span to `0 <= start <= end <= len` and sort by start.
/// The sort is stable, so equal starts keep their arrival order.
pub fn normalize(len: usize, spans: &[Span]) -> Vec<Span> {
    let len = len as i64;
    let mut out: Vec<Span> = spans
        .iter()
        .map(|s| {
            let start = s.start.clamp(0, len);
            let end = s.end.clamp(start, len);
            Span::new(start, end, s.kind)
        })
        .collect();
    out.sort_by_key(|s| s.start);
    out
}

/// Split `text` into plain and styled segments. Concatenating the segments
/// always yields `text` again.
///
/// Overlapping spans are not merged. The cursor never moves backwards, so a
/// span that starts inside an earlier one only styles the part past the
/// cursor, and one that lies entirely behind it (or is empty) emits nothing.
pub fn render<'a>(text: &'a str, spans: &[Span]) -> Vec<Segment<'a>> {
    // Byte offset of every code point, plus the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;
    let slice = move |from: usize, to: usize| -> &'a str { &text[bounds[from]..bounds[to]] };

    let mut segments = Vec::new();
    let mut cursor = 0usize;
    for span in normalize(n_chars, spans) {
        let start = (span.start as usize).max(cursor);
        let end = span.end as usize;
        if end <= start {
            continue;
        }
        if start > cursor {
            segments.push(Segment {
                text: slice(cursor, start),
                style: Style::Plain,
            });
        }
        segments.push(Segment {
            text: slice(start, end),
            style: span.kind.into(),
        });
        cursor = end;
    }
    if cursor < n_chars {
        segments.push(Segment {
            text: slice(cursor, n_chars),
            style: Style::Plain,
        });
    }
    segments
}

/// Terminal form: mentions bold, links underlined.
pub fn to_ansi(segments: &[Segment<'_>]) -> String {
    segments
        .iter()
        .map(|seg| match seg.style {
            Style::Plain => seg.text.to_string(),
            Style::Mention => seg.text.bold().to_string(),
            Style::Link => seg.text.underlined().to_string(),
        })
        .collect()
}
