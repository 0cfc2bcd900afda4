//! Rich-text formatting resolution.
//!
//! Pure data transforms only: a message body plus per-category style ranges
//! in, renderable segments out. Nothing here touches the network or the
//! store.

use serde::Serialize;

use event_schema::{ColorRange, LinkRange, MessageFormatting, Range};

/// Style categories that support exact-range toggling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleCategory {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Code,
}

/// Wrappers a renderer nests around one segment, innermost first. The order
/// is fixed so identical input always nests identically, regardless of the
/// order ranges were inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrapper {
    Code,
    Link,
    Color,
    Bold,
    Italic,
    Underline,
    Strikethrough,
}

/// The set of formats active at one character offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActiveFormats {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub code: bool,
    pub link: Option<String>,
    pub color: Option<String>,
}

impl ActiveFormats {
    pub fn is_plain(&self) -> bool {
        self == &ActiveFormats::default()
    }

    /// Wrapper application order for this format set, innermost first.
    pub fn nesting(&self) -> Vec<Wrapper> {
        let mut wrappers = Vec::new();
        if self.code {
            wrappers.push(Wrapper::Code);
        }
        if self.link.is_some() {
            wrappers.push(Wrapper::Link);
        }
        if self.color.is_some() {
            wrappers.push(Wrapper::Color);
        }
        if self.bold {
            wrappers.push(Wrapper::Bold);
        }
        if self.italic {
            wrappers.push(Wrapper::Italic);
        }
        if self.underline {
            wrappers.push(Wrapper::Underline);
        }
        if self.strikethrough {
            wrappers.push(Wrapper::Strikethrough);
        }
        wrappers
    }
}

/// A run of characters sharing one active-format set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    pub formats: ActiveFormats,
}

pub struct FormattingEngine;

impl FormattingEngine {
    fn active_at(formatting: &MessageFormatting, offset: usize) -> ActiveFormats {
        ActiveFormats {
            bold: formatting.bold.iter().any(|r| r.contains(offset)),
            italic: formatting.italic.iter().any(|r| r.contains(offset)),
            underline: formatting.underline.iter().any(|r| r.contains(offset)),
            strikethrough: formatting
                .strikethrough
                .iter()
                .any(|r| r.contains(offset)),
            code: formatting.code.iter().any(|r| r.contains(offset)),
            link: formatting
                .links
                .iter()
                .find(|l| l.range.contains(offset))
                .map(|l| l.url.clone()),
            color: formatting
                .colors
                .iter()
                .find(|c| c.range.contains(offset))
                .map(|c| c.value.clone()),
        }
    }

    /// Resolve a body and its range lists into the minimal segmentation:
    /// adjacent offsets with identical active-format sets share a segment.
    pub fn render(content: &str, formatting: &MessageFormatting) -> Vec<Segment> {
        let mut segments: Vec<Segment> = Vec::new();

        for (offset, ch) in content.chars().enumerate() {
            let formats = Self::active_at(formatting, offset);
            match segments.last_mut() {
                Some(last) if last.formats == formats => last.text.push(ch),
                _ => segments.push(Segment {
                    text: ch.to_string(),
                    formats,
                }),
            }
        }

        segments
    }

    fn category_ranges<'a>(
        formatting: &'a mut MessageFormatting,
        category: StyleCategory,
    ) -> &'a mut Vec<Range> {
        match category {
            StyleCategory::Bold => &mut formatting.bold,
            StyleCategory::Italic => &mut formatting.italic,
            StyleCategory::Underline => &mut formatting.underline,
            StyleCategory::Strikethrough => &mut formatting.strikethrough,
            StyleCategory::Code => &mut formatting.code,
        }
    }

    /// Toggle a range within one category: an exact match is removed,
    /// anything else is inserted in start-offset order.
    ///
    /// Only range-identical toggles are idempotent. Toggling a sub-range of
    /// an existing range does not split it; the sub-range is simply added.
    /// Returns true when the range was added.
    pub fn toggle(
        formatting: &mut MessageFormatting,
        category: StyleCategory,
        range: Range,
    ) -> bool {
        let ranges = Self::category_ranges(formatting, category);

        if let Some(position) = ranges.iter().position(|r| *r == range) {
            ranges.remove(position);
            return false;
        }

        let insert_at = ranges
            .iter()
            .position(|r| r.start > range.start)
            .unwrap_or(ranges.len());
        ranges.insert(insert_at, range);
        true
    }

    /// Links are append-only; there is no in-place removal path.
    pub fn add_link(formatting: &mut MessageFormatting, range: Range, url: impl Into<String>) {
        let insert_at = formatting
            .links
            .iter()
            .position(|l| l.range.start > range.start)
            .unwrap_or(formatting.links.len());
        formatting.links.insert(
            insert_at,
            LinkRange {
                range,
                url: url.into(),
            },
        );
    }

    /// Colors are append-only, like links.
    pub fn add_color(formatting: &mut MessageFormatting, range: Range, value: impl Into<String>) {
        let insert_at = formatting
            .colors
            .iter()
            .position(|c| c.range.start > range.start)
            .unwrap_or(formatting.colors.len());
        formatting.colors.insert(
            insert_at,
            ColorRange {
                range,
                value: value.into(),
            },
        );
    }
}
