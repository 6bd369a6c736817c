//! Text-box layout: word wrap, hanging-indent bullets, ellipsis truncation and
//! alignment inside a fixed region.
//!
//! Everything here is pure computation over strings and numbers. Boxes are
//! expressed in top-left page coordinates (y grows downward); converting the
//! resulting baselines into PDF space is the job of [`crate::geometry::PageFrame`].

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// Glyph that marks a bullet paragraph.
pub const BULLET: char = '•';
/// Appended to the last kept line when a box hits its line cap.
pub const ELLIPSIS: &str = "…";

/// Width of a run of text at a given size, in points.
///
/// The layout code treats this as a black box. Any `Fn(&str, f32) -> f32`
/// closure works, which keeps tests free of real font files.
pub trait Measure {
    fn text_width(&self, text: &str, size: f32) -> f32;
}

impl<F> Measure for F
where
    F: Fn(&str, f32) -> f32,
{
    fn text_width(&self, text: &str, size: f32) -> f32 {
        self(text, size)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    #[default]
    Top,
    Middle,
    Bottom,
}

fn default_size() -> f32 {
    12.0
}

/// A rectangular text region, top-left origin, in page points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    #[serde(default = "default_size")]
    pub size: f32,
    #[serde(default)]
    pub align: Align,
    #[serde(default)]
    pub valign: VAlign,
    /// `0` means no cap.
    #[serde(default)]
    pub max_lines: u32,
    /// Extra space between baselines beyond the font size. Unset means
    /// `max(2, round(size * 0.2))`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_gap: Option<f32>,
    #[serde(default)]
    pub pad: f32,
}

impl TextBox {
    pub const fn new(x: f32, y: f32, w: f32, h: f32, size: f32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            size,
            align: Align::Left,
            valign: VAlign::Top,
            max_lines: 0,
            line_gap: None,
            pad: 0.0,
        }
    }

    pub const fn with_align(self, align: Align) -> Self {
        Self { align, ..self }
    }

    pub const fn with_valign(self, valign: VAlign) -> Self {
        Self { valign, ..self }
    }

    pub const fn with_max_lines(self, max_lines: u32) -> Self {
        Self { max_lines, ..self }
    }

    pub const fn with_pad(self, pad: f32) -> Self {
        Self { pad, ..self }
    }

    pub fn line_gap(&self) -> f32 {
        self.line_gap
            .unwrap_or_else(|| (self.size * 0.2).round().max(2.0))
    }

    pub fn line_height(&self) -> f32 {
        self.size + self.line_gap()
    }

    pub fn inner_width(&self) -> f32 {
        self.w - self.pad * 2.0
    }

    pub fn inner_height(&self) -> f32 {
        self.h - self.pad * 2.0
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.w, self.h)
    }
}

/// One wrapped line and its shift from the box's left inner edge.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord {
    pub content: String,
    pub dx: f32,
}

impl LineRecord {
    fn flush(content: String) -> Self {
        Self { content, dx: 0.0 }
    }

    fn blank() -> Self {
        Self::flush(String::new())
    }
}

/// A line ready to draw. `baseline` is measured downward from the page top.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x: f32,
    pub baseline: f32,
}

/// Space between the bullet lead and wrapped continuation text.
pub fn bullet_gap(size: f32) -> f32 {
    (size * 0.35).round().max(4.0)
}

/// Greedy word wrap of a single paragraph.
///
/// Whitespace runs collapse to one space. A word wider than `available` is
/// placed alone on its own line rather than split, so a non-positive budget
/// degrades to one word per line.
pub fn wrap_paragraph<M>(text: &str, available: f32, size: f32, measure: &M) -> Vec<String>
where
    M: Measure + ?Sized,
{
    wrap_words(text.split_whitespace(), |_| available, size, measure)
}

/// Core of [`wrap_paragraph`] with a per-line budget, indexed by the number of
/// lines already committed.
fn wrap_words<'a, M, B>(
    words: impl IntoIterator<Item = &'a str>,
    budget: B,
    size: f32,
    measure: &M,
) -> Vec<String>
where
    M: Measure + ?Sized,
    B: Fn(usize) -> f32,
{
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in words {
        if line.is_empty() {
            line.push_str(word);
            continue;
        }
        let candidate = format!("{line} {word}");
        if measure.text_width(&candidate, size) <= budget(lines.len()) {
            line = candidate;
        } else {
            lines.push(std::mem::replace(&mut line, word.to_string()));
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Wraps multi-paragraph text, giving bullet paragraphs a hanging indent.
///
/// Paragraphs are split on `\n`. A blank paragraph yields a blank record so
/// vertical spacing survives, but blank records at the very end are dropped.
/// A paragraph whose first non-space character is [`BULLET`] keeps `"• "` on
/// its first line; continuation lines carry `dx = lead + gap` instead.
pub fn wrap_rich<M>(text: &str, width: f32, size: f32, measure: &M) -> Vec<LineRecord>
where
    M: Measure + ?Sized,
{
    let text = text.replace('\r', "");
    let lead = format!("{BULLET} ");
    let lead_width = measure.text_width(&lead, size);
    let indent = lead_width + bullet_gap(size);

    let mut out = Vec::new();
    for paragraph in text.split('\n') {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            out.push(LineRecord::blank());
            continue;
        }

        let Some(rest) = trimmed.strip_prefix(BULLET) else {
            out.extend(
                wrap_paragraph(trimmed, width, size, measure)
                    .into_iter()
                    .map(LineRecord::flush),
            );
            continue;
        };

        let budget = |committed: usize| {
            if committed == 0 {
                width - lead_width
            } else {
                width - indent
            }
        };
        for (i, line) in wrap_words(rest.split_whitespace(), budget, size, measure)
            .into_iter()
            .enumerate()
        {
            out.push(if i == 0 {
                LineRecord::flush(format!("{lead}{line}"))
            } else {
                LineRecord {
                    content: line,
                    dx: indent,
                }
            });
        }
    }

    while out.last().is_some_and(|line| line.content.is_empty()) {
        out.pop();
    }
    out
}

/// Caps `lines` at `max_lines`, ending the last kept line with an ellipsis that
/// fits its available width (`width - dx`). `max_lines == 0` disables the cap.
///
/// Output that is already within the cap is left untouched, so applying this
/// twice gives the same result.
pub fn truncate_lines<M>(
    lines: &mut Vec<LineRecord>,
    max_lines: usize,
    width: f32,
    size: f32,
    measure: &M,
) where
    M: Measure + ?Sized,
{
    if max_lines == 0 || lines.len() <= max_lines {
        return;
    }
    lines.truncate(max_lines);
    if let Some(last) = lines.last_mut() {
        last.content = ellipsize(&last.content, width - last.dx, size, measure);
    }
}

fn ellipsize<M>(content: &str, available: f32, size: f32, measure: &M) -> String
where
    M: Measure + ?Sized,
{
    let mut kept = content.trim_end().to_string();
    while !kept.is_empty() && measure.text_width(&format!("{kept}{ELLIPSIS}"), size) > available {
        kept.pop();
        let end = kept.trim_end().len();
        kept.truncate(end);
    }
    kept.push_str(ELLIPSIS);
    kept
}

/// Lays `text` out inside `text_box` and returns the lines to draw.
///
/// Lines past `max_lines` are cut with an ellipsis; lines that still do not fit
/// the inner height are dropped from the bottom without a marker. Blank text
/// yields nothing.
pub fn layout_box<M>(text: &str, text_box: &TextBox, measure: &M) -> Vec<PlacedLine>
where
    M: Measure + ?Sized,
{
    if text.trim().is_empty() {
        return Vec::new();
    }

    let size = text_box.size;
    let inner_w = text_box.inner_width();
    let inner_h = text_box.inner_height();

    let mut lines = wrap_rich(text, inner_w, size, measure);
    truncate_lines(&mut lines, text_box.max_lines as usize, inner_w, size, measure);

    let lh = text_box.line_height();
    let max_fit = if lh > 0.0 && inner_h > 0.0 {
        (inner_h / lh).floor() as usize
    } else {
        0
    };
    lines.truncate(max_fit);
    if lines.is_empty() {
        return Vec::new();
    }

    let block = (lines.len() - 1) as f32 * lh + size;
    let top = text_box.y + text_box.pad;
    let first_baseline = match text_box.valign {
        VAlign::Top => top + size,
        VAlign::Middle => top + (inner_h - block) / 2.0 + size,
        VAlign::Bottom => top + inner_h - block + size,
    };

    lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            let left = text_box.x + text_box.pad + line.dx;
            let x = match text_box.align {
                Align::Left => left,
                Align::Center => {
                    left + (inner_w - measure.text_width(&line.content, size)) / 2.0
                }
                Align::Right => left + inner_w - measure.text_width(&line.content, size),
            };
            PlacedLine {
                text: line.content,
                x,
                baseline: first_baseline + i as f32 * lh,
            }
        })
        .collect()
}
