//! Where each piece of the report goes. Page indices are zero-based and all
//! boxes use top-left coordinates on an A4 page (595 x 842 pt).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::document::Rgb;
use crate::geometry::Rect;
use crate::layout::{Align, TextBox};
use crate::payload::Field;
use crate::template::StateKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontRole {
    Regular,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextSlot {
    pub field: Field,
    pub page: usize,
    pub text_box: TextBox,
    pub font: FontRole,
    pub color: Rgb,
    /// Normalise the text into `•` paragraphs before layout.
    pub bullets: bool,
}

impl TextSlot {
    pub const fn new(field: Field, page: usize, text_box: TextBox) -> Self {
        Self {
            field,
            page,
            text_box,
            font: FontRole::Regular,
            color: Rgb::BLACK,
            bullets: field.is_tldr(),
        }
    }

    pub const fn bold(self) -> Self {
        Self {
            font: FontRole::Bold,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSlot {
    pub page: usize,
    pub rect: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightSlot {
    pub state: StateKey,
    pub page: usize,
    pub rect: Rect,
}

const BODY: f32 = 11.0;
const COLLAB: f32 = 10.5;
const LEFT: f32 = 60.0;
const FULL_W: f32 = 475.0;

const fn body(x: f32, y: f32, w: f32, h: f32, max_lines: u32) -> TextBox {
    TextBox::new(x, y, w, h, BODY).with_max_lines(max_lines)
}

pub const DEFAULT_TEXT_SLOTS: [TextSlot; 20] = [
    TextSlot::new(
        Field::FullName,
        0,
        TextBox::new(LEFT, 520.0, FULL_W, 40.0, 24.0)
            .with_align(Align::Center)
            .with_max_lines(1),
    )
    .bold(),
    TextSlot::new(
        Field::DateLabel,
        0,
        TextBox::new(LEFT, 566.0, FULL_W, 24.0, 14.0)
            .with_align(Align::Center)
            .with_max_lines(1),
    ),
    TextSlot::new(Field::ExecSummary, 2, body(LEFT, 140.0, FULL_W, 300.0, 22)),
    TextSlot::new(Field::ExecTldr, 2, body(LEFT, 470.0, FULL_W, 200.0, 10)),
    TextSlot::new(Field::StateSummary, 3, body(LEFT, 140.0, FULL_W, 220.0, 16)),
    TextSlot::new(Field::StateTldr, 3, body(LEFT, 380.0, 260.0, 200.0, 10)),
    TextSlot::new(Field::FreqSummary, 4, body(LEFT, 140.0, FULL_W, 300.0, 22)),
    TextSlot::new(Field::FreqTldr, 4, body(LEFT, 470.0, FULL_W, 200.0, 10)),
    TextSlot::new(Field::SeqSummary, 5, body(LEFT, 140.0, FULL_W, 300.0, 22)),
    TextSlot::new(Field::SeqTldr, 5, body(LEFT, 470.0, FULL_W, 200.0, 10)),
    TextSlot::new(Field::ThemeSummary, 6, body(LEFT, 140.0, FULL_W, 300.0, 22)),
    TextSlot::new(Field::ThemeTldr, 6, body(LEFT, 470.0, FULL_W, 200.0, 10)),
    TextSlot::new(
        Field::Collab(StateKey::C),
        7,
        TextBox::new(LEFT, 140.0, FULL_W, 130.0, COLLAB).with_max_lines(9),
    ),
    TextSlot::new(
        Field::Collab(StateKey::T),
        7,
        TextBox::new(LEFT, 290.0, FULL_W, 130.0, COLLAB).with_max_lines(9),
    ),
    TextSlot::new(
        Field::Collab(StateKey::R),
        7,
        TextBox::new(LEFT, 440.0, FULL_W, 130.0, COLLAB).with_max_lines(9),
    ),
    TextSlot::new(
        Field::Collab(StateKey::L),
        7,
        TextBox::new(LEFT, 590.0, FULL_W, 130.0, COLLAB).with_max_lines(9),
    ),
    TextSlot::new(Field::Tip(0), 8, body(LEFT, 160.0, FULL_W, 80.0, 5)),
    TextSlot::new(Field::Tip(1), 8, body(LEFT, 260.0, FULL_W, 80.0, 5)),
    TextSlot::new(Field::Action(0), 8, body(LEFT, 420.0, FULL_W, 80.0, 5)),
    TextSlot::new(Field::Action(1), 8, body(LEFT, 520.0, FULL_W, 80.0, 5)),
];

pub const DEFAULT_CHART_SLOT: ImageSlot = ImageSlot {
    page: 3,
    rect: Rect::new(335.0, 380.0, 200.0, 200.0),
};

pub const DEFAULT_HIGHLIGHT_SLOTS: [HighlightSlot; 4] = [
    HighlightSlot {
        state: StateKey::C,
        page: 3,
        rect: Rect::new(60.0, 620.0, 106.0, 36.0),
    },
    HighlightSlot {
        state: StateKey::T,
        page: 3,
        rect: Rect::new(183.0, 620.0, 106.0, 36.0),
    },
    HighlightSlot {
        state: StateKey::R,
        page: 3,
        rect: Rect::new(306.0, 620.0, 106.0, 36.0),
    },
    HighlightSlot {
        state: StateKey::L,
        page: 3,
        rect: Rect::new(429.0, 620.0, 106.0, 36.0),
    },
];

const BOX_KEYS: &[&str] = &[
    "x", "y", "w", "h", "size", "align", "valign", "maxLines", "lineGap", "pad",
];
const RECT_KEYS: &[&str] = &["x", "y", "w", "h"];
const CHART_KEY: &str = "chart";
const HIGHLIGHT_PREFIX: &str = "highlight_";

#[derive(Debug, Clone, PartialEq)]
pub struct ReportLayout {
    pub text: Vec<TextSlot>,
    pub chart: ImageSlot,
    pub highlights: Vec<HighlightSlot>,
}

impl Default for ReportLayout {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT_SLOTS.to_vec(),
            chart: DEFAULT_CHART_SLOT,
            highlights: DEFAULT_HIGHLIGHT_SLOTS.to_vec(),
        }
    }
}

/// Copies the allowed keys of `patch` over the serialised form of `base`.
fn merge_keys<T>(base: &T, patch: &Map<String, Value>, keys: &[&str]) -> Result<T, serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(base)?;
    if let Value::Object(target) = &mut merged {
        for (key, value) in patch.iter().filter(|(k, _)| keys.contains(&k.as_str())) {
            target.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(merged)
}

fn page_of(patch: &Map<String, Value>, current: usize) -> usize {
    patch
        .get("page")
        .and_then(Value::as_u64)
        .map(|p| p as usize)
        .unwrap_or(current)
}

impl ReportLayout {
    pub fn text_slot(&self, field: Field) -> Option<&TextSlot> {
        self.text.iter().find(|slot| slot.field == field)
    }

    /// Applies a payload `layout` object. Keys are field keys (`p3_exec_tldr`),
    /// `chart`, or `highlight_<STATE>`; values hold the properties to replace.
    /// Entries that do not parse are logged and skipped.
    pub fn with_override(&self, overrides: &Map<String, Value>) -> Self {
        let mut layout = self.clone();
        for (key, value) in overrides {
            let Some(patch) = value.as_object() else {
                warn!(key = %key, "⚠️ Ignoring layout override that is not an object");
                continue;
            };
            if let Err(e) = layout.apply(key, patch) {
                warn!(key = %key, "⚠️ Ignoring malformed layout override: {}", e);
            }
        }
        layout
    }

    fn apply(&mut self, key: &str, patch: &Map<String, Value>) -> Result<(), String> {
        if key == CHART_KEY {
            self.chart = ImageSlot {
                page: page_of(patch, self.chart.page),
                rect: merge_keys(&self.chart.rect, patch, RECT_KEYS).map_err(|e| e.to_string())?,
            };
            debug!(chart = ?self.chart, "chart slot overridden");
            return Ok(());
        }
        if let Some(state) = key.strip_prefix(HIGHLIGHT_PREFIX) {
            let state = StateKey::parse_loose(state).ok_or("unknown highlight state")?;
            let slot = self
                .highlights
                .iter_mut()
                .find(|slot| slot.state == state)
                .ok_or("no highlight slot for state")?;
            slot.rect = merge_keys(&slot.rect, patch, RECT_KEYS).map_err(|e| e.to_string())?;
            slot.page = page_of(patch, slot.page);
            return Ok(());
        }

        let field = Field::from_key(key).ok_or("unknown layout key")?;
        let slot = self
            .text
            .iter_mut()
            .find(|slot| slot.field == field)
            .ok_or("no text slot for field")?;
        let text_box = merge_keys(&slot.text_box, patch, BOX_KEYS).map_err(|e| e.to_string())?;
        let font = match patch.get("font") {
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| e.to_string())?,
            None => slot.font,
        };
        let color = match patch.get("color") {
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| e.to_string())?,
            None => slot.color,
        };
        slot.text_box = text_box;
        slot.font = font;
        slot.color = color;
        slot.page = page_of(patch, slot.page);
        debug!(field = key, text_box = ?slot.text_box, "text slot overridden");
        Ok(())
    }
}
